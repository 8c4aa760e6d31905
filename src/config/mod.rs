#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};

use crate::utils::error::{GraderError, Result};
use crate::utils::validation::{
    validate_positive_number, validate_range, validate_url, UrlValidator, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Settings resolved once at startup and handed to every adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderSettings {
    pub credentials: Credentials,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub endpoints: EndpointSettings,
    pub server: ServerSettings,
}

/// 各外部服務的憑證；空字串視為未設定
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub pagespeed_api_key: Option<String>,
    pub serpapi_key: Option<String>,
    pub gcs_api_key: Option<String>,
    pub gcs_cx: Option<String>,
    pub whoisxml_api_key: Option<String>,
    pub moz_access_id: Option<String>,
    pub moz_secret_key: Option<String>,
    pub ahrefs_api_key: Option<String>,
    pub majestic_api_key: Option<String>,
}

const CREDENTIAL_VARS: &[&str] = &[
    "PAGESPEED_API_KEY",
    "SERPAPI_KEY",
    "GCS_API_KEY",
    "GCS_CX",
    "WHOISXML_API_KEY",
    "MOZ_ACCESS_ID",
    "MOZ_SECRET_KEY",
    "AHREFS_API_KEY",
    "MAJESTIC_API_KEY",
];

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        // 未被替換的 ${VAR} 也視為缺少
        .filter(|v| !v.is_empty() && !(v.starts_with("${") && v.ends_with('}')))
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| present(lookup(name));
        Self {
            pagespeed_api_key: get(CREDENTIAL_VARS[0]),
            serpapi_key: get(CREDENTIAL_VARS[1]),
            gcs_api_key: get(CREDENTIAL_VARS[2]),
            gcs_cx: get(CREDENTIAL_VARS[3]),
            whoisxml_api_key: get(CREDENTIAL_VARS[4]),
            moz_access_id: get(CREDENTIAL_VARS[5]),
            moz_secret_key: get(CREDENTIAL_VARS[6]),
            ahrefs_api_key: get(CREDENTIAL_VARS[7]),
            majestic_api_key: get(CREDENTIAL_VARS[8]),
        }
    }

    /// Drops blank and unresolved values.
    pub fn normalized(self) -> Self {
        Self {
            pagespeed_api_key: present(self.pagespeed_api_key),
            serpapi_key: present(self.serpapi_key),
            gcs_api_key: present(self.gcs_api_key),
            gcs_cx: present(self.gcs_cx),
            whoisxml_api_key: present(self.whoisxml_api_key),
            moz_access_id: present(self.moz_access_id),
            moz_secret_key: present(self.moz_secret_key),
            ahrefs_api_key: present(self.ahrefs_api_key),
            majestic_api_key: present(self.majestic_api_key),
        }
    }

    /// 已設定的值優先，缺少的由 other 補上
    pub fn or(self, other: Credentials) -> Self {
        Self {
            pagespeed_api_key: self.pagespeed_api_key.or(other.pagespeed_api_key),
            serpapi_key: self.serpapi_key.or(other.serpapi_key),
            gcs_api_key: self.gcs_api_key.or(other.gcs_api_key),
            gcs_cx: self.gcs_cx.or(other.gcs_cx),
            whoisxml_api_key: self.whoisxml_api_key.or(other.whoisxml_api_key),
            moz_access_id: self.moz_access_id.or(other.moz_access_id),
            moz_secret_key: self.moz_secret_key.or(other.moz_secret_key),
            ahrefs_api_key: self.ahrefs_api_key.or(other.ahrefs_api_key),
            majestic_api_key: self.majestic_api_key.or(other.majestic_api_key),
        }
    }
}

// 不把金鑰寫進日誌
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("pagespeed_api_key", &mark(&self.pagespeed_api_key))
            .field("serpapi_key", &mark(&self.serpapi_key))
            .field("gcs_api_key", &mark(&self.gcs_api_key))
            .field("gcs_cx", &mark(&self.gcs_cx))
            .field("whoisxml_api_key", &mark(&self.whoisxml_api_key))
            .field("moz_access_id", &mark(&self.moz_access_id))
            .field("moz_secret_key", &mark(&self.moz_secret_key))
            .field("ahrefs_api_key", &mark(&self.ahrefs_api_key))
            .field("majestic_api_key", &mark(&self.majestic_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
    /// Lifetime of a fallback value produced after the configured path failed.
    pub fallback_ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 6 * 60 * 60,
            fallback_ttl_seconds: 300,
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    /// First try plus retries; 4 means waits of 1, 2 and 4 s before giving up.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_seconds: u64,
    pub max_wait_seconds: u64,
    /// origin 名稱 → requests per second
    pub per_origin: HashMap<String, f64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            max_attempts: 4,
            backoff_base_ms: 1000,
            max_backoff_ms: 30_000,
            request_timeout_seconds: 10,
            max_wait_seconds: 30,
            per_origin: HashMap::new(),
        }
    }
}

/// Base URLs of the external origins. Overridden in tests to point at mocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub pagespeed: String,
    pub serpapi: String,
    pub gcs: String,
    pub whoisxml: String,
    pub rdap: String,
    pub moz: String,
    pub ahrefs: String,
    pub majestic: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            pagespeed: "https://www.googleapis.com/pagespeedonline/v5".to_string(),
            serpapi: "https://serpapi.com".to_string(),
            gcs: "https://www.googleapis.com/customsearch".to_string(),
            whoisxml: "https://www.whoisxmlapi.com".to_string(),
            rdap: "https://rdap.org".to_string(),
            moz: "https://lsapi.seomoz.com".to_string(),
            ahrefs: "https://api.ahrefs.com".to_string(),
            majestic: "https://api.majestic.com".to_string(),
        }
    }
}

impl EndpointSettings {
    /// Every endpoint pointed at one base URL (mock servers).
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            pagespeed: base.clone(),
            serpapi: base.clone(),
            gcs: base.clone(),
            whoisxml: base.clone(),
            rdap: base.clone(),
            moz: base.clone(),
            ahrefs: base.clone(),
            majestic: base,
        }
    }

    fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("endpoints.pagespeed", &self.pagespeed),
            ("endpoints.serpapi", &self.serpapi),
            ("endpoints.gcs", &self.gcs),
            ("endpoints.whoisxml", &self.whoisxml),
            ("endpoints.rdap", &self.rdap),
            ("endpoints.moz", &self.moz),
            ("endpoints.ahrefs", &self.ahrefs),
            ("endpoints.majestic", &self.majestic),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: Option<String>,
    pub user_agent: String,
    /// Hosts exempt from the private-address check.
    pub allowed_hosts: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: None,
            user_agent: format!("seo-grader/{}", env!("CARGO_PKG_VERSION")),
            allowed_hosts: Vec::new(),
        }
    }
}

impl GraderSettings {
    /// 預設值加上環境變數中的憑證
    pub fn from_env() -> Self {
        Self {
            credentials: Credentials::from_env(),
            ..Self::default()
        }
    }

    /// Credentials from the environment fill whatever the file left unset.
    pub fn with_env_credentials(mut self) -> Self {
        self.credentials = self.credentials.normalized().or(Credentials::from_env());
        self
    }

    pub fn url_validator(&self) -> UrlValidator {
        let mut validator = UrlValidator::new();
        if let Some(bind) = &self.server.bind_address {
            validator = validator.with_bind_address(bind);
        }
        for host in &self.server.allowed_hosts {
            validator = validator.allow_host(host);
        }
        validator
    }
}

impl Validate for GraderSettings {
    fn validate(&self) -> Result<()> {
        let rate = &self.rate_limit;
        if !(rate.requests_per_second.is_finite() && rate.requests_per_second > 0.0) {
            return Err(GraderError::InvalidConfigValueError {
                field: "rate_limit.requests_per_second".to_string(),
                value: rate.requests_per_second.to_string(),
                reason: "Value must be a positive number".to_string(),
            });
        }
        for (origin, rps) in &rate.per_origin {
            if !(rps.is_finite() && *rps > 0.0) {
                return Err(GraderError::InvalidConfigValueError {
                    field: format!("rate_limit.per_origin.{}", origin),
                    value: rps.to_string(),
                    reason: "Value must be a positive number".to_string(),
                });
            }
        }
        validate_range("rate_limit.max_attempts", rate.max_attempts, 1, 10)?;
        validate_positive_number(
            "rate_limit.request_timeout_seconds",
            rate.request_timeout_seconds,
            1,
        )?;
        validate_positive_number("rate_limit.max_wait_seconds", rate.max_wait_seconds, 1)?;
        if rate.max_backoff_ms < rate.backoff_base_ms {
            return Err(GraderError::InvalidConfigValueError {
                field: "rate_limit.max_backoff_ms".to_string(),
                value: rate.max_backoff_ms.to_string(),
                reason: "Value must not be below rate_limit.backoff_base_ms".to_string(),
            });
        }

        validate_positive_number("cache.max_entries", self.cache.max_entries as u64, 1)?;
        validate_positive_number("cache.ttl_seconds", self.cache.ttl_seconds, 1)?;

        for (field, endpoint) in self.endpoints.entries() {
            validate_url(field, endpoint)?;
        }

        if self.server.user_agent.trim().is_empty() {
            return Err(GraderError::ConfigError {
                message: "server.user_agent cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}
