use crate::config::GraderSettings;
use crate::utils::error::{GraderError, Result};
use crate::utils::validation::Validate;
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

impl GraderSettings {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(GraderError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置，缺少的區段使用預設值
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content);

        let settings: GraderSettings =
            toml::from_str(&processed_content).map_err(|e| GraderError::ConfigError {
                message: format!("TOML parsing error: {}", e),
            })?;

        let settings = settings.with_env_credentials();
        settings.validate()?;
        Ok(settings)
    }
}

/// 替換環境變數 (例如 ${SERPAPI_KEY})；未設定的保持原樣
pub fn substitute_env_vars(content: &str) -> String {
    let Some(re) = env_var_pattern() else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_gives_defaults() {
        let settings = GraderSettings::from_toml_str("").unwrap();
        assert_eq!(settings.cache.max_entries, 1000);
        assert_eq!(settings.rate_limit.requests_per_second, 1.0);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let toml_content = r#"
[cache]
ttl_seconds = 60

[rate_limit]
requests_per_second = 2.0

[rate_limit.per_origin]
rdap = 0.5

[server]
allowed_hosts = ["127.0.0.1"]
"#;
        let settings = GraderSettings::from_toml_str(toml_content).unwrap();

        assert_eq!(settings.cache.ttl_seconds, 60);
        assert_eq!(settings.cache.max_entries, 1000);
        assert_eq!(settings.rate_limit.requests_per_second, 2.0);
        assert_eq!(settings.rate_limit.max_attempts, 4);
        assert_eq!(settings.rate_limit.per_origin.get("rdap"), Some(&0.5));
        assert_eq!(settings.server.allowed_hosts, vec!["127.0.0.1".to_string()]);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SEO_GRADER_TEST_SERP_KEY", "from-env");

        let toml_content = r#"
[credentials]
serpapi_key = "${SEO_GRADER_TEST_SERP_KEY}"
moz_access_id = "${SEO_GRADER_TEST_UNSET_VAR}"
"#;
        let settings = GraderSettings::from_toml_str(toml_content).unwrap();

        assert_eq!(settings.credentials.serpapi_key.as_deref(), Some("from-env"));
        assert!(settings.credentials.moz_access_id.is_none());

        std::env::remove_var("SEO_GRADER_TEST_SERP_KEY");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let toml_content = r#"
[cache]
max_entries = 0
"#;
        assert!(GraderSettings::from_toml_str(toml_content).is_err());
    }

    #[test]
    fn test_malformed_toml_is_a_config_error() {
        let err = GraderSettings::from_toml_str("[cache\nttl_seconds = ").unwrap_err();
        assert!(matches!(err, GraderError::ConfigError { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[endpoints]
rdap = "http://localhost:9999"
"#
        )
        .unwrap();

        let settings = GraderSettings::from_file(temp_file.path()).unwrap();
        assert_eq!(settings.endpoints.rdap, "http://localhost:9999");
        assert_eq!(settings.endpoints.moz, "https://lsapi.seomoz.com");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = GraderSettings::from_file("/nonexistent/seo-grader.toml").unwrap_err();
        assert!(matches!(err, GraderError::IoError(_)));
    }
}
