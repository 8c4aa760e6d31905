use crate::adapters::AdapterContext;
use crate::core::cache::cache_key;
use crate::domain::model::{
    AdapterKind, AdapterMode, AuthorityMetrics, DomainAge, OnPageMetrics, PageProbe, Provenance,
    Signal,
};
use crate::domain::ports::SignalAdapter;
use crate::utils::error::{GraderError, Result};
use crate::utils::validation::NormalizedUrl;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum AuthorityBackend {
    Moz { access_id: String, secret_key: String },
    Ahrefs { api_key: String },
    Majestic { api_key: String },
    Heuristic,
}

/// Domain authority from Moz, Ahrefs or Majestic, or estimated from domain
/// age and brand presence.
pub struct AuthorityAdapter {
    ctx: AdapterContext,
    backend: AuthorityBackend,
    whois: Arc<dyn SignalAdapter<str, Output = DomainAge>>,
    page: Arc<dyn SignalAdapter<NormalizedUrl, Output = PageProbe>>,
}

/// 網域的品牌字樣：倒數第二段，遇到 co.uk 這類再往前一段
pub fn brand_label(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let label = match labels.len() {
        0 | 1 => labels.first().copied(),
        n if n >= 3 && labels[n - 2].len() <= 3 && labels[n - 1].len() == 2 => Some(labels[n - 3]),
        n => Some(labels[n - 2]),
    }?;
    let label = squash(label);
    (label.len() >= 2).then_some(label)
}

fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Brand label of the domain appears in the page title or `og:site_name`.
pub fn brand_present(domain: &str, onpage: &OnPageMetrics) -> bool {
    let Some(label) = brand_label(domain) else {
        return false;
    };
    [onpage.title.as_deref(), onpage.site_name.as_deref()]
        .into_iter()
        .flatten()
        .any(|text| squash(text).contains(&label))
}

/// 年齡分數 + 估計引用網域 + 品牌，上限 100
pub fn estimate_authority(age_years: Option<u32>, brand: bool) -> AuthorityMetrics {
    let mut estimated = match age_years {
        Some(age) if age >= 5 => 40.0,
        Some(age) if age >= 3 => 30.0,
        Some(age) if age >= 1 => 20.0,
        Some(_) => 10.0,
        None => 0.0,
    };

    let referring = age_years
        .filter(|age| *age >= 2)
        .map(|age| age as u64 * 5);
    if referring.map(|r| r > 5).unwrap_or(false) {
        estimated += 40.0;
    }
    if brand {
        estimated += 20.0;
    }

    AuthorityMetrics {
        domain_authority: Some(f64::min(estimated, 100.0)),
        referring_domains: referring,
        domain_age_years: age_years,
        brand_present: brand,
        source: "heuristic".to_string(),
    }
}

fn malformed(origin: &str, message: &str) -> GraderError {
    GraderError::MalformedResponse {
        origin: origin.to_string(),
        message: message.to_string(),
    }
}

pub fn parse_moz_response(data: &Value) -> Result<AuthorityMetrics> {
    let result = data
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .ok_or_else(|| malformed("moz", "no results"))?;

    Ok(AuthorityMetrics {
        domain_authority: result.get("domain_authority").and_then(Value::as_f64),
        referring_domains: result
            .get("root_domains_to_root_domain")
            .and_then(Value::as_u64),
        source: "moz".to_string(),
        ..AuthorityMetrics::default()
    })
}

pub fn parse_ahrefs_response(data: &Value) -> Result<AuthorityMetrics> {
    let rating = data
        .pointer("/domain_rating/domain_rating")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("ahrefs", "missing domain_rating"))?;

    Ok(AuthorityMetrics {
        domain_authority: Some(rating),
        source: "ahrefs".to_string(),
        ..AuthorityMetrics::default()
    })
}

/// TrustFlow 已是 0-100 的分數
pub fn parse_majestic_response(data: &Value) -> Result<AuthorityMetrics> {
    if let Some(code) = data.get("Code").and_then(Value::as_str) {
        if code != "OK" {
            let message = data
                .get("ErrorMessage")
                .and_then(Value::as_str)
                .unwrap_or(code);
            return Err(malformed("majestic", message));
        }
    }
    let item = data
        .pointer("/DataTables/Results/Data/0")
        .ok_or_else(|| malformed("majestic", "no index item"))?;

    Ok(AuthorityMetrics {
        domain_authority: item.get("TrustFlow").and_then(Value::as_f64),
        referring_domains: item.get("RefDomains").and_then(Value::as_u64),
        source: "majestic".to_string(),
        ..AuthorityMetrics::default()
    })
}

impl AuthorityAdapter {
    pub fn new(
        ctx: AdapterContext,
        whois: Arc<dyn SignalAdapter<str, Output = DomainAge>>,
        page: Arc<dyn SignalAdapter<NormalizedUrl, Output = PageProbe>>,
    ) -> Self {
        let credentials = ctx.credentials();
        let backend = if let (Some(id), Some(secret)) =
            (&credentials.moz_access_id, &credentials.moz_secret_key)
        {
            AuthorityBackend::Moz {
                access_id: id.clone(),
                secret_key: secret.clone(),
            }
        } else if let Some(key) = &credentials.ahrefs_api_key {
            AuthorityBackend::Ahrefs {
                api_key: key.clone(),
            }
        } else if let Some(key) = &credentials.majestic_api_key {
            AuthorityBackend::Majestic {
                api_key: key.clone(),
            }
        } else {
            AuthorityBackend::Heuristic
        };

        Self {
            ctx,
            backend,
            whois,
            page,
        }
    }

    async fn fetch_configured(&self, domain: &str) -> Result<Signal<AuthorityMetrics>> {
        let endpoints = self.ctx.endpoints();
        let metrics = match &self.backend {
            AuthorityBackend::Moz {
                access_id,
                secret_key,
            } => {
                let endpoint = format!("{}/v2/url_metrics", endpoints.moz);
                let body = json!({ "targets": [domain] });
                let data = self
                    .ctx
                    .http
                    .send_json("moz", |client| {
                        client
                            .post(&endpoint)
                            .basic_auth(access_id, Some(secret_key))
                            .json(&body)
                    })
                    .await?;
                parse_moz_response(&data)?
            }
            AuthorityBackend::Ahrefs { api_key } => {
                let endpoint = format!("{}/v3/site-explorer/domain-rating", endpoints.ahrefs);
                let date = chrono::Utc::now().date_naive().to_string();
                let data = self
                    .ctx
                    .http
                    .send_json("ahrefs", |client| {
                        client
                            .get(&endpoint)
                            .bearer_auth(api_key)
                            .query(&[("target", domain), ("date", date.as_str())])
                    })
                    .await?;
                parse_ahrefs_response(&data)?
            }
            AuthorityBackend::Majestic { api_key } => {
                let endpoint = format!("{}/api/json", endpoints.majestic);
                let data = self
                    .ctx
                    .http
                    .send_json("majestic", |client| {
                        client.get(&endpoint).query(&[
                            ("app_api_key", api_key.as_str()),
                            ("cmd", "GetIndexItemInfo"),
                            ("items", "1"),
                            ("item0", domain),
                            ("datasource", "fresh"),
                        ])
                    })
                    .await?;
                parse_majestic_response(&data)?
            }
            AuthorityBackend::Heuristic => {
                return Err(GraderError::AdapterUnavailable {
                    adapter: AdapterKind::Authority.to_string(),
                    message: "no authority API configured".to_string(),
                })
            }
        };

        Ok(Signal::measured(metrics))
    }

    async fn estimate(&self, url: &NormalizedUrl, domain: &str) -> Signal<AuthorityMetrics> {
        let (age, page) = tokio::join!(self.whois.fetch(domain), self.page.fetch(url));

        if age.provenance == Provenance::Unavailable && page.provenance == Provenance::Unavailable {
            return Signal::unavailable("Neither domain age nor the page itself could be checked");
        }

        let brand = page
            .value
            .onpage
            .as_ref()
            .map(|onpage| brand_present(domain, onpage))
            .unwrap_or(false);

        tracing::debug!(
            "🔶 authority: estimating {} from age {:?} and brand {}",
            domain,
            age.value.age_years,
            brand
        );
        Signal::fallback(
            estimate_authority(age.value.age_years, brand),
            "Authority estimated from domain age and brand presence",
        )
    }
}

#[async_trait]
impl SignalAdapter<NormalizedUrl> for AuthorityAdapter {
    type Output = AuthorityMetrics;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Authority
    }

    fn mode(&self) -> AdapterMode {
        match self.backend {
            AuthorityBackend::Heuristic => AdapterMode::Fallback,
            _ => AdapterMode::Configured,
        }
    }

    fn backend(&self) -> &'static str {
        match self.backend {
            AuthorityBackend::Moz { .. } => "moz",
            AuthorityBackend::Ahrefs { .. } => "ahrefs",
            AuthorityBackend::Majestic { .. } => "majestic",
            AuthorityBackend::Heuristic => "heuristic",
        }
    }

    async fn fetch(&self, url: &NormalizedUrl) -> Signal<AuthorityMetrics> {
        let domain = url.domain();
        let key = cache_key(AdapterKind::Authority, &domain, None);

        self.ctx
            .cache
            .get_or_fetch(&key, || {
                let configured = match self.backend {
                    AuthorityBackend::Heuristic => None,
                    _ => Some(self.fetch_configured(&domain)),
                };
                self.ctx.configured_or_fallback(AdapterKind::Authority, configured, || {
                    self.estimate(url, &domain)
                })
            })
            .await
    }
}
