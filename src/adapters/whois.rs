use crate::adapters::AdapterContext;
use crate::core::cache::cache_key;
use crate::domain::model::{AdapterKind, AdapterMode, DomainAge, Signal};
use crate::domain::ports::SignalAdapter;
use crate::utils::error::{GraderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// Domain registration date from WHOISXML, or from public RDAP when no key is set.
pub struct WhoisAdapter {
    ctx: AdapterContext,
    api_key: Option<String>,
}

/// 小寫、去空白、去掉 www.
pub fn clean_domain(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    domain
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(domain)
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` prefixes.
pub fn parse_registration_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// 完整年數 = floor(天數 / 365)
pub fn age_in_years(created: NaiveDate, today: NaiveDate) -> u32 {
    let days = (today - created).num_days().max(0);
    (days / 365) as u32
}

fn domain_age(domain: &str, created: Option<NaiveDate>, registrar: Option<String>) -> DomainAge {
    let today = Utc::now().date_naive();
    DomainAge {
        domain: domain.to_string(),
        created,
        age_years: created.map(|c| age_in_years(c, today)),
        registrar,
    }
}

pub fn parse_whoisxml_response(domain: &str, data: &Value) -> Result<DomainAge> {
    let record = data.get("WhoisRecord").ok_or_else(|| GraderError::MalformedResponse {
        origin: "whoisxml".to_string(),
        message: "missing WhoisRecord".to_string(),
    })?;

    let created = record
        .get("createdDate")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            record
                .get("registryData")
                .and_then(|r| r.get("createdDate"))
                .and_then(Value::as_str)
        })
        .and_then(parse_registration_date);

    let registrar = record
        .get("registrarName")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(domain_age(domain, created, registrar))
}

pub fn parse_rdap_response(domain: &str, data: &Value) -> Result<DomainAge> {
    let events = data
        .get("events")
        .and_then(Value::as_array)
        .ok_or_else(|| GraderError::MalformedResponse {
            origin: "rdap".to_string(),
            message: "missing events".to_string(),
        })?;

    let created = events
        .iter()
        .find(|e| e.get("eventAction").and_then(Value::as_str) == Some("registration"))
        .and_then(|e| e.get("eventDate"))
        .and_then(Value::as_str)
        .and_then(parse_registration_date);

    // registrar 在 entities 裡以 vcard 表示
    let registrar = data
        .get("entities")
        .and_then(Value::as_array)
        .and_then(|entities| {
            entities.iter().find(|e| {
                e.get("roles")
                    .and_then(Value::as_array)
                    .map(|roles| roles.iter().any(|r| r.as_str() == Some("registrar")))
                    .unwrap_or(false)
            })
        })
        .and_then(|e| e.pointer("/vcardArray/1"))
        .and_then(Value::as_array)
        .and_then(|fields| {
            fields
                .iter()
                .find(|f| f.get(0).and_then(Value::as_str) == Some("fn"))
        })
        .and_then(|f| f.get(3))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(domain_age(domain, created, registrar))
}

impl WhoisAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        let api_key = ctx.credentials().whoisxml_api_key.clone();
        Self { ctx, api_key }
    }

    async fn fetch_from_whoisxml(&self, domain: &str, key: &str) -> Result<Signal<DomainAge>> {
        let endpoint = format!("{}/whoisserver/WhoisService", self.ctx.endpoints().whoisxml);
        let data = self
            .ctx
            .http
            .send_json("whoisxml", |client| {
                client.get(&endpoint).query(&[
                    ("apiKey", key),
                    ("domainName", domain),
                    ("outputFormat", "JSON"),
                ])
            })
            .await?;

        let age = parse_whoisxml_response(domain, &data)?;
        Ok(if age.created.is_some() {
            Signal::measured(age)
        } else {
            Signal::measured(age).with_note("Registry does not publish a creation date")
        })
    }

    async fn fetch_from_rdap(&self, domain: &str) -> Signal<DomainAge> {
        let endpoint = format!("{}/domain/{}", self.ctx.endpoints().rdap, domain);
        let result = self
            .ctx
            .http
            .send_json("rdap", |client| {
                client
                    .get(&endpoint)
                    .header(reqwest::header::ACCEPT, "application/rdap+json")
            })
            .await
            .and_then(|data| parse_rdap_response(domain, &data));

        match result {
            Ok(age) => Signal::fallback(age, "Domain age from public RDAP registry (lower reliability)"),
            Err(e) => {
                tracing::warn!("🔶 rdap: lookup failed for {}: {}", domain, e);
                Signal::unavailable(format!("Domain age lookup failed: {}", e))
            }
        }
    }
}

#[async_trait]
impl SignalAdapter<str> for WhoisAdapter {
    type Output = DomainAge;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Whois
    }

    fn mode(&self) -> AdapterMode {
        if self.api_key.is_some() {
            AdapterMode::Configured
        } else {
            AdapterMode::Fallback
        }
    }

    fn backend(&self) -> &'static str {
        if self.api_key.is_some() {
            "whoisxml"
        } else {
            "rdap"
        }
    }

    async fn fetch(&self, domain: &str) -> Signal<DomainAge> {
        let domain = clean_domain(domain);
        let key = cache_key(AdapterKind::Whois, &domain, None);
        self.ctx
            .cache
            .get_or_fetch(&key, || {
                self.ctx.configured_or_fallback(
                    AdapterKind::Whois,
                    self.api_key
                        .as_deref()
                        .map(|api_key| self.fetch_from_whoisxml(&domain, api_key)),
                    || self.fetch_from_rdap(&domain),
                )
            })
            .await
    }
}
