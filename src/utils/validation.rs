use crate::utils::error::{GraderError, Result, ValidationError};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use url::{Host, Url};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub const HTTP_WARNING: &str = "HTTP URL detected. HTTPS is recommended for security.";

const LOCALHOST_NAMES: &[&str] = &["localhost", "localhost.localdomain", "ip6-localhost"];

/// A target URL that passed validation. Two inputs that differ only in host
/// case, default port, fragment or trailing slash normalize to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct NormalizedUrl {
    url: String,
    host: String,
}

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// 小寫主機名，IPv6 不含方括號
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 去掉 www. 的網域，供 WHOIS/權威/SERP 查詢
    pub fn domain(&self) -> String {
        self.host
            .strip_prefix("www.")
            .unwrap_or(&self.host)
            .to_string()
    }

    pub fn is_https(&self) -> bool {
        self.url.starts_with("https://")
    }
}

impl From<NormalizedUrl> for String {
    fn from(value: NormalizedUrl) -> Self {
        value.url
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    pub url: NormalizedUrl,
    pub warnings: Vec<String>,
}

/// Rejects unsafe or malformed target URLs before any network call is made.
#[derive(Debug, Clone, Default)]
pub struct UrlValidator {
    bind_host: Option<String>,
    allowed_hosts: HashSet<String>,
}

impl UrlValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 拒絕指向本服務自己監聽位址的網址
    pub fn with_bind_address(mut self, bind_address: &str) -> Self {
        let host = bind_host_of(bind_address);
        if !host.is_empty() {
            self.bind_host = Some(host);
        }
        self
    }

    /// 明確放行的主機（測試或內部預備環境），跳過 SSRF 檢查
    pub fn allow_host(mut self, host: &str) -> Self {
        self.allowed_hosts.insert(host.trim().to_lowercase());
        self
    }

    pub fn validate(&self, raw: &str) -> std::result::Result<ValidatedTarget, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }

        let mut url = parse_with_default_scheme(raw)?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(ValidationError::SchemeError(scheme.to_string())),
        }

        let host = url
            .host()
            .map(|h| h.to_owned())
            .ok_or(ValidationError::MissingHost)?;
        let host_text = host_text(&host);
        if host_text.is_empty() {
            return Err(ValidationError::MissingHost);
        }

        if !self.allowed_hosts.contains(&host_text) {
            self.check_host(&host, &host_text)?;
        }

        normalize(&mut url);

        let mut warnings = Vec::new();
        if url.scheme() == "http" {
            warnings.push(HTTP_WARNING.to_string());
        }

        Ok(ValidatedTarget {
            url: NormalizedUrl {
                url: url.to_string(),
                host: host_text,
            },
            warnings,
        })
    }

    /// 同 validate，另外解析 DNS 並拒絕落在內部網段的位址
    pub async fn validate_resolved(
        &self,
        raw: &str,
    ) -> std::result::Result<ValidatedTarget, ValidationError> {
        let target = self.validate(raw)?;
        let host = target.url.host().to_string();
        if self.allowed_hosts.contains(&host) || host.parse::<IpAddr>().is_ok() {
            return Ok(target);
        }

        let port = if target.url.is_https() { 443 } else { 80 };
        match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(addrs) => {
                for addr in addrs {
                    if is_forbidden_ip(addr.ip()) {
                        return Err(ValidationError::SsrfRejected(format!(
                            "{} resolves to {}",
                            host,
                            addr.ip()
                        )));
                    }
                    if self.is_bind_host(&addr.ip().to_string()) {
                        return Err(ValidationError::SsrfRejected(format!(
                            "{} resolves to the grader's own address",
                            host
                        )));
                    }
                }
            }
            Err(e) => {
                // 解析失敗不算驗證錯誤，交給各 adapter 退回 fallback
                tracing::warn!("DNS lookup failed for {}: {}", host, e);
            }
        }

        Ok(target)
    }

    fn check_host(
        &self,
        host: &Host<String>,
        host_text: &str,
    ) -> std::result::Result<(), ValidationError> {
        if self.is_bind_host(host_text) {
            return Err(ValidationError::SsrfRejected(format!(
                "{} is the grader's own address",
                host_text
            )));
        }

        match host {
            Host::Ipv4(ip) if is_forbidden_ip(IpAddr::V4(*ip)) => Err(
                ValidationError::SsrfRejected(format!("private or loopback address {}", ip)),
            ),
            Host::Ipv6(ip) if is_forbidden_ip(IpAddr::V6(*ip)) => Err(
                ValidationError::SsrfRejected(format!("private or loopback address {}", ip)),
            ),
            Host::Domain(name) => {
                let name = name.to_lowercase();
                if LOCALHOST_NAMES.contains(&name.as_str()) || name.ends_with(".localhost") {
                    return Err(ValidationError::SsrfRejected(format!(
                        "localhost URLs are not allowed: {}",
                        name
                    )));
                }
                if looks_like_embedded_ip(&name) {
                    return Err(ValidationError::SsrfRejected(format!(
                        "suspicious hostname pattern: {}",
                        name
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_bind_host(&self, host: &str) -> bool {
        match &self.bind_host {
            Some(bind) => {
                let unspecified = bind == "0.0.0.0" || bind == "::";
                !unspecified && bind == host
            }
            None => false,
        }
    }
}

fn parse_with_default_scheme(raw: &str) -> std::result::Result<Url, ValidationError> {
    if raw.contains("://") {
        return Url::parse(raw).map_err(|e| ValidationError::Malformed(e.to_string()));
    }

    // "mailto:a@b" 與 "javascript:..." 這類沒有 // 的 scheme 直接拒絕；
    // "example.com:8080" 會被 url 當成 scheme，視為缺少 scheme
    if let Ok(url) = Url::parse(raw) {
        if !url.scheme().contains('.') && url.port().is_none() && url.cannot_be_a_base() {
            let rest = &raw[url.scheme().len() + 1..];
            if !rest.chars().all(|c| c.is_ascii_digit()) {
                return Err(ValidationError::SchemeError(url.scheme().to_string()));
            }
        }
    }

    Url::parse(&format!("https://{}", raw)).map_err(|e| ValidationError::Malformed(e.to_string()))
}

fn normalize(url: &mut Url) {
    url.set_fragment(None);
    let _ = url.set_username("");
    let _ = url.set_password(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        url.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }
}

fn host_text(host: &Host<String>) -> String {
    match host {
        Host::Domain(d) => d.to_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}

fn bind_host_of(bind_address: &str) -> String {
    let trimmed = bind_address.trim();
    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    if let Ok(ip) = trimmed.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return ip.to_string();
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_lowercase(),
        _ => trimmed.to_lowercase(),
    }
}

/// 1.2.3.4.nip.io 之類把 IP 藏在網域裡的寫法
fn looks_like_embedded_ip(name: &str) -> bool {
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 5 {
        return false;
    }
    labels
        .windows(4)
        .any(|w| w.iter().all(|l| !l.is_empty() && l.len() <= 3 && l.chars().all(|c| c.is_ascii_digit())))
}

pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_forbidden_v4(v4),
            None => is_forbidden_v6(v6),
        },
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..=127).contains(&b))
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(GraderError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(GraderError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(GraderError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(GraderError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(GraderError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}
