use crate::config::GraderSettings;
use crate::core::rate_limiter::RateLimiter;
use crate::utils::error::{GraderError, Result, ValidationError};
use crate::utils::validation::is_forbidden_ip;
use futures::future::{BoxFuture, FutureExt};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{header, redirect, Client, RequestBuilder, Response};
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const MAX_REDIRECTS: usize = 5;
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Target page body with the time it took to arrive.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub elapsed_ms: u64,
    pub body: String,
}

type LookupFn = dyn Fn(String) -> BoxFuture<'static, std::io::Result<Vec<SocketAddr>>> + Send + Sync;

/// Resolves every connection the client makes, redirects included, and
/// drops private or loopback addresses unless the host is allowlisted.
pub struct GuardedResolver {
    allowed_hosts: HashSet<String>,
    lookup: Arc<LookupFn>,
}

impl GuardedResolver {
    pub fn new(settings: &GraderSettings) -> Self {
        Self::with_lookup(settings, |host| {
            async move {
                tokio::net::lookup_host((host.as_str(), 0))
                    .await
                    .map(|addrs| addrs.collect())
            }
            .boxed()
        })
    }

    pub fn with_lookup<F>(settings: &GraderSettings, lookup: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, std::io::Result<Vec<SocketAddr>>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            allowed_hosts: settings
                .server
                .allowed_hosts
                .iter()
                .map(|host| host.trim().to_lowercase())
                .collect(),
            lookup: Arc::new(lookup),
        }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_lowercase();
        let allowed = self.allowed_hosts.contains(&host);
        let lookup = (self.lookup)(host.clone());
        Box::pin(async move {
            let addrs = permitted_addrs(&host, lookup.await?, allowed)?;
            Ok::<Addrs, Box<dyn std::error::Error + Send + Sync>>(Box::new(addrs.into_iter()))
        })
    }
}

fn permitted_addrs(
    host: &str,
    addrs: Vec<SocketAddr>,
    allowed: bool,
) -> std::result::Result<Vec<SocketAddr>, ValidationError> {
    if allowed {
        return Ok(addrs);
    }
    let (safe, blocked): (Vec<_>, Vec<_>) =
        addrs.into_iter().partition(|addr| !is_forbidden_ip(addr.ip()));
    if let Some(first) = blocked.first() {
        tracing::warn!("🔶 {}: dropped internal address {}", host, first.ip());
    }
    if safe.is_empty() {
        return Err(ValidationError::SsrfRejected(format!(
            "{} has no public address",
            host
        )));
    }
    Ok(safe)
}

/// Every outbound request goes through here, and therefore through the
/// rate limiter of its origin.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl HttpGateway {
    pub fn new(settings: &GraderSettings, limiter: Arc<RateLimiter>) -> Result<Self> {
        Self::with_resolver(settings, limiter, GuardedResolver::new(settings))
    }

    pub fn with_resolver(
        settings: &GraderSettings,
        limiter: Arc<RateLimiter>,
        resolver: GuardedResolver,
    ) -> Result<Self> {
        // 重新導向也要通過 SSRF 檢查；實際連線位址由 resolver 把關
        let validator = settings.url_validator();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if validator.validate(attempt.url().as_str()).is_err() {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .user_agent(settings.server.user_agent.clone())
            .timeout(Duration::from_secs(
                settings.rate_limit.request_timeout_seconds,
            ))
            .redirect(policy)
            .dns_resolver(Arc::new(resolver))
            .build()?;

        Ok(Self { client, limiter })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Sends the request built by `build` and decodes a JSON body.
    ///
    /// `build` runs once per attempt since a request cannot be replayed.
    pub async fn send_json<B>(&self, origin: &str, build: B) -> Result<Value>
    where
        B: Fn(&Client) -> RequestBuilder,
    {
        self.limiter
            .call(origin, || {
                let request = build(&self.client);
                let origin = origin.to_string();
                async move {
                    tracing::debug!("📡 {}: sending request", origin);
                    let response = request.send().await?;
                    tracing::debug!("📡 {}: response status {}", origin, response.status());
                    let response = check_status(&origin, response)?;
                    response.json::<Value>().await.map_err(|e| {
                        if e.is_timeout() {
                            GraderError::Timeout { origin }
                        } else {
                            GraderError::MalformedResponse {
                                origin,
                                message: e.to_string(),
                            }
                        }
                    })
                }
            })
            .await
    }

    /// Fetches a page, returning non-success statuses as data rather than errors.
    pub async fn fetch_page(&self, origin: &str, url: &str) -> Result<FetchedPage> {
        self.limiter
            .call(origin, || {
                let request = self.client.get(url).header(header::ACCEPT, HTML_ACCEPT);
                async move {
                    let started = Instant::now();
                    let response = request.send().await?;
                    let status = response.status().as_u16();
                    let body = response.text().await?;
                    Ok(FetchedPage {
                        status,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        body,
                    })
                }
            })
            .await
    }
}

fn check_status(origin: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(GraderError::UpstreamStatus {
            origin: origin.to_string(),
            status: status.as_u16(),
        })
    }
}
