// Adapters layer: one module per external capability, plus the outbound
// gateway they share. Each adapter is built from an AdapterContext and never
// reads the environment itself.

pub mod authority;
pub mod http;
pub mod page;
pub mod pagespeed;
pub mod serp;
pub mod whois;

pub use authority::AuthorityAdapter;
pub use http::HttpGateway;
pub use page::PageFetcher;
pub use pagespeed::PageSpeedAdapter;
pub use serp::{SerpAdapter, SerpQuery};
pub use whois::WhoisAdapter;

use crate::config::{Credentials, EndpointSettings, GraderSettings};
use crate::core::cache::SignalCache;
use crate::core::rate_limiter::RateLimiter;
use crate::domain::model::{AdapterKind, Provenance, Signal};
use crate::utils::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Shared process-wide state handed to every adapter at construction.
#[derive(Clone)]
pub struct AdapterContext {
    pub settings: Arc<GraderSettings>,
    pub cache: Arc<SignalCache>,
    pub limiter: Arc<RateLimiter>,
    pub http: HttpGateway,
}

impl AdapterContext {
    pub fn new(settings: GraderSettings) -> Result<Self> {
        let cache = Arc::new(SignalCache::from_settings(&settings.cache));
        let limiter = Arc::new(RateLimiter::from_settings(&settings.rate_limit));
        let http = HttpGateway::new(&settings, limiter.clone())?;

        Ok(Self {
            settings: Arc::new(settings),
            cache,
            limiter,
            http,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.settings.credentials
    }

    pub fn endpoints(&self) -> &EndpointSettings {
        &self.settings.endpoints
    }

    /// None：不寫入快取
    fn ttl_for(&self, provenance: Provenance, after_failure: bool) -> Option<Duration> {
        match provenance {
            Provenance::Unavailable => None,
            _ if after_failure => Some(Duration::from_secs(
                self.settings.cache.fallback_ttl_seconds,
            )),
            _ => Some(self.cache.default_ttl()),
        }
    }

    /// Runs the configured path when there is one and degrades to `fallback`
    /// when it is absent or fails. Returns the signal and its cache lifetime.
    pub(crate) async fn configured_or_fallback<T, C, F, FF>(
        &self,
        kind: AdapterKind,
        configured: Option<C>,
        fallback: F,
    ) -> (Signal<T>, Option<Duration>)
    where
        C: Future<Output = Result<Signal<T>>>,
        F: FnOnce() -> FF,
        FF: Future<Output = Signal<T>>,
    {
        let Some(configured) = configured else {
            let signal = fallback().await;
            let ttl = self.ttl_for(signal.provenance, false);
            return (signal, ttl);
        };

        match configured.await {
            Ok(signal) => {
                let ttl = self.ttl_for(signal.provenance, false);
                (signal, ttl)
            }
            Err(e) => {
                tracing::warn!("🔶 {}: configured source failed, using fallback: {}", kind, e);
                let signal = annotate(fallback().await, &format!("configured source failed: {}", e));
                let ttl = self.ttl_for(signal.provenance, true);
                (signal, ttl)
            }
        }
    }
}

/// 在既有說明後附加一句
pub(crate) fn annotate<T>(mut signal: Signal<T>, extra: &str) -> Signal<T> {
    signal.note = Some(match signal.note.take() {
        Some(note) => format!("{} ({})", note, extra),
        None => extra.to_string(),
    });
    signal
}
