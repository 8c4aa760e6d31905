use crate::adapters::AdapterContext;
use crate::core::cache::cache_key;
use crate::domain::model::{
    AdapterKind, AdapterMode, CoreWebVitals, PageProbe, Provenance, Signal,
};
use crate::domain::ports::SignalAdapter;
use crate::utils::error::{GraderError, Result};
use crate::utils::validation::NormalizedUrl;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const ORIGIN: &str = "pagespeed";

/// Core Web Vitals from PageSpeed Insights, or estimated from page timing.
pub struct PageSpeedAdapter {
    ctx: AdapterContext,
    api_key: Option<String>,
    page: Arc<dyn SignalAdapter<NormalizedUrl, Output = PageProbe>>,
}

impl PageSpeedAdapter {
    pub fn new(
        ctx: AdapterContext,
        page: Arc<dyn SignalAdapter<NormalizedUrl, Output = PageProbe>>,
    ) -> Self {
        let api_key = ctx.credentials().pagespeed_api_key.clone();
        Self { ctx, api_key, page }
    }

    async fn fetch_from_api(&self, url: &NormalizedUrl, key: &str) -> Result<Signal<CoreWebVitals>> {
        let endpoint = format!("{}/runPagespeed", self.ctx.endpoints().pagespeed);
        let data = self
            .ctx
            .http
            .send_json(ORIGIN, |client| {
                client.get(&endpoint).query(&[
                    ("url", url.as_str()),
                    ("key", key),
                    ("strategy", "mobile"),
                    ("category", "performance"),
                ])
            })
            .await?;

        parse_pagespeed_response(&data)
    }

    async fn estimate_from_timing(&self, url: &NormalizedUrl) -> Signal<CoreWebVitals> {
        let probe = self.page.fetch(url).await;
        if probe.provenance == Provenance::Unavailable {
            let reason = probe.note.unwrap_or_else(|| "site unreachable".to_string());
            return Signal::unavailable(format!("Core Web Vitals could not be estimated: {}", reason));
        }
        Signal::approximate(
            estimate_vitals(&probe.value),
            "Estimated from response timing, not a Lighthouse measurement",
        )
    }
}

#[async_trait]
impl SignalAdapter<NormalizedUrl> for PageSpeedAdapter {
    type Output = CoreWebVitals;

    fn kind(&self) -> AdapterKind {
        AdapterKind::PageSpeed
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
            "pagespeed-insights"
        } else {
            "timing-heuristic"
        }
    }

    async fn fetch(&self, url: &NormalizedUrl) -> Signal<CoreWebVitals> {
        let key = cache_key(AdapterKind::PageSpeed, url.as_str(), None);
        self.ctx
            .cache
            .get_or_fetch(&key, || {
                self.ctx.configured_or_fallback(
                    AdapterKind::PageSpeed,
                    self.api_key
                        .as_deref()
                        .map(|api_key| self.fetch_from_api(url, api_key)),
                    || self.estimate_from_timing(url),
                )
            })
            .await
    }
}

/// LCP≈1.5×elapsed，CLS 依頁面大小，INP≈min(elapsed, 500)
pub fn estimate_vitals(probe: &PageProbe) -> CoreWebVitals {
    let cls = if probe.content_length > 500_000 {
        0.15
    } else if probe.content_length > 200_000 {
        0.08
    } else {
        0.05
    };

    CoreWebVitals {
        lcp_ms: Some(probe.elapsed_ms * 3 / 2),
        cls: Some(cls),
        inp_ms: Some(probe.elapsed_ms.min(500)),
    }
}

/// Field data first; lab audits fill the gaps and mark the result approximate.
pub fn parse_pagespeed_response(data: &Value) -> Result<Signal<CoreWebVitals>> {
    let loading = data.get("loadingExperience");
    let lighthouse = data.get("lighthouseResult");
    if loading.is_none() && lighthouse.is_none() {
        return Err(GraderError::MalformedResponse {
            origin: ORIGIN.to_string(),
            message: "neither loadingExperience nor lighthouseResult present".to_string(),
        });
    }

    let field = |name: &str| {
        loading
            .and_then(|l| l.get("metrics"))
            .and_then(|m| m.get(name))
            .and_then(|m| m.get("percentile").or_else(|| m.get("numericValue")))
            .and_then(Value::as_f64)
    };
    let audit = |name: &str| {
        lighthouse
            .and_then(|l| l.get("audits"))
            .and_then(|a| a.get(name))
            .and_then(|a| a.get("numericValue"))
            .and_then(Value::as_f64)
    };

    let mut lab_used = false;

    let mut lcp_ms = field("LARGEST_CONTENTFUL_PAINT_MS").map(|v| v.max(0.0) as u64);
    // CrUX 以百分之一為單位回報 CLS
    let mut cls = field("CUMULATIVE_LAYOUT_SHIFT_SCORE").map(|v| v / 100.0);
    let mut inp_ms = field("INTERACTION_TO_NEXT_PAINT").map(|v| v.max(0.0) as u64);

    if lcp_ms.is_none() {
        if let Some(v) = audit("largest-contentful-paint").filter(|v| *v > 0.0) {
            lcp_ms = Some(v as u64);
            lab_used = true;
        }
    }
    if cls.is_none() {
        if let Some(v) = audit("cumulative-layout-shift") {
            cls = Some(v);
            lab_used = true;
        }
    }
    if inp_ms.is_none() {
        // TBT 不是 INP，只作為互動性的近似
        if let Some(v) = audit("total-blocking-time").filter(|v| *v > 0.0) {
            inp_ms = Some((v * 2.0) as u64);
            lab_used = true;
        }
    }

    let missing: Vec<&str> = [("LCP", lcp_ms.is_none()), ("CLS", cls.is_none()), ("INP", inp_ms.is_none())]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();

    let vitals = CoreWebVitals { lcp_ms, cls, inp_ms };
    let signal = if lab_used {
        Signal::approximate(vitals, "Using Lighthouse lab data (simulated, not real user metrics)")
    } else {
        Signal::measured(vitals)
    };

    Ok(if missing.is_empty() {
        signal
    } else {
        super::annotate(
            signal,
            &format!("no Chrome user data for {}", missing.join(", ")),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PageFetcher;
    use crate::config::{EndpointSettings, GraderSettings};
    use crate::utils::validation::UrlValidator;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_field_data_is_measured() {
        let data = json!({
            "loadingExperience": {"metrics": {
                "LARGEST_CONTENTFUL_PAINT_MS": {"percentile": 2100},
                "CUMULATIVE_LAYOUT_SHIFT_SCORE": {"percentile": 5},
                "INTERACTION_TO_NEXT_PAINT": {"percentile": 180}
            }}
        });
        let signal = parse_pagespeed_response(&data).unwrap();

        assert_eq!(signal.provenance, Provenance::Measured);
        assert_eq!(signal.value.lcp_ms, Some(2100));
        assert_eq!(signal.value.cls, Some(0.05));
        assert_eq!(signal.value.inp_ms, Some(180));
        assert!(signal.note.is_none());
    }

    #[test]
    fn test_lab_data_fills_gaps_and_is_approximate() {
        let data = json!({
            "loadingExperience": {"metrics": {}},
            "lighthouseResult": {"audits": {
                "largest-contentful-paint": {"numericValue": 3200.7},
                "cumulative-layout-shift": {"numericValue": 0.02},
                "total-blocking-time": {"numericValue": 150.0}
            }}
        });
        let signal = parse_pagespeed_response(&data).unwrap();

        assert_eq!(signal.provenance, Provenance::Approximate);
        assert_eq!(signal.value.lcp_ms, Some(3200));
        assert_eq!(signal.value.cls, Some(0.02));
        assert_eq!(signal.value.inp_ms, Some(300));
    }

    #[test]
    fn test_missing_metrics_are_noted() {
        let data = json!({"loadingExperience": {"metrics": {
            "LARGEST_CONTENTFUL_PAINT_MS": {"percentile": 1800}
        }}});
        let signal = parse_pagespeed_response(&data).unwrap();

        assert_eq!(signal.value.cls, None);
        assert!(signal.note.unwrap().contains("CLS, INP"));
    }

    #[test]
    fn test_unrecognised_payload_is_malformed() {
        let err = parse_pagespeed_response(&json!({"error": {"code": 400}})).unwrap_err();
        assert!(matches!(err, GraderError::MalformedResponse { .. }));
    }

    #[test]
    fn test_estimate_from_timing() {
        let probe = PageProbe {
            status: 200,
            elapsed_ms: 800,
            content_length: 250_000,
            onpage: None,
        };
        let vitals = estimate_vitals(&probe);

        assert_eq!(vitals.lcp_ms, Some(1200));
        assert_eq!(vitals.cls, Some(0.08));
        assert_eq!(vitals.inp_ms, Some(500));
    }

    fn adapter_for(server: &MockServer, api_key: Option<&str>) -> (PageSpeedAdapter, NormalizedUrl) {
        let mut settings = GraderSettings::default();
        settings.rate_limit.requests_per_second = 1000.0;
        settings.rate_limit.backoff_base_ms = 1;
        settings.rate_limit.max_backoff_ms = 5;
        settings.endpoints = EndpointSettings::all_at(&server.base_url());
        settings.credentials.pagespeed_api_key = api_key.map(str::to_string);

        let ctx = AdapterContext::new(settings).unwrap();
        let page = Arc::new(PageFetcher::new(ctx.clone()));
        let url = UrlValidator::new()
            .allow_host("127.0.0.1")
            .validate(&server.url("/site"))
            .unwrap()
            .url;
        (PageSpeedAdapter::new(ctx, page), url)
    }

    #[tokio::test]
    async fn test_configured_api_is_used() {
        let server = MockServer::start();
        let api = server.mock(|when, then| {
            when.method(GET)
                .path("/runPagespeed")
                .query_param("key", "psi-key")
                .query_param("strategy", "mobile");
            then.status(200).json_body(json!({
                "loadingExperience": {"metrics": {
                    "LARGEST_CONTENTFUL_PAINT_MS": {"percentile": 2000},
                    "CUMULATIVE_LAYOUT_SHIFT_SCORE": {"percentile": 1},
                    "INTERACTION_TO_NEXT_PAINT": {"percentile": 100}
                }}
            }));
        });

        let (adapter, url) = adapter_for(&server, Some("psi-key"));
        assert_eq!(adapter.mode(), AdapterMode::Configured);

        let signal = adapter.fetch(&url).await;
        api.assert();
        assert_eq!(signal.provenance, Provenance::Measured);
        assert_eq!(signal.value.lcp_ms, Some(2000));
    }

    #[tokio::test]
    async fn test_rate_limited_api_falls_back_to_timing() {
        let server = MockServer::start();
        let api = server.mock(|when, then| {
            when.method(GET).path("/runPagespeed");
            then.status(429);
        });
        server.mock(|when, then| {
            when.method(GET).path("/site");
            then.status(200).body("<html><title>ok</title></html>");
        });

        let (adapter, url) = adapter_for(&server, Some("psi-key"));
        let signal = adapter.fetch(&url).await;

        api.assert_hits(1);
        assert_eq!(signal.provenance, Provenance::Approximate);
        assert!(signal.value.lcp_ms.is_some());
        assert!(signal.note.unwrap().contains("429"));
    }

    #[tokio::test]
    async fn test_fallback_mode_without_key() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/site");
            then.status(200).body("<html></html>");
        });

        let (adapter, url) = adapter_for(&server, None);
        assert_eq!(adapter.mode(), AdapterMode::Fallback);

        let signal = adapter.fetch(&url).await;
        assert_eq!(signal.provenance, Provenance::Approximate);
        assert_eq!(signal.value.cls, Some(0.05));
    }
}
