use crate::adapters::AdapterContext;
use crate::core::cache::cache_key;
use crate::domain::model::{
    AdapterKind, AdapterMode, KeywordRank, Provenance, SerpVisibility, Signal,
};
use crate::domain::ports::SignalAdapter;
use crate::utils::error::{GraderError, Result};
use async_trait::async_trait;
use serde_json::Value;

const MAX_RESULTS_TO_CHECK: u32 = 30;
const GCS_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerpQuery {
    pub domain: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
enum SerpBackend {
    SerpApi { api_key: String },
    CustomSearch { api_key: String, cx: String },
    Unconfigured,
}

/// Keyword rankings of the target domain in the top 30 organic results.
pub struct SerpAdapter {
    ctx: AdapterContext,
    backend: SerpBackend,
}

/// 結果連結的主機等於目標網域或是其子網域
pub fn link_matches_domain(link: &str, domain: &str) -> bool {
    let Some(host) = url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
    else {
        return false;
    };
    let domain = domain.to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// 1-based position of the first matching link, offset by `start - 1`.
fn find_rank<'a>(links: impl Iterator<Item = &'a str>, domain: &str, start: u32) -> Option<u32> {
    links
        .enumerate()
        .find(|(_, link)| link_matches_domain(link, domain))
        .map(|(i, _)| start + i as u32)
}

fn links_of<'a>(data: &'a Value, field: &str) -> impl Iterator<Item = &'a str> {
    data.get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("link").and_then(Value::as_str))
}

pub fn parse_serpapi_response(domain: &str, data: &Value) -> Result<Option<u32>> {
    if let Some(error) = data.get("error").and_then(Value::as_str) {
        // 「沒有結果」不是錯誤
        if !error.contains("hasn't returned any results") {
            return Err(GraderError::MalformedResponse {
                origin: "serpapi".to_string(),
                message: error.to_string(),
            });
        }
    }
    Ok(find_rank(links_of(data, "organic_results"), domain, 1)
        .filter(|rank| *rank <= MAX_RESULTS_TO_CHECK))
}

impl SerpAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        let credentials = ctx.credentials();
        let backend = match (
            &credentials.serpapi_key,
            &credentials.gcs_api_key,
            &credentials.gcs_cx,
        ) {
            (Some(key), _, _) => SerpBackend::SerpApi {
                api_key: key.clone(),
            },
            (None, Some(key), Some(cx)) => SerpBackend::CustomSearch {
                api_key: key.clone(),
                cx: cx.clone(),
            },
            _ => SerpBackend::Unconfigured,
        };
        Self { ctx, backend }
    }

    async fn rank_via_serpapi(&self, domain: &str, keyword: &str, api_key: &str) -> Result<Option<u32>> {
        let endpoint = format!("{}/search.json", self.ctx.endpoints().serpapi);
        let num = MAX_RESULTS_TO_CHECK.to_string();
        let data = self
            .ctx
            .http
            .send_json("serpapi", |client| {
                client.get(&endpoint).query(&[
                    ("q", keyword),
                    ("api_key", api_key),
                    ("engine", "google"),
                    ("num", num.as_str()),
                    ("gl", "us"),
                    ("hl", "en"),
                ])
            })
            .await?;

        parse_serpapi_response(domain, &data)
    }

    /// Custom Search 每頁最多 10 筆，依序查 1、11、21
    async fn rank_via_custom_search(
        &self,
        domain: &str,
        keyword: &str,
        api_key: &str,
        cx: &str,
    ) -> Result<Option<u32>> {
        let endpoint = format!("{}/v1", self.ctx.endpoints().gcs);
        let page_size = GCS_PAGE_SIZE.to_string();

        for start in (1..=MAX_RESULTS_TO_CHECK).step_by(GCS_PAGE_SIZE as usize) {
            let start_param = start.to_string();
            let data = self
                .ctx
                .http
                .send_json("gcs", |client| {
                    client.get(&endpoint).query(&[
                        ("q", keyword),
                        ("key", api_key),
                        ("cx", cx),
                        ("start", start_param.as_str()),
                        ("num", page_size.as_str()),
                    ])
                })
                .await?;

            let items = data.get("items").and_then(Value::as_array);
            if let Some(rank) = find_rank(links_of(&data, "items"), domain, start) {
                return Ok(Some(rank));
            }
            // 沒有下一頁
            if items.map(|i| i.len() < GCS_PAGE_SIZE as usize).unwrap_or(true) {
                break;
            }
        }
        Ok(None)
    }

    async fn rank_keyword(&self, domain: &str, keyword: &str) -> Signal<KeywordRank> {
        let key = cache_key(AdapterKind::Serp, domain, Some(&keyword.to_lowercase()));
        self.ctx
            .cache
            .get_or_fetch(&key, || async {
                let configured = match &self.backend {
                    SerpBackend::SerpApi { api_key } => {
                        Some(self.rank_via_serpapi(domain, keyword, api_key).await)
                    }
                    SerpBackend::CustomSearch { api_key, cx } => {
                        Some(self.rank_via_custom_search(domain, keyword, api_key, cx).await)
                    }
                    SerpBackend::Unconfigured => None,
                };
                let configured = configured.map(|result| {
                    std::future::ready(result.map(|rank| {
                        Signal::measured(KeywordRank {
                            keyword: keyword.to_string(),
                            rank,
                        })
                    }))
                });

                let note = match self.backend {
                    SerpBackend::Unconfigured => "No SERP API configured",
                    _ => "Keyword counted as unranked",
                };
                self.ctx
                    .configured_or_fallback(AdapterKind::Serp, configured, || async {
                        // 保守的下限：無法驗證就視為沒有排名
                        Signal::fallback(KeywordRank::unranked(keyword), note)
                    })
                    .await
            })
            .await
    }
}

#[async_trait]
impl SignalAdapter<SerpQuery> for SerpAdapter {
    type Output = SerpVisibility;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Serp
    }

    fn mode(&self) -> AdapterMode {
        match self.backend {
            SerpBackend::Unconfigured => AdapterMode::Fallback,
            _ => AdapterMode::Configured,
        }
    }

    fn backend(&self) -> &'static str {
        match self.backend {
            SerpBackend::SerpApi { .. } => "serpapi",
            SerpBackend::CustomSearch { .. } => "gcs",
            SerpBackend::Unconfigured => "zero-visibility",
        }
    }

    async fn fetch(&self, query: &SerpQuery) -> Signal<SerpVisibility> {
        if query.keywords.is_empty() {
            let signal = Signal::measured(SerpVisibility::default());
            return signal.with_note("No target keywords supplied");
        }

        let lookups = query
            .keywords
            .iter()
            .map(|keyword| self.rank_keyword(&query.domain, keyword));
        let ranks = futures::future::join_all(lookups).await;

        let provenance = ranks
            .iter()
            .fold(Provenance::Measured, |acc, s| acc.weakest(s.provenance));
        let degraded = ranks
            .iter()
            .filter(|s| s.provenance != Provenance::Measured)
            .count();
        let visibility = SerpVisibility::from_results(ranks.into_iter().map(|s| s.value).collect());

        match provenance {
            Provenance::Measured => Signal::measured(visibility),
            _ if matches!(self.backend, SerpBackend::Unconfigured) => Signal::fallback(
                visibility,
                "SERP visibility could not be verified (no API configured)",
            ),
            _ => Signal::fallback(
                visibility,
                format!(
                    "{} of {} keyword lookups failed and count as unranked",
                    degraded,
                    query.keywords.len()
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointSettings, GraderSettings};
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_link_matching() {
        assert!(link_matches_domain("https://example.com/page", "example.com"));
        assert!(link_matches_domain("https://www.example.com/", "example.com"));
        assert!(link_matches_domain("https://Blog.Example.com/x", "example.com"));
        assert!(!link_matches_domain("https://notexample.com/", "example.com"));
        assert!(!link_matches_domain("https://example.com.evil.io/", "example.com"));
        assert!(!link_matches_domain("not a url", "example.com"));
    }

    #[test]
    fn test_serpapi_rank_is_position_of_first_match() {
        let data = json!({"organic_results": [
            {"link": "https://a.com/"},
            {"link": "https://b.com/"},
            {"link": "https://www.example.com/pricing"},
            {"link": "https://example.com/"}
        ]});
        assert_eq!(parse_serpapi_response("example.com", &data).unwrap(), Some(3));
    }

    #[test]
    fn test_serpapi_error_payload() {
        let data = json!({"error": "Invalid API key."});
        assert!(parse_serpapi_response("example.com", &data).is_err());

        let empty = json!({"error": "Google hasn't returned any results for this query."});
        assert_eq!(parse_serpapi_response("example.com", &empty).unwrap(), None);
    }

    fn adapter_with(server: Option<&MockServer>, configure: impl FnOnce(&mut GraderSettings)) -> SerpAdapter {
        let mut settings = GraderSettings::default();
        settings.rate_limit.requests_per_second = 1000.0;
        settings.rate_limit.backoff_base_ms = 1;
        settings.rate_limit.max_backoff_ms = 5;
        if let Some(server) = server {
            settings.endpoints = EndpointSettings::all_at(&server.base_url());
        }
        configure(&mut settings);
        SerpAdapter::new(AdapterContext::new(settings).unwrap())
    }

    fn query(keywords: &[&str]) -> SerpQuery {
        SerpQuery {
            domain: "example.com".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_returns_zero_visibility() {
        let adapter = adapter_with(None, |_| {});
        assert_eq!(adapter.mode(), AdapterMode::Fallback);

        let signal = adapter.fetch(&query(&["seo audit", "seo tools"])).await;

        assert_eq!(signal.provenance, Provenance::Fallback);
        assert_eq!(signal.value.hits_top10, 0);
        assert_eq!(signal.value.hits_top30, 0);
        assert_eq!(signal.value.results.len(), 2);
        assert!(signal.value.results.iter().all(|r| r.rank.is_none()));
    }

    #[tokio::test]
    async fn test_serpapi_lookups_per_keyword() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/search.json")
                .query_param("q", "seo audit")
                .query_param("num", "30");
            then.status(200).json_body(json!({"organic_results": [
                {"link": "https://other.com/"},
                {"link": "https://example.com/audit"}
            ]}));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("q", "seo tools");
            then.status(200).json_body(json!({"organic_results": []}));
        });

        let adapter = adapter_with(Some(&server), |s| {
            s.credentials.serpapi_key = Some("serp-key".to_string())
        });
        assert_eq!(adapter.backend(), "serpapi");

        let signal = adapter.fetch(&query(&["seo audit", "seo tools"])).await;
        first.assert();
        second.assert();

        assert_eq!(signal.provenance, Provenance::Measured);
        assert_eq!(signal.value.results[0].rank, Some(2));
        assert_eq!(signal.value.results[1].rank, None);
        assert_eq!(signal.value.hits_top10, 1);

        // 第二次完全由快取提供
        adapter.fetch(&query(&["seo audit", "seo tools"])).await;
        first.assert_hits(1);
        second.assert_hits(1);
    }

    #[tokio::test]
    async fn test_custom_search_pages_through_results() {
        let server = MockServer::start();
        let page_one = server.mock(|when, then| {
            when.method(GET).path("/v1").query_param("start", "1");
            then.status(200).json_body(json!({"items": (0..10)
                .map(|i| json!({"link": format!("https://site{}.com/", i)}))
                .collect::<Vec<_>>()}));
        });
        let page_two = server.mock(|when, then| {
            when.method(GET).path("/v1").query_param("start", "11");
            then.status(200).json_body(json!({"items": [
                {"link": "https://x.com/"},
                {"link": "https://example.com/"}
            ]}));
        });

        let adapter = adapter_with(Some(&server), |s| {
            s.credentials.gcs_api_key = Some("gcs-key".to_string());
            s.credentials.gcs_cx = Some("cx-id".to_string());
        });
        assert_eq!(adapter.backend(), "gcs");

        let signal = adapter.fetch(&query(&["widgets"])).await;
        page_one.assert();
        page_two.assert();
        assert_eq!(signal.value.results[0].rank, Some(12));
        assert_eq!(signal.value.hits_top10, 0);
        assert_eq!(signal.value.hits_top30, 1);
    }

    #[tokio::test]
    async fn test_failed_keyword_counts_as_unranked() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("q", "good");
            then.status(200)
                .json_body(json!({"organic_results": [{"link": "https://example.com/"}]}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("q", "bad");
            then.status(500);
        });

        let adapter = adapter_with(Some(&server), |s| {
            s.credentials.serpapi_key = Some("serp-key".to_string())
        });
        let signal = adapter.fetch(&query(&["good", "bad"])).await;

        assert_eq!(signal.provenance, Provenance::Fallback);
        assert_eq!(signal.value.hits_top10, 1);
        assert!(signal.note.unwrap().contains("1 of 2"));
    }
}
