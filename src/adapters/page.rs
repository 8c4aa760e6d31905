use crate::adapters::AdapterContext;
use crate::core::cache::cache_key;
use crate::domain::model::{AdapterKind, AdapterMode, OnPageMetrics, PageProbe, Signal};
use crate::domain::ports::SignalAdapter;
use crate::utils::error::Result;
use crate::utils::validation::NormalizedUrl;
use async_trait::async_trait;
use scraper::{Html, Selector};

const PLACEHOLDER_PHRASES: &[&str] = &[
    "lorem ipsum",
    "placeholder",
    "add your description here",
    "enter description",
    "default description",
    "todo:",
];

/// One timed fetch of the target page, shared by the timing heuristic,
/// the on-page bucket and the brand check.
pub struct PageFetcher {
    ctx: AdapterContext,
}

impl PageFetcher {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    async fn probe(&self, url: &NormalizedUrl) -> Result<PageProbe> {
        let page = self.ctx.http.fetch_page(url.host(), url.as_str()).await?;

        let onpage = if (200..300).contains(&page.status) {
            Some(parse_onpage(&page.body))
        } else {
            tracing::debug!("🌐 {}: page answered HTTP {}", url.host(), page.status);
            None
        };

        Ok(PageProbe {
            status: page.status,
            elapsed_ms: page.elapsed_ms,
            content_length: page.body.len(),
            onpage,
        })
    }
}

#[async_trait]
impl SignalAdapter<NormalizedUrl> for PageFetcher {
    type Output = PageProbe;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Page
    }

    fn mode(&self) -> AdapterMode {
        AdapterMode::Configured
    }

    fn backend(&self) -> &'static str {
        "direct-fetch"
    }

    async fn fetch(&self, url: &NormalizedUrl) -> Signal<PageProbe> {
        let key = cache_key(AdapterKind::Page, url.as_str(), None);
        self.ctx
            .cache
            .get_or_fetch(&key, || async {
                match self.probe(url).await {
                    Ok(probe) => {
                        let signal = if probe.is_bot_blocked() {
                            Signal::measured(probe).with_note("Site restricts automated access")
                        } else {
                            Signal::measured(probe)
                        };
                        (signal, Some(self.ctx.cache.default_ttl()))
                    }
                    Err(e) => {
                        tracing::warn!("🌐 {}: page fetch failed: {}", url.host(), e);
                        (Signal::unavailable(format!("Site unreachable: {}", e)), None)
                    }
                }
            })
            .await
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<scraper::ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next()
}

fn text_of(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn attr_of(document: &Html, selector: &str, attr: &str) -> Option<String> {
    select_first(document, selector)
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 解析 title、meta description、H1、canonical 與 og:site_name
pub fn parse_onpage(html: &str) -> OnPageMetrics {
    let document = Html::parse_document(html);

    let title = select_first(&document, "title")
        .map(text_of)
        .filter(|t| !t.is_empty());

    let meta = attr_of(&document, r#"meta[name="description"]"#, "content").unwrap_or_default();
    let meta_lower = meta.to_lowercase();
    let meta_unique = meta.chars().count() > 50
        && !PLACEHOLDER_PHRASES.iter().any(|p| meta_lower.contains(p));

    let h1_present = select_first(&document, "h1")
        .map(|el| !text_of(el).is_empty())
        .unwrap_or(false);

    OnPageMetrics {
        title_length: title.as_ref().map(|t| t.chars().count()).unwrap_or(0),
        title,
        meta_description_length: meta.chars().count(),
        meta_unique,
        h1_present,
        canonical_present: attr_of(&document, r#"link[rel="canonical"]"#, "href").is_some(),
        site_name: attr_of(&document, r#"meta[property="og:site_name"]"#, "content"),
    }
}
