use crate::adapters::{
    AdapterContext, AuthorityAdapter, PageFetcher, PageSpeedAdapter, SerpAdapter, SerpQuery,
    WhoisAdapter,
};
use crate::domain::model::{
    AuthorityMetrics, CoreWebVitals, Dimension, DimensionScore, DomainAge, ObservedDimensions,
    OnPageMetrics, PageProbe, Provenance, RawSignals, SerpVisibility, ServiceStatus, Signal,
};
use crate::domain::ports::SignalAdapter;
use crate::utils::rounding::bucket_score;
use crate::utils::validation::NormalizedUrl;
use std::sync::Arc;

pub const GOOD_LCP_MS: u64 = 2500;
pub const GOOD_CLS: f64 = 0.1;
pub const GOOD_INP_MS: u64 = 200;

/// 403 時每個 on-page 元件給的中性分
const BOT_BLOCKED_COMPONENT: f64 = 0.5;

type UrlAdapter<T> = Arc<dyn SignalAdapter<NormalizedUrl, Output = T>>;

/// Runs every adapter for one target and folds their signals into the four
/// observed buckets.
#[derive(Clone)]
pub struct ObservedEvaluator {
    pagespeed: UrlAdapter<CoreWebVitals>,
    page: UrlAdapter<PageProbe>,
    whois: Arc<dyn SignalAdapter<str, Output = DomainAge>>,
    authority: UrlAdapter<AuthorityMetrics>,
    serp: Arc<dyn SignalAdapter<SerpQuery, Output = SerpVisibility>>,
}

impl ObservedEvaluator {
    pub fn new(
        pagespeed: UrlAdapter<CoreWebVitals>,
        page: UrlAdapter<PageProbe>,
        whois: Arc<dyn SignalAdapter<str, Output = DomainAge>>,
        authority: UrlAdapter<AuthorityMetrics>,
        serp: Arc<dyn SignalAdapter<SerpQuery, Output = SerpVisibility>>,
    ) -> Self {
        Self {
            pagespeed,
            page,
            whois,
            authority,
            serp,
        }
    }

    /// 頁面與 WHOIS 共用同一個實例，PageSpeed 與 Authority 的 fallback 才能命中快取
    pub fn from_context(ctx: &AdapterContext) -> Self {
        let page: UrlAdapter<PageProbe> = Arc::new(PageFetcher::new(ctx.clone()));
        let whois: Arc<dyn SignalAdapter<str, Output = DomainAge>> =
            Arc::new(WhoisAdapter::new(ctx.clone()));

        Self {
            pagespeed: Arc::new(PageSpeedAdapter::new(ctx.clone(), page.clone())),
            authority: Arc::new(AuthorityAdapter::new(
                ctx.clone(),
                whois.clone(),
                page.clone(),
            )),
            serp: Arc::new(SerpAdapter::new(ctx.clone())),
            page,
            whois,
        }
    }

    /// Configuration state of the four external capabilities.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        vec![
            self.pagespeed.status(),
            self.serp.status(),
            self.whois.status(),
            self.authority.status(),
        ]
    }

    pub async fn evaluate(&self, url: &NormalizedUrl, keywords: &[String]) -> ObservedDimensions {
        let domain = url.domain();
        let query = SerpQuery {
            domain: domain.clone(),
            keywords: keywords.to_vec(),
        };

        tracing::debug!("🔍 evaluating {} with {} keyword(s)", url, keywords.len());
        let (vitals, page, age, authority, serp) = tokio::join!(
            self.pagespeed.fetch(url),
            self.page.fetch(url),
            self.whois.fetch(domain.as_str()),
            self.authority.fetch(url),
            self.serp.fetch(&query),
        );

        let brand = page
            .value
            .onpage
            .as_ref()
            .map(|onpage| crate::adapters::authority::brand_present(&domain, onpage))
            .unwrap_or(false)
            || authority.value.brand_present;

        let core_web_vitals = DimensionScore::new(
            Dimension::CoreWebVitals,
            bucket_score(cwv_subscore(&vitals.value), Dimension::CoreWebVitals.max()),
        );
        let onpage = DimensionScore::new(
            Dimension::Onpage,
            bucket_score(onpage_subscore(&page), Dimension::Onpage.max()),
        );
        let authority_proxies = DimensionScore::new(
            Dimension::AuthorityProxies,
            bucket_score(
                authority_subscore(&authority, age.value.age_years, brand),
                Dimension::AuthorityProxies.max(),
            ),
        );
        let serp_reality = DimensionScore::new(
            Dimension::SerpReality,
            bucket_score(
                serp_subscore(&serp.value, keywords.len()),
                Dimension::SerpReality.max(),
            ),
        );

        let notes = vec![
            describe(Dimension::CoreWebVitals.label(), &vitals),
            describe(Dimension::Onpage.label(), &page),
            describe("Domain age", &age),
            describe(Dimension::AuthorityProxies.label(), &authority),
            describe(Dimension::SerpReality.label(), &serp),
        ];

        ObservedDimensions {
            core_web_vitals,
            onpage,
            authority_proxies,
            serp_reality,
            signals: RawSignals {
                core_web_vitals: Some(vitals),
                page: Some(page),
                domain_age: Some(age),
                authority: Some(authority),
                serp: Some(serp),
            },
            notes,
        }
    }
}

/// e.g. `Core Web Vitals (approximate): Estimated from response timing`
pub fn describe<T>(label: &str, signal: &Signal<T>) -> String {
    match &signal.note {
        Some(note) => format!("{} ({}): {}", label, signal.provenance, note),
        None => format!("{} ({})", label, signal.provenance),
    }
}

/// 通過的指標數對應 1.0 / 0.75 / 0.5 / 0.25；沒有 LCP 代表頁面沒載入
pub fn cwv_subscore(vitals: &CoreWebVitals) -> f64 {
    let Some(lcp) = vitals.lcp_ms else {
        return 0.0;
    };

    let passing = [
        lcp <= GOOD_LCP_MS,
        vitals.cls.map(|cls| cls <= GOOD_CLS).unwrap_or(false),
        vitals.inp_ms.map(|inp| inp <= GOOD_INP_MS).unwrap_or(false),
    ]
    .iter()
    .filter(|pass| **pass)
    .count();

    match passing {
        3 => 1.0,
        2 => 0.75,
        1 => 0.5,
        _ => 0.25,
    }
}

pub fn title_quality(onpage: &OnPageMetrics) -> f64 {
    if onpage.title.is_none() {
        return 0.0;
    }
    match onpage.title_length {
        30..=60 => 1.0,
        20..=70 => 0.66,
        _ => 0.33,
    }
}

pub fn meta_quality(onpage: &OnPageMetrics) -> f64 {
    let length = onpage.meta_description_length;
    if length == 0 {
        0.0
    } else if onpage.meta_unique && (100..=160).contains(&length) {
        1.0
    } else if (50..=200).contains(&length) {
        0.66
    } else {
        0.33
    }
}

pub fn onpage_subscore(page: &Signal<PageProbe>) -> f64 {
    if page.provenance == Provenance::Unavailable {
        return 0.0;
    }
    if page.value.is_bot_blocked() {
        return BOT_BLOCKED_COMPONENT;
    }
    match &page.value.onpage {
        Some(onpage) => {
            let h1 = if onpage.h1_present { 1.0 } else { 0.0 };
            (title_quality(onpage) + meta_quality(onpage) + h1) / 3.0
        }
        None => 0.0,
    }
}

/// DA/100 when a score exists; otherwise points for age, referring domains and brand.
pub fn authority_subscore(
    authority: &Signal<AuthorityMetrics>,
    age_years: Option<u32>,
    brand: bool,
) -> f64 {
    let brand_points = if brand { 0.2 } else { 0.0 };

    if authority.provenance == Provenance::Unavailable {
        let age_points = match age_years {
            Some(age) if age >= 5 => 0.4,
            Some(age) if age >= 1 => 0.2,
            _ => 0.0,
        };
        return f64::min(age_points + brand_points, 1.0);
    }

    if let Some(da) = authority.value.domain_authority {
        return (da / 100.0).clamp(0.0, 1.0);
    }

    let age = age_years.or(authority.value.domain_age_years);
    let mut subscore = brand_points;
    if age.map(|a| a >= 5).unwrap_or(false) {
        subscore += 0.4;
    }
    if authority.value.referring_domains.map(|r| r > 5).unwrap_or(false) {
        subscore += 0.4;
    }
    f64::min(subscore, 1.0)
}

/// 前 10 名 1 分、前 30 名 0.5 分，除以關鍵字數
pub fn serp_subscore(serp: &SerpVisibility, keyword_count: usize) -> f64 {
    if keyword_count == 0 {
        return 0.0;
    }
    let points: f64 = serp
        .results
        .iter()
        .map(|r| {
            if r.is_top10() {
                1.0
            } else if r.is_top30() {
                0.5
            } else {
                0.0
            }
        })
        .sum();
    (points / keyword_count as f64).clamp(0.0, 1.0)
}
