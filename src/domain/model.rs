use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a signal's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Measured,
    Approximate,
    Fallback,
    Unavailable,
}

impl Provenance {
    pub fn is_reduced_confidence(&self) -> bool {
        !matches!(self, Provenance::Measured)
    }

    /// 合併多個來源時取最不可靠的那個
    pub fn weakest(self, other: Provenance) -> Provenance {
        self.max(other)
    }

    fn rank(&self) -> u8 {
        match self {
            Provenance::Measured => 0,
            Provenance::Approximate => 1,
            Provenance::Fallback => 2,
            Provenance::Unavailable => 3,
        }
    }
}

impl PartialOrd for Provenance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Provenance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Provenance::Measured => "measured",
            Provenance::Approximate => "approximate",
            Provenance::Fallback => "fallback",
            Provenance::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// An immutable measurement produced by one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal<T> {
    pub value: T,
    pub provenance: Provenance,
    pub note: Option<String>,
}

impl<T> Signal<T> {
    pub fn measured(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Measured,
            note: None,
        }
    }

    pub fn approximate(value: T, note: impl Into<String>) -> Self {
        Self {
            value,
            provenance: Provenance::Approximate,
            note: Some(note.into()),
        }
    }

    pub fn fallback(value: T, note: impl Into<String>) -> Self {
        Self {
            value,
            provenance: Provenance::Fallback,
            note: Some(note.into()),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl<T: Default> Signal<T> {
    /// 兩條路徑都失敗時的中性值
    pub fn unavailable(note: impl Into<String>) -> Self {
        Self {
            value: T::default(),
            provenance: Provenance::Unavailable,
            note: Some(note.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    PageSpeed,
    Serp,
    Whois,
    Authority,
    Page,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::PageSpeed => "pagespeed",
            AdapterKind::Serp => "serp",
            AdapterKind::Whois => "whois",
            AdapterKind::Authority => "authority",
            AdapterKind::Page => "page",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    Configured,
    Fallback,
}

impl fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterMode::Configured => f.write_str("configured"),
            AdapterMode::Fallback => f.write_str("fallback"),
        }
    }
}

/// Health surface entry: configuration presence only, never a live probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub adapter: AdapterKind,
    pub mode: AdapterMode,
    pub backend: String,
}

// ---- adapter payloads ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreWebVitals {
    pub lcp_ms: Option<u64>,
    pub cls: Option<f64>,
    pub inp_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordRank {
    pub keyword: String,
    pub rank: Option<u32>,
}

impl KeywordRank {
    pub fn unranked(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            rank: None,
        }
    }

    pub fn is_top10(&self) -> bool {
        matches!(self.rank, Some(r) if r <= 10)
    }

    pub fn is_top30(&self) -> bool {
        matches!(self.rank, Some(r) if r <= 30)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerpVisibility {
    pub results: Vec<KeywordRank>,
    pub hits_top10: u32,
    pub hits_top30: u32,
}

impl SerpVisibility {
    pub fn from_results(results: Vec<KeywordRank>) -> Self {
        let hits_top10 = results.iter().filter(|r| r.is_top10()).count() as u32;
        let hits_top30 = results.iter().filter(|r| r.is_top30()).count() as u32;
        Self {
            results,
            hits_top10,
            hits_top30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainAge {
    pub domain: String,
    pub created: Option<chrono::NaiveDate>,
    pub age_years: Option<u32>,
    pub registrar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorityMetrics {
    /// 0-100
    pub domain_authority: Option<f64>,
    pub referring_domains: Option<u64>,
    pub domain_age_years: Option<u32>,
    pub brand_present: bool,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnPageMetrics {
    pub title: Option<String>,
    pub title_length: usize,
    pub meta_description_length: usize,
    pub meta_unique: bool,
    pub h1_present: bool,
    pub canonical_present: bool,
    pub site_name: Option<String>,
}

/// One fetch of the target page: timing plus the parsed on-page structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageProbe {
    pub status: u16,
    pub elapsed_ms: u64,
    pub content_length: usize,
    pub onpage: Option<OnPageMetrics>,
}

impl PageProbe {
    pub fn is_bot_blocked(&self) -> bool {
        self.status == 403
    }
}

// ---- dimensions ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Technical,
    ContentKeywords,
    Measurement,
    CoreWebVitals,
    Onpage,
    AuthorityProxies,
    SerpReality,
}

impl Dimension {
    pub fn max(&self) -> u32 {
        match self {
            Dimension::Technical | Dimension::ContentKeywords | Dimension::CoreWebVitals => 20,
            Dimension::Onpage => 15,
            Dimension::Measurement | Dimension::AuthorityProxies => 10,
            Dimension::SerpReality => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Technical => "Technical SEO",
            Dimension::ContentKeywords => "Content & Keywords",
            Dimension::Measurement => "Measurement & Analytics",
            Dimension::CoreWebVitals => "Core Web Vitals",
            Dimension::Onpage => "On-page SEO",
            Dimension::AuthorityProxies => "Authority Proxies",
            Dimension::SerpReality => "SERP Reality",
        }
    }
}

/// Invariant: `value <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub name: Dimension,
    pub value: u32,
    pub max: u32,
}

impl DimensionScore {
    pub fn new(name: Dimension, value: u32) -> Self {
        let max = name.max();
        Self {
            name,
            value: value.min(max),
            max,
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.value as f64 / self.max as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireAnswers {
    pub t1: u8,
    pub t2: u8,
    pub t3: u8,
    pub t4: u8,
    pub c1: u8,
    pub c2: u8,
    pub c3: u8,
    pub c4: u8,
    pub m1: u8,
    pub m2: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredDimensions {
    pub technical: DimensionScore,
    pub content_keywords: DimensionScore,
    pub measurement: DimensionScore,
}

impl DeclaredDimensions {
    pub fn all(&self) -> [DimensionScore; 3] {
        [self.technical, self.content_keywords, self.measurement]
    }

    pub fn total(&self) -> u32 {
        self.all().iter().map(|d| d.value).sum()
    }
}

/// Snapshot of every raw value that fed the observed buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignals {
    pub core_web_vitals: Option<Signal<CoreWebVitals>>,
    pub page: Option<Signal<PageProbe>>,
    pub domain_age: Option<Signal<DomainAge>>,
    pub authority: Option<Signal<AuthorityMetrics>>,
    pub serp: Option<Signal<SerpVisibility>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedDimensions {
    pub core_web_vitals: DimensionScore,
    pub onpage: DimensionScore,
    pub authority_proxies: DimensionScore,
    pub serp_reality: DimensionScore,
    pub signals: RawSignals,
    pub notes: Vec<String>,
}

impl ObservedDimensions {
    /// 固定優先順序：CWV、On-page、Authority、SERP
    pub fn all(&self) -> [DimensionScore; 4] {
        [
            self.core_web_vitals,
            self.onpage,
            self.authority_proxies,
            self.serp_reality,
        ]
    }

    pub fn total(&self) -> u32 {
        self.all().iter().map(|d| d.value).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Chaotic,
    Reactive,
    Structured,
    Optimised,
    Strategic,
}

impl Stage {
    /// 0-30 Chaotic, 31-50 Reactive, 51-70 Structured, 71-85 Optimised, 86-100 Strategic
    pub fn from_score(total: u32) -> Stage {
        match total {
            0..=30 => Stage::Chaotic,
            31..=50 => Stage::Reactive,
            51..=70 => Stage::Structured,
            71..=85 => Stage::Optimised,
            _ => Stage::Strategic,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Chaotic => "Chaotic",
            Stage::Reactive => "Reactive",
            Stage::Structured => "Structured",
            Stage::Optimised => "Optimised",
            Stage::Strategic => "Strategic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionBreakdown {
    pub declared: Vec<DimensionScore>,
    pub observed: Vec<DimensionScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub total_score: u32,
    pub stage: Stage,
    pub questionnaire_score: u32,
    pub observed_score: u32,
    pub dimension_scores: DimensionBreakdown,
    pub gap: String,
    pub top_risks: Vec<String>,
    pub raw_signals: RawSignals,
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_boundaries() {
        assert_eq!(Stage::from_score(0), Stage::Chaotic);
        assert_eq!(Stage::from_score(30), Stage::Chaotic);
        assert_eq!(Stage::from_score(31), Stage::Reactive);
        assert_eq!(Stage::from_score(50), Stage::Reactive);
        assert_eq!(Stage::from_score(51), Stage::Structured);
        assert_eq!(Stage::from_score(70), Stage::Structured);
        assert_eq!(Stage::from_score(71), Stage::Optimised);
        assert_eq!(Stage::from_score(85), Stage::Optimised);
        assert_eq!(Stage::from_score(86), Stage::Strategic);
        assert_eq!(Stage::from_score(100), Stage::Strategic);
    }

    #[test]
    fn test_dimension_score_is_capped_at_max() {
        let score = DimensionScore::new(Dimension::SerpReality, 9);
        assert_eq!(score.value, 5);
        assert_eq!(score.max, 5);
    }

    #[test]
    fn test_dimension_maxima_sum_to_one_hundred() {
        let all = [
            Dimension::Technical,
            Dimension::ContentKeywords,
            Dimension::Measurement,
            Dimension::CoreWebVitals,
            Dimension::Onpage,
            Dimension::AuthorityProxies,
            Dimension::SerpReality,
        ];
        assert_eq!(Dimension::CoreWebVitals.max(), 20);
        assert_eq!(all.iter().map(Dimension::max).sum::<u32>(), 100);
    }

    #[test]
    fn test_provenance_weakest() {
        assert_eq!(
            Provenance::Measured.weakest(Provenance::Fallback),
            Provenance::Fallback
        );
        assert_eq!(
            Provenance::Unavailable.weakest(Provenance::Approximate),
            Provenance::Unavailable
        );
    }

    #[test]
    fn test_serp_visibility_counts_hits() {
        let visibility = SerpVisibility::from_results(vec![
            KeywordRank {
                keyword: "a".into(),
                rank: Some(3),
            },
            KeywordRank {
                keyword: "b".into(),
                rank: Some(25),
            },
            KeywordRank::unranked("c"),
        ]);
        assert_eq!(visibility.hits_top10, 1);
        assert_eq!(visibility.hits_top30, 2);
    }
}
