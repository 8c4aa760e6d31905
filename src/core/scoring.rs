use crate::domain::model::{
    DeclaredDimensions, Dimension, DimensionBreakdown, DimensionScore, GradingResult,
    ObservedDimensions, Provenance, RawSignals, Stage,
};

pub const MAX_TOTAL: u32 = 100;
pub const MAX_RISKS: usize = 3;

const MINIMAL_GAP: i64 = 3;
const MODERATE_GAP: i64 = 10;

/// 缺口風險排在所有觀測維度之後
const GAP_PRIORITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapLevel {
    Minimal,
    Moderate,
    High,
}

impl GapLevel {
    pub fn from_difference(diff: i64) -> GapLevel {
        match diff.abs() {
            d if d <= MINIMAL_GAP => GapLevel::Minimal,
            d if d <= MODERATE_GAP => GapLevel::Moderate,
            _ => GapLevel::High,
        }
    }
}

#[derive(Debug, Clone)]
struct RiskCandidate {
    ratio: f64,
    priority: usize,
    statement: &'static str,
}

fn priority_of(dimension: Dimension) -> usize {
    match dimension {
        Dimension::CoreWebVitals => 0,
        Dimension::Onpage => 1,
        Dimension::AuthorityProxies => 2,
        Dimension::SerpReality => 3,
        _ => GAP_PRIORITY,
    }
}

/// 依比例挑選模板；比例夠高時不列為風險
fn risk_statement(dimension: Dimension, ratio: f64) -> Option<&'static str> {
    match dimension {
        Dimension::CoreWebVitals if ratio < 0.4 => Some(
            "Core Web Vitals are critical: slow loading and unstable layouts are likely costing rankings and conversions",
        ),
        Dimension::CoreWebVitals if ratio < 0.6 => Some(
            "Core Web Vitals are poor: page speed and visual stability need attention",
        ),
        Dimension::CoreWebVitals if ratio < 0.8 => Some(
            "Core Web Vitals are moderate: some metrics miss the recommended thresholds",
        ),
        Dimension::Onpage if ratio < 0.5 => Some(
            "On-page basics are weak: titles, meta descriptions or H1 headings are missing or badly sized",
        ),
        Dimension::Onpage if ratio < 0.75 => Some(
            "On-page elements need tuning: title or meta description length is outside the recommended range",
        ),
        Dimension::AuthorityProxies if ratio < 0.5 => Some(
            "Authority signals are low: the domain has little history or link equity to compete with",
        ),
        Dimension::AuthorityProxies if ratio < 0.75 => Some(
            "Authority is building but still below competitive levels",
        ),
        Dimension::SerpReality if ratio < 0.5 => Some(
            "Search visibility is low: target keywords do not rank in the top 30 results",
        ),
        Dimension::SerpReality if ratio < 0.75 => Some(
            "Search visibility is partial: some target keywords rank outside the top 10",
        ),
        _ => None,
    }
}

/// Combines declared and observed dimensions into the final grade.
///
/// Pure and deterministic: identical inputs give identical results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, declared: &DeclaredDimensions, observed: &ObservedDimensions) -> GradingResult {
        let questionnaire_score = declared.total();
        let observed_score = observed.total();
        let total_score = (questionnaire_score + observed_score).min(MAX_TOTAL);
        let diff = questionnaire_score as i64 - observed_score as i64;

        GradingResult {
            total_score,
            stage: Stage::from_score(total_score),
            questionnaire_score,
            observed_score,
            dimension_scores: DimensionBreakdown {
                declared: declared.all().to_vec(),
                observed: observed.all().to_vec(),
            },
            gap: gap_description(diff),
            top_risks: top_risks(&observed.all(), diff),
            raw_signals: observed.signals.clone(),
            notes: build_notes(&observed.notes, &observed.signals),
        }
    }
}

/// `diff` = declared - observed; both halves share the same 50-point scale.
pub fn gap_description(diff: i64) -> String {
    let text = match (GapLevel::from_difference(diff), diff > 0) {
        (GapLevel::Minimal, _) => {
            "Minimal gap: declared practices and observed results are well-aligned"
        }
        (GapLevel::Moderate, true) => {
            "Moderate gap: declared practices somewhat exceed what the site shows"
        }
        (GapLevel::Moderate, false) => {
            "Moderate gap: the site performs somewhat better than declared"
        }
        (GapLevel::High, true) => {
            "High gap: declared practices exceed what the site shows"
        }
        (GapLevel::High, false) => "High gap: the site performs better than declared",
    };
    text.to_string()
}

pub fn top_risks(observed: &[DimensionScore], diff: i64) -> Vec<String> {
    let mut candidates: Vec<RiskCandidate> = observed
        .iter()
        .filter_map(|score| {
            let ratio = score.ratio();
            risk_statement(score.name, ratio).map(|statement| RiskCandidate {
                ratio,
                priority: priority_of(score.name),
                statement,
            })
        })
        .collect();

    if diff > MODERATE_GAP {
        candidates.push(RiskCandidate {
            ratio: 0.0,
            priority: GAP_PRIORITY,
            statement: "Declared practices are not reflected on the site: the questionnaire may overstate current SEO execution",
        });
    } else if diff < -MODERATE_GAP {
        candidates.push(RiskCandidate {
            ratio: 0.0,
            priority: GAP_PRIORITY,
            statement: "The site outperforms the declared practices: existing strengths may be undocumented and unmanaged",
        });
    }

    candidates.sort_by(|a, b| {
        a.ratio
            .total_cmp(&b.ratio)
            .then_with(|| a.priority.cmp(&b.priority))
    });

    candidates
        .into_iter()
        .take(MAX_RISKS)
        .map(|c| c.statement.to_string())
        .collect()
}

fn provenances(signals: &RawSignals) -> Vec<Provenance> {
    [
        signals.core_web_vitals.as_ref().map(|s| s.provenance),
        signals.page.as_ref().map(|s| s.provenance),
        signals.domain_age.as_ref().map(|s| s.provenance),
        signals.authority.as_ref().map(|s| s.provenance),
        signals.serp.as_ref().map(|s| s.provenance),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn build_notes(parts: &[String], signals: &RawSignals) -> String {
    let all = provenances(signals);
    let reduced = all.iter().filter(|p| p.is_reduced_confidence()).count();
    let summary = if reduced == 0 {
        "All signals were measured directly.".to_string()
    } else {
        format!(
            "{} of {} signals have reduced confidence.",
            reduced,
            all.len()
        )
    };

    if parts.is_empty() {
        summary
    } else {
        format!("{}. {}", parts.join("; "), summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{PageProbe, Signal};

    fn declared(technical: u32, content: u32, measurement: u32) -> DeclaredDimensions {
        DeclaredDimensions {
            technical: DimensionScore::new(Dimension::Technical, technical),
            content_keywords: DimensionScore::new(Dimension::ContentKeywords, content),
            measurement: DimensionScore::new(Dimension::Measurement, measurement),
        }
    }

    fn observed(cwv: u32, onpage: u32, authority: u32, serp: u32) -> ObservedDimensions {
        ObservedDimensions {
            core_web_vitals: DimensionScore::new(Dimension::CoreWebVitals, cwv),
            onpage: DimensionScore::new(Dimension::Onpage, onpage),
            authority_proxies: DimensionScore::new(Dimension::AuthorityProxies, authority),
            serp_reality: DimensionScore::new(Dimension::SerpReality, serp),
            signals: RawSignals::default(),
            notes: vec![],
        }
    }

    #[test]
    fn test_total_and_stage() {
        let result = ScoringEngine::new().score(&declared(15, 12, 5), &observed(15, 15, 8, 0));
        assert_eq!(result.questionnaire_score, 32);
        assert_eq!(result.observed_score, 38);
        assert_eq!(result.total_score, 70);
        assert_eq!(result.stage, Stage::Structured);
        assert_eq!(result.dimension_scores.declared.len(), 3);
        assert_eq!(result.dimension_scores.observed.len(), 4);
    }

    #[test]
    fn test_total_is_clamped() {
        let engine = ScoringEngine::new();
        let top = engine.score(&declared(99, 99, 99), &observed(99, 99, 99, 99));
        assert_eq!(top.total_score, 100);
        assert_eq!(top.stage, Stage::Strategic);

        let bottom = engine.score(&declared(0, 0, 0), &observed(0, 0, 0, 0));
        assert_eq!(bottom.total_score, 0);
        assert_eq!(bottom.stage, Stage::Chaotic);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let engine = ScoringEngine::new();
        let mut obs = observed(10, 8, 3, 1);
        obs.signals.page = Some(Signal::fallback(PageProbe::default(), "x"));
        obs.notes = vec!["On-page SEO (fallback): x".to_string()];

        let first = serde_json::to_string(&engine.score(&declared(14, 9, 6), &obs)).unwrap();
        let second = serde_json::to_string(&engine.score(&declared(14, 9, 6), &obs)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_gap_levels() {
        assert!(gap_description(0).starts_with("Minimal"));
        assert!(gap_description(-3).starts_with("Minimal"));
        assert!(gap_description(7).contains("somewhat exceed"));
        assert!(gap_description(-10).contains("somewhat better"));
        assert!(gap_description(11).starts_with("High gap: declared"));
        assert!(gap_description(-25).starts_with("High gap: the site"));
        assert_eq!(GapLevel::from_difference(4), GapLevel::Moderate);
    }

    #[test]
    fn test_risks_sorted_by_ratio_then_priority() {
        let obs = observed(10, 5, 3, 0);
        let risks = top_risks(&obs.all(), 0);

        assert_eq!(risks.len(), 3);
        assert!(risks[0].starts_with("Search visibility is low"));
        assert!(risks[1].starts_with("Authority signals are low"));
        assert!(risks[2].starts_with("On-page basics are weak"));
    }

    #[test]
    fn test_risk_ties_follow_priority() {
        // 四個維度比例都是 0
        let risks = top_risks(&observed(0, 0, 0, 0).all(), 0);
        assert!(risks[0].starts_with("Core Web Vitals are critical"));
        assert!(risks[1].starts_with("On-page basics"));
        assert!(risks[2].starts_with("Authority signals"));
    }

    #[test]
    fn test_risks_are_not_padded() {
        assert!(top_risks(&observed(20, 15, 10, 5).all(), 0).is_empty());

        let one = top_risks(&observed(20, 15, 10, 3).all(), 0);
        assert_eq!(one.len(), 1);
        assert!(one[0].starts_with("Search visibility is partial"));
    }

    #[test]
    fn test_gap_risk_added_for_large_difference() {
        let risks = top_risks(&observed(20, 15, 10, 5).all(), 15);
        assert_eq!(risks.len(), 1);
        assert!(risks[0].starts_with("Declared practices are not reflected"));

        let risks = top_risks(&observed(20, 15, 10, 5).all(), -15);
        assert!(risks[0].starts_with("The site outperforms"));
    }

    #[test]
    fn test_notes_count_reduced_confidence() {
        let mut signals = RawSignals::default();
        assert_eq!(build_notes(&[], &signals), "All signals were measured directly.");

        signals.page = Some(Signal::measured(PageProbe::default()));
        signals.serp = Some(Signal::fallback(Default::default(), "none"));
        let notes = build_notes(&["SERP Reality (fallback): none".to_string()], &signals);
        assert_eq!(
            notes,
            "SERP Reality (fallback): none. 1 of 2 signals have reduced confidence."
        );
    }

    #[test]
    fn test_stage_is_monotonic_in_total() {
        let engine = ScoringEngine::new();
        let mut previous = Stage::Chaotic;
        let rank = |s: Stage| s as u8;
        for total in 0..=50u32 {
            let t = total.min(20);
            let c = (total - t).min(20);
            let m = total - t - c;
            let result = engine.score(&declared(t, c, m), &observed(20, 15, 10, 5));
            assert!(rank(result.stage) >= rank(previous));
            previous = result.stage;
        }
    }
}
