use crate::adapters::AdapterContext;
use crate::config::GraderSettings;
use crate::core::declared::DeclaredEvaluator;
use crate::core::observed::ObservedEvaluator;
use crate::core::scoring::ScoringEngine;
use crate::domain::model::{GradingResult, QuestionnaireAnswers, ServiceStatus};
use crate::utils::error::{GraderError, Result};
use crate::utils::validation::{UrlValidator, Validate};
use serde::{Deserialize, Serialize};

pub const MAX_KEYWORDS: usize = 5;
pub const MAX_KEYWORD_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRequest {
    pub url: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub answers: QuestionnaireAnswers,
}

/// 去空白、截到 80 字、忽略大小寫去重；超過 5 個直接拒絕
pub fn normalize_keywords(raw: &[String]) -> Result<Vec<String>> {
    if raw.len() > MAX_KEYWORDS {
        return Err(GraderError::InvalidRequest {
            message: format!("at most {} keywords are allowed, got {}", MAX_KEYWORDS, raw.len()),
        });
    }

    let mut seen = std::collections::HashSet::new();
    Ok(raw
        .iter()
        .map(|k| k.trim().chars().take(MAX_KEYWORD_CHARS).collect::<String>())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .collect())
}

/// One grading run: validate the target, score the questionnaire, observe the
/// site, then combine.
pub struct Grader {
    ctx: AdapterContext,
    validator: UrlValidator,
    declared: DeclaredEvaluator,
    observed: ObservedEvaluator,
    scoring: ScoringEngine,
}

impl Grader {
    pub fn new(settings: GraderSettings) -> Result<Self> {
        settings.validate()?;
        let validator = settings.url_validator();
        let ctx = AdapterContext::new(settings)?;
        let observed = ObservedEvaluator::from_context(&ctx);

        tracing::info!(
            "🚀 grader ready: {}",
            observed
                .statuses()
                .iter()
                .map(|s| format!("{}={}({})", s.adapter, s.mode, s.backend))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self::with_observed(ctx, validator, observed))
    }

    /// 測試時換掉觀測端
    pub fn with_observed(
        ctx: AdapterContext,
        validator: UrlValidator,
        observed: ObservedEvaluator,
    ) -> Self {
        Self {
            ctx,
            validator,
            declared: DeclaredEvaluator::new(),
            observed,
            scoring: ScoringEngine::new(),
        }
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub fn health(&self) -> Vec<ServiceStatus> {
        self.observed.statuses()
    }

    /// Only validation problems fail the request; adapter trouble shows up
    /// as reduced-confidence notes instead.
    pub async fn grade(&self, request: &GradeRequest) -> Result<GradingResult> {
        let target = self.validator.validate_resolved(&request.url).await?;
        let keywords = normalize_keywords(&request.keywords)?;
        request.answers.validate()?;

        tracing::info!("📊 grading {} ({} keyword(s))", target.url, keywords.len());

        let declared = self.declared.evaluate(&request.answers);
        let mut observed = self.observed.evaluate(&target.url, &keywords).await;
        observed.notes.extend(target.warnings);

        let result = self.scoring.score(&declared, &observed);
        tracing::info!(
            "✅ {}: {} ({}), declared {} / observed {}",
            target.url,
            result.total_score,
            result.stage,
            result.questionnaire_score,
            result.observed_score
        );
        Ok(result)
    }
}
