use crate::domain::model::{DeclaredDimensions, Dimension, DimensionScore, QuestionnaireAnswers};
use crate::utils::error::{GraderError, Result};
use crate::utils::rounding::dimension_score;
use crate::utils::validation::Validate;
use std::collections::HashMap;
use std::str::FromStr;

pub const MIN_ANSWER: u8 = 1;
pub const MAX_ANSWER: u8 = 5;

const KEYS: [&str; 10] = ["T1", "T2", "T3", "T4", "C1", "C2", "C3", "C4", "M1", "M2"];

fn invalid(message: impl Into<String>) -> GraderError {
    GraderError::InvalidAnswers {
        message: message.into(),
    }
}

impl QuestionnaireAnswers {
    pub fn technical(&self) -> [u8; 4] {
        [self.t1, self.t2, self.t3, self.t4]
    }

    pub fn content(&self) -> [u8; 4] {
        [self.c1, self.c2, self.c3, self.c4]
    }

    pub fn measurement(&self) -> [u8; 2] {
        [self.m1, self.m2]
    }

    fn labelled(&self) -> [(&'static str, u8); 10] {
        let [t1, t2, t3, t4] = self.technical();
        let [c1, c2, c3, c4] = self.content();
        let [m1, m2] = self.measurement();
        [
            ("T1", t1),
            ("T2", t2),
            ("T3", t3),
            ("T4", t4),
            ("C1", c1),
            ("C2", c2),
            ("C3", c3),
            ("C4", c4),
            ("M1", m1),
            ("M2", m2),
        ]
    }
}

impl Validate for QuestionnaireAnswers {
    fn validate(&self) -> Result<()> {
        for (key, value) in self.labelled() {
            if !(MIN_ANSWER..=MAX_ANSWER).contains(&value) {
                return Err(invalid(format!(
                    "{} must be between {} and {}, got {}",
                    key, MIN_ANSWER, MAX_ANSWER, value
                )));
            }
        }
        Ok(())
    }
}

/// `T1=4,T2=3,...`：十個鍵都要有，大小寫不拘
impl FromStr for QuestionnaireAnswers {
    type Err = GraderError;

    fn from_str(s: &str) -> Result<Self> {
        let mut values: HashMap<String, u8> = HashMap::new();

        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected KEY=VALUE, got '{}'", pair)))?;
            let key = key.trim().to_uppercase();
            if !KEYS.contains(&key.as_str()) {
                return Err(invalid(format!("unknown question '{}'", key)));
            }
            let value: u8 = value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("{} must be a number, got '{}'", key, value.trim())))?;
            if values.insert(key.clone(), value).is_some() {
                return Err(invalid(format!("{} answered twice", key)));
            }
        }

        let missing: Vec<&str> = KEYS
            .iter()
            .copied()
            .filter(|k| !values.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("missing {}", missing.join(", "))));
        }

        let get = |key: &str| values.get(key).copied().unwrap_or_default();
        let answers = QuestionnaireAnswers {
            t1: get("T1"),
            t2: get("T2"),
            t3: get("T3"),
            t4: get("T4"),
            c1: get("C1"),
            c2: get("C2"),
            c3: get("C3"),
            c4: get("C4"),
            m1: get("M1"),
            m2: get("M2"),
        };
        answers.validate()?;
        Ok(answers)
    }
}

/// Turns questionnaire answers into the three declared dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredEvaluator;

impl DeclaredEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, answers: &QuestionnaireAnswers) -> DeclaredDimensions {
        let score = |dimension: Dimension, values: &[u8]| {
            DimensionScore::new(
                dimension,
                dimension_score(values, dimension.max(), MAX_ANSWER),
            )
        };

        DeclaredDimensions {
            technical: score(Dimension::Technical, &answers.technical()),
            content_keywords: score(Dimension::ContentKeywords, &answers.content()),
            measurement: score(Dimension::Measurement, &answers.measurement()),
        }
    }
}
