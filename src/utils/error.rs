use thiserror::Error;

/// 目標網址被拒絕的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is required")]
    Empty,

    #[error("Invalid URL format: {0}")]
    Malformed(String),

    #[error("Unsupported URL scheme: {0}. Only http and https are allowed")]
    SchemeError(String),

    #[error("URL must have a valid hostname")]
    MissingHost,

    #[error("Address not allowed: {0}")]
    SsrfRejected(String),
}

#[derive(Error, Debug)]
pub enum GraderError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid questionnaire answers: {message}")]
    InvalidAnswers { message: String },

    #[error("Invalid grading request: {message}")]
    InvalidRequest { message: String },

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream {origin} returned HTTP {status}")]
    UpstreamStatus { origin: String, status: u16 },

    #[error("Request to {origin} timed out")]
    Timeout { origin: String },

    #[error("Malformed response from {origin}: {message}")]
    MalformedResponse { origin: String, message: String },

    #[error("Gave up on {origin} after {attempts} attempts: {last}")]
    AdapterExhausted {
        origin: String,
        attempts: u32,
        last: Box<GraderError>,
    },

    #[error("Adapter {adapter} unavailable: {message}")]
    AdapterUnavailable { adapter: String, message: String },

    #[error("Waited {waited_ms}ms for a {origin} slot")]
    RateLimitTimeout { origin: String, waited_ms: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

impl GraderError {
    /// 5xx、逾時與連線失敗可重試；4xx 與格式錯誤不可
    pub fn is_retryable(&self) -> bool {
        match self {
            GraderError::UpstreamStatus { status, .. } => *status >= 500,
            GraderError::Timeout { .. } => true,
            GraderError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            GraderError::Validation(e) => format!("The website URL was rejected: {}", e),
            GraderError::InvalidAnswers { message } => {
                format!("The questionnaire answers are incomplete: {}", message)
            }
            GraderError::InvalidRequest { message } => {
                format!("The grading request is invalid: {}", message)
            }
            GraderError::ConfigError { .. } | GraderError::InvalidConfigValueError { .. } => {
                format!("The grader configuration is invalid: {}", self)
            }
            other => format!("Grading failed: {}", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraderError>;
