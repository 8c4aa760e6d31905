//! Logging setup for the grader binary.
//!
//! The report is printed to stdout, so every log line goes to stderr.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Overrides the default directives, e.g. `SEO_GRADER_LOG=seo_grader::adapters=trace`.
pub const LOG_ENV: &str = "SEO_GRADER_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// 給日誌收集器用的結構化輸出
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogOptions {
    pub format: LogFormat,
    pub verbose: bool,
}

impl LogOptions {
    pub fn from_flags(verbose: bool, json: bool) -> Self {
        Self {
            format: if json { LogFormat::Json } else { LogFormat::Compact },
            verbose,
        }
    }
}

/// Verbose mode shows per-request adapter traffic but keeps the HTTP stack quiet.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,seo_grader=debug,reqwest=info"
    } else {
        "warn,seo_grader=info"
    }
}

/// `override_directives` wins when it parses; a bad value falls back to the defaults.
pub fn build_filter(verbose: bool, override_directives: Option<&str>) -> EnvFilter {
    override_directives
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(verbose)))
}

pub fn init(options: LogOptions) -> Result<(), TryInitError> {
    let override_directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok();
    let filter = build_filter(options.verbose, override_directives.as_deref());
    let registry = tracing_subscriber::registry().with(filter);

    match options.format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(options.verbose)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .json(),
            )
            .try_init(),
    }
}
