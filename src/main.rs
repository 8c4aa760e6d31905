use anyhow::Context;
use clap::Parser;
use seo_grader::utils::logger::{self, LogOptions};
use seo_grader::{CliConfig, Command, GradeRequest, Grader, GraderError, GraderSettings};
use serde_json::json;

fn load_settings(path: Option<&str>) -> seo_grader::Result<GraderSettings> {
    match path {
        Some(path) => {
            tracing::info!("📁 Loading configuration from: {}", path);
            GraderSettings::from_file(path)
        }
        None => Ok(GraderSettings::from_env()),
    }
}

fn exit_with(e: &GraderError) -> ! {
    tracing::error!("❌ {}", e);
    eprintln!("❌ {}", e.user_friendly_message());
    let code = match e {
        GraderError::Validation(_)
        | GraderError::InvalidAnswers { .. }
        | GraderError::InvalidRequest { .. } => 2,
        _ => 1,
    };
    std::process::exit(code);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    logger::init(LogOptions::from_flags(cli.verbose, cli.json_logs))
        .context("failed to initialise logging")?;

    let settings = load_settings(cli.config.as_deref()).unwrap_or_else(|e| exit_with(&e));
    let grader = Grader::new(settings).unwrap_or_else(|e| exit_with(&e));

    match cli.command {
        Command::Health => {
            let report = json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "adapters": grader.health(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Grade {
            url,
            keywords,
            answers,
            pretty,
        } => {
            let request = GradeRequest {
                url,
                keywords,
                answers,
            };
            let result = grader.grade(&request).await.unwrap_or_else(|e| exit_with(&e));

            let mut report =
                serde_json::to_value(&result).context("failed to serialise grading result")?;
            report["generated_at"] = json!(chrono::Utc::now().to_rfc3339());

            let output = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{}", output);
        }
    }

    Ok(())
}
