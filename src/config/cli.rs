use crate::domain::model::QuestionnaireAnswers;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "seo-grader")]
#[command(about = "Grades a website's SEO maturity from a questionnaire and live signals")]
#[command(version)]
pub struct CliConfig {
    /// Path to a TOML settings file (credentials may also come from the environment)
    #[arg(short, long, env = "SEO_GRADER_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Grade one website and print the JSON report
    Grade {
        /// Website to grade; https:// is assumed when no scheme is given
        #[arg(long)]
        url: String,

        /// Target keyword for the SERP check (repeat up to 5 times)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Questionnaire answers, e.g. T1=4,T2=3,T3=5,T4=3,C1=4,C2=3,C3=2,C4=3,M1=2,M2=3
        #[arg(short, long)]
        answers: QuestionnaireAnswers,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Show whether each adapter runs on its API or its fallback
    Health,
}
