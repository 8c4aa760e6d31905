pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use config::GraderSettings;
pub use core::{GradeRequest, Grader};
pub use domain::model::{GradingResult, Provenance, Signal, Stage};
pub use utils::error::{GraderError, Result};
