pub mod cache;
pub mod declared;
pub mod grader;
pub mod observed;
pub mod rate_limiter;
pub mod scoring;

pub use cache::SignalCache;
pub use declared::DeclaredEvaluator;
pub use grader::{GradeRequest, Grader};
pub use observed::ObservedEvaluator;
pub use rate_limiter::{RateLimiter, RetryPolicy};
pub use scoring::ScoringEngine;
