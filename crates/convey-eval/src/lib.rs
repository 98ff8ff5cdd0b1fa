pub mod approval;
pub mod db;
pub mod engine;
pub mod error;
pub mod outcomes;
pub mod patterns;
pub mod recommend;
pub mod types;

pub use approval::ApprovalChannel;
pub use engine::run_weekly_evaluation;
pub use error::{EvalError, Result};
