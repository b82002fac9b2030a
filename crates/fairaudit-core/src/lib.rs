pub mod error;
pub mod types;

pub mod safe_math;
pub mod validation;

pub mod cohort;
pub mod config;

pub mod bootstrap;
pub mod fairness;
pub mod performance;

pub mod governance;
pub mod reproducibility;
pub mod results;

pub mod audit;

pub use audit::{run_audit, AuditInput};
pub use error::FairAuditError;
pub use results::AuditResults;
pub use types::*;

/// Standard result type for all fairness-audit operations
pub type FairAuditResult<T> = Result<T, FairAuditError>;
