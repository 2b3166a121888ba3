pub mod audit;
pub mod checksum;
pub mod config;
pub mod error;
pub mod manifest;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod run;
pub mod validate;

pub use audit::{AuditReport, Auditor, Category, CheckCounts, CheckReport, ItemFailure};
pub use error::{AuditError, Result};
