//! Shipout COA Common Library
//!
//! Configuration, the row result model, file naming and result reporting
//! shared by the suite runner and the offline CLI.

pub mod config;
pub mod error;
pub mod naming;
pub mod report;
pub mod types;

// Re-export commonly used types
pub use config::{ProbeKind, ProductTarget, SuiteConfig};
pub use error::{Error, Result};
pub use report::{ProductAggregator, SuiteSummary};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
