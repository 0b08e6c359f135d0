//! Result data model shared by the runner and the reporting tools

use serde::{Deserialize, Serialize};

/// Lot number recorded when the row label cannot be read
pub const UNKNOWN_LOT: &str = "알 수 없음";

/// Outcome of one row attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success {
        /// Saved artifact file name
        file: String,
    },
    Failure {
        /// Failure reason
        error: String,
        /// Diagnostic screenshot, when one could be captured
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
    },
}

/// Record of one row-processing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub product_name: String,
    pub lot_number: String,
    /// Zero-based row index within the product's discovery episode
    #[serde(default)]
    pub index: usize,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl TestResult {
    pub fn success(
        product_name: impl Into<String>,
        lot_number: impl Into<String>,
        index: usize,
        file: impl Into<String>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            lot_number: lot_number.into(),
            index,
            outcome: Outcome::Success { file: file.into() },
        }
    }

    pub fn failure(
        product_name: impl Into<String>,
        lot_number: impl Into<String>,
        index: usize,
        error: impl Into<String>,
        screenshot: Option<String>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            lot_number: lot_number.into(),
            index,
            outcome: Outcome::Failure {
                error: error.into(),
                screenshot,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn file(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { file } => Some(file),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn screenshot(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failure { screenshot, .. } => screenshot.as_deref(),
            Outcome::Success { .. } => None,
        }
    }
}

/// Ordered results of one product run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReport {
    pub product_name: String,
    pub results: Vec<TestResult>,
    /// Set when the product run aborted before all lots were attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ProductReport {
    pub fn successes(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Overall verdict of a suite run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    /// Every processed lot succeeded
    Passed,
    /// At least one lot failed or a product run aborted
    Failed,
    /// Nothing was processed
    Empty,
}

impl RunVerdict {
    pub fn exit_code(self) -> i32 {
        match self {
            RunVerdict::Passed => 0,
            RunVerdict::Failed | RunVerdict::Empty => 1,
        }
    }
}
