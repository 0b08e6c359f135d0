//! Error types for the suite runner

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout waiting for: {what} (after {after:?})")]
    Timeout { what: String, after: Duration },

    #[error("Row {index} not available after {attempts} probe(s) ({rendered} rendered)")]
    RowUnavailable {
        index: usize,
        attempts: usize,
        rendered: usize,
    },

    #[error("Row count query failed: {0}")]
    CountQuery(String),

    #[error("Discovery did not settle within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("Page reload failed after {attempts} attempt(s): {last}")]
    ReloadExhausted { attempts: usize, last: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Saved file missing: {0}")]
    VerificationFailed(String),

    #[error("Content check failed: {0}")]
    Content(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Configuration error: {0}")]
    Config(#[from] coa_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl E2eError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        E2eError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Errors that leave the page in an unknown state and must end the product run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            E2eError::CountQuery(_)
                | E2eError::DiscoveryTimeout(_)
                | E2eError::ReloadExhausted { .. }
                | E2eError::Session(_)
                | E2eError::Config(_)
        )
    }
}

impl From<chromiumoxide::error::CdpError> for E2eError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        E2eError::Browser(e.to_string())
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
