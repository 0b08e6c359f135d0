//! UI capabilities the runner needs from a browser backend
//!
//! The discovery and extraction loops only see these traits, so a different
//! automation backend (or a simulated table in tests) can be swapped in
//! without touching the control flow.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::E2eResult;

/// Accessible role of an interactive element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Button,
    Link,
}

impl Role {
    /// CSS selector matching elements that expose this role
    pub fn css_selector(&self) -> &'static str {
        match self {
            Role::Button => "button, [role=\"button\"], input[type=\"button\"], input[type=\"submit\"]",
            Role::Link => "a[href], [role=\"link\"]",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Button => f.write_str("button"),
            Role::Link => f.write_str("link"),
        }
    }
}

/// Textual pattern for an element's accessible name
#[derive(Debug, Clone)]
pub enum NamePattern {
    Exact(String),
    Matches(Regex),
}

impl NamePattern {
    pub fn is_match(&self, name: &str) -> bool {
        let name = name.trim();
        match self {
            NamePattern::Exact(expected) => name == expected,
            NamePattern::Matches(re) => re.is_match(name),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Exact(s) => write!(f, "\"{}\"", s),
            NamePattern::Matches(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Locate an interactive element by role and name
#[derive(Debug, Clone)]
pub struct ElementQuery {
    pub role: Role,
    pub name: NamePattern,
}

impl ElementQuery {
    pub fn button(label: impl Into<String>) -> Self {
        Self {
            role: Role::Button,
            name: NamePattern::Exact(label.into()),
        }
    }

    pub fn button_matching(pattern: &str) -> E2eResult<Self> {
        Ok(Self {
            role: Role::Button,
            name: NamePattern::Matches(Regex::new(pattern)?),
        })
    }

    pub fn matches(&self, role: Role, name: &str) -> bool {
        self.role == role && self.name.is_match(name)
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.name)
    }
}

/// A file the browser finished downloading into its staging directory
#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub suggested_filename: String,
    pub path: PathBuf,
}

/// A lazily rendered table of rows
#[async_trait]
pub trait RowTable: Send + Sync {
    /// Number of rows currently rendered
    async fn row_count(&self) -> E2eResult<usize>;

    async fn scroll_row_into_view(&self, index: usize) -> E2eResult<()>;

    async fn hover_row(&self, index: usize) -> E2eResult<()>;

    /// Scroll the table's scroll container vertically
    async fn scroll_table_by(&self, pixels: i64) -> E2eResult<()>;
}

/// A product's shipout page
#[async_trait]
pub trait ShipoutPage: RowTable {
    async fn goto(&self, url: &str) -> E2eResult<()>;

    /// Reload the current page; the rendered row set is reset
    async fn reload(&self) -> E2eResult<()>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> E2eResult<()>;

    /// Text of one cell of a rendered row
    async fn cell_text(&self, row: usize, column: usize) -> E2eResult<String>;

    /// Click the element matching `query` inside the given row
    async fn click_in_row(&self, row: usize, query: &ElementQuery) -> E2eResult<()>;

    /// Wait until an element matching `query` is visible; returns its name
    async fn wait_for_visible(&self, query: &ElementQuery, timeout: Duration) -> E2eResult<String>;

    /// Click the element matching `query` and wait for the download it starts
    async fn download_via(
        &self,
        query: &ElementQuery,
        timeout: Duration,
    ) -> E2eResult<DownloadedArtifact>;

    async fn screenshot(&self, path: &Path) -> E2eResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_name_ignores_surrounding_whitespace() {
        let q = ElementQuery::button("출력");
        assert!(q.matches(Role::Button, " 출력\n"));
        assert!(!q.matches(Role::Link, "출력"));
        assert!(!q.matches(Role::Button, "출력하기"));
    }

    #[test]
    fn test_pattern_name() {
        let q = ElementQuery::button_matching(r"ANP\-1 COA_.*\.xlsx").unwrap();
        assert!(q.matches(Role::Button, "ANP-1 COA_2.xlsx"));
        assert!(!q.matches(Role::Button, "ANP-2 COA_2.xlsx"));
        assert_eq!(q.to_string(), r"button /ANP\-1 COA_.*\.xlsx/");
    }
}
