//! Suite configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration for a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Base URL of the shipout application
    pub base_url: String,

    /// Path of the login page, relative to the base URL
    pub login_path: String,

    /// Login credentials
    pub credentials: Credentials,

    /// Products whose lots are processed
    pub products: Vec<ProductTarget>,

    /// Row discovery tuning
    pub discovery: DiscoveryConfig,

    /// Per-row action tuning
    pub row: RowConfig,

    /// Page reload policy between rows
    pub reload: ReloadConfig,

    /// Output locations
    pub output: OutputConfig,

    /// Messaging endpoint
    pub notifier: NotifierConfig,

    /// Run products concurrently, each in its own browser context
    pub parallel_products: bool,

    /// Launch the browser without a window
    pub headless: bool,

    /// Chrome/Chromium binary; auto-detected when unset
    pub chrome_executable: Option<PathBuf>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://spc.adkk.co.kr:8091".to_string(),
            login_path: "/login#/login".to_string(),
            credentials: Credentials::default(),
            products: vec![ProductTarget::new("ANP-1")],
            discovery: DiscoveryConfig::default(),
            row: RowConfig::default(),
            reload: ReloadConfig::default(),
            output: OutputConfig::default(),
            notifier: NotifierConfig::default(),
            parallel_products: true,
            headless: true,
            chrome_executable: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One product's shipout page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductTarget {
    /// Display name, also embedded in the artifact name (e.g. `ANP-1`)
    pub name: String,

    /// Page path relative to the base URL; derived from the name when unset
    #[serde(default)]
    pub path: Option<String>,
}

impl ProductTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// Path of the product's shipout page
    pub fn page_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("/#/process/shipout/{}", self.name.to_lowercase()))
    }
}

/// How more rows are requested from a lazily loaded table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    /// Hover and scroll the last rendered row into view
    LastRowIntoView,
    /// Scroll the table container by a fixed distance
    ScrollBy { pixels: i64 },
}

impl Default for ProbeKind {
    fn default() -> Self {
        ProbeKind::LastRowIntoView
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Upper bound of lots processed per product
    pub target_lot_count: usize,

    /// Consecutive probes without growth before the source counts as exhausted
    pub stagnation_threshold: usize,

    /// Wait after each probe
    pub settle_delay_ms: u64,

    /// Overall bound for one discovery episode
    pub timeout_secs: u64,

    pub probe: ProbeKind,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target_lot_count: 30,
            stagnation_threshold: 3,
            settle_delay_ms: 1500,
            timeout_secs: 300,
            probe: ProbeKind::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RowConfig {
    /// Probe attempts when the target row is not rendered yet
    pub access_attempts: usize,

    /// Wait after each access probe
    pub access_settle_ms: u64,

    /// Bound for a whole row attempt
    pub timeout_secs: u64,

    /// Bound for the generated artifact's download button to appear
    pub artifact_timeout_secs: u64,

    /// Bound for the download to complete once started
    pub download_timeout_secs: u64,

    /// Bound for network quiescence after triggering generation
    pub network_idle_timeout_secs: u64,

    /// Zero-based table column holding the lot number
    pub lot_column: usize,

    /// Label of the per-row button that starts report generation
    pub generate_label: String,

    /// Regex for the download button name; `{product}` is replaced by the escaped product name
    pub artifact_pattern: String,

    /// Strings that must appear, in order, in the downloaded workbook
    pub required_markers: Vec<String>,
}

impl Default for RowConfig {
    fn default() -> Self {
        Self {
            access_attempts: 15,
            access_settle_ms: 1000,
            timeout_secs: 720,
            artifact_timeout_secs: 600,
            download_timeout_secs: 120,
            network_idle_timeout_secs: 30,
            lot_column: 1,
            generate_label: "출력".to_string(),
            artifact_pattern: r"{product} COA_.*\.xlsx".to_string(),
            required_markers: Vec::new(),
        }
    }
}

impl RowConfig {
    pub fn access_settle(&self) -> Duration {
        Duration::from_millis(self.access_settle_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn network_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.network_idle_timeout_secs)
    }

    /// Artifact pattern with the product name substituted
    pub fn artifact_pattern_for(&self, product: &str) -> String {
        self.artifact_pattern
            .replace("{product}", &regex::escape(product))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub attempts: usize,

    /// Backoff before the second attempt; doubled after each failure
    pub backoff_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 2000,
        }
    }
}

impl ReloadConfig {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: usize) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub downloads_dir: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub results_dir: PathBuf,
    pub session_state: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            diagnostics_dir: PathBuf::from("test-results/screenshots"),
            results_dir: PathBuf::from("test-results"),
            session_state: PathBuf::from("storageState.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub thread_key: Option<String>,
}

impl SuiteConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would make the run loop meaningless
    pub fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(Error::InvalidConfig("no products configured".to_string()));
        }
        if let Some(p) = self.products.iter().find(|p| p.name.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "product with empty name (path: {:?})",
                p.path
            )));
        }
        if self.discovery.target_lot_count == 0 {
            return Err(Error::InvalidConfig(
                "discovery.target_lot_count must be positive".to_string(),
            ));
        }
        if self.discovery.stagnation_threshold == 0 {
            return Err(Error::InvalidConfig(
                "discovery.stagnation_threshold must be positive".to_string(),
            ));
        }
        if self.row.access_attempts == 0 {
            return Err(Error::InvalidConfig(
                "row.access_attempts must be positive".to_string(),
            ));
        }
        if self.reload.attempts == 0 {
            return Err(Error::InvalidConfig(
                "reload.attempts must be positive".to_string(),
            ));
        }
        if let Err(e) = regex::Regex::new(&self.row.artifact_pattern_for("PRODUCT")) {
            return Err(Error::InvalidConfig(format!(
                "row.artifact_pattern does not compile: {}",
                e
            )));
        }
        Ok(())
    }

    /// Credentials, or a configuration error naming what is missing
    pub fn require_credentials(&self) -> Result<(&str, &str)> {
        match (
            self.credentials.username.as_deref().filter(|s| !s.is_empty()),
            self.credentials.password.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(user), Some(pass)) => Ok((user, pass)),
            (None, _) => Err(Error::MissingCredentials(
                "username is not set (ADEKA_ID)".to_string(),
            )),
            (_, None) => Err(Error::MissingCredentials(
                "password is not set (ADEKA_PASSWORD)".to_string(),
            )),
        }
    }

    /// Absolute URL for a path relative to the base URL
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        SuiteConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = SuiteConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.discovery.target_lot_count, 30);
        assert_eq!(config.discovery.stagnation_threshold, 3);
    }

    #[test]
    fn test_save_then_load_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/coa.toml");
        SuiteConfig::default().save(&path).unwrap();
        assert!(path.exists());

        std::fs::write(
            &path,
            r#"
base_url = "http://127.0.0.1:8091/"
parallel_products = false

[[products]]
name = "NCE-2"

[discovery]
target_lot_count = 12

[discovery.probe]
kind = "scroll_by"
pixels = 800
"#,
        )
        .unwrap();

        let config = SuiteConfig::load(&path).unwrap();
        assert_eq!(config.products.len(), 1);
        assert_eq!(config.products[0].page_path(), "/#/process/shipout/nce-2");
        assert_eq!(config.discovery.target_lot_count, 12);
        assert_eq!(config.discovery.stagnation_threshold, 3);
        assert_eq!(config.discovery.probe, ProbeKind::ScrollBy { pixels: 800 });
        assert_eq!(config.url_for("/login"), "http://127.0.0.1:8091/login");
        assert!(!config.parallel_products);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = SuiteConfig::default();
        config.discovery.stagnation_threshold = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut config = SuiteConfig::default();
        config.row.artifact_pattern = "{product} COA_(".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_credentials() {
        let mut config = SuiteConfig::default();
        assert!(matches!(
            config.require_credentials(),
            Err(Error::MissingCredentials(_))
        ));

        config.credentials.username = Some("user".to_string());
        config.credentials.password = Some(String::new());
        assert!(config.require_credentials().is_err());

        config.credentials.password = Some("secret".to_string());
        assert_eq!(config.require_credentials().unwrap(), ("user", "secret"));
    }

    #[test]
    fn test_artifact_pattern_escapes_product() {
        let row = RowConfig::default();
        let re = regex::Regex::new(&row.artifact_pattern_for("ACP-2")).unwrap();
        assert!(re.is_match("ACP-2 COA_17.xlsx"));
        assert!(!re.is_match("ACPX2 COA_17.xlsx"));
    }

    #[test]
    fn test_reload_backoff_doubles() {
        let reload = ReloadConfig::default();
        assert_eq!(reload.backoff_after(1), Duration::from_millis(2000));
        assert_eq!(reload.backoff_after(2), Duration::from_millis(4000));
        assert_eq!(reload.backoff_after(3), Duration::from_millis(8000));
    }
}
