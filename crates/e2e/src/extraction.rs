//! Per-row extraction: trigger generation, download, persist, classify
//!
//! ```text
//! Idle -> Triggered -> AwaitingArtifact -> Downloading -> Saved
//!   \__________\______________\_______________\______> Failed
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coa_common::config::{OutputConfig, RowConfig};
use coa_common::naming::{artifact_file_name, extension_of, screenshot_file_name, UniqueNamer};
use coa_common::{TestResult, UNKNOWN_LOT};
use tracing::{debug, error, info, warn};

use crate::accessor::LocatedRow;
use crate::content;
use crate::error::{E2eError, E2eResult};
use crate::page::{ElementQuery, ShipoutPage};

/// Where a row attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Idle,
    Triggered,
    AwaitingArtifact,
    Downloading,
    Saved,
    Failed,
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowState::Idle => "idle",
            RowState::Triggered => "triggered",
            RowState::AwaitingArtifact => "awaiting artifact",
            RowState::Downloading => "downloading",
            RowState::Saved => "saved",
            RowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Row action settings resolved for one product
#[derive(Debug, Clone)]
pub struct RowPlan {
    pub generate: ElementQuery,
    pub artifact: ElementQuery,
    pub lot_column: usize,
    pub row_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub artifact_timeout: Duration,
    pub download_timeout: Duration,
    pub required_markers: Vec<String>,
}

impl RowPlan {
    pub fn for_product(config: &RowConfig, product: &str) -> E2eResult<Self> {
        Ok(Self {
            generate: ElementQuery::button(config.generate_label.clone()),
            artifact: ElementQuery::button_matching(&config.artifact_pattern_for(product))?,
            lot_column: config.lot_column,
            row_timeout: config.timeout(),
            network_idle_timeout: config.network_idle_timeout(),
            artifact_timeout: config.artifact_timeout(),
            download_timeout: config.download_timeout(),
            required_markers: config.required_markers.clone(),
        })
    }
}

/// Runs the row action for every index of one product run
pub struct ExtractionRunner {
    product: String,
    plan: RowPlan,
    downloads_dir: PathBuf,
    diagnostics_dir: PathBuf,
    artifact_names: UniqueNamer,
    screenshot_names: UniqueNamer,
}

impl ExtractionRunner {
    pub fn new(product: impl Into<String>, plan: RowPlan, output: &OutputConfig) -> Self {
        Self {
            product: product.into(),
            plan,
            downloads_dir: output.downloads_dir.clone(),
            diagnostics_dir: output.diagnostics_dir.clone(),
            artifact_names: UniqueNamer::new(),
            screenshot_names: UniqueNamer::new(),
        }
    }

    /// Read the lot label; failures fall back to the unknown-lot sentinel
    pub async fn read_lot<P: ShipoutPage>(&self, page: &P, index: usize) -> String {
        match page.cell_text(index, self.plan.lot_column).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => UNKNOWN_LOT.to_string(),
            Err(e) => {
                warn!("Could not read lot number of row {}: {}", index, e);
                UNKNOWN_LOT.to_string()
            }
        }
    }

    /// Process one located row and classify the outcome
    pub async fn run_row<P: ShipoutPage>(&mut self, page: &P, row: LocatedRow) -> TestResult {
        let lot = self.read_lot(page, row.index).await;
        info!(
            "[{}] Row {}: starting, lot {}",
            self.product,
            row.index + 1,
            lot
        );

        let mut state = RowState::Idle;
        let attempt = tokio::time::timeout(
            self.plan.row_timeout,
            self.attempt(page, row.index, &lot, &mut state),
        )
        .await;

        let err = match attempt {
            Ok(Ok(file)) => {
                info!("✅ [{}] Row {} saved: lot {} -> {}", self.product, row.index + 1, lot, file);
                return TestResult::success(&self.product, lot, row.index, file);
            }
            Ok(Err(e)) => e,
            Err(_) => E2eError::timeout("row action", self.plan.row_timeout),
        };

        let failed_in = std::mem::replace(&mut state, RowState::Failed);
        debug!("[{}] Row {}: {} -> {}", self.product, row.index + 1, failed_in, state);
        let message = format!("{}: {}", failed_in, err);
        error!(
            "❌ [{}] Row {} failed: lot {}, {}",
            self.product,
            row.index + 1,
            lot,
            message
        );
        let screenshot = self.capture_failure(page, &lot).await;
        TestResult::failure(&self.product, lot, row.index, message, screenshot)
    }

    /// Record a row that could not even be located
    pub async fn unavailable_row<P: ShipoutPage>(
        &mut self,
        page: &P,
        index: usize,
        err: &E2eError,
    ) -> TestResult {
        error!("❌ [{}] Row {} not available: {}", self.product, index + 1, err);
        let screenshot = self.capture_failure(page, UNKNOWN_LOT).await;
        TestResult::failure(&self.product, UNKNOWN_LOT, index, err.to_string(), screenshot)
    }

    async fn attempt<P: ShipoutPage>(
        &mut self,
        page: &P,
        index: usize,
        lot: &str,
        state: &mut RowState,
    ) -> E2eResult<String> {
        *state = RowState::Triggered;
        page.click_in_row(index, &self.plan.generate).await?;
        info!("[{}] Row {}: generation triggered", self.product, index + 1);
        page.wait_for_network_idle(self.plan.network_idle_timeout)
            .await?;

        *state = RowState::AwaitingArtifact;
        info!(
            "[{}] Row {}: waiting up to {:?} for {}",
            self.product,
            index + 1,
            self.plan.artifact_timeout,
            self.plan.artifact
        );
        let name = page
            .wait_for_visible(&self.plan.artifact, self.plan.artifact_timeout)
            .await?;

        *state = RowState::Downloading;
        info!("[{}] Row {}: downloading {}", self.product, index + 1, name);
        let artifact = page
            .download_via(&self.plan.artifact, self.plan.download_timeout)
            .await?;

        let file_name = self.persist(&artifact.path, &artifact.suggested_filename, lot)?;
        *state = RowState::Saved;
        Ok(file_name)
    }

    /// Move the staged download to its unique name and confirm it landed
    fn persist(&mut self, staged: &Path, suggested: &str, lot: &str) -> E2eResult<String> {
        std::fs::create_dir_all(&self.downloads_dir)?;

        let ext = extension_of(suggested);
        let file_name = self
            .artifact_names
            .claim(&artifact_file_name(&self.product, lot, &ext));
        let dest = self.downloads_dir.join(&file_name);

        if std::fs::rename(staged, &dest).is_err() {
            std::fs::copy(staged, &dest)?;
            remove_staged(staged);
        }
        if !dest.is_file() {
            return Err(E2eError::VerificationFailed(dest.display().to_string()));
        }
        info!("[{}] Saved {}", self.product, dest.display());

        content::verify_workbook(&dest, &self.plan.required_markers)?;
        Ok(file_name)
    }

    async fn capture_failure<P: ShipoutPage>(&mut self, page: &P, lot: &str) -> Option<String> {
        if let Err(e) = std::fs::create_dir_all(&self.diagnostics_dir) {
            warn!("Cannot create {}: {}", self.diagnostics_dir.display(), e);
            return None;
        }
        let name = self
            .screenshot_names
            .claim(&screenshot_file_name(&self.product, lot));
        let path = self.diagnostics_dir.join(&name);
        match page.screenshot(&path).await {
            Ok(()) => {
                info!("Failure screenshot: {}", path.display());
                Some(path.display().to_string())
            }
            Err(e) => {
                warn!("Failure screenshot not captured: {}", e);
                None
            }
        }
    }
}

/// Drop a staged download after it was copied out; failures only leave clutter
fn remove_staged(staged: &Path) -> bool {
    match std::fs::remove_file(staged) {
        Ok(()) => true,
        Err(e) => {
            warn!("Staged download {} not removed: {}", staged.display(), e);
            false
        }
    }
}
