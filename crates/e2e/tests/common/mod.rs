//! Simulated shipout page and helpers shared by the scenario tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coa_common::{ProductTarget, SuiteConfig};
use coa_e2e::page::{DownloadedArtifact, ElementQuery, Role, RowTable, ShipoutPage};
use coa_e2e::{E2eError, E2eResult, Notifier, PageFactory};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

#[derive(Debug, Default)]
struct SimState {
    rendered: usize,
    probes: usize,
    reloads: usize,
    failing_reloads: usize,
    downloads: usize,
    last_clicked: Option<usize>,
    clicked: Vec<usize>,
}

/// A lazily loading lot table: `page_size` rows after navigation, and
/// `page_size` more whenever the last row is hovered or the table scrolled
pub struct SimulatedPage {
    product: String,
    lots: Vec<String>,
    page_size: usize,
    stuck_rows: HashSet<usize>,
    reload_cap: Option<usize>,
    workbook: Option<Vec<String>>,
    staging: PathBuf,
    state: Mutex<SimState>,
}

impl SimulatedPage {
    pub fn new(product: &str, lots: Vec<String>, staging: &Path) -> Self {
        Self {
            product: product.to_string(),
            lots,
            page_size: 10,
            stuck_rows: HashSet::new(),
            reload_cap: None,
            workbook: None,
            staging: staging.to_path_buf(),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = n;
        self
    }

    /// The generated link for this row never shows up
    pub fn stuck_row(mut self, index: usize) -> Self {
        self.stuck_rows.insert(index);
        self
    }

    /// After any reload the table never renders more than `cap` rows
    pub fn capped_after_reload(mut self, cap: usize) -> Self {
        self.reload_cap = Some(cap);
        self
    }

    /// Downloads are real workbooks whose first sheet holds `cells` in order
    pub fn workbook(mut self, cells: &[&str]) -> Self {
        self.workbook = Some(cells.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn failing_reloads(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_reloads = n;
        self
    }

    pub fn clicked_rows(&self) -> Vec<usize> {
        self.state.lock().unwrap().clicked.clone()
    }

    pub fn probes(&self) -> usize {
        self.state.lock().unwrap().probes
    }

    fn initial(&self) -> usize {
        self.page_size.min(self.lots.len())
    }

    fn load_more(&self) {
        let mut s = self.state.lock().unwrap();
        s.probes += 1;
        let limit = match self.reload_cap {
            Some(cap) if s.reloads > 0 => cap.min(self.lots.len()),
            _ => self.lots.len(),
        };
        s.rendered = (s.rendered + self.page_size).min(limit).max(s.rendered);
    }

    fn rendered(&self) -> usize {
        self.state.lock().unwrap().rendered
    }

    fn require_rendered(&self, index: usize) -> E2eResult<()> {
        let rendered = self.rendered();
        if index >= rendered {
            return Err(E2eError::ElementNotFound(format!(
                "row {} ({} rendered)",
                index, rendered
            )));
        }
        Ok(())
    }

    fn artifact_name(&self, index: usize) -> String {
        format!("{} COA_{}.xlsx", self.product, index + 1)
    }

    fn write_download(&self, path: &Path, row: usize) -> E2eResult<()> {
        let Some(cells) = &self.workbook else {
            std::fs::write(path, format!("workbook for {}", self.lots[row]))?;
            return Ok(());
        };
        let mut zip = zip::ZipWriter::new(File::create(path)?);
        let mut sheet = String::from("<worksheet><sheetData><row r=\"1\">");
        for cell in cells {
            sheet.push_str(&format!("<c t=\"inlineStr\"><is><t>{}</t></is></c>", cell));
        }
        sheet.push_str("</row></sheetData></worksheet>");
        zip.start_file("xl/worksheets/sheet1.xml", SimpleFileOptions::default())
            .map_err(|e| E2eError::Download(e.to_string()))?;
        zip.write_all(sheet.as_bytes())?;
        zip.finish().map_err(|e| E2eError::Download(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RowTable for SimulatedPage {
    async fn row_count(&self) -> E2eResult<usize> {
        Ok(self.rendered())
    }

    async fn scroll_row_into_view(&self, index: usize) -> E2eResult<()> {
        self.require_rendered(index)
    }

    async fn hover_row(&self, index: usize) -> E2eResult<()> {
        self.require_rendered(index)?;
        if index + 1 == self.rendered() {
            self.load_more();
        }
        Ok(())
    }

    async fn scroll_table_by(&self, _pixels: i64) -> E2eResult<()> {
        self.load_more();
        Ok(())
    }
}

#[async_trait]
impl ShipoutPage for SimulatedPage {
    async fn goto(&self, _url: &str) -> E2eResult<()> {
        self.state.lock().unwrap().rendered = self.initial();
        Ok(())
    }

    async fn reload(&self) -> E2eResult<()> {
        let initial = self.initial();
        let mut s = self.state.lock().unwrap();
        s.reloads += 1;
        if s.failing_reloads > 0 {
            s.failing_reloads -= 1;
            return Err(E2eError::Browser("net::ERR_CONNECTION_RESET".to_string()));
        }
        s.rendered = self.reload_cap.map_or(initial, |cap| initial.min(cap));
        s.last_clicked = None;
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> E2eResult<()> {
        Ok(())
    }

    async fn cell_text(&self, row: usize, column: usize) -> E2eResult<String> {
        self.require_rendered(row)?;
        match column {
            1 => Ok(self.lots[row].clone()),
            _ => Ok(String::new()),
        }
    }

    async fn click_in_row(&self, row: usize, query: &ElementQuery) -> E2eResult<()> {
        self.require_rendered(row)?;
        if !query.matches(Role::Button, "출력") {
            return Err(E2eError::ElementNotFound(format!("{} in row {}", query, row)));
        }
        let mut s = self.state.lock().unwrap();
        s.last_clicked = Some(row);
        s.clicked.push(row);
        Ok(())
    }

    async fn wait_for_visible(&self, query: &ElementQuery, timeout: Duration) -> E2eResult<String> {
        let clicked = self.state.lock().unwrap().last_clicked;
        if let Some(row) = clicked.filter(|r| !self.stuck_rows.contains(r)) {
            let name = self.artifact_name(row);
            if query.matches(Role::Button, &name) {
                return Ok(name);
            }
        }
        tokio::time::sleep(timeout).await;
        Err(E2eError::timeout(query.to_string(), timeout))
    }

    async fn download_via(
        &self,
        query: &ElementQuery,
        _timeout: Duration,
    ) -> E2eResult<DownloadedArtifact> {
        let (row, guid) = {
            let mut s = self.state.lock().unwrap();
            let row = s
                .last_clicked
                .ok_or_else(|| E2eError::ElementNotFound(query.to_string()))?;
            s.downloads += 1;
            (row, format!("{:08x}-5c2e-4a4e-9f0b-download", s.downloads))
        };
        let suggested_filename = self.artifact_name(row);
        std::fs::create_dir_all(&self.staging)?;
        // Saved under the download guid, like a browser told to name by guid
        let path = self.staging.join(guid);
        self.write_download(&path, row)?;
        Ok(DownloadedArtifact {
            suggested_filename,
            path,
        })
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        std::fs::write(path, b"\x89PNG")?;
        Ok(())
    }
}

/// Hands out pre-built pages by product name
#[derive(Default)]
pub struct SimulatedFactory {
    pages: Mutex<HashMap<String, SimulatedPage>>,
    opened: Mutex<Vec<String>>,
}

impl SimulatedFactory {
    pub fn with_page(self, page: SimulatedPage) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(page.product.clone(), page);
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFactory for SimulatedFactory {
    type Page = SimulatedPage;

    async fn open(&self, product: &ProductTarget) -> E2eResult<SimulatedPage> {
        self.opened.lock().unwrap().push(product.name.clone());
        self.pages
            .lock()
            .unwrap()
            .remove(&product.name)
            .ok_or_else(|| E2eError::Session(format!("no page for {}", product.name)))
    }
}

/// Keeps every message instead of sending it
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> E2eResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub fn lots(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}-{:03}", prefix, i)).collect()
}

/// Suite configuration writing every output below `tmp`
pub fn suite_config(tmp: &TempDir, products: &[&str]) -> SuiteConfig {
    let mut config = SuiteConfig::default();
    config.base_url = "https://shipout.test".to_string();
    config.products = products.iter().map(|p| ProductTarget::new(*p)).collect();
    config.output.downloads_dir = tmp.path().join("downloads");
    config.output.diagnostics_dir = tmp.path().join("test-results/screenshots");
    config.output.results_dir = tmp.path().join("test-results");
    config.output.session_state = tmp.path().join("storageState.json");
    config
}

pub fn staging(tmp: &TempDir, product: &str) -> PathBuf {
    tmp.path().join("downloads/.staging").join(product)
}
