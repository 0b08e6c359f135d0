//! Chromium backend over CDP (chromiumoxide)
//!
//! Elements are located by role and accessible name through page-side
//! JavaScript; the name itself is matched on the Rust side so patterns
//! keep Rust regex semantics.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    BrowserContextId, DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use coa_common::naming::sanitize_lot;
use coa_common::{ProductTarget, SuiteConfig};

use crate::error::{E2eError, E2eResult};
use crate::page::{DownloadedArtifact, ElementQuery, RowTable, ShipoutPage};
use crate::runner::PageFactory;
use crate::session::{SessionProvider, SessionState, StoredCookie};

const ROWS: &str = "tbody > tr";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const IDLE_POLL: Duration = Duration::from_millis(100);
/// How long no request may be in flight before the network counts as idle
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A launched browser and its CDP event loop
pub struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserHandle {
    pub async fn launch(config: &SuiteConfig) -> E2eResult<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--ignore-certificate-errors")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .window_size(1920, 1080);
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(E2eError::Browser)?;

        info!("Launching browser (headless: {})", config.headless);
        let (browser, mut handler) = Browser::launch(browser_config).await?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self { browser, handler })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Evaluate an expression (never a function declaration) and deserialize its value
async fn eval<T: DeserializeOwned>(page: &Page, js: String) -> E2eResult<T> {
    Ok(page
        .evaluate_expression(EvaluateParams::new(js))
        .await?
        .into_value()?)
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Expression evaluating to the visible elements of `selector` under `scope`
fn visible_candidates(scope: &str, selector: &str) -> String {
    format!(
        r#"(() => {{
            const scope = {scope};
            if (!scope) return null;
            return Array.from(scope.querySelectorAll({sel})).filter(el => {{
                const r = el.getBoundingClientRect();
                const s = getComputedStyle(el);
                return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
            }});
        }})()"#,
        scope = scope,
        sel = js_str(selector),
    )
}

fn row_scope(index: usize) -> String {
    format!("document.querySelectorAll({})[{}]", js_str(ROWS), index)
}

/// Accessible names of visible elements matching the query's role
async fn visible_names(page: &Page, scope: &str, query: &ElementQuery) -> E2eResult<Option<Vec<String>>> {
    let js = format!(
        r#"(() => {{
            const list = {candidates};
            if (!list) return null;
            return list.map(el => (el.getAttribute('aria-label') || el.innerText || el.value || el.textContent || '').trim());
        }})()"#,
        candidates = visible_candidates(scope, query.role.css_selector()),
    );
    eval(page, js).await
}

async fn click_candidate(page: &Page, scope: &str, query: &ElementQuery, position: usize) -> E2eResult<bool> {
    let js = format!(
        r#"(() => {{
            const list = {candidates};
            const el = list && list[{position}];
            if (!el) return false;
            el.scrollIntoView({{ block: 'center' }});
            el.click();
            return true;
        }})()"#,
        candidates = visible_candidates(scope, query.role.css_selector()),
        position = position,
    );
    eval(page, js).await
}

/// Click the first visible element under `scope` matching `query`
async fn click_matching(page: &Page, scope: &str, query: &ElementQuery) -> E2eResult<String> {
    let names = visible_names(page, scope, query)
        .await?
        .unwrap_or_default();
    let position = names
        .iter()
        .position(|n| query.name.is_match(n))
        .ok_or_else(|| E2eError::ElementNotFound(query.to_string()))?;
    if !click_candidate(page, scope, query, position).await? {
        return Err(E2eError::ElementNotFound(query.to_string()));
    }
    Ok(names[position].clone())
}

async fn wait_for_text(page: &Page, text: &str, timeout: Duration) -> E2eResult<()> {
    let js = format!(
        "document.body ? document.body.innerText.includes({}) : false",
        js_str(text)
    );
    let deadline = Instant::now() + timeout;
    loop {
        if eval::<bool>(page, js.clone()).await.unwrap_or(false) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(E2eError::timeout(format!("text \"{}\"", text), timeout));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Requests in flight on one page, keyed by CDP request id
#[derive(Debug)]
struct NetworkActivity {
    in_flight: HashSet<String>,
    last_change: Instant,
}

impl NetworkActivity {
    fn new(now: Instant) -> Self {
        Self {
            in_flight: HashSet::new(),
            last_change: now,
        }
    }

    fn started(&mut self, request_id: String, now: Instant) {
        self.in_flight.insert(request_id);
        self.last_change = now;
    }

    fn finished(&mut self, request_id: &str, now: Instant) {
        if self.in_flight.remove(request_id) {
            self.last_change = now;
        }
    }

    fn is_idle(&self, now: Instant, quiet: Duration) -> bool {
        self.in_flight.is_empty() && now.saturating_duration_since(self.last_change) >= quiet
    }
}

enum NetworkEvent {
    Started(String),
    Finished(String),
}

/// Background task feeding page network events into a [`NetworkActivity`]
struct NetworkTracker {
    activity: Arc<Mutex<NetworkActivity>>,
    task: JoinHandle<()>,
}

impl NetworkTracker {
    async fn attach(page: &Page) -> E2eResult<Self> {
        let started = page
            .event_listener::<EventRequestWillBeSent>()
            .await?
            .map(|e| NetworkEvent::Started(e.request_id.inner().clone()));
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await?
            .map(|e| NetworkEvent::Finished(e.request_id.inner().clone()));
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await?
            .map(|e| NetworkEvent::Finished(e.request_id.inner().clone()));
        let mut events = Box::pin(stream::select(started, stream::select(finished, failed)));

        let activity = Arc::new(Mutex::new(NetworkActivity::new(Instant::now())));
        let shared = Arc::clone(&activity);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let mut activity = shared.lock().unwrap_or_else(|p| p.into_inner());
                match event {
                    NetworkEvent::Started(id) => activity.started(id, Instant::now()),
                    NetworkEvent::Finished(id) => activity.finished(&id, Instant::now()),
                }
            }
        });
        Ok(Self { activity, task })
    }

    fn is_idle(&self, quiet: Duration) -> bool {
        self.activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_idle(Instant::now(), quiet)
    }
}

impl Drop for NetworkTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// With `allowAndName` the browser saves each download under its guid
fn staged_download_path(download_dir: &Path, guid: &str) -> PathBuf {
    download_dir.join(guid)
}

/// A product page in its own browser context
pub struct CdpPage<'a> {
    browser: &'a Browser,
    page: Page,
    download_dir: PathBuf,
    context: BrowserContextId,
    network: NetworkTracker,
}

impl CdpPage<'_> {
    async fn row_element(&self, index: usize) -> E2eResult<chromiumoxide::element::Element> {
        let mut rows = self.page.find_elements(ROWS).await?;
        if index >= rows.len() {
            return Err(E2eError::ElementNotFound(format!(
                "row {} ({} rendered)",
                index,
                rows.len()
            )));
        }
        Ok(rows.swap_remove(index))
    }
}

#[async_trait]
impl RowTable for CdpPage<'_> {
    async fn row_count(&self) -> E2eResult<usize> {
        eval(
            &self.page,
            format!("document.querySelectorAll({}).length", js_str(ROWS)),
        )
        .await
    }

    async fn scroll_row_into_view(&self, index: usize) -> E2eResult<()> {
        self.row_element(index).await?.scroll_into_view().await?;
        Ok(())
    }

    async fn hover_row(&self, index: usize) -> E2eResult<()> {
        self.row_element(index).await?.hover().await?;
        Ok(())
    }

    async fn scroll_table_by(&self, pixels: i64) -> E2eResult<()> {
        let js = format!(
            r#"(() => {{
                let el = document.querySelector('tbody');
                while (el && el !== document.body && el.scrollHeight <= el.clientHeight) el = el.parentElement;
                const target = el && el !== document.body ? el : window;
                target.scrollBy(0, {pixels});
                return true;
            }})()"#,
            pixels = pixels
        );
        eval::<bool>(&self.page, js).await?;
        Ok(())
    }
}

#[async_trait]
impl ShipoutPage for CdpPage<'_> {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn reload(&self) -> E2eResult<()> {
        self.page.reload().await?;
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> E2eResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.network.is_idle(NETWORK_QUIET) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(E2eError::timeout("network idle", timeout));
            }
            sleep(IDLE_POLL).await;
        }
    }

    async fn cell_text(&self, row: usize, column: usize) -> E2eResult<String> {
        let cells = self.row_element(row).await?.find_elements("td").await?;
        let cell = cells.get(column).ok_or_else(|| {
            E2eError::ElementNotFound(format!("cell {} of row {}", column, row))
        })?;
        Ok(cell.inner_text().await?.unwrap_or_default())
    }

    async fn click_in_row(&self, row: usize, query: &ElementQuery) -> E2eResult<()> {
        click_matching(&self.page, &row_scope(row), query)
            .await
            .map_err(|e| match e {
                E2eError::ElementNotFound(what) => {
                    E2eError::ElementNotFound(format!("{} in row {}", what, row))
                }
                other => other,
            })?;
        Ok(())
    }

    async fn wait_for_visible(&self, query: &ElementQuery, timeout: Duration) -> E2eResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let names = visible_names(&self.page, "document", query)
                .await?
                .unwrap_or_default();
            if let Some(name) = names.into_iter().find(|n| query.name.is_match(n)) {
                return Ok(name);
            }
            if Instant::now() >= deadline {
                return Err(E2eError::timeout(query.to_string(), timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn download_via(
        &self,
        query: &ElementQuery,
        timeout: Duration,
    ) -> E2eResult<DownloadedArtifact> {
        let frame = self.page.mainframe().await?;
        let mut will_begin = self.browser.event_listener::<EventDownloadWillBegin>().await?;
        let mut progress = self.browser.event_listener::<EventDownloadProgress>().await?;

        click_matching(&self.page, "document", query).await?;

        let wait = async {
            // Browser events cover every context; keep the one started by this page
            let begin = loop {
                let event = will_begin
                    .next()
                    .await
                    .ok_or_else(|| E2eError::Download("download never started".to_string()))?;
                if frame.as_ref().map_or(true, |f| *f == event.frame_id) {
                    break event;
                }
            };
            let suggested = begin.suggested_filename.clone();
            debug!("Download started: {} ({})", suggested, begin.guid);

            while let Some(event) = progress.next().await {
                if event.guid != begin.guid {
                    continue;
                }
                match event.state {
                    DownloadProgressState::Completed => {
                        return Ok(DownloadedArtifact {
                            path: staged_download_path(&self.download_dir, &begin.guid),
                            suggested_filename: suggested,
                        });
                    }
                    DownloadProgressState::Canceled => {
                        return Err(E2eError::Download(format!("{} was canceled", suggested)));
                    }
                    _ => {}
                }
            }
            Err::<DownloadedArtifact, _>(E2eError::Download("event stream closed".to_string()))
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| E2eError::timeout("download completion", timeout))?
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await?;
        Ok(())
    }
}

/// Logs in through the login form and captures the resulting session
pub struct CdpSessionProvider<'a> {
    browser: &'a Browser,
    config: &'a SuiteConfig,
}

impl<'a> CdpSessionProvider<'a> {
    pub fn new(browser: &'a Browser, config: &'a SuiteConfig) -> Self {
        Self { browser, config }
    }
}

#[async_trait]
impl SessionProvider for CdpSessionProvider<'_> {
    async fn authenticate(&self) -> E2eResult<SessionState> {
        let (username, password) = self.config.require_credentials()?;
        let page = self.browser.new_page("about:blank").await?;

        let login_url = self.config.url_for(&self.config.login_path);
        info!("Logging in at {}", login_url);
        page.goto(login_url.as_str()).await?;

        page.find_element("input[name=\"id\"]")
            .await?
            .click()
            .await?
            .type_str(username)
            .await?;
        page.find_element("input[name=\"pwd\"]")
            .await?
            .click()
            .await?
            .type_str(password)
            .await?;
        click_matching(&page, "document", &ElementQuery::button("로그인")).await?;

        wait_for_text(&page, "ADEKA", LOGIN_TIMEOUT)
            .await
            .map_err(|e| E2eError::Session(format!("login did not complete: {}", e)))?;
        info!("Login succeeded");

        let cookies = page
            .get_cookies()
            .await?
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect();
        let local_storage: Vec<(String, String)> =
            eval(&page, "Object.entries(localStorage)".to_string()).await?;

        let state = SessionState {
            origin: self.config.base_url.clone(),
            cookies,
            local_storage,
        };
        state.save(&self.config.output.session_state)?;
        if let Err(e) = page.close().await {
            warn!("Login page close failed: {}", e);
        }
        Ok(state)
    }
}

/// Opens each product in a fresh browser context seeded with the session
pub struct CdpPageFactory<'a> {
    browser: &'a Browser,
    config: &'a SuiteConfig,
    session: SessionState,
}

impl<'a> CdpPageFactory<'a> {
    pub fn new(browser: &'a Browser, config: &'a SuiteConfig, session: SessionState) -> Self {
        Self {
            browser,
            config,
            session,
        }
    }

    async fn restore_session(&self, page: &Page) -> E2eResult<()> {
        if !self.session.cookies.is_empty() {
            let mut params = Vec::with_capacity(self.session.cookies.len());
            for c in &self.session.cookies {
                params.push(
                    CookieParam::builder()
                        .name(c.name.clone())
                        .value(c.value.clone())
                        .domain(c.domain.clone())
                        .path(c.path.clone())
                        .secure(c.secure)
                        .http_only(c.http_only)
                        .build()
                        .map_err(E2eError::Session)?,
                );
            }
            page.set_cookies(params).await?;
        }

        if !self.session.local_storage.is_empty() {
            page.goto(self.session.origin.as_str()).await?;
            let mut js = String::new();
            for (key, value) in &self.session.local_storage {
                js.push_str(&format!(
                    "localStorage.setItem({}, {});",
                    js_str(key),
                    js_str(value)
                ));
            }
            js.push_str("true");
            eval::<bool>(page, js).await?;
        }
        Ok(())
    }

    /// Route the context's downloads into `dir`, named by guid
    async fn enable_downloads(&self, context: &BrowserContextId, dir: &Path) -> E2eResult<()> {
        std::fs::create_dir_all(dir)?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .browser_context_id(context.clone())
            .download_path(dir.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(E2eError::Browser)?;
        self.browser.execute(params).await?;
        Ok(())
    }

    async fn prepare(
        &self,
        product: &ProductTarget,
        context: &BrowserContextId,
        page: &Page,
    ) -> E2eResult<(PathBuf, NetworkTracker)> {
        let network = NetworkTracker::attach(page).await?;
        self.restore_session(page)
            .await
            .map_err(|e| E2eError::Session(format!("restoring session: {}", e)))?;

        let staging = self
            .config
            .output
            .downloads_dir
            .join(".staging")
            .join(sanitize_lot(&product.name));
        let download_dir = std::path::absolute(&staging)?;
        self.enable_downloads(context, &download_dir).await?;
        Ok((download_dir, network))
    }

    /// Close the page if there is one, then drop its browser context
    async fn discard(&self, page: Option<Page>, context: BrowserContextId) {
        if let Some(page) = page {
            if let Err(e) = page.close().await {
                warn!("Page close failed: {}", e);
            }
        }
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(context))
            .await
        {
            warn!("Browser context dispose failed: {}", e);
        }
    }
}

#[async_trait]
impl<'a> PageFactory for CdpPageFactory<'a> {
    type Page = CdpPage<'a>;

    async fn open(&self, product: &ProductTarget) -> E2eResult<CdpPage<'a>> {
        let context = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context.clone())
            .build()
            .map_err(E2eError::Browser);
        let page = match target {
            Ok(target) => self.browser.new_page(target).await.map_err(E2eError::from),
            Err(e) => Err(e),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                self.discard(None, context).await;
                return Err(e);
            }
        };

        match self.prepare(product, &context, &page).await {
            Ok((download_dir, network)) => {
                debug!("[{}] Page ready", product.name);
                Ok(CdpPage {
                    browser: self.browser,
                    page,
                    download_dir,
                    context,
                    network,
                })
            }
            Err(e) => {
                warn!("[{}] Page setup failed: {}", product.name, e);
                self.discard(Some(page), context).await;
                Err(e)
            }
        }
    }

    async fn release(&self, page: CdpPage<'a>) {
        let CdpPage { page, context, network, .. } = page;
        drop(network);
        self.discard(Some(page), context).await;
    }
}
