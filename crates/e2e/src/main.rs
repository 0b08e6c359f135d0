//! Suite entry point
//!
//! Exit status: 0 when every tested row saved its certificate, 1 when any
//! row failed or nothing was tested, 2 when the suite could not start.
//! Run with: cargo run --package coa-e2e -- --config coa.toml

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use coa_common::{ProductTarget, RunVerdict, SuiteConfig};
use coa_e2e::browser::{BrowserHandle, CdpPageFactory, CdpSessionProvider};
use coa_e2e::{E2eResult, SessionProvider, SuiteRunner, WebhookNotifier};

#[derive(Parser, Debug)]
#[command(name = "coa-e2e")]
#[command(about = "Downloads the COA workbook of every recent shipout lot")]
struct Args {
    /// Suite configuration file
    #[arg(short, long, default_value = "coa.toml")]
    config: PathBuf,

    /// Login id
    #[arg(long, env = "ADEKA_ID", hide_env_values = true)]
    username: Option<String>,

    /// Login password
    #[arg(long, env = "ADEKA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Base URL of the shipout application
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Chat webhook for per-product summaries
    #[arg(long, env = "NOTIFIER_WEBHOOK_URL", hide_env_values = true)]
    webhook_url: Option<String>,

    /// Thread key for webhook replies
    #[arg(long, env = "NOTIFIER_THREAD_KEY")]
    thread_key: Option<String>,

    /// Products to run, replacing the configured list
    #[arg(short, long = "product", value_delimiter = ',')]
    products: Vec<String>,

    /// Number of most recent lots to test per product
    #[arg(long)]
    target_lot_count: Option<usize>,

    /// Run products one after another
    #[arg(long)]
    sequential: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Output directory for result files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut SuiteConfig) {
        if let Some(u) = &self.username {
            config.credentials.username = Some(u.clone());
        }
        if let Some(p) = &self.password {
            config.credentials.password = Some(p.clone());
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(url) = &self.webhook_url {
            config.notifier.webhook_url = Some(url.clone());
        }
        if let Some(key) = &self.thread_key {
            config.notifier.thread_key = Some(key.clone());
        }
        if !self.products.is_empty() {
            config.products = self.products.iter().map(ProductTarget::new).collect();
        }
        if let Some(n) = self.target_lot_count {
            config.discovery.target_lot_count = n;
        }
        if self.sequential {
            config.parallel_products = false;
        }
        if self.headed {
            config.headless = false;
        }
        if let Some(dir) = &self.output {
            config.output.results_dir = dir.clone();
            config.output.diagnostics_dir = dir.join("screenshots");
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(false).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(verdict) => std::process::exit(verdict.exit_code()),
        Err(e) => {
            error!("Suite could not run: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<RunVerdict> {
    let mut config = SuiteConfig::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;
    config.require_credentials()?;

    info!(
        "Products: {}",
        config
            .products
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let handle = BrowserHandle::launch(&config).await?;
    let result = run_suite(&handle, &config).await;
    handle.close().await;
    result
}

async fn run_suite(handle: &BrowserHandle, config: &SuiteConfig) -> E2eResult<RunVerdict> {
    let session = CdpSessionProvider::new(handle.browser(), config)
        .authenticate()
        .await?;

    let factory = CdpPageFactory::new(handle.browser(), config, session);
    let notifier = WebhookNotifier::new(&config.notifier)?;
    let runner = SuiteRunner::new(config.clone(), factory, Box::new(notifier));

    let summary = runner.run_and_persist().await?;
    Ok(summary.verdict())
}
