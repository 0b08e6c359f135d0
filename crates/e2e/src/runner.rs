//! Product and suite orchestration
//!
//! Rows of one product are processed strictly in index order on a single
//! page. Products are independent: each gets its own page from the
//! [`PageFactory`] and may run concurrently.

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{error, info, warn};

use coa_common::config::ReloadConfig;
use coa_common::report::notification_message;
use coa_common::{ProductAggregator, ProductReport, ProductTarget, SuiteConfig, SuiteSummary};

use crate::accessor::RowAccessor;
use crate::discovery::DiscoveryEngine;
use crate::error::{E2eError, E2eResult};
use crate::extraction::{ExtractionRunner, RowPlan};
use crate::notifier::Notifier;
use crate::page::ShipoutPage;
use crate::probe;

/// Opens an isolated page per product
#[async_trait::async_trait]
pub trait PageFactory: Send + Sync {
    type Page: ShipoutPage;

    async fn open(&self, product: &ProductTarget) -> E2eResult<Self::Page>;

    /// Dispose of a page once its product run is over
    async fn release(&self, page: Self::Page) {
        drop(page);
    }
}

/// Reload the page, retrying with doubling backoff; exhaustion is fatal
pub async fn reload_with_retry<P: ShipoutPage>(
    page: &P,
    policy: &ReloadConfig,
    idle_timeout: std::time::Duration,
) -> E2eResult<()> {
    let mut last = String::new();
    for attempt in 1..=policy.attempts {
        let result = match page.reload().await {
            Ok(()) => page.wait_for_network_idle(idle_timeout).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("Reload attempt {}/{} failed: {}", attempt, policy.attempts, e);
                last = e.to_string();
                if attempt < policy.attempts {
                    sleep(policy.backoff_after(attempt)).await;
                }
            }
        }
    }
    Err(E2eError::ReloadExhausted {
        attempts: policy.attempts,
        last,
    })
}

/// One product's discovery and row loop
pub struct ProductRunner<'a, P: ShipoutPage> {
    config: &'a SuiteConfig,
    product: &'a ProductTarget,
    page: &'a P,
}

impl<'a, P: ShipoutPage> ProductRunner<'a, P> {
    pub fn new(config: &'a SuiteConfig, product: &'a ProductTarget, page: &'a P) -> Self {
        Self {
            config,
            product,
            page,
        }
    }

    /// Run to completion; fatal errors end the run and are recorded on the report
    pub async fn run(&self) -> ProductReport {
        let mut aggregator = ProductAggregator::new(&self.product.name);
        if let Err(e) = self.run_into(&mut aggregator).await {
            error!(
                "[{}] Product run aborted after {} row(s): {}",
                self.product.name,
                aggregator.len(),
                e
            );
            aggregator.abort(e.to_string());
        }
        aggregator.finish()
    }

    async fn run_into(&self, aggregator: &mut ProductAggregator) -> E2eResult<()> {
        let name = &self.product.name;
        let row_config = &self.config.row;
        let plan = RowPlan::for_product(row_config, name)?;
        let probe = probe::from_kind(&self.config.discovery.probe);

        let url = self.config.url_for(&self.product.page_path());
        info!("[{}] Opening {}", name, url);
        self.page
            .goto(&url)
            .await
            .map_err(|e| E2eError::Session(format!("navigation to {} failed: {}", url, e)))?;
        self.page
            .wait_for_network_idle(row_config.network_idle_timeout())
            .await?;

        let outcome = DiscoveryEngine::new(&self.config.discovery, probe.as_ref())
            .discover(self.page)
            .await?;
        let lots = outcome.lots_to_test;
        info!("[{}] Testing {} lot(s)", name, lots);

        let accessor = RowAccessor::new(row_config, probe.as_ref());
        let mut extraction = ExtractionRunner::new(name.clone(), plan, &self.config.output);

        for index in 0..lots {
            info!("[{}] [{}/{}] Row start", name, index + 1, lots);
            let result = match accessor.locate(self.page, index).await {
                Ok(row) => extraction.run_row(self.page, row).await,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => extraction.unavailable_row(self.page, index, &e).await,
            };
            aggregator.record(result);

            if index + 1 < lots {
                reload_with_retry(
                    self.page,
                    &self.config.reload,
                    row_config.network_idle_timeout(),
                )
                .await?;
            }
        }
        Ok(())
    }
}

/// Runs every configured product and aggregates the suite result
pub struct SuiteRunner<F: PageFactory> {
    config: SuiteConfig,
    factory: F,
    notifier: Box<dyn Notifier>,
}

impl<F: PageFactory> SuiteRunner<F> {
    pub fn new(config: SuiteConfig, factory: F, notifier: Box<dyn Notifier>) -> Self {
        Self {
            config,
            factory,
            notifier,
        }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Run all products; reports come back in configuration order
    pub async fn run(&self) -> SuiteSummary {
        let products = &self.config.products;
        info!(
            "Running {} product(s){}",
            products.len(),
            if self.config.parallel_products { " in parallel" } else { "" }
        );

        let reports = if self.config.parallel_products {
            join_all(products.iter().map(|p| self.run_product(p))).await
        } else {
            let mut reports = Vec::with_capacity(products.len());
            for p in products {
                reports.push(self.run_product(p).await);
            }
            reports
        };

        SuiteSummary::new(reports)
    }

    /// Run, then write the report files into the results directory
    pub async fn run_and_persist(&self) -> E2eResult<SuiteSummary> {
        let summary = self.run().await;
        summary.persist(&self.config.output.results_dir)?;

        info!("");
        info!(
            "Suite results: {} total, {} passed, {} failed",
            summary.total(),
            summary.success_count(),
            summary.failure_count()
        );
        match summary.verdict() {
            coa_common::RunVerdict::Passed => info!("{}", summary.verdict_message()),
            _ => error!("{}", summary.verdict_message()),
        }
        Ok(summary)
    }

    async fn run_product(&self, product: &ProductTarget) -> ProductReport {
        let report = match self.factory.open(product).await {
            Ok(page) => {
                let report = ProductRunner::new(&self.config, product, &page).run().await;
                self.factory.release(page).await;
                report
            }
            Err(e) => {
                error!("[{}] Could not open page: {}", product.name, e);
                let mut aggregator = ProductAggregator::new(&product.name);
                aggregator.abort(e.to_string());
                aggregator.finish()
            }
        };

        info!(
            "[{}] Finished: {} success, {} failure",
            report.product_name,
            report.success_count(),
            report.failure_count()
        );
        if let Err(e) = self.notifier.notify(&notification_message(&report)).await {
            warn!("[{}] Notification failed: {}", report.product_name, e);
        }
        report
    }
}
