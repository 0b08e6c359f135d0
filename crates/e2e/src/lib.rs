//! Shipout COA E2E Runner
//!
//! This crate drives the shipout lot pages of each configured product and,
//! for every discovered lot row:
//! - Triggers certificate generation from the row's action button
//! - Waits for the generated workbook link and downloads it
//! - Saves the file under a deterministic, collision-free name
//! - Captures a screenshot when anything goes wrong
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SuiteRunner                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionProvider::authenticate() -> SessionState            │
//! │  PageFactory::open(product) -> impl ShipoutPage             │
//! │                                                             │
//! │  ProductRunner (one per product, optionally concurrent)     │
//! │    ├── DiscoveryEngine::discover() -> lots_to_test          │
//! │    ├── for index in 0..lots_to_test                         │
//! │    │     ├── RowAccessor::locate(index)                     │
//! │    │     ├── ExtractionRunner::run_row() -> TestResult      │
//! │    │     └── reload_with_retry()                            │
//! │    └── ProductAggregator -> ProductReport -> Notifier       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteSummary -> summary.json, success.txt, failure.txt     │
//! │  RunVerdict  -> process exit code                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod accessor;
pub mod browser;
pub mod content;
pub mod discovery;
pub mod error;
pub mod extraction;
pub mod notifier;
pub mod page;
pub mod probe;
pub mod runner;
pub mod session;

pub use accessor::{LocatedRow, RowAccessor};
pub use discovery::{DiscoveryEngine, DiscoveryOutcome, StopReason};
pub use error::{E2eError, E2eResult};
pub use extraction::{ExtractionRunner, RowPlan, RowState};
pub use notifier::{Notifier, WebhookNotifier};
pub use page::{DownloadedArtifact, ElementQuery, NamePattern, Role, RowTable, ShipoutPage};
pub use probe::Probe;
pub use runner::{reload_with_retry, PageFactory, ProductRunner, SuiteRunner};
pub use session::{SessionProvider, SessionState, StoredCookie};
