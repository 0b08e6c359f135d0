//! Shipout COA CLI
//!
//! Offline tooling over the results and configuration of a suite run.

pub mod commands;
pub mod output;
