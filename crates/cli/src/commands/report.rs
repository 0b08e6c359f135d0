//! Commands over a persisted suite result

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use colored::Colorize;
use tracing::debug;

use coa_common::report::{
    issue_body, load_summary, missing_summary_body, script_error_body, success_rate,
};
use coa_common::Error;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Print the row results of the last run
    Show(ShowArgs),

    /// Write the CI issue body and append the step summary
    IssueBody(IssueBodyArgs),
}

#[derive(Args)]
pub struct ShowArgs {
    /// Path to summary.json
    #[arg(long, default_value = "test-results/summary.json")]
    pub summary: PathBuf,

    /// Only list failed rows
    #[arg(long)]
    pub failures: bool,
}

#[derive(Args)]
pub struct IssueBodyArgs {
    /// Path to summary.json
    #[arg(long, default_value = "test-results/summary.json")]
    pub summary: PathBuf,

    /// Issue body file, written only when a row failed
    #[arg(long, default_value = "issue-body.md")]
    pub output: PathBuf,

    /// Step summary file the markdown is appended to
    #[arg(long, env = "GITHUB_STEP_SUMMARY")]
    pub step_summary: Option<PathBuf>,
}

/// What `issue-body` produced
#[derive(Debug, PartialEq, Eq)]
pub enum IssueBodyOutcome {
    /// Summary read; the body file was written iff there were failures
    Generated { failures: usize },
    /// Summary missing; an error body was written
    MissingSummary,
    /// Summary unreadable; the error body carries the message
    ScriptError,
}

impl IssueBodyOutcome {
    pub fn is_error(&self) -> bool {
        !matches!(self, IssueBodyOutcome::Generated { .. })
    }
}

pub fn execute(cmd: ReportCommands, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ReportCommands::Show(args) => show(args, format),
        ReportCommands::IssueBody(args) => {
            if generate_issue_body(&args)?.is_error() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn show(args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    debug!("Reading {}", args.summary.display());
    let results = load_summary(&args.summary)?;
    let total = results.len();
    let failed = results.iter().filter(|r| !r.is_success()).count();
    let rate = success_rate(&results);

    let listed: Vec<_> = if args.failures {
        results.into_iter().filter(|r| !r.is_success()).collect()
    } else {
        results
    };
    output::print_list(&listed, format);

    if matches!(format, OutputFormat::Table | OutputFormat::Plain) {
        println!();
        let line = format!(
            "Total: {}  Passed: {}  Failed: {}  Success rate: {}%",
            total,
            total - failed,
            failed,
            rate
        );
        if failed == 0 {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }
    Ok(())
}

fn append_step_summary(path: &Path, markdown: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(markdown.as_bytes())
}

fn write_error_body(args: &IssueBodyArgs, body: &str) -> std::io::Result<()> {
    std::fs::write(&args.output, body)?;
    if let Some(step) = &args.step_summary {
        append_step_summary(step, &format!("{}\n", body))?;
    }
    Ok(())
}

/// Render the summary markdown into the issue body and step summary files
pub fn generate_issue_body(args: &IssueBodyArgs) -> anyhow::Result<IssueBodyOutcome> {
    debug!("Reading {}", args.summary.display());
    let results = match load_summary(&args.summary) {
        Ok(results) => results,
        Err(Error::SummaryNotFound(path)) => {
            output::print_error(&format!("Summary file not found: {}", path));
            write_error_body(args, &missing_summary_body())?;
            return Ok(IssueBodyOutcome::MissingSummary);
        }
        Err(e) => {
            output::print_error(&format!("Could not read {}: {}", args.summary.display(), e));
            write_error_body(args, &script_error_body(&e.to_string()))?;
            return Ok(IssueBodyOutcome::ScriptError);
        }
    };

    let markdown = issue_body(&results);
    let failures = results.iter().filter(|r| !r.is_success()).count();

    if failures > 0 {
        std::fs::write(&args.output, &markdown)?;
        output::print_warning(&format!(
            "{} failed row(s) written to {}",
            failures,
            args.output.display()
        ));
    }
    if let Some(step) = &args.step_summary {
        append_step_summary(step, &markdown)?;
        output::print_info(&format!("Step summary updated: {}", step.display()));
    }
    output::print_success("Summary generated");

    Ok(IssueBodyOutcome::Generated { failures })
}
