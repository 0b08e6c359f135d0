//! Result aggregation, rendering and persistence
//!
//! Each product run owns a [`ProductAggregator`] and hands back a finished
//! [`ProductReport`]; the suite combines those into a [`SuiteSummary`] that
//! decides the verdict and writes the report files.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{ProductReport, RunVerdict, TestResult};

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ansi escape pattern"));

/// Append-only collector for one product run
#[derive(Debug)]
pub struct ProductAggregator {
    product_name: String,
    results: Vec<TestResult>,
    aborted: Option<String>,
}

impl ProductAggregator {
    pub fn new(product_name: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            results: Vec::new(),
            aborted: None,
        }
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    /// Append a row result; rows arrive in increasing index order
    pub fn record(&mut self, result: TestResult) {
        debug_assert!(
            self.results.last().map_or(true, |last| last.index < result.index),
            "row results must be recorded in increasing index order"
        );
        self.results.push(result);
    }

    /// Mark the run as cut short by a fatal error
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finish(self) -> ProductReport {
        ProductReport {
            product_name: self.product_name,
            results: self.results,
            aborted: self.aborted,
        }
    }
}

/// Text pushed to the messaging endpoint at the end of a product run
pub fn notification_message(report: &ProductReport) -> String {
    let total = report.results.len();
    let failures = report.failure_count();
    let successes = total - failures;
    let mut msg = String::new();

    if failures > 0 || report.aborted.is_some() {
        let _ = writeln!(msg, "❌ [{}] COA 다운로드 테스트 실패", report.product_name);
    } else if total == 0 {
        let _ = writeln!(
            msg,
            "⚠️ [{}] COA 다운로드 테스트: 처리된 LOT가 없습니다",
            report.product_name
        );
    } else {
        let _ = writeln!(msg, "✅ [{}] COA 다운로드 테스트 성공", report.product_name);
    }
    let _ = writeln!(msg, "- 성공: {}건 / 실패: {}건", successes, failures);

    if failures > 0 {
        let _ = writeln!(msg, "- 실패 LOT:");
        for (lot, errors) in failures_by_lot(report.failures()) {
            let _ = writeln!(msg, "  • {}: {}", lot, errors.join(" / "));
        }
    } else if total > 0 {
        let lots: Vec<&str> = report.results.iter().map(|r| r.lot_number.as_str()).collect();
        let _ = writeln!(msg, "- LOT: {}", lots.join(", "));
    }
    if let Some(reason) = &report.aborted {
        let _ = writeln!(msg, "- 중단: {}", reason);
    }

    msg.trim_end().to_string()
}

fn failures_by_lot<'a>(
    failures: impl Iterator<Item = &'a TestResult>,
) -> BTreeMap<&'a str, Vec<&'a str>> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for f in failures {
        grouped
            .entry(f.lot_number.as_str())
            .or_default()
            .push(f.error().unwrap_or("unknown error"));
    }
    grouped
}

/// Paths written by [`SuiteSummary::persist`]
#[derive(Debug, Clone)]
pub struct PersistedReports {
    pub summary_json: PathBuf,
    pub success_txt: PathBuf,
    pub failure_txt: PathBuf,
}

/// Combined view over every product run of a suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub generated_at: DateTime<Utc>,
    pub products: Vec<ProductReport>,
}

impl SuiteSummary {
    pub fn new(products: Vec<ProductReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            products,
        }
    }

    /// Every row result, in run order
    pub fn results(&self) -> impl Iterator<Item = &TestResult> {
        self.products.iter().flat_map(|p| p.results.iter())
    }

    pub fn total(&self) -> usize {
        self.results().count()
    }

    pub fn success_count(&self) -> usize {
        self.results().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results().filter(|r| !r.is_success()).count()
    }

    pub fn aborted_products(&self) -> impl Iterator<Item = &ProductReport> {
        self.products.iter().filter(|p| p.aborted.is_some())
    }

    pub fn verdict(&self) -> RunVerdict {
        if self.failure_count() > 0 || self.aborted_products().next().is_some() {
            RunVerdict::Failed
        } else if self.total() == 0 {
            RunVerdict::Empty
        } else {
            RunVerdict::Passed
        }
    }

    /// Operator-facing explanation of the verdict
    pub fn verdict_message(&self) -> String {
        match self.verdict() {
            RunVerdict::Passed => {
                format!("🎉 모든 {}개의 LOT 테스트를 성공적으로 완료했습니다!", self.total())
            }
            RunVerdict::Empty => {
                "⚠️ 처리된 LOT가 없습니다. 대상 페이지에 행이 없거나 탐색에 실패했습니다.".to_string()
            }
            RunVerdict::Failed => {
                let mut msg = format!(
                    "테스트 실패. 총 {}개의 LOT에서 오류가 발생했습니다:",
                    self.failure_count()
                );
                for f in self.results().filter(|r| !r.is_success()) {
                    let _ = write!(
                        msg,
                        "\n  - 제품: {}, LOT: {}, 오류: {}",
                        f.product_name,
                        f.lot_number,
                        f.error().unwrap_or("unknown error")
                    );
                }
                for p in self.aborted_products() {
                    let _ = write!(
                        msg,
                        "\n  - 제품: {} 실행 중단: {}",
                        p.product_name,
                        p.aborted.as_deref().unwrap_or_default()
                    );
                }
                msg
            }
        }
    }

    pub fn success_text(&self) -> String {
        let mut out = format!("성공 LOT: {}건\n", self.success_count());
        for r in self.results().filter(|r| r.is_success()) {
            let _ = writeln!(
                out,
                "- 제품: {}, LOT: {}, 파일: {}",
                r.product_name,
                r.lot_number,
                r.file().unwrap_or_default()
            );
        }
        out
    }

    /// Failures grouped by product and lot
    pub fn failure_text(&self) -> String {
        let mut out = format!("실패 LOT: {}건\n", self.failure_count());
        for product in &self.products {
            if product.failure_count() == 0 && product.aborted.is_none() {
                continue;
            }
            let _ = writeln!(out, "\n[{}]", product.product_name);
            for (lot, errors) in failures_by_lot(product.failures()) {
                let _ = writeln!(out, "- LOT: {}", lot);
                for e in errors {
                    let _ = writeln!(out, "    오류: {}", e);
                }
            }
            if let Some(reason) = &product.aborted {
                let _ = writeln!(out, "- 실행 중단: {}", reason);
            }
        }
        out
    }

    /// Write `summary.json`, `success.txt` and `failure.txt` into `dir`
    pub fn persist(&self, dir: &Path) -> Result<PersistedReports> {
        std::fs::create_dir_all(dir)?;

        let summary_json = dir.join("summary.json");
        let results: Vec<&TestResult> = self.results().collect();
        std::fs::write(&summary_json, serde_json::to_string_pretty(&results)?)?;

        let success_txt = dir.join("success.txt");
        std::fs::write(&success_txt, self.success_text())?;

        let failure_txt = dir.join("failure.txt");
        std::fs::write(&failure_txt, self.failure_text())?;

        info!(
            "Results written to: {} ({} success, {} failure)",
            summary_json.display(),
            self.success_count(),
            self.failure_count()
        );
        Ok(PersistedReports {
            summary_json,
            success_txt,
            failure_txt,
        })
    }
}

/// Read a persisted `summary.json`
pub fn load_summary(path: &Path) -> Result<Vec<TestResult>> {
    if !path.exists() {
        return Err(Error::SummaryNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let results: Vec<TestResult> = serde_json::from_str(&content)?;
    debug!("Loaded {} results from {}", results.len(), path.display());
    Ok(results)
}

/// Success rate with two decimals; an empty run counts as `100.00`
pub fn success_rate(results: &[TestResult]) -> String {
    if results.is_empty() {
        return "100.00".to_string();
    }
    let successes = results.iter().filter(|r| r.is_success()).count();
    format!("{:.2}", successes as f64 / results.len() as f64 * 100.0)
}

/// Flatten an error for a markdown table cell
pub fn clean_error_for_table(error: &str) -> String {
    let flat = error.replace("\r\n", " ").replace('\n', " ");
    ANSI_ESCAPE
        .replace_all(&flat, "")
        .replace('|', "&#124;")
        .trim()
        .to_string()
}

/// Markdown body for the CI issue and step summary
pub fn issue_body(results: &[TestResult]) -> String {
    let total = results.len();
    let failures: Vec<&TestResult> = results.iter().filter(|r| !r.is_success()).collect();

    let mut md = String::from("## E2E 테스트 결과 요약\n\n");
    let _ = writeln!(md, "- **총 LOT 수:** {}개", total);
    let _ = writeln!(md, "- **성공:** {}개", total - failures.len());
    let _ = writeln!(md, "- **실패:** {}개", failures.len());
    let _ = writeln!(md, "- **성공률:** {}%\n", success_rate(results));

    if !failures.is_empty() {
        md.push_str("### 실패 항목 상세\n\n");
        md.push_str("| 제품명 | LOT 번호 | 실패 사유 |\n");
        md.push_str("|---|---|---|\n");
        for f in failures {
            let _ = writeln!(
                md,
                "| {} | {} | {} |",
                f.product_name,
                f.lot_number,
                clean_error_for_table(f.error().unwrap_or_default())
            );
        }
    }
    md
}

/// Body used when the summary file could not be produced at all
pub fn missing_summary_body() -> String {
    "## 🚨 테스트 실행 오류\n\n테스트 실행 중 심각한 오류가 발생하여 결과 요약 파일을 생성하지 못했습니다. Actions 로그를 직접 확인해주세요.".to_string()
}

/// Body used when the summary exists but could not be turned into a report
pub fn script_error_body(message: &str) -> String {
    format!(
        "## 🚨 스크립트 실행 오류\n\n이슈 본문 생성 스크립트 실행 중 오류가 발생했습니다.\n\n```\n{}\n```",
        message
    )
}
