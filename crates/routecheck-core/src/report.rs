use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{EvalRecord, TestCase};
use crate::driver::RunOutcome;
use crate::scoring::RunAccumulator;

pub const SCHEMA_VERSION: &str = "1.0";

/// Aggregate counts for one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Routing accuracy as a percentage; 0 for an empty batch.
    pub accuracy_pct: f64,
    /// Mean shape score over the cases that had one.
    pub mean_shape_compliance: Option<f64>,
    /// Share of hallucination-checked cases that passed.
    pub hallucination_pass_rate: Option<f64>,
    pub shape_scored: usize,
    pub hallucination_scored: usize,
}

impl BatchSummary {
    pub fn from_records(records: &[EvalRecord]) -> Self {
        Self::from_accumulator(records, &RunAccumulator::from_records(records))
    }

    fn from_accumulator(records: &[EvalRecord], acc: &RunAccumulator) -> Self {
        let total = records.len();
        let passed = records.iter().filter(|r| r.pass).count();
        Self {
            total,
            passed,
            failed: total - passed,
            accuracy_pct: if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64 * 100.0
            },
            mean_shape_compliance: acc.shape.mean(),
            hallucination_pass_rate: acc.hallucination.pass_rate(),
            shape_scored: acc.shape.scored,
            hallucination_scored: acc.hallucination.scored,
        }
    }

    /// Routing accuracy in `[0, 1]`, `None` for an empty batch.
    pub fn accuracy(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The classifier answered, but with the wrong operation.
    RoutingMismatch,
    /// The classifier failed before producing an operation.
    ClassificationError,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoutingMismatch => "routing_mismatch",
            Self::ClassificationError => "classification_error",
        }
    }
}

/// One failed case in the failure analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEntry {
    pub case_id: String,
    pub query: String,
    pub expected: String,
    pub predicted: String,
    pub category: FailureCategory,
    pub reason: String,
}

impl FailureEntry {
    fn from_record(record: &EvalRecord) -> Self {
        let category = if record.classification_failed {
            FailureCategory::ClassificationError
        } else {
            FailureCategory::RoutingMismatch
        };
        Self {
            case_id: record.case_id.clone(),
            query: record.query.clone(),
            expected: record.expected.clone(),
            predicted: record.predicted.clone(),
            category,
            reason: record.reason.clone(),
        }
    }
}

/// The persisted report of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub batch_id: String,
    pub classifier: String,
    /// SHA-256 of the canonical JSON of the test batch.
    pub batch_digest: String,
    pub duration_ms: u64,
    pub summary: BatchSummary,
    pub failures: Vec<FailureEntry>,
    pub records: Vec<EvalRecord>,
}

impl BatchReport {
    pub fn build(cases: &[TestCase], outcome: &RunOutcome) -> Result<Self> {
        let records = outcome.records.clone();
        let failures = records
            .iter()
            .filter(|r| !r.pass)
            .map(FailureEntry::from_record)
            .collect();
        Ok(Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            batch_id: outcome.batch_id.clone(),
            classifier: outcome.classifier.clone(),
            batch_digest: batch_digest(cases)?,
            duration_ms: outcome.duration_ms,
            summary: BatchSummary::from_accumulator(&records, &outcome.accumulator),
            failures,
            records,
        })
    }
}

/// Content digest of a test batch, stable across runs of the same file.
pub fn batch_digest(cases: &[TestCase]) -> Result<String> {
    let bytes = serde_json::to_vec(cases).context("serialize test batch")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Write report.json in pretty JSON format.
pub fn write_report_json(path: &Path, report: &BatchReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize batch report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn md_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn fmt_optional(value: Option<f64>, scored: usize, as_pct: bool) -> String {
    match value {
        Some(v) if as_pct => format!("{:.2}% ({} scored)", v * 100.0, scored),
        Some(v) => format!("{:.2} ({} scored)", v, scored),
        None => "n/a".to_string(),
    }
}

/// Render the Markdown summary.
pub fn render_summary_md(report: &BatchReport) -> String {
    let s = &report.summary;
    let mut out = String::new();
    out.push_str("# Routing Evaluation Summary\n\n");
    out.push_str(&format!(
        "- classifier: {}\n- cases: {}\n- passed: {}\n- failed: {}\n- accuracy: {:.2}%\n- mean shape compliance: {}\n- hallucination pass rate: {}\n",
        report.classifier,
        s.total,
        s.passed,
        s.failed,
        s.accuracy_pct,
        fmt_optional(s.mean_shape_compliance, s.shape_scored, false),
        fmt_optional(s.hallucination_pass_rate, s.hallucination_scored, true),
    ));

    if !report.failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        out.push_str("| case | query | expected | predicted | category | reason |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for f in &report.failures {
            out.push_str(&format!(
                "| {} | {} | `{}` | `{}` | {} | {} |\n",
                md_cell(&f.case_id),
                md_cell(&f.query),
                md_cell(&f.expected),
                md_cell(&f.predicted),
                f.category.as_str(),
                md_cell(&f.reason),
            ));
        }
    }
    out
}

/// Write summary.md.
pub fn write_summary_md(path: &Path, report: &BatchReport) -> Result<()> {
    let md = render_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write `report.json` and `summary.md` into `dir`, creating it if needed.
pub fn write_report_dir(dir: &Path, report: &BatchReport) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    write_report_json(&dir.join("report.json"), report)?;
    write_summary_md(&dir.join("summary.md"), report)?;
    Ok(())
}
