//! Post-simulation report verification.
//!
//! For every registered report, the verifier regenerates the file from
//! the database (streaming timeseries chunks, or walking the node
//! hierarchy), diffs it against the baseline file the simulation wrote,
//! and records pass/fail. Failures keep both file bodies as blobs plus
//! a human-readable diff summary, all as regular database records.

use crate::format::{write_hierarchy_csv, write_timeseries_csv, ReportFormat};
use crate::siminfo::SimInfo;
use crate::timeseries::ReportTimeseries;
use simdb_common::{ColumnValue, DatabaseId, DbError, NamedValue, Result};
use simdb_core::ObjectManager;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One report to check: the baseline file the simulation produced, and
/// where its data lives in the database.
#[derive(Debug, Clone)]
pub struct ReportToVerify {
    /// Destination filename the simulation wrote (the baseline).
    pub dest_file: PathBuf,
    pub format: ReportFormat,
    /// Set for timeseries reports.
    pub timeseries_id: Option<DatabaseId>,
    /// Set for hierarchy reports.
    pub root_report_node_id: Option<DatabaseId>,
}

/// Comparator that regenerates reports from the database and diffs
/// them against their baselines.
pub struct ReportVerifier {
    results_dir: PathBuf,
    reports: Vec<ReportToVerify>,
    /// Lines starting with `#` are ignored during comparison unless
    /// disabled.
    strip_comments: bool,
}

impl ReportVerifier {
    /// Regenerated files and other verification artifacts land in
    /// `results_dir`.
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        ReportVerifier {
            results_dir: results_dir.into(),
            reports: Vec::new(),
            strip_comments: true,
        }
    }

    /// Compare comment lines too.
    pub fn keep_comments(mut self) -> Self {
        self.strip_comments = false;
        self
    }

    pub fn add_report_to_verify(&mut self, report: ReportToVerify) {
        self.reports.push(report);
    }

    /// Regenerate and diff every registered report.
    pub fn verify_all(&self, obj_mgr: &Arc<ObjectManager>) -> Result<VerificationSummary> {
        std::fs::create_dir_all(&self.results_dir)?;
        let mut summary = VerificationSummary::default();

        for report in &self.reports {
            let outcome = self.verify_one(obj_mgr, report);
            let dest_file = report.dest_file.display().to_string();
            match outcome {
                Ok(result) => {
                    if result.passed {
                        tracing::debug!(dest_file = %result.dest_file, "report verified");
                    } else {
                        tracing::warn!(dest_file = %result.dest_file, "report failed verification");
                    }
                    summary.results.push(result);
                }
                Err(err) => {
                    tracing::warn!(dest_file = %dest_file, error = %err, "report verification errored");
                    summary.results.push(FileResult {
                        dest_file,
                        is_timeseries: report.timeseries_id.is_some(),
                        passed: false,
                        failure_diffs: format!("verification error: {}", err),
                        expected: Vec::new(),
                        actual: Vec::new(),
                    });
                }
            }
        }
        Ok(summary)
    }

    fn verify_one(
        &self,
        obj_mgr: &Arc<ObjectManager>,
        report: &ReportToVerify,
    ) -> Result<FileResult> {
        let dest_file = report.dest_file.display().to_string();
        let basename = report
            .dest_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "report".to_string());
        let regenerated = self.results_dir.join(&basename);

        match (report.timeseries_id, report.root_report_node_id) {
            (Some(timeseries_id), _) => {
                let timeseries = ReportTimeseries::open(obj_mgr, timeseries_id)?;
                match report.format {
                    ReportFormat::Csv => write_timeseries_csv(&timeseries, &regenerated)?,
                }
            }
            (None, Some(root_node_id)) => match report.format {
                ReportFormat::Csv => write_hierarchy_csv(obj_mgr, root_node_id, &regenerated)?,
            },
            (None, None) => {
                return Err(DbError::General(format!(
                    "report '{}' names neither a timeseries nor a hierarchy root",
                    dest_file
                )))
            }
        }

        let expected = std::fs::read(&report.dest_file)?;
        let actual = std::fs::read(&regenerated)?;
        let failure_diffs = diff_summary(&expected, &actual, self.strip_comments);
        let passed = failure_diffs.is_empty();

        Ok(FileResult {
            dest_file,
            is_timeseries: report.timeseries_id.is_some(),
            passed,
            failure_diffs,
            expected: if passed { Vec::new() } else { expected },
            actual: if passed { Vec::new() } else { actual },
        })
    }
}

struct FileResult {
    dest_file: String,
    is_timeseries: bool,
    passed: bool,
    failure_diffs: String,
    expected: Vec<u8>,
    actual: Vec<u8>,
}

/// Aggregated pass/fail outcome across all verified reports.
#[derive(Default)]
pub struct VerificationSummary {
    results: Vec<FileResult>,
}

impl VerificationSummary {
    /// `false` only when no reports were registered at all.
    pub fn has_summary(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn passing_report_filenames(&self) -> BTreeSet<String> {
        self.results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.dest_file.clone())
            .collect()
    }

    pub fn failing_report_filenames(&self) -> BTreeSet<String> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.dest_file.clone())
            .collect()
    }

    pub fn report_is_timeseries(&self, dest_file: &str) -> bool {
        self.results
            .iter()
            .any(|r| r.dest_file == dest_file && r.is_timeseries)
    }

    /// Diff text for a failing report; empty for passes and unknown
    /// names.
    pub fn failure_differences(&self, dest_file: &str) -> String {
        self.results
            .iter()
            .find(|r| r.dest_file == dest_file && !r.passed)
            .map(|r| r.failure_diffs.clone())
            .unwrap_or_default()
    }

    /// Persist this summary: one `ReportVerificationResults` row per
    /// file, linked to the run's `SimInfo` record, plus failure
    /// summaries and deep-copy blobs for the failures.
    pub fn serialize_summary(&self, obj_mgr: &Arc<ObjectManager>) -> Result<()> {
        let sim_info_id = SimInfo::latest_record_id(obj_mgr)?;

        let mut results_table = obj_mgr
            .get_table("ReportVerificationResults")?
            .ok_or_else(|| {
                DbError::General("no ReportVerificationResults table in this database".into())
            })?;
        let mut summaries_table = obj_mgr
            .get_table("ReportVerificationFailureSummaries")?
            .ok_or_else(|| {
                DbError::General(
                    "no ReportVerificationFailureSummaries table in this database".into(),
                )
            })?;
        let mut deep_copy_table = obj_mgr
            .get_table("ReportVerificationDeepCopyFiles")?
            .ok_or_else(|| {
                DbError::General(
                    "no ReportVerificationDeepCopyFiles table in this database".into(),
                )
            })?;

        obj_mgr.safe_transaction(|| {
            for result in &self.results {
                let row = results_table.create_object_with_args(&[
                    NamedValue::new("DestFile", result.dest_file.as_str()),
                    NamedValue::new("SimInfoID", ColumnValue::fkey(sim_info_id)),
                    NamedValue::new("Passed", if result.passed { 1i32 } else { 0 }),
                    NamedValue::new("IsTimeseries", if result.is_timeseries { 1i32 } else { 0 }),
                ])?;

                if result.passed {
                    continue;
                }
                let row_id = row.map(|r| r.id()).unwrap_or_default();
                summaries_table.create_object_with_args(&[
                    NamedValue::new(
                        "ReportVerificationResultID",
                        ColumnValue::fkey(row_id),
                    ),
                    NamedValue::new("FailureSummary", result.failure_diffs.as_str()),
                ])?;
                deep_copy_table.create_object_with_args(&[
                    NamedValue::new("DestFile", result.dest_file.as_str()),
                    NamedValue::new("Expected", result.expected.clone()),
                    NamedValue::new("Actual", result.actual.clone()),
                ])?;
            }
            Ok(())
        })
    }
}

/// Byte-for-byte comparison with optional comment stripping. Returns an
/// empty string on a match, a line-numbered summary of the first
/// differences otherwise.
fn diff_summary(expected: &[u8], actual: &[u8], strip_comments: bool) -> String {
    let expected = String::from_utf8_lossy(expected);
    let actual = String::from_utf8_lossy(actual);

    let keep = |line: &&str| !(strip_comments && line.trim_start().starts_with('#'));
    let expected_lines: Vec<&str> = expected.lines().filter(keep).collect();
    let actual_lines: Vec<&str> = actual.lines().filter(keep).collect();

    let mut diffs = String::new();
    let max_reported = 5usize;
    let mut reported = 0usize;

    for (idx, (e, a)) in expected_lines.iter().zip(actual_lines.iter()).enumerate() {
        if e != a {
            diffs.push_str(&format!(
                "line {}: expected '{}', regenerated '{}'\n",
                idx + 1,
                e,
                a
            ));
            reported += 1;
            if reported >= max_reported {
                diffs.push_str("...\n");
                break;
            }
        }
    }
    if expected_lines.len() != actual_lines.len() {
        diffs.push_str(&format!(
            "line counts differ: expected {}, regenerated {}\n",
            expected_lines.len(),
            actual_lines.len()
        ));
    }
    diffs
}

/// Verify a file pair directly, outside the full report flow.
pub fn files_match(expected: &Path, actual: &Path, strip_comments: bool) -> Result<bool> {
    let expected = std::fs::read(expected)?;
    let actual = std::fs::read(actual)?;
    Ok(diff_summary(&expected, &actual, strip_comments).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_lines_are_ignored_by_default() {
        let expected = b"# generated by sim\n1,2,3\n";
        let actual = b"# regenerated from db\n1,2,3\n";
        assert!(diff_summary(expected, actual, true).is_empty());
        assert!(!diff_summary(expected, actual, false).is_empty());
    }

    #[test]
    fn diffs_name_the_first_bad_line() {
        let summary = diff_summary(b"1,2,3\n4,5,6\n", b"1,2,3\n4,5,9\n", true);
        assert!(summary.contains("line 2"));
        assert!(summary.contains("4,5,6"));
        assert!(summary.contains("4,5,9"));
    }
}
