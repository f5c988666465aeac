use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;
use crate::outcome::Outcome;

/// The stored result of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    pub case_id: String,
    pub outcome: Outcome,
    /// Why the scenario could not run; set only for [`Outcome::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
}

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub cases: usize,
    pub success: usize,
    pub fail: usize,
    pub error: usize,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

pub fn result_path(results_dir: &Path, case_id: &str) -> PathBuf {
    results_dir.join(format!("{case_id}.json"))
}

/// Write `result` to `<results_dir>/<case_id>.json` (temp file + rename).
pub fn write_result(results_dir: &Path, result: &CaseResult) -> Result<PathBuf> {
    fs::create_dir_all(results_dir)
        .with_context(|| format!("create directory {}", results_dir.display()))?;
    let path = result_path(results_dir, &result.case_id);
    let mut buf = serde_json::to_string_pretty(result)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp result {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("replace result {}", path.display()))?;
    Ok(path)
}

/// Load every stored result, sorted by case id. Unreadable files become
/// warnings.
pub fn load_results(results_dir: &Path) -> Result<(Vec<CaseResult>, Vec<String>)> {
    let mut results: Vec<CaseResult> = Vec::new();
    let mut warnings = Vec::new();
    if !results_dir.exists() {
        return Ok((results, warnings));
    }
    for entry in
        fs::read_dir(results_dir).with_context(|| format!("read {}", results_dir.display()))?
    {
        let path = entry.context("read entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse result"))
        {
            Ok(result) => results.push(result),
            Err(err) => warnings.push(format!("skip {}: {err:#}", path.display())),
        }
    }
    results.sort_by(|left, right| left.case_id.cmp(&right.case_id));
    Ok((results, warnings))
}

pub fn aggregate(results: &[CaseResult]) -> ReportSummary {
    let mut summary = ReportSummary::default();
    for result in results {
        summary.cases += 1;
        match result.outcome {
            Outcome::Success => summary.success += 1,
            Outcome::Fail => summary.fail += 1,
            Outcome::Error => summary.error += 1,
        }
        let Some(judgment) = &result.judgment else {
            continue;
        };
        for check in &judgment.checks {
            let entry = summary
                .check_pass_rates
                .entry(format!("{}/{}", result.case_id, check.label()))
                .or_insert((0, 0));
            if check.passed() {
                entry.0 += 1;
            }
            entry.1 += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;

    fn result(case_id: &str, passed: bool) -> CaseResult {
        CaseResult {
            case_id: case_id.into(),
            outcome: if passed { Outcome::Success } else { Outcome::Fail },
            error: None,
            judgment: Some(Judgment {
                checks: vec![CheckOutcome::FiredRules {
                    step: 0,
                    expected: vec![0],
                    actual: Some(if passed { vec![0] } else { vec![] }),
                    passed,
                }],
            }),
        }
    }

    #[test]
    fn written_results_are_loaded_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_result(temp.path(), &result("counter", true)).expect("write");
        assert_eq!(path, temp.path().join("counter.json"));

        let (results, warnings) = load_results(temp.path()).expect("load");
        assert!(warnings.is_empty());
        assert_eq!(results, vec![result("counter", true)]);
    }

    #[test]
    fn invalid_results_are_skipped_with_warning() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_result(temp.path(), &result("lifo", false)).expect("write");
        fs::write(temp.path().join("broken.json"), "{").expect("write broken");

        let (results, warnings) = load_results(temp.path()).expect("load");
        assert_eq!(results.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken.json"));
    }

    #[test]
    fn aggregate_counts_outcomes_and_checks() {
        let errored = CaseResult {
            case_id: "bad".into(),
            outcome: Outcome::Error,
            error: Some("compile rules".into()),
            judgment: None,
        };
        let summary = aggregate(&[result("a", true), result("b", false), errored]);
        assert_eq!(summary.cases, 3);
        assert_eq!((summary.success, summary.fail, summary.error), (1, 1, 1));
        assert_eq!(
            summary.check_pass_rates.get("a/fired_rules(step 0)"),
            Some(&(1, 1))
        );
        assert_eq!(
            summary.check_pass_rates.get("b/fired_rules(step 0)"),
            Some(&(0, 1))
        );
    }

    #[test]
    fn missing_results_dir_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (results, warnings) = load_results(&temp.path().join("none")).expect("load");
        assert!(results.is_empty() && warnings.is_empty());
    }
}
