//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::case::{CaseFile, discover_cases};
use crate::judge::run_checks;
use crate::outcome::{Outcome, classify_outcome};
use crate::report::{CaseResult, aggregate, load_results, write_result};
use crate::run::run_case;

fn cases_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("scenarios").join("cases")
}

fn results_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("scenarios").join("results")
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&cases_dir(repo_root))? {
        println!("{}\t{}", case.case.id, case.case.description);
    }
    Ok(())
}

/// Run one case by id, or every case when `case_id` is `None`.
pub fn run_cases(repo_root: &Path, case_id: Option<&str>) -> Result<Outcome> {
    let cases = match case_id {
        Some(case_id) => {
            let case_path = cases_dir(repo_root).join(format!("{case_id}.toml"));
            if !case_path.exists() {
                bail!("case {} not found at {}", case_id, case_path.display());
            }
            vec![CaseFile::load(&case_path).context("load case")?]
        }
        None => discover_cases(&cases_dir(repo_root))?,
    };
    info!(cases = cases.len(), "starting runs");

    let mut worst = Outcome::Success;
    for case in &cases {
        let result = evaluate(case);
        let path = write_result(&results_dir(repo_root), &result)?;
        println!(
            "run: case={} outcome={:?} results={}",
            result.case_id,
            result.outcome,
            path.display()
        );
        worst = match (worst, result.outcome) {
            (Outcome::Error, _) | (_, Outcome::Error) => Outcome::Error,
            (Outcome::Fail, _) | (_, Outcome::Fail) => Outcome::Fail,
            _ => Outcome::Success,
        };
    }
    Ok(worst)
}

fn evaluate(case: &CaseFile) -> CaseResult {
    match run_case(case) {
        Ok(run) => {
            let judgment = run_checks(&case.checks, &run);
            debug!(case_id = %case.case.id, passed = judgment.all_passed(), "case judged");
            CaseResult {
                case_id: case.case.id.clone(),
                outcome: classify_outcome(Some(&judgment)),
                error: None,
                judgment: Some(judgment),
            }
        }
        Err(err) => {
            warn!(case_id = %case.case.id, error = %format!("{err:#}"), "case did not run");
            CaseResult {
                case_id: case.case.id.clone(),
                outcome: classify_outcome(None),
                error: Some(format!("{err:#}")),
                judgment: None,
            }
        }
    }
}

/// Show aggregated results for every case that has been run.
pub fn report_cases(repo_root: &Path) -> Result<()> {
    let (results, warnings) = load_results(&results_dir(repo_root))?;
    let summary = aggregate(&results);
    println!("report: cases={}", summary.cases);
    println!(
        "report: success={} fail={} error={}",
        summary.success, summary.fail, summary.error
    );
    for result in &results {
        if let Some(error) = &result.error {
            println!("report: error {} {}", result.case_id, error);
        }
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {} {}/{}", label, passed, total);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_cases_all_succeed() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("cases");
        let cases = discover_cases(&dir).expect("discover");
        assert!(cases.len() >= 4);
        for case in &cases {
            let result = evaluate(case);
            assert_eq!(result.outcome, Outcome::Success, "{result:?}");
        }
    }

    #[test]
    fn run_writes_results_and_reports_worst_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cases = temp.path().join("scenarios").join("cases");
        std::fs::create_dir_all(&cases).expect("cases dir");
        std::fs::write(
            cases.join("miss.toml"),
            r#"
[case]
id = "miss"
description = "expects a rule that never fires"

[[rules]]
origin = "a"
updates = [{ state = "$x", value = "1" }]

[[steps]]
origin = "b"
event = "press"

[[checks]]
type = "fired_rules"
step = 0
rules = [0]
"#,
        )
        .expect("write case");

        let outcome = run_cases(temp.path(), None).expect("run");
        assert_eq!(outcome, Outcome::Fail);
        let (results, _) = load_results(&results_dir(temp.path())).expect("load");
        assert_eq!(results[0].case_id, "miss");

        let err = run_cases(temp.path(), Some("absent")).expect_err("unknown case");
        assert!(err.to_string().contains("case absent not found"));
    }
}
