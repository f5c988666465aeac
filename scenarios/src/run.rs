//! Scenario execution.
//!
//! Hydrates an in-memory store from the scenario's initial state, dispatches
//! every step in order, and keeps what each dispatch did for judging.

use actions::core::patch::Document;
use actions::io::config::ActionsConfig;
use actions::io::storage::MemoryStorage;
use actions::session::Session;
use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::config::apply_case_config;

/// What one step's dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Completed {
        fired: Vec<usize>,
        origins: Vec<String>,
        changes: Vec<String>,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub origin: String,
    pub event: String,
    pub result: StepResult,
}

/// Everything a scenario run produced.
#[derive(Debug, Clone)]
pub struct CaseRun {
    pub steps: Vec<StepRecord>,
    /// State after the last step.
    pub state: Document,
}

/// Run every step of a scenario against a fresh session.
///
/// A failing step is recorded and the run continues with the next one; the
/// store keeps whatever earlier cycles applied.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(case: &CaseFile) -> Result<CaseRun> {
    let config = apply_case_config(ActionsConfig::default(), &case.config)?;
    let initial = serde_json::to_string(&case.state).context("serialize initial state")?;
    let storage = MemoryStorage::with_entry(&config.storage.key, &initial);
    let session = Session::with_storage(&config, &case.rule_set(), Box::new(storage))?;

    let mut steps = Vec::with_capacity(case.steps.len());
    for (index, step) in case.steps.iter().enumerate() {
        let result = match session
            .engine()
            .dispatch(&step.origin, &step.event, step.data.clone())
        {
            Ok(outcome) => StepResult::Completed {
                fired: outcome.fired_rules(),
                origins: outcome.origins().into_iter().map(str::to_string).collect(),
                changes: outcome.changed_keys().iter().map(str::to_string).collect(),
            },
            Err(err) => StepResult::Failed {
                message: err.to_string(),
            },
        };
        let record = StepRecord {
            origin: step.origin.clone(),
            event: step.event.clone(),
            result,
        };
        debug!(
            index,
            origin = %record.origin,
            event = %record.event,
            result = ?record.result,
            "step dispatched"
        );
        steps.push(record);
    }
    info!(steps = steps.len(), "case finished");

    Ok(CaseRun {
        steps,
        state: session.store().snapshot().as_ref().clone(),
    })
}
