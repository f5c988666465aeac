//! Engine configuration merging.
//!
//! Applies scenario overrides to the default engine configuration.

use actions::io::config::ActionsConfig;
use anyhow::Result;

use crate::case::CaseConfig;

/// Apply scenario configuration overrides to the base config.
pub fn apply_case_config(mut base: ActionsConfig, overrides: &CaseConfig) -> Result<ActionsConfig> {
    if let Some(max_cycles) = overrides.max_cycles {
        base.max_cycles = max_cycles;
    }
    if let Some(max_nesting) = overrides.max_nesting {
        base.max_nesting = max_nesting;
    }
    if let Some(max_update_depth) = overrides.max_update_depth {
        base.max_update_depth = max_update_depth;
    }
    base.validate()?;
    Ok(base)
}
