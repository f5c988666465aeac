//! Wires a store and an engine together from configuration.

use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::expr::FunctionLibrary;
use crate::core::patch::Document;
use crate::core::rules::RuleSet;
use crate::engine::RuleEngine;
use crate::io::config::ActionsConfig;
use crate::io::storage::{FileStorage, Storage};
use crate::store::StateStore;

/// A hydrated store and an engine bound to it.
#[derive(Debug)]
pub struct Session {
    store: Rc<StateStore>,
    engine: Rc<RuleEngine>,
}

impl Session {
    /// Open against the file storage named by `config`.
    pub fn open(config: &ActionsConfig, rules: &RuleSet) -> Result<Self> {
        let storage = FileStorage::new(&config.storage.dir);
        Self::with_storage(config, rules, Box::new(storage))
    }

    pub fn with_storage(
        config: &ActionsConfig,
        rules: &RuleSet,
        storage: Box<dyn Storage>,
    ) -> Result<Self> {
        let store = Rc::new(
            StateStore::open(storage, &config.storage.key, config.store_options())
                .context("open state store")?,
        );
        let engine = RuleEngine::new(
            Rc::clone(&store),
            rules,
            FunctionLibrary::standard(),
            config.engine_options(),
        )
        .context("compile rules")?;
        debug!(key = %config.storage.key, "session opened");
        Ok(Self {
            store,
            engine: Rc::new(engine),
        })
    }

    pub fn store(&self) -> &Rc<StateStore> {
        &self.store
    }

    pub fn engine(&self) -> &Rc<RuleEngine> {
        &self.engine
    }
}

/// The persisted document, without building an engine.
pub fn read_state(config: &ActionsConfig) -> Result<Document> {
    let storage = FileStorage::new(&config.storage.dir);
    let store = StateStore::open(Box::new(storage), &config.storage.key, config.store_options())
        .context("open state store")?;
    Ok(store.snapshot().as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::StorageConfig;
    use crate::test_support::{rule, rule_set};
    use serde_json::json;

    #[test]
    fn state_survives_across_sessions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ActionsConfig {
            storage: StorageConfig {
                dir: temp.path().join("state"),
                ..StorageConfig::default()
            },
            ..ActionsConfig::default()
        };
        let rules = rule_set(vec![rule("btn1", &[], &[("$count", "$count + 1")])]);

        for _ in 0..2 {
            let session = Session::open(&config, &rules).expect("open");
            session
                .engine()
                .dispatch("btn1", "press", Document::new())
                .expect("dispatch");
        }

        let state = read_state(&config).expect("read");
        assert_eq!(state.get("$count"), Some(&json!(2)));
    }

    #[test]
    fn bad_rules_fail_to_open() {
        let config = ActionsConfig::default();
        let rules = rule_set(vec![rule("a", &["("], &[])]);
        let err = Session::with_storage(
            &config,
            &rules,
            Box::new(crate::io::storage::MemoryStorage::new()),
        )
        .expect_err("compile error");
        assert!(format!("{err:#}").contains("compile rules"));
    }
}
