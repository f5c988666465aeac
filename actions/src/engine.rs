//! The rule engine.
//!
//! A dispatch runs cycles until its pending queue is empty. Each cycle scans
//! the rules in declaration order and fires the first one whose origin
//! matches and whose conditions all hold; the fired rule's updates are
//! evaluated against one context and applied to the store as a single patch.
//! Events queued during a cycle are drained most-recent-first.
//!
//! Every dispatch owns one frame on the frame stack. A listener that
//! dispatches while a rule is firing pushes a nested frame, so its queued
//! events never leak into the outer dispatch.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::core::expr::{Context, EventQueue, FunctionLibrary};
use crate::core::patch::{Document, Patch};
use crate::core::rules::{CompiledRule, CompiledRules, RuleSet};
use crate::core::types::{CycleReport, DispatchOutcome, DispatchRecord, INIT_EVENT, QueuedEvent};
use crate::error::{EngineError, LoadError};
use crate::store::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Cycles one dispatch may run before it is aborted.
    pub max_cycles: usize,
    /// Dispatches that may be nested through listeners.
    pub max_nesting: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_cycles: 1000,
            max_nesting: 32,
        }
    }
}

#[derive(Debug)]
pub struct RuleEngine {
    store: Rc<StateStore>,
    rules: RefCell<Rc<CompiledRules>>,
    references: RefCell<BTreeSet<String>>,
    functions: FunctionLibrary,
    options: EngineOptions,
    frames: RefCell<Vec<Vec<QueuedEvent>>>,
    staged: RefCell<Vec<QueuedEvent>>,
    last: RefCell<DispatchRecord>,
}

impl RuleEngine {
    /// Compile `rules` and bind them to `store`.
    pub fn new(
        store: Rc<StateStore>,
        rules: &RuleSet,
        functions: FunctionLibrary,
        options: EngineOptions,
    ) -> Result<Self, LoadError> {
        let compiled = rules.compile()?;
        info!(rules = compiled.len(), "rule engine ready");
        Ok(Self {
            store,
            rules: RefCell::new(Rc::new(compiled)),
            references: RefCell::new(rules.state_references()),
            functions,
            options,
            frames: RefCell::new(Vec::new()),
            staged: RefCell::new(Vec::new()),
            last: RefCell::new(DispatchRecord::default()),
        })
    }

    pub fn store(&self) -> &Rc<StateStore> {
        &self.store
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Swap in a new rule set. A dispatch already in flight finishes with
    /// the rules it started with.
    pub fn replace_rules(&self, rules: &RuleSet) -> Result<(), LoadError> {
        let compiled = rules.compile()?;
        info!(rules = compiled.len(), "rules replaced");
        *self.rules.borrow_mut() = Rc::new(compiled);
        *self.references.borrow_mut() = rules.state_references();
        Ok(())
    }

    /// Every `$name` the rules mention, plus every update target.
    pub fn all_state_references(&self) -> BTreeSet<String> {
        self.references.borrow().clone()
    }

    /// The latest top-level dispatch and the last rule it fired.
    pub fn last_dispatch(&self) -> DispatchRecord {
        self.last.borrow().clone()
    }

    /// Events queued but not yet drained, including staged ones.
    pub fn pending_events(&self) -> usize {
        let queued: usize = self.frames.borrow().iter().map(Vec::len).sum();
        queued + self.staged.borrow().len()
    }

    /// Startup dispatch: origin and event are both `init`.
    pub fn init(&self) -> Result<DispatchOutcome, EngineError> {
        self.dispatch(INIT_EVENT, INIT_EVENT, Document::new())
    }

    /// Queue a follow-up event. During a dispatch it joins the innermost
    /// dispatch's queue; otherwise it waits for the next top-level dispatch,
    /// which drains it after its first cycle.
    pub fn queue_event(&self, origin: &str, event: &str) {
        let item = QueuedEvent {
            origin: origin.to_string(),
            event: event.to_string(),
        };
        let mut frames = self.frames.borrow_mut();
        match frames.last_mut() {
            Some(queue) => {
                debug!(origin, event, depth = queue.len() + 1, "event queued");
                queue.push(item);
            }
            None => {
                debug!(origin, event, "event staged for the next dispatch");
                self.staged.borrow_mut().push(item);
            }
        }
    }

    /// Run `(origin, event, data)` and every event it queues. Returns once
    /// the queue is empty. On error the remaining queue is dropped; patches
    /// applied by earlier cycles stay applied.
    pub fn dispatch(
        &self,
        origin: &str,
        event: &str,
        data: Document,
    ) -> Result<DispatchOutcome, EngineError> {
        let depth = self.frames.borrow().len();
        if depth >= self.options.max_nesting {
            warn!(origin, event, depth, "nested dispatch limit reached");
            return Err(EngineError::NestingTooDeep {
                limit: self.options.max_nesting,
            });
        }
        let top_level = depth == 0;
        let mut frame = Vec::new();
        if top_level {
            frame.append(&mut self.staged.borrow_mut());
            *self.last.borrow_mut() = DispatchRecord {
                origin: origin.to_string(),
                event: event.to_string(),
                data: data.clone(),
                fired_rule: None,
            };
        }
        self.frames.borrow_mut().push(frame);

        let result = self.drain(origin, event, data, top_level);

        let abandoned = self.frames.borrow_mut().pop().map_or(0, |queue| queue.len());
        if abandoned > 0 {
            warn!(origin, event, abandoned, "dispatch failed; queued events dropped");
        }
        result
    }

    fn drain(
        &self,
        origin: &str,
        event: &str,
        data: Document,
        top_level: bool,
    ) -> Result<DispatchOutcome, EngineError> {
        let rules = Rc::clone(&self.rules.borrow());
        let mut current = QueuedEvent {
            origin: origin.to_string(),
            event: event.to_string(),
        };
        let mut data = data;
        let mut outcome = DispatchOutcome::default();
        debug!(origin, event, top_level, "dispatch started");

        loop {
            if outcome.cycles.len() >= self.options.max_cycles {
                warn!(
                    origin = %current.origin,
                    event = %current.event,
                    limit = self.options.max_cycles,
                    "dispatch cycle limit reached"
                );
                return Err(EngineError::UnboundedCycle {
                    limit: self.options.max_cycles,
                    origin: current.origin,
                    event: current.event,
                });
            }

            let report = self.cycle(&rules, current, &data)?;
            if top_level && report.fired.is_some() {
                self.last.borrow_mut().fired_rule = report.fired;
            }
            outcome.cycles.push(report);

            let next = self.frames.borrow_mut().last_mut().and_then(Vec::pop);
            match next {
                Some(item) => {
                    current = item;
                    data = Document::new();
                }
                None => break,
            }
        }

        debug!(
            origin,
            event,
            cycles = outcome.cycles.len(),
            fired = ?outcome.fired_rules(),
            "dispatch finished"
        );
        Ok(outcome)
    }

    fn cycle(
        &self,
        rules: &CompiledRules,
        current: QueuedEvent,
        data: &Document,
    ) -> Result<CycleReport, EngineError> {
        let snapshot = self.store.snapshot();
        let ctx = Context::new(&self.functions, &snapshot, data, self);

        let Some(rule) = rules
            .iter()
            .find(|rule| rule.origin.matches(&current.origin) && self.conditions_hold(rule, &ctx))
        else {
            debug!(origin = %current.origin, event = %current.event, "no rule matched");
            return Ok(CycleReport {
                origin: current.origin,
                event: current.event,
                fired: None,
                changes: Default::default(),
            });
        };

        let mut patch = Patch::new();
        for update in &rule.updates {
            let value = update.value.eval(&ctx).map_err(|source| {
                warn!(
                    rule = rule.index,
                    state = %update.state_name,
                    expression = update.value.source(),
                    err = %source,
                    "update failed; dispatch aborted"
                );
                EngineError::Update {
                    rule: rule.index,
                    state_name: update.state_name.clone(),
                    source,
                }
            })?;
            patch.insert_assign(update.state_name.clone(), value);
        }

        info!(rule = rule.index, origin = %current.origin, event = %current.event, "rule fired");
        let changes = self.store.update(patch)?;
        Ok(CycleReport {
            origin: current.origin,
            event: current.event,
            fired: Some(rule.index),
            changes,
        })
    }

    /// Conjunction of the rule's conditions. A failing condition is false.
    fn conditions_hold(&self, rule: &CompiledRule, ctx: &Context<'_>) -> bool {
        rule.conditions.iter().all(|condition| match condition.holds(ctx) {
            Ok(holds) => holds,
            Err(err) => {
                warn!(
                    rule = rule.index,
                    condition = condition.source(),
                    err = %err,
                    "condition failed; treated as false"
                );
                false
            }
        })
    }
}

impl EventQueue for RuleEngine {
    fn queue_event(&self, origin: &str, event: &str) {
        RuleEngine::queue_event(self, origin, event);
    }
}
