//! The reactive state store.
//!
//! One JSON document of top-level state variables. Every [`StateStore::update`]
//! merges a patch into a fresh copy, computes the top-level change set,
//! notifies interested listeners in registration order, then persists the
//! whole document.
//!
//! Listeners may call back into the store (or into a rule engine that updates
//! the store). Such nested updates run to completion before the outer update
//! continues with its remaining listeners; a depth counter bounds the nesting.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::expr::display;
use crate::core::patch::{
    ChangeSet, Document, Patch, diff_top_level, json_type_name, lookup_path, merge, top_level,
};
use crate::error::StoreError;
use crate::io::storage::{MemoryStorage, Storage};

/// A rendered element that displays state.
pub trait Widget {
    /// Disconnected widgets are skipped during notification but stay
    /// registered.
    fn is_connected(&self) -> bool {
        true
    }

    fn render(&self, store: &StateStore);
}

/// Plain callback listener. Receives the current values of its watched
/// names, in the order they were registered.
pub type Callback = dyn Fn(&StateStore, &[Value]);

/// A listener identity. Two listeners are the same listener when they share
/// the same allocation.
#[derive(Clone)]
pub enum Listener {
    Widget(Rc<dyn Widget>),
    Callback(Rc<Callback>),
}

impl Listener {
    pub fn widget(widget: Rc<dyn Widget>) -> Self {
        Listener::Widget(widget)
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&StateStore, &[Value]) + 'static,
    {
        Listener::Callback(Rc::new(f))
    }

    fn same(&self, other: &Listener) -> bool {
        match (self, other) {
            (Listener::Widget(a), Listener::Widget(b)) => Rc::ptr_eq(a, b),
            (Listener::Callback(a), Listener::Callback(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Widget(_) => f.write_str("Listener::Widget"),
            Listener::Callback(_) => f.write_str("Listener::Callback"),
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    listener: Listener,
    names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Updates that may be nested inside listener callbacks.
    pub max_update_depth: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_update_depth: 64,
        }
    }
}

/// Default storage key of the state document.
pub const DEFAULT_STATE_KEY: &str = "4.state";

pub struct StateStore {
    state: RefCell<Rc<Document>>,
    listeners: RefCell<Vec<Registration>>,
    last_changes: RefCell<ChangeSet>,
    depth: Cell<usize>,
    storage: Box<dyn Storage>,
    key: String,
    options: StoreOptions,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("key", &self.key)
            .field("state", &self.state.borrow())
            .field("listeners", &self.listeners.borrow().len())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open a store, hydrating it from `storage` when a document was
    /// persisted under `key`. A persisted document replaces the empty one in
    /// full.
    pub fn open(
        storage: Box<dyn Storage>,
        key: &str,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let persisted = storage.read(key).map_err(|err| StoreError::Hydrate {
            key: key.to_string(),
            message: format!("{err:#}"),
        })?;
        let document = match persisted {
            None => Document::new(),
            Some(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(StoreError::CorruptState {
                        key: key.to_string(),
                        message: format!("expected an object, got {}", json_type_name(&other)),
                    });
                }
                Err(err) => {
                    return Err(StoreError::CorruptState {
                        key: key.to_string(),
                        message: err.to_string(),
                    });
                }
            },
        };
        debug!(key, variables = document.len(), "state store opened");
        Ok(Self {
            state: RefCell::new(Rc::new(document)),
            listeners: RefCell::new(Vec::new()),
            last_changes: RefCell::new(ChangeSet::default()),
            depth: Cell::new(0),
            storage,
            key: key.to_string(),
            options,
        })
    }

    /// An empty store backed by throwaway memory storage.
    pub fn in_memory() -> Self {
        Self {
            state: RefCell::new(Rc::new(Document::new())),
            listeners: RefCell::new(Vec::new()),
            last_changes: RefCell::new(ChangeSet::default()),
            depth: Cell::new(0),
            storage: Box::new(MemoryStorage::new()),
            key: DEFAULT_STATE_KEY.to_string(),
            options: StoreOptions::default(),
        }
    }

    /// Dotted-path lookup; `null` when any segment is absent.
    pub fn get(&self, name: &str) -> Value {
        self.get_or(name, Value::Null)
    }

    pub fn get_or(&self, name: &str, default: Value) -> Value {
        lookup_path(&self.state.borrow(), name)
            .cloned()
            .unwrap_or(default)
    }

    /// The current document. Later updates never change a snapshot.
    pub fn snapshot(&self) -> Rc<Document> {
        Rc::clone(&self.state.borrow())
    }

    /// The document `patch` would produce, without committing it.
    pub fn preview(&self, patch: Patch) -> Document {
        merge(&self.snapshot(), patch)
    }

    /// Merge `patch`, notify listeners whose watched names changed, then
    /// persist. Returns the change set.
    pub fn update(&self, patch: Patch) -> Result<ChangeSet, StoreError> {
        let depth = self.depth.get();
        if depth >= self.options.max_update_depth {
            warn!(depth, "re-entrant update limit reached");
            return Err(StoreError::ReentrancyLimit {
                limit: self.options.max_update_depth,
            });
        }
        self.depth.set(depth + 1);
        let _guard = DepthGuard(&self.depth);

        let before = self.snapshot();
        let after = merge(&before, patch);
        let changes = diff_top_level(&before, &after);
        *self.state.borrow_mut() = Rc::new(after);
        *self.last_changes.borrow_mut() = changes.clone();
        debug!(depth, changed = ?changes.iter().collect::<Vec<_>>(), "state updated");

        if !changes.is_empty() {
            self.notify(&changes);
        }
        self.persist();
        Ok(changes)
    }

    /// [`StateStore::update`] with a JSON object patch. Anything but an object
    /// is rejected.
    pub fn update_value(&self, patch: Value) -> Result<ChangeSet, StoreError> {
        self.update(Patch::from_value(patch)?)
    }

    /// Set `name` to `default` unless it already holds a value.
    pub fn define(&self, name: &str, default: Value) -> Result<ChangeSet, StoreError> {
        self.update(Patch::new().define(name, default))
    }

    /// Register `listener` for `names`, replacing any earlier watch list for
    /// the same listener. Only the top-level segment of each name counts.
    pub fn observe(&self, listener: Listener, names: &[&str]) {
        let names: Vec<String> = names
            .iter()
            .map(|name| top_level(name).to_string())
            .collect();
        let mut listeners = self.listeners.borrow_mut();
        match listeners
            .iter_mut()
            .find(|registration| registration.listener.same(&listener))
        {
            Some(existing) => existing.names = names,
            None => listeners.push(Registration { listener, names }),
        }
    }

    /// Drop a listener's registration. Returns whether it was registered.
    pub fn unobserve(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|registration| !registration.listener.same(listener));
        listeners.len() != before
    }

    /// Re-render every connected widget regardless of changes.
    pub fn render_all(&self) {
        let registrations = self.listeners.borrow().clone();
        for registration in registrations {
            if let Listener::Widget(widget) = registration.listener
                && widget.is_connected()
            {
                widget.render(self);
            }
        }
    }

    /// Replace the first `$name` and the first `${name}` with the string form
    /// of the named value. Absent values render as the empty string.
    pub fn interpolate(&self, template: &str) -> String {
        static DOLLAR_NAME: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\$[a-zA-Z0-9_.]+").expect("static regex"));
        static BRACED_NAME: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").expect("static regex"));

        let result = DOLLAR_NAME.replace(template, |caps: &regex::Captures<'_>| {
            display(&self.get(&caps[0]))
        });
        BRACED_NAME
            .replace(&result, |caps: &regex::Captures<'_>| {
                display(&self.get(&format!("${}", &caps[1])))
            })
            .into_owned()
    }

    /// True iff `name` changed in the most recent update.
    pub fn has_been_updated(&self, name: &str) -> bool {
        self.last_changes.borrow().contains(top_level(name))
    }

    /// Build a patch from assignment text such as `$mode = $next, $key = label`.
    /// A `$name` right-hand side assigns that state's interpolated string
    /// form; a bare word assigns the event data field of that name, and a
    /// missing field removes the target.
    pub fn parse_action(&self, text: &str, data: &Document) -> Patch {
        static ASSIGNMENT: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(\$\w+)\s*=\s*(\$?\w+)").expect("static regex"));

        let mut patch = Patch::new();
        for caps in ASSIGNMENT.captures_iter(text) {
            let target = caps[1].to_string();
            let source = &caps[2];
            if source.starts_with('$') {
                patch.insert_assign(target, Value::String(self.interpolate(source)));
            } else {
                match data.get(source) {
                    Some(value) => patch.insert_assign(target, value.clone()),
                    None => patch = patch.remove(target),
                }
            }
        }
        patch
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn notify(&self, changes: &ChangeSet) {
        // Listeners may register, unregister, or update while being notified.
        let registrations = self.listeners.borrow().clone();
        for registration in registrations {
            if !changes.intersects(&registration.names) {
                continue;
            }
            match &registration.listener {
                Listener::Widget(widget) => {
                    if widget.is_connected() {
                        widget.render(self);
                    }
                }
                Listener::Callback(callback) => {
                    let values: Vec<Value> = registration
                        .names
                        .iter()
                        .map(|name| self.get(name))
                        .collect();
                    callback(self, &values);
                }
            }
        }
    }

    fn persist(&self) {
        let text = match serde_json::to_string(&*self.snapshot()) {
            Ok(text) => text,
            Err(err) => {
                warn!(key = %self.key, err = %err, "serialize state failed");
                return;
            }
        };
        if let Err(err) = self.storage.write(&self.key, &text) {
            warn!(
                key = %self.key,
                err = %format!("{err:#}"),
                "persist state failed; keeping in-memory state"
            );
        }
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}
