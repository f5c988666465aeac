//! Typed errors for the store, the engine, expressions, and rule loading.
//!
//! The I/O layer and the binaries wrap these in `anyhow::Error`; callers that
//! need to react to a specific failure use `downcast_ref`.

use thiserror::Error;

/// Expression parse and evaluation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at offset {offset} in `{source_text}`: {message}")]
    Parse {
        source_text: String,
        offset: usize,
        message: String,
    },
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("{function}() expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },
    #[error("type error in `{op}`: {message}")]
    Type { op: String, message: String },
    #[error("division by zero")]
    DivisionByZero,
}

/// State store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A patch was built from something other than a JSON object.
    #[error("patch must be a JSON object, got {0}")]
    PatchType(&'static str),
    /// Listeners kept triggering nested updates past the configured depth.
    #[error("re-entrant update depth exceeded {limit}")]
    ReentrancyLimit { limit: usize },
    /// The persisted document could not be parsed as a JSON object.
    #[error("persisted state under `{key}` is unusable: {message}")]
    CorruptState { key: String, message: String },
    #[error("read persisted state under `{key}`: {message}")]
    Hydrate { key: String, message: String },
}

/// Rule engine failures. Every variant aborts the in-flight dispatch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An update expression failed; no partial patch is applied.
    #[error("rule {rule}: update of `{state_name}` failed: {source}")]
    Update {
        rule: usize,
        state_name: String,
        #[source]
        source: ExprError,
    },
    #[error("dispatch from `{origin}` exceeded {limit} cycles (last event `{event}`)")]
    UnboundedCycle {
        limit: usize,
        origin: String,
        event: String,
    },
    #[error("nested dispatch depth exceeded {limit}")]
    NestingTooDeep { limit: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One problem found while compiling a rule document.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDiagnostic {
    /// Index of the rule in declaration order.
    pub rule: usize,
    /// Human-readable location within the rule (`condition 0`, `update $x`).
    pub location: String,
    pub error: ExprError,
}

impl std::fmt::Display for RuleDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule {} {}: {}", self.rule, self.location, self.error)
    }
}

/// Rule document loading failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown className `{class_name}` at {path}")]
    UnknownClass { class_name: String, path: String },
    #[error("`{class_name}` is not allowed at {path}")]
    MisplacedClass { class_name: String, path: String },
    #[error("{path}: prop `{prop}` must be a string")]
    InvalidProp { path: String, prop: String },
    #[error("legacy rule format: {0}")]
    Legacy(String),
    #[error("rule document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("{} expression error(s):\n- {}", .0.len(), join_diagnostics(.0))]
    Compile(Vec<RuleDiagnostic>),
}

fn join_diagnostics(diagnostics: &[RuleDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n- ")
}
