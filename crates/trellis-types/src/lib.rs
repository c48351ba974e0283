//! Shared types, errors, parameter values and node status for the Trellis engine.
//!
//! This crate provides the foundational types used across the Trellis crates:
//! - `TrellisError`: unified error taxonomy
//! - `NodeStatus`: lifecycle state of a trial or timeline node
//! - `ParameterValue` / `Parameters`: literal, deferred and lazily evaluated parameters
//! - `VariableSet`: one binding of timeline variables
//! - `TrialRequest`: what the trial executor receives

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unified error type for all Trellis subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
    // === Configuration Errors ===
    #[error(
        "Invalid type \"{sample_type}\" in timeline sample parameters. Valid options for type are \
         \"custom\", \"with-replacement\", \"without-replacement\", \"fixed-repetitions\", and \
         \"alternate-groups\""
    )]
    InvalidSampleType { sample_type: String },

    #[error("Invalid '{strategy}' sample parameters: {message}")]
    InvalidSampleOptions { strategy: String, message: String },

    #[error("Invalid timeline description: {0}")]
    InvalidDescription(String),

    // === Callback Errors ===
    #[error("Callback '{callback}' failed: {message}")]
    CallbackFailed { callback: String, message: String },

    // === Execution Errors ===
    #[error("Trial {index} ('{trial_type}') failed: {message}")]
    TrialFailed {
        index: usize,
        trial_type: String,
        message: String,
    },

    #[error("Node {index} cannot run from status {status}")]
    InvalidState { index: usize, status: NodeStatus },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TrellisError {
    /// Returns `true` if the error stems from a malformed description rather than
    /// from anything that happened while trials were running.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TrellisError::InvalidSampleType { .. }
                | TrellisError::InvalidSampleOptions { .. }
                | TrellisError::InvalidDescription(_)
                | TrellisError::Json(_)
        )
    }

    /// Returns `true` if the error rejects the whole run. Every error does, except
    /// an attempt to re-run a node, which leaves the original run untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TrellisError::InvalidState { .. })
    }

    /// Build a [`TrellisError::CallbackFailed`] from any displayable error.
    pub fn callback(callback: impl Into<String>, err: impl fmt::Display) -> Self {
        TrellisError::CallbackFailed {
            callback: callback.into(),
            message: err.to_string(),
        }
    }
}

/// A convenience alias for `Result<T, TrellisError>`.
pub type Result<T> = std::result::Result<T, TrellisError>;

// ---------------------------------------------------------------------------
// NodeStatus: lifecycle of a trial or timeline node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Aborted,
    Skipped,
}

impl NodeStatus {
    /// Completed, aborted and skipped nodes never run again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Aborted | NodeStatus::Skipped
        )
    }

    /// Running or paused: the node has started and not yet settled.
    pub fn is_active(self) -> bool {
        matches!(self, NodeStatus::Running | NodeStatus::Paused)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Paused => "paused",
            NodeStatus::Completed => "completed",
            NodeStatus::Aborted => "aborted",
            NodeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ParameterValue: literal, deferred or lazily evaluated
// ---------------------------------------------------------------------------

/// A parameter producer evaluated with no arguments at lookup time.
pub type ValueFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// The value of a single node parameter.
#[derive(Clone)]
pub enum ParameterValue {
    /// A plain JSON value, used as-is.
    Literal(Value),
    /// Resolved through the timeline variable scope of the requesting node.
    TimelineVariable(String),
    /// Invoked on lookup unless function evaluation is switched off.
    Function(ValueFn),
}

impl ParameterValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParameterValue::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        ParameterValue::TimelineVariable(name.into())
    }

    pub fn function(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        ParameterValue::Function(Arc::new(f))
    }

    /// The literal payload, if this is a literal.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            ParameterValue::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_literal(self) -> Option<Value> {
        match self {
            ParameterValue::Literal(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            ParameterValue::TimelineVariable(name) => {
                f.debug_tuple("TimelineVariable").field(name).finish()
            }
            ParameterValue::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl PartialEq for ParameterValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParameterValue::Literal(a), ParameterValue::Literal(b)) => a == b,
            (ParameterValue::TimelineVariable(a), ParameterValue::TimelineVariable(b)) => a == b,
            (ParameterValue::Function(a), ParameterValue::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for ParameterValue {
    fn from(value: Value) -> Self {
        ParameterValue::Literal(value)
    }
}

// ---------------------------------------------------------------------------
// Parameters: ordered name → value mapping
// ---------------------------------------------------------------------------

/// Ordered parameter mapping. Insertion order is preserved; re-inserting a name
/// replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: Vec<(String, ParameterValue)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

// ---------------------------------------------------------------------------
// VariableSet: one binding of timeline variables
// ---------------------------------------------------------------------------

/// A flat mapping from variable name to value. A name bound to `None` is
/// explicitly unset: lookups treat it as absent and fall through to the
/// enclosing scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    bindings: Vec<(String, Option<Value>)>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name, Some(value.into()));
        self
    }

    /// Builder-style explicit unset marker.
    pub fn unset(mut self, name: impl Into<String>) -> Self {
        self.bind(name, None);
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Option<Value>) {
        let name = name.into();
        match self.bindings.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.bindings.push((name, value)),
        }
    }

    /// The bound value, or `None` when the name is missing or explicitly unset.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for VariableSet {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            bindings: map.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for VariableSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(VariableSet::new(), |set, (k, v)| set.with(k, v))
    }
}

// ---------------------------------------------------------------------------
// TrialRequest: input handed to the trial executor
// ---------------------------------------------------------------------------

/// Everything a trial executor needs to perform one trial: the trial type, the
/// trial's index among its siblings and every parameter fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub index: usize,
    pub trial_type: String,
    pub parameters: serde_json::Map<String, Value>,
}

impl TrialRequest {
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display_invalid_sample_type() {
        let err = TrellisError::InvalidSampleType {
            sample_type: "bogus".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid type \"bogus\" in timeline sample parameters."));
        assert!(msg.contains("\"alternate-groups\""));
    }

    #[test]
    fn error_display_sample_options() {
        let err = TrellisError::InvalidSampleOptions {
            strategy: "without-replacement".into(),
            message: "size 5 exceeds 3 variable sets".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid 'without-replacement' sample parameters: size 5 exceeds 3 variable sets"
        );
    }

    #[test]
    fn error_display_trial_failed() {
        let err = TrellisError::TrialFailed {
            index: 2,
            trial_type: "html-keyboard-response".into(),
            message: "display lost".into(),
        };
        assert_eq!(
            err.to_string(),
            "Trial 2 ('html-keyboard-response') failed: display lost"
        );
    }

    #[test]
    fn error_display_invalid_state() {
        let err = TrellisError::InvalidState {
            index: 0,
            status: NodeStatus::Completed,
        };
        assert_eq!(err.to_string(), "Node 0 cannot run from status completed");
    }

    #[test]
    fn callback_helper_wraps_message() {
        let err = TrellisError::callback("loop_function", "boom");
        assert_eq!(err.to_string(), "Callback 'loop_function' failed: boom");
    }

    // --- classification ---

    #[test]
    fn configuration_errors() {
        assert!(TrellisError::InvalidSampleType {
            sample_type: "x".into()
        }
        .is_configuration_error());
        assert!(TrellisError::InvalidDescription("bad".into()).is_configuration_error());
        assert!(!TrellisError::callback("conditional_function", "x").is_configuration_error());
        assert!(!TrellisError::Other("x".into()).is_configuration_error());
    }

    #[test]
    fn invalid_state_is_not_fatal() {
        let err = TrellisError::InvalidState {
            index: 1,
            status: NodeStatus::Running,
        };
        assert!(!err.is_fatal());
        assert!(TrellisError::Other("x".into()).is_fatal());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: TrellisError = json_err.into();
        assert!(matches!(err, TrellisError::Json(_)));
        assert!(err.is_configuration_error());
    }

    // --- NodeStatus ---

    #[test]
    fn status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&NodeStatus::Completed).unwrap(),
            "\"completed\""
        );
        let status: NodeStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(status, NodeStatus::Skipped);
    }

    #[test]
    fn status_terminal_and_active() {
        assert!(NodeStatus::Completed.is_terminal());
        assert!(NodeStatus::Aborted.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Paused.is_terminal());
        assert!(NodeStatus::Paused.is_active());
        assert!(NodeStatus::Running.is_active());
        assert!(!NodeStatus::Pending.is_active());
    }

    // --- Parameters ---

    #[test]
    fn parameters_preserve_insertion_order_and_replace_in_place() {
        let mut params = Parameters::new();
        params.insert("b", json!(1));
        params.insert("a", json!(2));
        params.insert("b", json!(3));
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(params.get("b"), Some(&ParameterValue::Literal(json!(3))));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn parameter_value_function_debug_is_opaque() {
        let f = ParameterValue::function(|| json!(1));
        assert_eq!(format!("{f:?}"), "Function(..)");
        assert_eq!(f.clone(), f);
        assert!(f.as_literal().is_none());
    }

    // --- VariableSet ---

    #[test]
    fn variable_set_unset_marker_reads_as_absent() {
        let set = VariableSet::new().with("word", "cat").unset("color");
        assert_eq!(set.lookup("word"), Some(&json!("cat")));
        assert_eq!(set.lookup("color"), None);
        assert_eq!(set.lookup("missing"), None);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn variable_set_null_is_defined() {
        let set: VariableSet = [("x", Value::Null)].into_iter().collect();
        assert_eq!(set.lookup("x"), Some(&Value::Null));
    }

    #[test]
    fn variable_set_from_json_object() {
        let map = json!({"a": 1, "b": "two"}).as_object().cloned().unwrap();
        let set = VariableSet::from(map);
        assert_eq!(set.lookup("a"), Some(&json!(1)));
        assert_eq!(set.lookup("b"), Some(&json!("two")));
    }
}
