//! Parameter and timeline-variable resolution.
//!
//! Parameters are pulled up the ancestor chain; deferred values are evaluated
//! against the node that asked, not the node where the parameter was found.

use serde_json::Value;
use trellis_types::{ParameterValue, Parameters, VariableSet};

use crate::description::is_built_in_parameter;
use crate::node::NodeBase;

/// Options for [`crate::TimelineNode::get_parameter_value`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fall back to ancestor timelines when the node lacks the parameter.
    pub recursive: bool,
    /// Call function-valued parameters instead of returning them.
    pub evaluate_functions: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            evaluate_functions: true,
        }
    }
}

impl ResolveOptions {
    pub fn local() -> Self {
        Self {
            recursive: false,
            ..Self::default()
        }
    }

    pub fn raw() -> Self {
        Self {
            evaluate_functions: false,
            ..Self::default()
        }
    }
}

/// Resolve `name` (a `.`-separated path) for `requester`, whose own parameters
/// are `own`. `local` is the variable set a timeline has selected for its
/// current pass; trials pass `None`.
pub(crate) fn resolve_parameter(
    requester: &NodeBase,
    own: &Parameters,
    local: Option<&VariableSet>,
    name: &str,
    options: ResolveOptions,
) -> Option<ParameterValue> {
    let head = name.split_once('.').map_or(name, |(head, _)| head);
    if is_built_in_parameter(head) {
        return None;
    }

    let raw = match lookup_path(own, name) {
        Some(raw) => raw,
        None if options.recursive => {
            let mut ancestor = requester.parent();
            loop {
                let timeline = ancestor?;
                if let Some(raw) = lookup_path(timeline.parameters(), name) {
                    break raw;
                }
                ancestor = timeline.base.parent();
            }
        }
        None => return None,
    };

    match raw {
        ParameterValue::TimelineVariable(variable) => {
            resolve_variable(requester, local, &variable).map(ParameterValue::Literal)
        }
        ParameterValue::Function(f) if options.evaluate_functions => {
            Some(ParameterValue::Literal(f()))
        }
        other => Some(other),
    }
}

/// Nearest binding of `name`: the node's `local` selection first, then the set
/// bound by the pass that created `base`, then each ancestor's.
pub(crate) fn resolve_variable(
    base: &NodeBase,
    local: Option<&VariableSet>,
    name: &str,
) -> Option<Value> {
    let own = local
        .and_then(|set| set.lookup(name))
        .or_else(|| base.variables.as_deref().and_then(|set| set.lookup(name)));
    if let Some(value) = own {
        return Some(value.clone());
    }
    let mut ancestor = base.parent();
    while let Some(timeline) = ancestor {
        if let Some(value) = timeline
            .base
            .variables
            .as_deref()
            .and_then(|set| set.lookup(name))
        {
            return Some(value.clone());
        }
        ancestor = timeline.base.parent();
    }
    None
}

/// The first segment selects a parameter; further segments descend into a
/// literal JSON object. Missing segments or non-object intermediates miss.
fn lookup_path(parameters: &Parameters, path: &str) -> Option<ParameterValue> {
    let mut segments = path.split('.');
    let head = segments.next()?;
    let value = parameters.get(head)?;

    let mut rest = segments.peekable();
    if rest.peek().is_none() {
        return Some(value.clone());
    }
    let mut current = value.as_literal()?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(ParameterValue::Literal(current.clone()))
}
