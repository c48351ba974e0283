//! Loading timeline descriptions from JSON.
//!
//! Grammar: an array is a timeline with that content; an object with a
//! `timeline` key is a timeline whose non-control keys are inherited
//! parameters; an object with a `type` key is a trial. A parameter value of
//! the form `{"timeline_variable": "name"}` is a deferred variable reference.

use std::path::Path;

use serde_json::{Map, Value};
use trellis_types::{ParameterValue, Parameters, Result, TrellisError, VariableSet};

use crate::description::{
    NodeDescription, SampleDescription, TimelineDescription, TrialDescription,
};

/// Parse a JSON document into a root timeline description.
pub fn load_description(source: &str) -> Result<TimelineDescription> {
    let value: Value = serde_json::from_str(source)?;
    parse_root(&value)
}

pub fn load_description_file(path: impl AsRef<Path>) -> Result<TimelineDescription> {
    let source = std::fs::read_to_string(path.as_ref())?;
    load_description(&source)
}

/// A root may be a timeline, or a single trial wrapped into one.
pub fn parse_root(value: &Value) -> Result<TimelineDescription> {
    match parse_node(value, "$")? {
        NodeDescription::Timeline(timeline) => Ok(timeline.as_ref().clone()),
        NodeDescription::Trial(trial) => Ok(TimelineDescription::new(vec![
            NodeDescription::Trial(trial),
        ])),
    }
}

fn invalid(path: &str, message: impl std::fmt::Display) -> TrellisError {
    TrellisError::InvalidDescription(format!("{path}: {message}"))
}

fn parse_node(value: &Value, path: &str) -> Result<NodeDescription> {
    match value {
        Value::Array(items) => Ok(TimelineDescription::new(parse_content(items, path)?).into()),
        Value::Object(map) if map.contains_key("timeline") => Ok(parse_timeline(map, path)?.into()),
        Value::Object(map) if map.contains_key("type") => Ok(parse_trial(map, path)?.into()),
        Value::Object(_) => Err(invalid(
            path,
            "expected a `timeline` or a `type` key",
        )),
        other => Err(invalid(
            path,
            format!("expected an array or an object, found {}", kind(other)),
        )),
    }
}

fn parse_content(items: &[Value], path: &str) -> Result<Vec<NodeDescription>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_node(item, &format!("{path}[{i}]")))
        .collect()
}

fn parse_trial(map: &Map<String, Value>, path: &str) -> Result<TrialDescription> {
    let trial_type = get_str(map, "type", path)?.unwrap_or_default();
    let mut trial = TrialDescription::new(trial_type);
    for (name, value) in map {
        if name != "type" {
            trial.parameters.insert(name.clone(), parameter_value(value));
        }
    }
    Ok(trial)
}

fn parse_timeline(map: &Map<String, Value>, path: &str) -> Result<TimelineDescription> {
    let content = match map.get("timeline") {
        Some(Value::Array(items)) => parse_content(items, &format!("{path}.timeline"))?,
        Some(other) => {
            return Err(invalid(
                path,
                format!("`timeline` must be an array, found {}", kind(other)),
            ))
        }
        None => Vec::new(),
    };
    let mut timeline = TimelineDescription::new(content);
    let mut parameters = Parameters::new();

    for (key, value) in map {
        match key.as_str() {
            "timeline" => {}
            "timeline_variables" => {
                timeline.timeline_variables = Some(parse_variable_sets(value, path)?);
            }
            "repetitions" => timeline.repetitions = Some(get_usize(value, key, path)?),
            "randomize_order" => {
                timeline.randomize_order = value
                    .as_bool()
                    .ok_or_else(|| invalid(path, "`randomize_order` must be a boolean"))?;
            }
            "sample" => timeline.sample = Some(parse_sample(value, &format!("{path}.sample"))?),
            "loop_function" | "conditional_function" | "on_timeline_start"
            | "on_timeline_finish" => {
                return Err(invalid(
                    path,
                    format!("`{key}` is a callback and cannot be given in JSON"),
                ))
            }
            _ => parameters.insert(key.clone(), parameter_value(value)),
        }
    }
    timeline.parameters = parameters;
    Ok(timeline)
}

fn parse_variable_sets(value: &Value, path: &str) -> Result<Vec<VariableSet>> {
    let sets = value
        .as_array()
        .ok_or_else(|| invalid(path, "`timeline_variables` must be an array"))?;
    sets.iter()
        .enumerate()
        .map(|(i, set)| match set {
            Value::Object(map) => Ok(VariableSet::from(map.clone())),
            other => Err(invalid(
                path,
                format!("timeline_variables[{i}] must be an object, found {}", kind(other)),
            )),
        })
        .collect()
}

fn parse_sample(value: &Value, path: &str) -> Result<SampleDescription> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid(path, "expected an object"))?;
    let sample_type = get_str(map, "type", path)?
        .ok_or_else(|| invalid(path, "missing `type`"))?;
    if sample_type == "custom" {
        return Err(invalid(
            path,
            "custom sampling needs a function and cannot be given in JSON",
        ));
    }

    let mut sample = SampleDescription::named(sample_type);
    if let Some(size) = map.get("size") {
        sample.options.size = Some(get_usize(size, "size", path)?);
    }
    if let Some(weights) = map.get("weights") {
        let weights = weights
            .as_array()
            .and_then(|w| w.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
            .ok_or_else(|| invalid(path, "`weights` must be an array of numbers"))?;
        sample.options.weights = Some(weights);
    }
    if let Some(groups) = map.get("groups") {
        let groups = groups
            .as_array()
            .and_then(|groups| {
                groups
                    .iter()
                    .map(|group| {
                        group.as_array().and_then(|g| {
                            g.iter()
                                .map(|i| i.as_u64().map(|i| i as usize))
                                .collect::<Option<Vec<_>>>()
                        })
                    })
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| invalid(path, "`groups` must be an array of index arrays"))?;
        sample.options.groups = Some(groups);
    }
    if let Some(randomize) = map.get("randomize_group_order") {
        sample.options.randomize_group_order = randomize
            .as_bool()
            .ok_or_else(|| invalid(path, "`randomize_group_order` must be a boolean"))?;
    }
    Ok(sample)
}

fn parameter_value(value: &Value) -> ParameterValue {
    if let Value::Object(map) = value {
        if map.len() == 1 {
            if let Some(Value::String(name)) = map.get("timeline_variable") {
                return ParameterValue::variable(name.clone());
            }
        }
    }
    ParameterValue::Literal(value.clone())
}

// --- Value extraction helpers ---

fn get_str(map: &Map<String, Value>, key: &str, path: &str) -> Result<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(
            path,
            format!("`{key}` must be a string, found {}", kind(other)),
        )),
    }
}

fn get_usize(value: &Value, key: &str, path: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
        .ok_or_else(|| invalid(path, format!("`{key}` must be a non-negative integer")))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
