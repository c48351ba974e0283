//! Description validation: lint rules and diagnostics.
//!
//! Rules run against every timeline of a description tree. Call [`validate`]
//! for advisory diagnostics or [`validate_or_raise`] to fail on any
//! `Error`-severity issue before running.

use trellis_types::TrellisError;

use crate::description::{NodeDescription, TimelineDescription};
use crate::sampling::SampleStrategy;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// Location of the offending timeline, e.g. `$.timeline[1]`.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic>;
}

fn diagnostic(rule: &dyn LintRule, severity: Severity, path: &str, message: String) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity,
        message,
        path: path.into(),
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct SampleTypeRule;
impl LintRule for SampleTypeRule {
    fn name(&self) -> &str { "sample_type" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        match &timeline.sample {
            Some(sample) => match SampleStrategy::parse(&sample.sample_type) {
                Ok(_) => vec![],
                Err(err) => vec![diagnostic(self, Severity::Error, path, err.to_string())],
            },
            None => vec![],
        }
    }
}

struct SampleOptionsRule;
impl LintRule for SampleOptionsRule {
    fn name(&self) -> &str { "sample_options" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        let Some(sample) = &timeline.sample else {
            return vec![];
        };
        let Ok(strategy) = SampleStrategy::parse(&sample.sample_type) else {
            return vec![];
        };
        if strategy == SampleStrategy::Custom && sample.custom.is_none() {
            return vec![diagnostic(
                self,
                Severity::Error,
                path,
                "custom sampling needs a sampling function".into(),
            )];
        }
        match sample.options.check(strategy, timeline.variable_set_count()) {
            Ok(()) => vec![],
            Err(err) => vec![diagnostic(self, Severity::Error, path, err.to_string())],
        }
    }
}

struct OrderingWithoutVariablesRule;
impl LintRule for OrderingWithoutVariablesRule {
    fn name(&self) -> &str { "ordering_without_variables" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        if timeline.variable_set_count() > 0 {
            return vec![];
        }
        let mut diags = Vec::new();
        if timeline.sample.is_some() {
            diags.push(diagnostic(
                self,
                Severity::Warning,
                path,
                "`sample` has no effect without timeline_variables".into(),
            ));
        }
        if timeline.randomize_order {
            diags.push(diagnostic(
                self,
                Severity::Warning,
                path,
                "`randomize_order` has no effect without timeline_variables".into(),
            ));
        }
        diags
    }
}

struct SampleOverridesRandomizeRule;
impl LintRule for SampleOverridesRandomizeRule {
    fn name(&self) -> &str { "sample_overrides_randomize" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        if timeline.sample.is_some() && timeline.randomize_order {
            vec![diagnostic(
                self,
                Severity::Info,
                path,
                "`randomize_order` is ignored because `sample` is set".into(),
            )]
        } else {
            vec![]
        }
    }
}

struct EmptyTimelineRule;
impl LintRule for EmptyTimelineRule {
    fn name(&self) -> &str { "empty_timeline" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        if timeline.timeline.is_empty() {
            vec![diagnostic(
                self,
                Severity::Warning,
                path,
                "timeline has no content and will run no trials".into(),
            )]
        } else {
            vec![]
        }
    }
}

struct TrialTypeRule;
impl LintRule for TrialTypeRule {
    fn name(&self) -> &str { "trial_type" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        timeline
            .timeline
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                NodeDescription::Trial(trial) if trial.trial_type.trim().is_empty() => {
                    Some(diagnostic(
                        self,
                        Severity::Error,
                        &format!("{path}.timeline[{i}]"),
                        "trial has an empty type".into(),
                    ))
                }
                _ => None,
            })
            .collect()
    }
}

struct ZeroRepetitionsRule;
impl LintRule for ZeroRepetitionsRule {
    fn name(&self) -> &str { "zero_repetitions" }
    fn apply(&self, timeline: &TimelineDescription, path: &str) -> Vec<Diagnostic> {
        if timeline.repetitions == Some(0) {
            vec![diagnostic(
                self,
                Severity::Warning,
                path,
                "`repetitions` is 0; the timeline will run no passes".into(),
            )]
        } else {
            vec![]
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn default_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(SampleTypeRule),
        Box::new(SampleOptionsRule),
        Box::new(OrderingWithoutVariablesRule),
        Box::new(SampleOverridesRandomizeRule),
        Box::new(EmptyTimelineRule),
        Box::new(TrialTypeRule),
        Box::new(ZeroRepetitionsRule),
    ]
}

/// Run all lint rules over every timeline of the tree.
pub fn validate(description: &TimelineDescription) -> Vec<Diagnostic> {
    let rules = default_rules();
    let mut diagnostics = Vec::new();
    walk(description, "$", &rules, &mut diagnostics);
    diagnostics
}

fn walk(
    timeline: &TimelineDescription,
    path: &str,
    rules: &[Box<dyn LintRule>],
    diagnostics: &mut Vec<Diagnostic>,
) {
    for rule in rules {
        diagnostics.extend(rule.apply(timeline, path));
    }
    for (i, item) in timeline.timeline.iter().enumerate() {
        if let NodeDescription::Timeline(child) = item {
            walk(child, &format!("{path}.timeline[{i}]"), rules, diagnostics);
        }
    }
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(description: &TimelineDescription) -> trellis_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(description);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| format!("{}: {}", d.path, d.message))
        .collect();
    if !errors.is_empty() {
        return Err(TrellisError::InvalidDescription(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{SampleDescription, TrialDescription};
    use trellis_types::VariableSet;

    fn sets(n: usize) -> Vec<VariableSet> {
        (0..n).map(|i| VariableSet::new().with("i", i)).collect()
    }

    #[test]
    fn valid_description_passes() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html"))
            .timeline_variables(sets(3))
            .sample(SampleDescription::without_replacement(2));
        let diags = validate(&desc);
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
        assert!(validate_or_raise(&desc).is_ok());
    }

    #[test]
    fn unknown_sample_type_is_an_error() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html"))
            .timeline_variables(sets(2))
            .sample(SampleDescription::named("bogus"));
        let diags = validate(&desc);
        assert!(diags
            .iter()
            .any(|d| d.rule == "sample_type" && d.severity == Severity::Error));
        assert!(validate_or_raise(&desc).is_err());
    }

    #[test]
    fn oversized_sample_is_an_error() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html"))
            .timeline_variables(sets(2))
            .sample(SampleDescription::without_replacement(5));
        let diags = validate(&desc);
        assert!(diags.iter().any(|d| d.rule == "sample_options"));
    }

    #[test]
    fn custom_without_function_is_an_error() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html"))
            .timeline_variables(sets(2))
            .sample(SampleDescription::named("custom"));
        assert!(validate(&desc)
            .iter()
            .any(|d| d.rule == "sample_options" && d.severity == Severity::Error));
    }

    #[test]
    fn ordering_without_variables_warns() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html"))
            .randomize_order(true)
            .sample(SampleDescription::fixed_repetitions(2));
        let diags = validate(&desc);
        let warnings = diags
            .iter()
            .filter(|d| d.rule == "ordering_without_variables")
            .count();
        assert_eq!(warnings, 2);
        assert!(diags.iter().any(|d| d.rule == "sample_overrides_randomize"));
        assert!(validate_or_raise(&desc).is_ok());
    }

    #[test]
    fn nested_problems_carry_their_path() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html"))
            .push(
                TimelineDescription::default()
                    .push(TrialDescription::new(" "))
                    .repetitions(0),
            );
        let diags = validate(&desc);
        let empty_type = diags.iter().find(|d| d.rule == "trial_type").unwrap();
        assert_eq!(empty_type.path, "$.timeline[1].timeline[0]");
        let zero = diags.iter().find(|d| d.rule == "zero_repetitions").unwrap();
        assert_eq!(zero.path, "$.timeline[1]");
    }

    #[test]
    fn empty_timeline_warns() {
        let diags = validate(&TimelineDescription::default());
        assert!(diags
            .iter()
            .any(|d| d.rule == "empty_timeline" && d.severity == Severity::Warning));
    }
}
