//! Declarative timeline descriptions.
//!
//! A [`TimelineDescription`] is the sole input shape of the engine. It is built
//! in code with the builder methods below or loaded from JSON through
//! [`crate::loader`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use trellis_types::{ParameterValue, Parameters, Result, VariableSet};

use crate::sampling::SampleOptions;

/// Gate evaluated before every pass of a timeline.
pub type ConditionalFn = Arc<dyn Fn() -> Result<bool> + Send + Sync>;

/// Loop predicate receiving every leaf result the timeline has gathered so far.
pub type LoopFn = Arc<dyn Fn(&[Value]) -> Result<bool> + Send + Sync>;

/// `on_timeline_start` / `on_timeline_finish` hook.
pub type TimelineCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Fully custom variable-set ordering; receives the natural index order.
pub type CustomSampleFn = Arc<dyn Fn(&[usize]) -> Vec<usize> + Send + Sync>;

// ---------------------------------------------------------------------------
// NodeDescription
// ---------------------------------------------------------------------------

/// One item of a timeline's content: a trial or a nested timeline.
#[derive(Debug, Clone)]
pub enum NodeDescription {
    Trial(Arc<TrialDescription>),
    Timeline(Arc<TimelineDescription>),
}

impl NodeDescription {
    pub fn is_trial(&self) -> bool {
        matches!(self, NodeDescription::Trial(_))
    }
}

impl From<TrialDescription> for NodeDescription {
    fn from(trial: TrialDescription) -> Self {
        NodeDescription::Trial(Arc::new(trial))
    }
}

impl From<TimelineDescription> for NodeDescription {
    fn from(timeline: TimelineDescription) -> Self {
        NodeDescription::Timeline(Arc::new(timeline))
    }
}

// ---------------------------------------------------------------------------
// TrialDescription
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TrialDescription {
    /// The kind of trial the executor should perform.
    pub trial_type: String,
    pub parameters: Parameters,
}

impl TrialDescription {
    pub fn new(trial_type: impl Into<String>) -> Self {
        Self {
            trial_type: trial_type.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.insert(name, value);
        self
    }
}

// ---------------------------------------------------------------------------
// SampleDescription
// ---------------------------------------------------------------------------

/// The `sample` control parameter of a timeline.
#[derive(Clone)]
pub struct SampleDescription {
    /// Strategy name, checked when the timeline first orders its variable sets.
    pub sample_type: String,
    pub options: SampleOptions,
    /// Required by the `custom` strategy.
    pub custom: Option<CustomSampleFn>,
}

impl SampleDescription {
    /// A sample with an arbitrary strategy name and default options.
    pub fn named(sample_type: impl Into<String>) -> Self {
        Self {
            sample_type: sample_type.into(),
            options: SampleOptions::default(),
            custom: None,
        }
    }

    pub fn with_replacement(size: usize) -> Self {
        Self::named("with-replacement").size(size)
    }

    pub fn without_replacement(size: usize) -> Self {
        Self::named("without-replacement").size(size)
    }

    pub fn fixed_repetitions(size: usize) -> Self {
        Self::named("fixed-repetitions").size(size)
    }

    pub fn alternate_groups(groups: Vec<Vec<usize>>, randomize_group_order: bool) -> Self {
        let mut sample = Self::named("alternate-groups");
        sample.options.groups = Some(groups);
        sample.options.randomize_group_order = randomize_group_order;
        sample
    }

    pub fn custom(f: impl Fn(&[usize]) -> Vec<usize> + Send + Sync + 'static) -> Self {
        let mut sample = Self::named("custom");
        sample.custom = Some(Arc::new(f));
        sample
    }

    pub fn size(mut self, size: usize) -> Self {
        self.options.size = Some(size);
        self
    }

    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.options.weights = Some(weights);
        self
    }
}

impl fmt::Debug for SampleDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleDescription")
            .field("sample_type", &self.sample_type)
            .field("options", &self.options)
            .field("custom", &self.custom.as_ref().map(|_| ".."))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TimelineDescription
// ---------------------------------------------------------------------------

/// Names reserved for timeline control. They never resolve as parameters.
pub const BUILT_IN_PARAMETERS: [&str; 9] = [
    "timeline",
    "timeline_variables",
    "repetitions",
    "loop_function",
    "conditional_function",
    "randomize_order",
    "sample",
    "on_timeline_start",
    "on_timeline_finish",
];

pub fn is_built_in_parameter(name: &str) -> bool {
    BUILT_IN_PARAMETERS.contains(&name)
}

#[derive(Clone, Default)]
pub struct TimelineDescription {
    pub timeline: Vec<NodeDescription>,
    pub timeline_variables: Option<Vec<VariableSet>>,
    pub repetitions: Option<usize>,
    pub loop_function: Option<LoopFn>,
    pub conditional_function: Option<ConditionalFn>,
    pub sample: Option<SampleDescription>,
    pub randomize_order: bool,
    pub on_timeline_start: Option<TimelineCallback>,
    pub on_timeline_finish: Option<TimelineCallback>,
    /// Inherited by every descendant that does not set the name itself.
    pub parameters: Parameters,
}

impl TimelineDescription {
    pub fn new(timeline: Vec<NodeDescription>) -> Self {
        Self {
            timeline,
            ..Self::default()
        }
    }

    /// Append one content item.
    pub fn push(mut self, item: impl Into<NodeDescription>) -> Self {
        self.timeline.push(item.into());
        self
    }

    pub fn timeline_variables(mut self, sets: Vec<VariableSet>) -> Self {
        self.timeline_variables = Some(sets);
        self
    }

    pub fn repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = Some(repetitions);
        self
    }

    pub fn loop_function(mut self, f: impl Fn(&[Value]) -> bool + Send + Sync + 'static) -> Self {
        self.loop_function = Some(Arc::new(move |results: &[Value]| Ok(f(results))));
        self
    }

    pub fn try_loop_function(
        mut self,
        f: impl Fn(&[Value]) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.loop_function = Some(Arc::new(f));
        self
    }

    pub fn conditional_function(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.conditional_function = Some(Arc::new(move || Ok(f())));
        self
    }

    pub fn try_conditional_function(
        mut self,
        f: impl Fn() -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.conditional_function = Some(Arc::new(f));
        self
    }

    pub fn sample(mut self, sample: SampleDescription) -> Self {
        self.sample = Some(sample);
        self
    }

    pub fn randomize_order(mut self, randomize: bool) -> Self {
        self.randomize_order = randomize;
        self
    }

    pub fn on_timeline_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeline_start = Some(Arc::new(move || {
            f();
            Ok(())
        }));
        self
    }

    pub fn on_timeline_finish(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeline_finish = Some(Arc::new(move || {
            f();
            Ok(())
        }));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    /// Number of declared variable sets, zero when `timeline_variables` is absent.
    pub fn variable_set_count(&self) -> usize {
        self.timeline_variables.as_ref().map_or(0, Vec::len)
    }
}

impl From<Vec<NodeDescription>> for TimelineDescription {
    fn from(timeline: Vec<NodeDescription>) -> Self {
        Self::new(timeline)
    }
}

impl fmt::Debug for TimelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineDescription")
            .field("timeline", &self.timeline)
            .field("timeline_variables", &self.timeline_variables)
            .field("repetitions", &self.repetitions)
            .field("loop_function", &self.loop_function.is_some())
            .field("conditional_function", &self.conditional_function.is_some())
            .field("sample", &self.sample)
            .field("randomize_order", &self.randomize_order)
            .field("on_timeline_start", &self.on_timeline_start.is_some())
            .field("on_timeline_finish", &self.on_timeline_finish.is_some())
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_content_and_controls() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("html").param("stimulus", json!("A")))
            .push(TimelineDescription::default().push(TrialDescription::new("html")))
            .repetitions(3)
            .randomize_order(true)
            .param("font", json!("serif"));

        assert_eq!(desc.timeline.len(), 2);
        assert!(desc.timeline[0].is_trial());
        assert!(!desc.timeline[1].is_trial());
        assert_eq!(desc.repetitions, Some(3));
        assert!(desc.randomize_order);
        assert!(desc.parameters.contains("font"));
    }

    #[test]
    fn infallible_callbacks_are_wrapped() {
        let desc = TimelineDescription::default()
            .conditional_function(|| false)
            .loop_function(|results| results.len() < 3);
        let conditional = desc.conditional_function.unwrap();
        assert!(!conditional().unwrap());
        let looping = desc.loop_function.unwrap();
        assert!(looping(&[json!(1)]).unwrap());
        assert!(!looping(&[json!(1), json!(2), json!(3)]).unwrap());
    }

    #[test]
    fn built_in_names_are_recognized() {
        for name in BUILT_IN_PARAMETERS {
            assert!(is_built_in_parameter(name));
        }
        assert!(!is_built_in_parameter("stimulus"));
    }

    #[test]
    fn sample_constructors_fill_options() {
        let sample = SampleDescription::with_replacement(4).weights(vec![1.0, 3.0]);
        assert_eq!(sample.sample_type, "with-replacement");
        assert_eq!(sample.options.size, Some(4));
        assert_eq!(sample.options.weights, Some(vec![1.0, 3.0]));

        let groups = SampleDescription::alternate_groups(vec![vec![0], vec![1]], true);
        assert_eq!(groups.options.groups, Some(vec![vec![0], vec![1]]));
        assert!(groups.options.randomize_group_order);

        let custom = SampleDescription::custom(|order| order.iter().rev().copied().collect());
        let f = custom.custom.unwrap();
        assert_eq!(f(&[0, 1, 2]), vec![2, 1, 0]);
    }

    #[test]
    fn debug_output_hides_closures() {
        let desc = TimelineDescription::default().conditional_function(|| true);
        let rendered = format!("{desc:?}");
        assert!(rendered.contains("conditional_function: true"));
    }
}
