//! The closed set of node kinds and the state every node shares.

use std::sync::{Arc, Weak};

use futures_core::future::BoxFuture;
use serde_json::Value;
use trellis_types::{NodeStatus, ParameterValue, Result, VariableSet};

use crate::description::NodeDescription;
use crate::environment::Environment;
use crate::resolver::ResolveOptions;
use crate::timeline::TimelineNode;
use crate::trial::TrialNode;

/// Identity and scope shared by trials and timelines.
pub(crate) struct NodeBase {
    pub(crate) index: usize,
    pub(crate) depth: usize,
    pub(crate) parent: Weak<TimelineNode>,
    /// The variable set bound for the pass that created this node.
    pub(crate) variables: Option<Arc<VariableSet>>,
    pub(crate) env: Environment,
}

impl NodeBase {
    pub(crate) fn root(env: Environment) -> Self {
        Self {
            index: 0,
            depth: 0,
            parent: Weak::new(),
            variables: None,
            env,
        }
    }

    pub(crate) fn parent(&self) -> Option<Arc<TimelineNode>> {
        self.parent.upgrade()
    }
}

/// A child of a timeline: either a leaf trial or a nested timeline.
#[derive(Clone)]
pub enum Node {
    Trial(Arc<TrialNode>),
    Timeline(Arc<TimelineNode>),
}

impl Node {
    pub(crate) fn from_description(description: &NodeDescription, base: NodeBase) -> Self {
        match description {
            NodeDescription::Trial(trial) => Node::Trial(TrialNode::new(trial.clone(), base)),
            NodeDescription::Timeline(timeline) => {
                Node::Timeline(TimelineNode::with_base(timeline.clone(), base))
            }
        }
    }

    /// Run the node to settlement.
    pub fn run(&self) -> BoxFuture<'static, Result<()>> {
        match self {
            Node::Trial(trial) => Box::pin(trial.clone().run()),
            Node::Timeline(timeline) => Box::pin(timeline.clone().run()),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Node::Trial(trial) => trial.index(),
            Node::Timeline(timeline) => timeline.index(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        match self {
            Node::Trial(trial) => trial.status(),
            Node::Timeline(timeline) => timeline.status(),
        }
    }

    pub fn pause(&self) {
        match self {
            Node::Trial(trial) => trial.pause(),
            Node::Timeline(timeline) => timeline.pause(),
        }
    }

    pub fn resume(&self) {
        match self {
            Node::Trial(trial) => trial.resume(),
            Node::Timeline(timeline) => timeline.resume(),
        }
    }

    pub fn abort(&self) {
        match self {
            Node::Trial(trial) => trial.abort(),
            Node::Timeline(timeline) => timeline.abort(),
        }
    }

    /// Leaf results of the current children (or the trial's own result).
    pub fn results(&self) -> Vec<Value> {
        match self {
            Node::Trial(trial) => trial.result().into_iter().collect(),
            Node::Timeline(timeline) => timeline.results(),
        }
    }

    pub fn get_parameter_value(&self, name: &str, options: ResolveOptions) -> Option<ParameterValue> {
        match self {
            Node::Trial(trial) => trial.get_parameter_value(name, options),
            Node::Timeline(timeline) => timeline.get_parameter_value(name, options),
        }
    }

    pub fn evaluate_timeline_variable(&self, name: &str) -> Option<Value> {
        match self {
            Node::Trial(trial) => trial.evaluate_timeline_variable(name),
            Node::Timeline(timeline) => timeline.evaluate_timeline_variable(name),
        }
    }

    pub fn as_trial(&self) -> Option<&Arc<TrialNode>> {
        match self {
            Node::Trial(trial) => Some(trial),
            Node::Timeline(_) => None,
        }
    }

    pub fn as_timeline(&self) -> Option<&Arc<TimelineNode>> {
        match self {
            Node::Timeline(timeline) => Some(timeline),
            Node::Trial(_) => None,
        }
    }

    /// Every leaf result this node contributes to its parent's loop history.
    pub(crate) fn collected_results(&self) -> Vec<Value> {
        match self {
            Node::Trial(trial) => trial.result().into_iter().collect(),
            Node::Timeline(timeline) => timeline.result_history(),
        }
    }

    pub(crate) fn completed_trial_count(&self) -> usize {
        match self {
            Node::Trial(trial) => usize::from(trial.status() == NodeStatus::Completed),
            Node::Timeline(timeline) => timeline.completed_trial_count(),
        }
    }

    /// The variable set selected by the parent pass that created this node.
    pub(crate) fn bound_variables(&self) -> Option<Arc<VariableSet>> {
        match self {
            Node::Trial(trial) => trial.base.variables.clone(),
            Node::Timeline(timeline) => timeline.base.variables.clone(),
        }
    }

    /// Abort a node that has not started. Returns `false` if it already had.
    pub(crate) fn cancel_pending(&self) -> bool {
        match self {
            Node::Trial(trial) => trial.cancel_pending(),
            Node::Timeline(timeline) => timeline.cancel_pending(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Node::Trial(_) => "Trial",
            Node::Timeline(_) => "Timeline",
        };
        f.debug_struct(kind)
            .field("index", &self.index())
            .field("status", &self.status())
            .finish()
    }
}
