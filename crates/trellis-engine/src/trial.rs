//! Leaf nodes: one executor call per activation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use trellis_types::{NodeStatus, ParameterValue, Result, TrellisError, TrialRequest};

use crate::description::{is_built_in_parameter, TrialDescription};
use crate::events::TimelineEvent;
use crate::node::NodeBase;
use crate::resolver::{resolve_parameter, resolve_variable, ResolveOptions};
use crate::sync::lock;

struct TrialState {
    status: NodeStatus,
    result: Option<Value>,
    abort_requested: bool,
}

pub struct TrialNode {
    pub(crate) base: NodeBase,
    description: Arc<TrialDescription>,
    state: Mutex<TrialState>,
}

impl TrialNode {
    pub(crate) fn new(description: Arc<TrialDescription>, base: NodeBase) -> Arc<Self> {
        Arc::new(Self {
            base,
            description,
            state: Mutex::new(TrialState {
                status: NodeStatus::Pending,
                result: None,
                abort_requested: false,
            }),
        })
    }

    pub fn index(&self) -> usize {
        self.base.index
    }

    pub fn trial_type(&self) -> &str {
        &self.description.trial_type
    }

    pub fn description(&self) -> &TrialDescription {
        &self.description
    }

    pub fn status(&self) -> NodeStatus {
        lock(&self.state).status
    }

    /// The executor's payload, once the trial has completed.
    pub fn result(&self) -> Option<Value> {
        lock(&self.state).result.clone()
    }

    pub fn get_parameter_value(&self, name: &str, options: ResolveOptions) -> Option<ParameterValue> {
        resolve_parameter(&self.base, &self.description.parameters, None, name, options)
    }

    /// Resolve with default options and return the value.
    pub fn parameter(&self, name: &str) -> Option<Value> {
        self.get_parameter_value(name, ResolveOptions::default())?
            .into_literal()
    }

    pub fn evaluate_timeline_variable(&self, name: &str) -> Option<Value> {
        resolve_variable(&self.base, None, name)
    }

    /// The request handed to the executor: every parameter visible to this
    /// trial, own names first, then inherited ones from the nearest ancestor up.
    pub fn request(&self) -> TrialRequest {
        let mut seen = HashSet::new();
        let mut names: Vec<String> = Vec::new();
        let mut collect = |source: &trellis_types::Parameters| {
            for name in source.names() {
                if !is_built_in_parameter(name) && seen.insert(name.to_string()) {
                    names.push(name.to_string());
                }
            }
        };
        collect(&self.description.parameters);
        let mut ancestor = self.base.parent();
        while let Some(timeline) = ancestor {
            collect(timeline.parameters());
            ancestor = timeline.base.parent();
        }

        let parameters: Map<String, Value> = names
            .into_iter()
            .filter_map(|name| self.parameter(&name).map(|value| (name, value)))
            .collect();
        TrialRequest {
            index: self.base.index,
            trial_type: self.description.trial_type.clone(),
            parameters,
        }
    }

    /// Invoke the executor once and settle. A trial aborted before it started
    /// settles immediately without calling the executor.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match state.status {
                NodeStatus::Pending => state.status = NodeStatus::Running,
                NodeStatus::Aborted => return Ok(()),
                status => {
                    return Err(TrellisError::InvalidState {
                        index: self.base.index,
                        status,
                    })
                }
            }
        }

        let env = &self.base.env;
        let request = self.request();
        env.events().emit(TimelineEvent::TrialStarted {
            depth: self.base.depth,
            index: self.base.index,
            trial_type: self.description.trial_type.clone(),
        });
        tracing::debug!(
            depth = self.base.depth,
            index = self.base.index,
            trial_type = %self.description.trial_type,
            "Trial started"
        );

        let outcome = env.executor().execute(request).await;

        let status = {
            let mut state = lock(&self.state);
            state.status = match (&outcome, state.abort_requested) {
                (Ok(_), true) | (Err(_), _) => NodeStatus::Aborted,
                (Ok(_), false) => NodeStatus::Completed,
            };
            if let (Ok(payload), NodeStatus::Completed) = (&outcome, state.status) {
                state.result = payload.clone();
            }
            state.status
        };
        env.events().emit(TimelineEvent::TrialFinished {
            depth: self.base.depth,
            index: self.base.index,
            trial_type: self.description.trial_type.clone(),
            status,
        });

        outcome.map(|_| ()).map_err(|err| {
            tracing::error!(
                index = self.base.index,
                trial_type = %self.description.trial_type,
                error = %err,
                "Trial executor failed"
            );
            match err {
                TrellisError::Other(message) => TrellisError::TrialFailed {
                    index: self.base.index,
                    trial_type: self.description.trial_type.clone(),
                    message,
                },
                other => other,
            }
        })
    }

    /// Status-only: the in-flight executor call keeps going.
    pub fn pause(&self) {
        let mut state = lock(&self.state);
        if state.status == NodeStatus::Running {
            state.status = NodeStatus::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = lock(&self.state);
        if state.status == NodeStatus::Paused {
            state.status = NodeStatus::Running;
        }
    }

    /// Pending trials abort at once; running or paused ones abort when the
    /// executor settles. Settled trials are left alone.
    pub fn abort(&self) {
        let mut state = lock(&self.state);
        match state.status {
            NodeStatus::Pending => state.status = NodeStatus::Aborted,
            NodeStatus::Running | NodeStatus::Paused => state.abort_requested = true,
            _ => {}
        }
    }

    pub(crate) fn cancel_pending(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status == NodeStatus::Pending {
            state.status = NodeStatus::Aborted;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::executor::ScriptedExecutor;
    use serde_json::json;

    fn trial(description: TrialDescription, executor: Arc<ScriptedExecutor>) -> Arc<TrialNode> {
        TrialNode::new(
            Arc::new(description),
            NodeBase::root(Environment::new(executor)),
        )
    }

    #[tokio::test]
    async fn run_captures_result() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Some(json!({"rt": 310}))]));
        let node = trial(
            TrialDescription::new("html-keyboard-response").param("stimulus", json!("X")),
            executor.clone(),
        );

        node.clone().run().await.unwrap();

        assert_eq!(node.status(), NodeStatus::Completed);
        assert_eq!(node.result(), Some(json!({"rt": 310})));
        assert_eq!(executor.call_count(), 1);
        assert_eq!(executor.requests()[0].parameter("stimulus"), Some(&json!("X")));
    }

    #[tokio::test]
    async fn aborted_before_start_never_executes() {
        let executor = Arc::new(ScriptedExecutor::echo());
        let node = trial(TrialDescription::new("html"), executor.clone());

        node.abort();
        node.clone().run().await.unwrap();

        assert_eq!(node.status(), NodeStatus::Aborted);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn rerun_is_rejected() {
        let node = trial(TrialDescription::new("html"), Arc::new(ScriptedExecutor::echo()));
        node.clone().run().await.unwrap();

        let err = node.clone().run().await.unwrap_err();
        assert!(matches!(
            err,
            TrellisError::InvalidState {
                status: NodeStatus::Completed,
                ..
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn pause_and_abort_are_noops_when_settled_or_pending() {
        let node = trial(TrialDescription::new("html"), Arc::new(ScriptedExecutor::echo()));
        node.pause();
        assert_eq!(node.status(), NodeStatus::Pending);
        node.resume();
        assert_eq!(node.status(), NodeStatus::Pending);
    }

    #[test]
    fn function_parameters_are_evaluated_on_request() {
        let node = trial(
            TrialDescription::new("html")
                .param("stimulus", ParameterValue::function(|| json!("lazy")))
                .param("timeline", json!("ignored")),
            Arc::new(ScriptedExecutor::echo()),
        );
        let request = node.request();
        assert_eq!(request.parameter("stimulus"), Some(&json!("lazy")));
        assert!(request.parameter("timeline").is_none());
    }
}
