//! Internal nodes: expansion, sequential child runs, repetition and looping,
//! and the pause/abort barrier between children.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;
use trellis_types::{NodeStatus, ParameterValue, Parameters, Result, TrellisError, VariableSet};

use crate::description::TimelineDescription;
use crate::environment::Environment;
use crate::events::TimelineEvent;
use crate::node::{Node, NodeBase};
use crate::progress::{naive_trial_count, progress_fraction};
use crate::resolver::{resolve_parameter, resolve_variable, ResolveOptions};
use crate::sampling::variable_set_order;
use crate::sync::lock;
use crate::trial::TrialNode;

struct TimelineState {
    status: NodeStatus,
    started: bool,
    /// Children of the current pass only.
    children: Vec<Node>,
    current_child: Option<usize>,
    /// Set bound to the current (or last) child; this timeline's own scope.
    current_variables: Option<Arc<VariableSet>>,
    abort_requested: bool,
    /// Every leaf result gathered across all passes, in order.
    result_history: Vec<Value>,
    /// Completed trials of children replaced by later passes.
    retired_completed_trials: usize,
    instantiated_children: usize,
    passes: usize,
}

enum Settlement {
    Completed,
    Skipped,
    Aborted,
}

pub struct TimelineNode {
    pub(crate) base: NodeBase,
    description: Arc<TimelineDescription>,
    state: Mutex<TimelineState>,
    resumed: Notify,
}

impl TimelineNode {
    /// Build a root timeline. Nothing is expanded until [`TimelineNode::run`].
    pub fn new(description: impl Into<TimelineDescription>, env: Environment) -> Arc<Self> {
        Self::with_base(Arc::new(description.into()), NodeBase::root(env))
    }

    pub(crate) fn with_base(description: Arc<TimelineDescription>, base: NodeBase) -> Arc<Self> {
        Arc::new(Self {
            base,
            description,
            state: Mutex::new(TimelineState {
                status: NodeStatus::Pending,
                started: false,
                children: Vec::new(),
                current_child: None,
                current_variables: None,
                abort_requested: false,
                result_history: Vec::new(),
                retired_completed_trials: 0,
                instantiated_children: 0,
                passes: 0,
            }),
            resumed: Notify::new(),
        })
    }

    // -- accessors ----------------------------------------------------------

    pub fn index(&self) -> usize {
        self.base.index
    }

    pub fn depth(&self) -> usize {
        self.base.depth
    }

    pub fn description(&self) -> &TimelineDescription {
        &self.description
    }

    /// Parameters this timeline passes down to its descendants.
    pub fn parameters(&self) -> &Parameters {
        &self.description.parameters
    }

    pub fn status(&self) -> NodeStatus {
        lock(&self.state).status
    }

    /// Children of the current (or last) pass.
    pub fn children(&self) -> Vec<Node> {
        lock(&self.state).children.clone()
    }

    pub fn current_child_index(&self) -> Option<usize> {
        lock(&self.state).current_child
    }

    /// Children created across every pass so far.
    pub fn instantiated_child_count(&self) -> usize {
        lock(&self.state).instantiated_children
    }

    /// Passes started so far.
    pub fn passes(&self) -> usize {
        lock(&self.state).passes
    }

    /// Every leaf result gathered so far, across all passes. This is what the
    /// loop function sees.
    pub fn result_history(&self) -> Vec<Value> {
        lock(&self.state).result_history.clone()
    }

    pub fn get_parameter_value(&self, name: &str, options: ResolveOptions) -> Option<ParameterValue> {
        let local = lock(&self.state).current_variables.clone();
        resolve_parameter(
            &self.base,
            &self.description.parameters,
            local.as_deref(),
            name,
            options,
        )
    }

    pub fn parameter(&self, name: &str) -> Option<Value> {
        self.get_parameter_value(name, ResolveOptions::default())?
            .into_literal()
    }

    pub fn evaluate_timeline_variable(&self, name: &str) -> Option<Value> {
        let local = lock(&self.state).current_variables.clone();
        resolve_variable(&self.base, local.as_deref(), name)
    }

    // -- run ----------------------------------------------------------------

    /// Run every pass to settlement. Configuration and callback errors reject
    /// the run and leave the timeline aborted.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.started {
                return Err(TrellisError::InvalidState {
                    index: self.base.index,
                    status: state.status,
                });
            }
            if state.status == NodeStatus::Aborted {
                return Ok(());
            }
            state.started = true;
        }

        let outcome = self.execute().await;
        let status = match &outcome {
            Ok(Settlement::Completed) => NodeStatus::Completed,
            Ok(Settlement::Skipped) => NodeStatus::Skipped,
            Ok(Settlement::Aborted) | Err(_) => NodeStatus::Aborted,
        };
        lock(&self.state).status = status;

        let (depth, index) = (self.base.depth, self.base.index);
        match &outcome {
            Ok(Settlement::Skipped) => {
                self.base
                    .env
                    .events()
                    .emit(TimelineEvent::TimelineSkipped { depth, index });
                tracing::debug!(depth, index, "Timeline skipped by conditional function");
            }
            Ok(_) => {
                self.base.env.events().emit(TimelineEvent::TimelineFinished {
                    depth,
                    index,
                    status,
                });
                tracing::debug!(depth, index, %status, "Timeline finished");
            }
            Err(err) => {
                self.base.env.events().emit(TimelineEvent::TimelineFinished {
                    depth,
                    index,
                    status,
                });
                tracing::error!(depth, index, error = %err, "Timeline failed");
            }
        }
        outcome.map(|_| ())
    }

    /// Repetitions wrap the loop function: every repetition runs passes until
    /// the loop function declines another one.
    async fn execute(self: &Arc<Self>) -> Result<Settlement> {
        let repetitions = self.description.repetitions.unwrap_or(1);
        let mut pass = 0;
        for _ in 0..repetitions {
            loop {
                if lock(&self.state).abort_requested {
                    return Ok(Settlement::Aborted);
                }
                if !self.evaluate_conditional()? {
                    return Ok(if pass == 0 {
                        Settlement::Skipped
                    } else {
                        Settlement::Completed
                    });
                }
                if pass == 0 {
                    self.start();
                }
                if !self.run_pass(pass).await? {
                    return Ok(Settlement::Aborted);
                }
                pass += 1;
                if !self.evaluate_loop()? {
                    break;
                }
            }
        }
        if pass == 0 {
            self.start();
        }
        Ok(Settlement::Completed)
    }

    fn start(&self) {
        {
            let mut state = lock(&self.state);
            if state.status == NodeStatus::Pending {
                state.status = NodeStatus::Running;
            }
        }
        let (depth, index) = (self.base.depth, self.base.index);
        self.base
            .env
            .events()
            .emit(TimelineEvent::TimelineStarted { depth, index });
        tracing::debug!(depth, index, "Timeline started");
    }

    fn evaluate_conditional(&self) -> Result<bool> {
        match &self.description.conditional_function {
            Some(f) => f(),
            None => Ok(true),
        }
    }

    fn evaluate_loop(&self) -> Result<bool> {
        match &self.description.loop_function {
            Some(f) => {
                let history = self.result_history();
                f(&history)
            }
            None => Ok(false),
        }
    }

    /// Run one pass. Returns `false` if an abort cut it short.
    async fn run_pass(self: &Arc<Self>, pass: usize) -> Result<bool> {
        if let Some(f) = &self.description.on_timeline_start {
            f()?;
        }

        let env = &self.base.env;
        let order = variable_set_order(&self.description, env.sampler(), env.randomizer())?;
        let children = self.instantiate(&order);

        let previous = lock(&self.state).children.clone();
        let retired: usize = previous.iter().map(Node::completed_trial_count).sum();
        {
            let mut state = lock(&self.state);
            state.children = children.clone();
            state.current_child = None;
            state.retired_completed_trials += retired;
            state.instantiated_children += children.len();
            state.passes = pass + 1;
        }
        env.events().emit(TimelineEvent::RepetitionStarted {
            depth: self.base.depth,
            index: self.base.index,
            pass,
            child_count: children.len(),
        });
        tracing::debug!(
            depth = self.base.depth,
            index = self.base.index,
            pass,
            children = children.len(),
            "Timeline pass started"
        );

        for (i, child) in children.iter().enumerate() {
            if !self.wait_while_paused().await {
                for rest in &children[i..] {
                    rest.cancel_pending();
                }
                return Ok(false);
            }
            {
                let mut state = lock(&self.state);
                state.current_child = Some(i);
                state.current_variables = child.bound_variables();
            }
            child.run().await?;
            let results = child.collected_results();
            lock(&self.state).result_history.extend(results);
        }

        if lock(&self.state).abort_requested {
            return Ok(false);
        }
        env.events().emit(TimelineEvent::RepetitionFinished {
            depth: self.base.depth,
            index: self.base.index,
            pass,
        });
        if let Some(f) = &self.description.on_timeline_finish {
            f()?;
        }
        Ok(true)
    }

    /// One child per (variable set, content item) pair, indexed sequentially.
    fn instantiate(self: &Arc<Self>, order: &[Option<usize>]) -> Vec<Node> {
        let parent = Arc::downgrade(self);
        let sets = self.description.timeline_variables.as_deref().unwrap_or(&[]);
        let mut children = Vec::with_capacity(order.len() * self.description.timeline.len());
        for slot in order {
            let variables = slot.and_then(|i| sets.get(i)).cloned().map(Arc::new);
            for item in &self.description.timeline {
                let base = NodeBase {
                    index: children.len(),
                    depth: self.base.depth + 1,
                    parent: parent.clone(),
                    variables: variables.clone(),
                    env: self.base.env.clone(),
                };
                children.push(Node::from_description(item, base));
            }
        }
        children
    }

    /// Block while paused. Returns `false` once an abort has been requested.
    async fn wait_while_paused(&self) -> bool {
        loop {
            let notified = self.resumed.notified();
            {
                let state = lock(&self.state);
                if state.abort_requested {
                    return false;
                }
                if state.status != NodeStatus::Paused {
                    return true;
                }
            }
            notified.await;
        }
    }

    // -- control ------------------------------------------------------------

    fn active_child(&self) -> Option<Node> {
        let state = lock(&self.state);
        state
            .current_child
            .and_then(|i| state.children.get(i))
            .cloned()
    }

    /// Hold the next child start until [`TimelineNode::resume`]. The active
    /// child is paused too.
    pub fn pause(&self) {
        {
            let mut state = lock(&self.state);
            if state.status != NodeStatus::Running {
                return;
            }
            state.status = NodeStatus::Paused;
        }
        if let Some(child) = self.active_child() {
            child.pause();
        }
        let (depth, index) = (self.base.depth, self.base.index);
        self.base
            .env
            .events()
            .emit(TimelineEvent::Paused { depth, index });
        tracing::debug!(depth, index, "Timeline paused");
    }

    pub fn resume(&self) {
        {
            let mut state = lock(&self.state);
            if state.status != NodeStatus::Paused {
                return;
            }
            state.status = NodeStatus::Running;
        }
        if let Some(child) = self.active_child() {
            child.resume();
        }
        self.resumed.notify_waiters();
        let (depth, index) = (self.base.depth, self.base.index);
        self.base
            .env
            .events()
            .emit(TimelineEvent::Resumed { depth, index });
        tracing::debug!(depth, index, "Timeline resumed");
    }

    /// Stop starting children. The active leaf settles normally and the
    /// timeline finishes as aborted. No-op before the run or once settled.
    pub fn abort(&self) {
        {
            let mut state = lock(&self.state);
            if state.status == NodeStatus::Pending
                || state.status.is_terminal()
                || state.abort_requested
            {
                return;
            }
            state.abort_requested = true;
        }
        if let Some(child) = self.active_child() {
            if !child.cancel_pending() {
                child.abort();
            }
        }
        self.resumed.notify_waiters();
        let (depth, index) = (self.base.depth, self.base.index);
        self.base
            .env
            .events()
            .emit(TimelineEvent::AbortRequested { depth, index });
        tracing::warn!(depth, index, "Timeline abort requested");
    }

    pub(crate) fn cancel_pending(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status == NodeStatus::Pending && !state.started {
            state.status = NodeStatus::Aborted;
            true
        } else {
            false
        }
    }

    // -- results and progress -----------------------------------------------

    /// Leaf results of the current children, in child order.
    pub fn results(&self) -> Vec<Value> {
        self.children().iter().flat_map(Node::results).collect()
    }

    pub(crate) fn completed_trial_count(&self) -> usize {
        let (retired, children) = {
            let state = lock(&self.state);
            (state.retired_completed_trials, state.children.clone())
        };
        retired
            + children
                .iter()
                .map(Node::completed_trial_count)
                .sum::<usize>()
    }

    /// Static estimate of the leaf invocations this timeline performs.
    pub fn naive_trial_count(&self) -> usize {
        naive_trial_count(&self.description)
    }

    /// Completed trials over the naive trial count, clamped to `[0, 1]`.
    pub fn progress(&self) -> f64 {
        progress_fraction(
            self.completed_trial_count(),
            self.naive_trial_count(),
            self.status().is_terminal(),
        )
    }

    /// The trial currently in flight anywhere below this timeline.
    pub fn current_trial(&self) -> Option<Arc<TrialNode>> {
        match self.active_child()? {
            Node::Trial(trial) => trial.status().is_active().then_some(trial),
            Node::Timeline(timeline) => timeline.current_trial(),
        }
    }
}
