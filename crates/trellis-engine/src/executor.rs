//! Trial executor trait and built-in executors.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use trellis_types::{Result, TrialRequest};

use crate::sync::lock;

// ---------------------------------------------------------------------------
// TrialExecutor trait
// ---------------------------------------------------------------------------

/// Performs one trial and reports its result payload, if any.
///
/// The engine calls `execute` at most once per trial activation and suspends
/// the enclosing timeline until the returned future settles. Pause and abort
/// never cancel the future.
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    async fn execute(&self, trial: TrialRequest) -> Result<Option<Value>>;
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Returns queued payloads in order and records every request. Once the queue
/// is empty it echoes the request's parameters back as the payload.
pub struct ScriptedExecutor {
    results: std::sync::Mutex<VecDeque<Option<Value>>>,
    requests: std::sync::Mutex<Vec<TrialRequest>>,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<Option<Value>>) -> Self {
        Self {
            results: std::sync::Mutex::new(results.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// An executor that only echoes parameters.
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    pub fn requests(&self) -> Vec<TrialRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl TrialExecutor for ScriptedExecutor {
    async fn execute(&self, trial: TrialRequest) -> Result<Option<Value>> {
        let queued = lock(&self.results).pop_front();
        let result = queued.unwrap_or_else(|| Some(Value::Object(trial.parameters.clone())));
        lock(&self.requests).push(trial);
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// SimulatedExecutor
// ---------------------------------------------------------------------------

/// Stands in for a display host: waits `duration_ms` (trial parameter, default
/// zero) and reports what was shown.
pub struct SimulatedExecutor;

impl SimulatedExecutor {
    fn duration(trial: &TrialRequest) -> Duration {
        let millis = trial
            .parameter("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Duration::from_millis(millis)
    }
}

#[async_trait]
impl TrialExecutor for SimulatedExecutor {
    async fn execute(&self, trial: TrialRequest) -> Result<Option<Value>> {
        let duration = Self::duration(&trial);
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        tracing::debug!(
            trial = trial.index,
            trial_type = %trial.trial_type,
            rt_ms = duration.as_millis() as u64,
            "Simulated trial finished"
        );
        Ok(Some(json!({
            "trial_type": trial.trial_type,
            "trial_index": trial.index,
            "rt": duration.as_millis() as u64,
            "response": trial.parameter("response").cloned().unwrap_or(Value::Null),
            "parameters": trial.parameters,
        })))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
