//! Timeline event system for observability.
//!
//! Emits [`TimelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, data recorders, UI, etc.) can follow a run
//! without coupling to the node internals.

use serde::{Deserialize, Serialize};
use trellis_types::NodeStatus;

/// Events emitted while a timeline runs. `depth` is the nesting level of the
/// emitting node (the root timeline is depth 0) and `index` its sibling index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimelineEvent {
    TimelineStarted {
        depth: usize,
        index: usize,
    },
    RepetitionStarted {
        depth: usize,
        index: usize,
        pass: usize,
        child_count: usize,
    },
    RepetitionFinished {
        depth: usize,
        index: usize,
        pass: usize,
    },
    TimelineFinished {
        depth: usize,
        index: usize,
        status: NodeStatus,
    },
    TimelineSkipped {
        depth: usize,
        index: usize,
    },
    TrialStarted {
        depth: usize,
        index: usize,
        trial_type: String,
    },
    TrialFinished {
        depth: usize,
        index: usize,
        trial_type: String,
        status: NodeStatus,
    },
    Paused {
        depth: usize,
        index: usize,
    },
    Resumed {
        depth: usize,
        index: usize,
    },
    AbortRequested {
        depth: usize,
        index: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<TimelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: TimelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TimelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(TimelineEvent::TrialStarted {
            depth: 1,
            index: 3,
            trial_type: "html-keyboard-response".into(),
        });

        match rx.recv().await.unwrap() {
            TimelineEvent::TrialStarted {
                depth,
                index,
                trial_type,
            } => {
                assert_eq!(depth, 1);
                assert_eq!(index, 3);
                assert_eq!(trial_type, "html-keyboard-response");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(TimelineEvent::Paused { depth: 0, index: 0 });

        assert_eq!(rx1.recv().await.unwrap(), rx2.recv().await.unwrap());
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(TimelineEvent::AbortRequested { depth: 0, index: 0 });
    }

    #[test]
    fn finished_event_serializes_status() {
        let event = TimelineEvent::TimelineFinished {
            depth: 0,
            index: 0,
            status: NodeStatus::Aborted,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["TimelineFinished"]["status"], "aborted");
    }
}
