//! Build events and sinks.
//!
//! The engine and coordinator report progress as [`ExecutionEvent`]s through
//! an [`EventSink`]. Sinks are synchronous and must not block; the channel
//! sink hands events to an async consumer.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Events emitted while a build runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The build session has started.
    SessionStarted { units: usize, segments: usize },
    /// The build session has ended.
    SessionEnded { success: bool },
    /// A unit started building a task segment.
    UnitStarted { unit: String, segment: usize },
    UnitSucceeded { unit: String, segment: usize },
    UnitFailed {
        unit: String,
        segment: usize,
        error: String,
    },
    /// A unit was not attempted.
    UnitSkipped {
        unit: String,
        segment: usize,
        reason: String,
    },
    StepStarted {
        unit: String,
        step: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        phase: Option<String>,
    },
    StepSucceeded { unit: String, step: String },
    StepFailed {
        unit: String,
        step: String,
        error: String,
    },
    /// A lifecycle step whose preconditions did not hold.
    StepSkipped {
        unit: String,
        step: String,
        reason: String,
    },
    /// Forked executions of a step are about to run.
    ForkStarted { unit: String, step: String },
    ForkSucceeded { unit: String, step: String },
    ForkFailed {
        unit: String,
        step: String,
        error: String,
    },
    /// Forked executions started on one unit.
    ForkedUnitStarted {
        unit: String,
        step: String,
        forked_unit: String,
    },
    ForkedUnitSucceeded {
        unit: String,
        step: String,
        forked_unit: String,
    },
    ForkedUnitFailed {
        unit: String,
        step: String,
        forked_unit: String,
        error: String,
    },
}

impl ExecutionEvent {
    /// Snake-case name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::SessionStarted { .. } => "session_started",
            ExecutionEvent::SessionEnded { .. } => "session_ended",
            ExecutionEvent::UnitStarted { .. } => "unit_started",
            ExecutionEvent::UnitSucceeded { .. } => "unit_succeeded",
            ExecutionEvent::UnitFailed { .. } => "unit_failed",
            ExecutionEvent::UnitSkipped { .. } => "unit_skipped",
            ExecutionEvent::StepStarted { .. } => "step_started",
            ExecutionEvent::StepSucceeded { .. } => "step_succeeded",
            ExecutionEvent::StepFailed { .. } => "step_failed",
            ExecutionEvent::StepSkipped { .. } => "step_skipped",
            ExecutionEvent::ForkStarted { .. } => "fork_started",
            ExecutionEvent::ForkSucceeded { .. } => "fork_succeeded",
            ExecutionEvent::ForkFailed { .. } => "fork_failed",
            ExecutionEvent::ForkedUnitStarted { .. } => "forked_unit_started",
            ExecutionEvent::ForkedUnitSucceeded { .. } => "forked_unit_succeeded",
            ExecutionEvent::ForkedUnitFailed { .. } => "forked_unit_failed",
        }
    }
}

/// Receives build events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ExecutionEvent) {}
}

/// Forwards events to an unbounded tokio channel.
///
/// Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ExecutionEvent) {
        self.tx.send(event).ok();
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ExecutionEvent) {
        match &event {
            ExecutionEvent::SessionStarted { units, segments } => {
                tracing::info!(units, segments, "Build started");
            }
            ExecutionEvent::SessionEnded { success } => {
                tracing::info!(success, "Build finished");
            }
            ExecutionEvent::UnitStarted { unit, segment } => {
                tracing::info!(unit = %unit, segment, "Building unit");
            }
            ExecutionEvent::UnitSucceeded { unit, .. } => {
                tracing::debug!(unit = %unit, "Unit succeeded");
            }
            ExecutionEvent::UnitFailed { unit, error, .. } => {
                tracing::error!(unit = %unit, error = %error, "Unit failed");
            }
            ExecutionEvent::UnitSkipped { unit, reason, .. } => {
                tracing::warn!(unit = %unit, reason = %reason, "Unit skipped");
            }
            ExecutionEvent::StepStarted { unit, step, phase } => {
                tracing::info!(unit = %unit, step = %step, phase = ?phase, "Running step");
            }
            ExecutionEvent::StepSucceeded { unit, step } => {
                tracing::debug!(unit = %unit, step = %step, "Step succeeded");
            }
            ExecutionEvent::StepFailed { unit, step, error } => {
                tracing::error!(unit = %unit, step = %step, error = %error, "Step failed");
            }
            ExecutionEvent::StepSkipped { unit, step, reason } => {
                tracing::warn!(unit = %unit, step = %step, reason = %reason, "Step skipped");
            }
            ExecutionEvent::ForkFailed { unit, step, error } => {
                tracing::error!(unit = %unit, step = %step, error = %error, "Fork failed");
            }
            ExecutionEvent::ForkedUnitFailed {
                step,
                forked_unit,
                error,
                ..
            } => {
                tracing::error!(unit = %forked_unit, step = %step, error = %error, "Forked unit failed");
            }
            other => tracing::debug!(event = other.kind(), "Fork progress"),
        }
    }
}

/// Fans every event out to several sinks.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for CompositeSink {
    fn emit(&self, event: ExecutionEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event kinds in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ExecutionEvent::kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ExecutionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> ExecutionEvent {
        ExecutionEvent::StepStarted {
            unit: "app".into(),
            step: "compiler:compile (default-compile)".into(),
            phase: Some("compile".into()),
        }
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&started()).unwrap();
        assert!(json.contains("\"type\":\"step_started\""));
        assert!(json.contains("\"phase\":\"compile\""));

        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, started());
    }

    #[test]
    fn test_event_kind_matches_tag() {
        let event = ExecutionEvent::ForkedUnitFailed {
            unit: "root".into(),
            step: "source:jar".into(),
            forked_unit: "lib".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(ExecutionEvent::SessionStarted {
            units: 2,
            segments: 1,
        });
        sink.emit(started());
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().kind(), "session_started");
        assert_eq!(rx.recv().await.unwrap().kind(), "step_started");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(started());
    }

    #[test]
    fn test_composite_sink_fans_out() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let composite = CompositeSink::new()
            .with(first.clone())
            .with(Arc::new(TracingSink))
            .with(second.clone());
        assert_eq!(composite.len(), 3);

        composite.emit(started());
        assert_eq!(first.kinds(), ["step_started"]);
        assert_eq!(second.events(), vec![started()]);
    }
}
