//! Fire-and-forget pipeline notifications over a broadcast channel.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::PipelineError;
use crate::models::ProcessingOutcome;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum PipelineEvent {
    #[serde(rename = "processing:started")]
    ProcessingStarted { url: String },
    #[serde(rename = "processing:progress")]
    ProcessingProgress {
        url: String,
        /// Fraction of the pipeline completed, in `[0, 1]`.
        progress: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "processing:completed")]
    ProcessingCompleted {
        url: String,
        result: Box<ProcessingOutcome>,
    },
    #[serde(rename = "processing:failed")]
    ProcessingFailed { url: String, error: PipelineError },
    #[serde(rename = "batch:started")]
    BatchStarted { count: usize },
    #[serde(rename = "batch:completed")]
    BatchCompleted { results: Vec<BatchItemSummary> },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ProcessingStarted { .. } => "processing:started",
            PipelineEvent::ProcessingProgress { .. } => "processing:progress",
            PipelineEvent::ProcessingCompleted { .. } => "processing:completed",
            PipelineEvent::ProcessingFailed { .. } => "processing:failed",
            PipelineEvent::BatchStarted { .. } => "batch:started",
            PipelineEvent::BatchCompleted { .. } => "batch:completed",
        }
    }
}

/// One line of a `batch:completed` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItemSummary {
    pub url: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Publishes [`PipelineEvent`]s to any number of subscribers.
///
/// Publishing never fails and never blocks: with no subscriber the event is
/// dropped, and a lagging subscriber loses the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        tracing::debug!(event = event.name(), "Publishing pipeline event");
        // Err only means there are no subscribers.
        let _ = self.sender.send(event);
    }
}
