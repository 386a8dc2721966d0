//! Progress events and the default sinks.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::traits::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Extraction,
    Chunking,
    Embedding,
    Storage,
    Complete,
    Failed,
}

/// One progress notification for a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub source_id: String,
    pub stage: ProgressStage,
    /// 0–100.
    pub percentage: u8,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(
        source_id: impl Into<String>,
        stage: ProgressStage,
        percentage: u8,
        current_step: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            stage,
            percentage: percentage.min(100),
            current_step: current_step.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Discards every event.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn push(&self, _event: ProgressEvent) {}
}

/// Logs events through `tracing`.
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn push(&self, event: ProgressEvent) {
        match event.stage {
            ProgressStage::Complete | ProgressStage::Failed => info!(
                source_id = %event.source_id,
                stage = ?event.stage,
                "{}",
                event.current_step
            ),
            _ => debug!(
                source_id = %event.source_id,
                stage = ?event.stage,
                percentage = event.percentage,
                "{}",
                event.current_step
            ),
        }
    }
}

/// Fans events out to any number of subscribers.
///
/// Events sent while nobody is subscribed are dropped.
pub struct ChannelProgressSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl ProgressSink for ChannelProgressSink {
    fn push(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_and_tolerates_no_subscribers() {
        let sink = ChannelProgressSink::new(8);
        sink.push(ProgressEvent::new("s", ProgressStage::Extraction, 0, "dropped"));

        let mut rx = sink.subscribe();
        sink.push(ProgressEvent::new("s", ProgressStage::Embedding, 150, "batch 1/2"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, ProgressStage::Embedding);
        assert_eq!(event.percentage, 100);
        assert_eq!(event.current_step, "batch 1/2");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = ProgressEvent::new("s", ProgressStage::Storage, 80, "storing")
            .with_details(serde_json::json!({"stored": 3}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "storage");
        assert_eq!(json["currentStep"], "storing");
        assert_eq!(json["details"]["stored"], 3);
    }
}
