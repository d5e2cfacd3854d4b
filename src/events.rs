use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress notification from the runner to the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    /// Emitted before each item and after a stop.
    #[serde(rename = "UPDATE_STATUS")]
    StatusUpdate { text: String },
    /// An item left the queue without being completed.
    #[serde(rename = "STUDENT_SKIPPED")]
    ItemSkipped { text: String },
    /// The queue transitioned to empty.
    BatchComplete,
    /// The batch halted on an unexpected error.
    RunFailed { text: String },
}

/// How the control surface should present a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl Notification {
    pub fn status(text: impl Into<String>) -> Self {
        Notification::StatusUpdate { text: text.into() }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Notification::StatusUpdate { .. } => Severity::Info,
            Notification::ItemSkipped { .. } => Severity::Warning,
            Notification::BatchComplete => Severity::Success,
            Notification::RunFailed { .. } => Severity::Error,
        }
    }

    /// Human-readable line for the surface.
    pub fn text(&self) -> String {
        match self {
            Notification::StatusUpdate { text }
            | Notification::ItemSkipped { text }
            | Notification::RunFailed { text } => text.clone(),
            Notification::BatchComplete => "All Assignments Done!".to_string(),
        }
    }

    /// Event name used when forwarding to a desktop frontend.
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::StatusUpdate { .. } => "batch:status",
            Notification::ItemSkipped { .. } => "batch:item_skipped",
            Notification::BatchComplete => "batch:complete",
            Notification::RunFailed { .. } => "batch:failed",
        }
    }
}

/// Receives notifications. Delivery is best-effort: implementations swallow
/// failures so a closed surface never affects the batch.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Discards everything.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: &Notification) {}
}

/// Forwards notifications over an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiving end for the surface.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: &Notification) {
        if self.tx.send(notification.clone()).is_err() {
            tracing::debug!(event = notification.event_name(), "control surface gone, dropping notification");
        }
    }
}

#[cfg(feature = "tauri")]
impl<R: tauri::Runtime> NotificationSink for tauri::AppHandle<R> {
    fn notify(&self, notification: &Notification) {
        use tauri::Emitter;
        if let Err(e) = self.emit(notification.event_name(), notification) {
            tracing::debug!(error = %e, "failed to emit notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(Notification::status("Creating assignment 1 of 2")).unwrap();
        assert_eq!(json["type"], "UPDATE_STATUS");
        assert_eq!(json["text"], "Creating assignment 1 of 2");

        let json = serde_json::to_value(Notification::ItemSkipped { text: "x".into() }).unwrap();
        assert_eq!(json["type"], "STUDENT_SKIPPED");

        let json = serde_json::to_value(Notification::BatchComplete).unwrap();
        assert_eq!(json["type"], "BATCH_COMPLETE");

        let json = serde_json::to_value(Notification::RunFailed { text: "y".into() }).unwrap();
        assert_eq!(json["type"], "RUN_FAILED");
    }

    #[test]
    fn test_severity_separates_skips_from_failures() {
        assert_eq!(
            Notification::ItemSkipped { text: "a".into() }.severity(),
            Severity::Warning
        );
        assert_eq!(
            Notification::RunFailed { text: "b".into() }.severity(),
            Severity::Error
        );
        assert_eq!(Notification::BatchComplete.severity(), Severity::Success);
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.notify(&Notification::BatchComplete);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.notify(&Notification::status("hello"));
        assert_eq!(rx.recv().await, Some(Notification::status("hello")));
    }
}
