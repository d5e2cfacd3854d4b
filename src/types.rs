use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter key holding the content topic searched in the attach sub-stage.
pub const PARAM_TOPIC: &str = "topic";

/// One unit of batch work: the entity to search for plus free-form parameters.
///
/// Items are immutable once queued. Equality is structural, which lets the
/// runner confirm that the head it pops is the item it just processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub identifier: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Attach a parameter (builder pattern).
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn topic(&self) -> Option<&str> {
        self.param(PARAM_TOPIC)
    }
}

/// Settings shared read-only by every item of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    /// Day-of-week label used in the assignment name.
    pub day: String,
    pub subject: String,
    /// `YYYY-MM-DD`
    pub start_date: String,
    /// `HH:MM`
    pub start_time: String,
    pub due_date: String,
    pub due_time: String,
    /// Run the optional content-attach sub-stage after creation.
    #[serde(default)]
    pub nugget_automation: bool,
}

/// Durable batch state. Survives page reloads; the only process-wide state.
///
/// `queue` holds exactly the items not yet completed or skipped, head first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub queue: Vec<WorkItem>,
    pub settings: Option<RunSettings>,
    pub total_count: usize,
    pub paused: bool,
}

impl BatchState {
    /// Whether `resume()` has anything to do.
    pub fn is_runnable(&self) -> bool {
        !self.paused && !self.queue.is_empty()
    }

    /// 1-based position of the queue head within the original batch.
    pub fn position(&self) -> usize {
        self.total_count.saturating_sub(self.queue.len()) + 1
    }
}

/// Result of processing one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Outcome {
    Completed,
    SkippedNotFound { reason: String },
    SkippedSubstepFailed { reason: String },
    Cancelled,
    Fatal { error: String },
}

impl Outcome {
    pub fn as_str(&self) -> &str {
        match self {
            Outcome::Completed => "completed",
            Outcome::SkippedNotFound { .. } => "skipped_not_found",
            Outcome::SkippedSubstepFailed { .. } => "skipped_substep_failed",
            Outcome::Cancelled => "cancelled",
            Outcome::Fatal { .. } => "fatal",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Outcome::SkippedNotFound { .. } | Outcome::SkippedSubstepFailed { .. }
        )
    }

    /// Whether the head item leaves the queue after this outcome.
    pub fn consumes_item(&self) -> bool {
        matches!(self, Outcome::Completed) || self.is_skip()
    }
}

/// What a single `resume()` entry did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeStatus {
    /// Paused or nothing queued.
    Idle,
    /// Another transaction is already running in this context.
    Busy,
    /// The page is not the listing the sequence starts from.
    WrongPage,
    /// One item was processed.
    Processed(Outcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_counts_from_one() {
        let state = BatchState {
            queue: vec![WorkItem::new("B"), WorkItem::new("C")],
            settings: None,
            total_count: 3,
            paused: false,
        };
        assert_eq!(state.position(), 2);
        assert!(state.is_runnable());
    }

    #[test]
    fn test_paused_state_is_not_runnable() {
        let state = BatchState {
            queue: vec![WorkItem::new("A")],
            paused: true,
            ..Default::default()
        };
        assert!(!state.is_runnable());
    }

    #[test]
    fn test_outcome_consumption() {
        assert!(Outcome::Completed.consumes_item());
        assert!(Outcome::SkippedNotFound { reason: "x".into() }.consumes_item());
        assert!(!Outcome::Cancelled.consumes_item());
        assert!(!Outcome::Fatal { error: "y".into() }.consumes_item());
    }

    #[test]
    fn test_settings_use_camel_case_keys() {
        let settings = RunSettings {
            start_date: "2026-10-20".into(),
            nugget_automation: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("startDate"));
        assert!(json.contains("nuggetAutomation"));
    }

    #[test]
    fn test_outcome_tagging() {
        let json = serde_json::to_value(Outcome::SkippedNotFound {
            reason: "no row".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "skippedNotFound");
        assert_eq!(json["reason"], "no row");
    }
}
