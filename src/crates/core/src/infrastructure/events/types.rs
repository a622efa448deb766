use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Good,
    Warn,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistillEvent {
    /// Session status label changed (e.g. `running`, `paused (refusal)`).
    StatusChanged {
        status: String,
        timestamp: i64,
    },
    /// Countdown tick of a retry wait. `max` is `None` for unbounded retries.
    RetryProgress {
        reason: String,
        attempt: u32,
        max: Option<u32>,
        planned_ms: u64,
        remaining_ms: u64,
        last_error: String,
    },
    RetryCleared,
    /// Countdown tick of an inter-request spacing wait.
    AutoWaitProgress {
        planned_ms: u64,
        remaining_ms: u64,
    },
    AutoWaitCleared,
    SectionAdded {
        id: u64,
        title: String,
        estimated_tokens: u64,
    },
    SectionDeleted {
        id: u64,
    },
    /// User-facing notification.
    Notice {
        level: NoticeLevel,
        message: String,
    },
}
