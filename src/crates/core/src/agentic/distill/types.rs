use super::anomaly::{DEFAULT_MIN_SECTION_CHARS, DEFAULT_SIMILARITY_THRESHOLD};
use super::policy::RetryPolicy;
use crate::infrastructure::storage::DistillSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_END_MARKER: &str = "<end_of_book>";
pub const DEFAULT_CONTINUE_TRIGGER: &str = "Next";
pub const DEFAULT_FIRST_TURN_INSTRUCTION: &str = "Begin as instructed: include Opening the Journey (intro, architecture, reading guide) and the first complete thematic section.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Paused from the outside.
    User,
    Error,
    RetryLimit,
    ArtifactLeak,
    TooShort,
    Refusal,
    Repeating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    Time,
    Tokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Uploading,
    Running,
    WaitingAutoSpacing,
    Paused(PauseReason),
    Complete,
    Stopped,
    BudgetReached(BudgetKind),
}

impl SessionStatus {
    pub fn is_paused(&self) -> bool {
        matches!(self, SessionStatus::Paused(_))
    }

    /// Ended for good: only a fresh `start` continues from here.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Stopped | SessionStatus::BudgetReached(_)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Uploading | SessionStatus::Running | SessionStatus::WaitingAutoSpacing
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Running => "running",
            SessionStatus::WaitingAutoSpacing => "waiting (auto-spacing)",
            SessionStatus::Paused(PauseReason::User) => "paused",
            SessionStatus::Paused(PauseReason::Error) => "paused (error)",
            SessionStatus::Paused(PauseReason::RetryLimit) => "paused (auto-retry limit reached)",
            SessionStatus::Paused(PauseReason::ArtifactLeak) => "paused (artifact leak)",
            SessionStatus::Paused(PauseReason::TooShort) => "paused (empty/short)",
            SessionStatus::Paused(PauseReason::Refusal) => "paused (refusal)",
            SessionStatus::Paused(PauseReason::Repeating) => "paused (loop)",
            SessionStatus::Complete => "complete",
            SessionStatus::Stopped => "stopped",
            SessionStatus::BudgetReached(BudgetKind::Time) => "time budget reached",
            SessionStatus::BudgetReached(BudgetKind::Tokens) => "token budget reached (est)",
        };
        f.write_str(label)
    }
}

/// Optional run limits. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budgets {
    pub max_tokens: Option<u64>,
    pub max_seconds: Option<u64>,
}

/// Per-run bookkeeping owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub(crate) started_instant: Option<Instant>,
    pub(crate) last_request_started_at: Option<Instant>,
    pub end_marker: String,
    pub budgets: Budgets,
    /// Last section accepted without anomaly, for repetition checks.
    pub last_accepted_text: String,
    pub last_error: Option<String>,
}

impl Session {
    pub fn new(end_marker: impl Into<String>, budgets: Budgets) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Idle,
            started_at: None,
            started_instant: None,
            last_request_started_at: None,
            end_marker: end_marker.into(),
            budgets,
            last_accepted_text: String::new(),
            last_error: None,
        }
    }

    /// Mark the start of the generation phase.
    pub(crate) fn mark_started(&mut self) {
        if self.started_instant.is_none() {
            self.started_at = Some(Utc::now());
            self.started_instant = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_instant
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Budget exceeded given the current token tally.
    pub fn exceeded_budget(&self, token_tally: u64) -> Option<BudgetKind> {
        if let Some(max_seconds) = self.budgets.max_seconds {
            if self.started_instant.is_some() && self.elapsed().as_secs_f64() > max_seconds as f64 {
                return Some(BudgetKind::Time);
            }
        }
        if let Some(max_tokens) = self.budgets.max_tokens {
            if token_tally >= max_tokens {
                return Some(BudgetKind::Tokens);
            }
        }
        None
    }
}

/// Everything one distillation run needs besides the provider.
#[derive(Debug, Clone)]
pub struct DistillConfig {
    pub model: String,
    pub system_prompt: String,
    /// `None` leaves sampling temperature to the provider.
    pub temperature: Option<f32>,
    pub end_marker: String,
    pub continue_trigger: String,
    pub first_turn_instruction: String,
    pub budgets: Budgets,
    pub pause_on_anomaly: bool,
    pub auto_wait_between_requests: bool,
    pub min_request_interval: Duration,
    pub reattach_file_each_turn: bool,
    pub retry_policy: RetryPolicy,
    pub anomaly_retry_limit: u32,
    pub anomaly_retry_wait: Duration,
    pub min_section_chars: usize,
    pub similarity_threshold: f64,
    pub upload_poll_interval: Duration,
    pub upload_poll_limit: u32,
    pub stale_file_recovery_limit: u32,
}

impl Default for DistillConfig {
    fn default() -> Self {
        let settings = DistillSettings::default();
        Self {
            model: settings.model,
            system_prompt: settings.prompt,
            temperature: Some(settings.temperature),
            end_marker: DEFAULT_END_MARKER.to_string(),
            continue_trigger: DEFAULT_CONTINUE_TRIGGER.to_string(),
            first_turn_instruction: DEFAULT_FIRST_TURN_INSTRUCTION.to_string(),
            budgets: Budgets::default(),
            pause_on_anomaly: true,
            auto_wait_between_requests: false,
            min_request_interval: Duration::from_secs(60),
            reattach_file_each_turn: false,
            retry_policy: RetryPolicy::default(),
            anomaly_retry_limit: 5,
            anomaly_retry_wait: Duration::from_secs(60),
            min_section_chars: DEFAULT_MIN_SECTION_CHARS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            upload_poll_interval: Duration::from_secs(2),
            upload_poll_limit: 120,
            stale_file_recovery_limit: 3,
        }
    }
}

impl DistillConfig {
    /// Model, prompt, temperature and spacing from persisted settings.
    pub fn from_settings(settings: &DistillSettings) -> Self {
        Self {
            model: settings.model.clone(),
            system_prompt: settings.prompt.clone(),
            temperature: settings.effective_temperature(),
            auto_wait_between_requests: settings.auto_wait_between_requests,
            ..Self::default()
        }
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }
}
