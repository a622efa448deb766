//! Distillation session driver.
//!
//! Uploads the source document, waits for it to become usable, sends the
//! first turn, then keeps asking for the next section until the model emits
//! the end marker, a budget runs out, or the session is paused or stopped.
//! Every provider call goes through [`RetryExecutor`]; every accepted reply
//! goes through [`AnomalyDetector`].

use super::anomaly::{Anomaly, AnomalyDetector};
use super::classifier::is_stale_file_error;
use super::control::{DistillHandle, SessionControl};
use super::request_builder::{TurnRequest, TurnRequestBuilder};
use super::retry::{CallFailure, RetryExecutor};
use super::timer::CancellableWait;
use super::transcript::{DistillDocument, SectionCounters, SectionRecord, Transcript};
use super::types::{DistillConfig, PauseReason, Session, SessionStatus};
use crate::infrastructure::ai::{
    FileState, GenerateResponse, GenerationProvider, ProviderError, SourceDocument, UploadedFile,
};
use crate::infrastructure::events::{DistillEvent, EventEmitter, NoticeLevel};
use crate::infrastructure::trace::{TraceEntry, TraceError, TraceLog, TraceSink};
use crate::util::errors::{DistillError, DistillResult};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

pub struct DistillOrchestrator {
    provider: Arc<dyn GenerationProvider>,
    config: DistillConfig,
    control: Arc<SessionControl>,
    events: EventEmitter,
    timer: CancellableWait,
    session: Session,
    document: DistillDocument,
    source: Option<Arc<SourceDocument>>,
    uploaded_file: Option<UploadedFile>,
    trace: TraceLog,
}

impl DistillOrchestrator {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: DistillConfig) -> Self {
        let session = Session::new(config.end_marker.clone(), config.budgets);
        Self {
            provider,
            config,
            control: Arc::new(SessionControl::new()),
            events: EventEmitter::disabled(),
            timer: CancellableWait::default(),
            session,
            document: DistillDocument::new(),
            source: None,
            uploaded_file: None,
            trace: TraceLog::new(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Granularity at which waits observe pause and stop.
    pub fn with_wait_tick(mut self, tick: Duration) -> Self {
        self.timer = CancellableWait::with_tick(tick);
        self
    }

    pub fn handle(&self) -> DistillHandle {
        DistillHandle::new(self.control.clone())
    }

    pub fn config(&self) -> &DistillConfig {
        &self.config
    }

    /// Takes effect on the next request.
    pub fn config_mut(&mut self) -> &mut DistillConfig {
        &mut self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn transcript(&self) -> &Transcript {
        self.document.transcript()
    }

    pub fn sections(&self) -> &[SectionRecord] {
        self.document.sections()
    }

    pub fn counters(&self) -> SectionCounters {
        self.document.counters()
    }

    pub fn combined_text(&self) -> String {
        self.document.combined_text()
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn uploaded_file(&self) -> Option<&UploadedFile> {
        self.uploaded_file.as_ref()
    }

    pub fn source(&self) -> Option<&SourceDocument> {
        self.source.as_deref()
    }

    /// Start a fresh run over `source`. Returns once the run completes,
    /// pauses, stops or hits a budget.
    pub async fn start(&mut self, source: SourceDocument) -> DistillResult<SessionStatus> {
        if self.config.system_prompt.trim().is_empty() {
            return Err(DistillError::validation("Prompt is empty"));
        }
        if self.config.model.trim().is_empty() {
            return Err(DistillError::validation("Model is not set"));
        }
        if source.bytes.is_empty() {
            return Err(DistillError::validation(format!(
                "Source document is empty: {}",
                source.name
            )));
        }

        self.document.clear();
        self.trace.clear();
        self.uploaded_file = None;
        self.session = Session::new(self.config.end_marker.clone(), self.config.budgets);
        info!(
            "Distill session started: session_id={}, model={}, source={}, bytes={}",
            self.session.id,
            self.config.model,
            source.name,
            source.bytes.len()
        );
        self.source = Some(Arc::new(source));
        self.control.begin();
        Ok(self.drive().await)
    }

    /// Continue a paused run from whichever phase it stopped in.
    pub async fn resume(&mut self) -> DistillResult<SessionStatus> {
        if self.source.is_none() {
            return Err(DistillError::validation("No session to resume"));
        }
        if !self.control.is_running() {
            warn!(
                "Resume ignored, session not running: session_id={}, status={}",
                self.session.id, self.session.status
            );
            return Ok(self.session.status);
        }
        info!(
            "Distill session resumed: session_id={}, sections={}",
            self.session.id,
            self.document.sections().len()
        );
        self.control.resume();
        self.session.last_error = None;
        Ok(self.drive().await)
    }

    pub fn pause(&mut self) {
        self.control.pause();
        if self.session.status.is_active() {
            self.set_status(SessionStatus::Paused(PauseReason::User));
        }
    }

    pub fn stop(&mut self) {
        self.control.stop();
        if !self.session.status.is_terminal() {
            self.set_status(SessionStatus::Stopped);
        }
    }

    /// Remove an accepted section and its turns from the transcript.
    pub fn delete_section(&mut self, id: u64) -> DistillResult<SectionRecord> {
        let deleted = self
            .document
            .delete_section(id, &self.config.continue_trigger)?;
        self.session.last_accepted_text = self
            .document
            .last_section()
            .map(|s| s.text.clone())
            .unwrap_or_default();
        info!(
            "Section deleted: session_id={}, section_id={}, removed_user_turn={}",
            self.session.id, id, deleted.removed_user_turn
        );
        self.events.emit(DistillEvent::SectionDeleted { id });
        Ok(deleted.section)
    }

    async fn drive(&mut self) -> SessionStatus {
        let flow = self.advance().await;
        debug!(
            "Distill loop exited: session_id={}, flow={:?}, running={}, paused={}",
            self.session.id,
            flow,
            self.control.is_running(),
            self.control.is_paused()
        );
        self.settle()
    }

    async fn advance(&mut self) -> Flow {
        if self.uploaded_file.is_none() {
            self.set_status(SessionStatus::Uploading);
            match self.upload_and_activate().await {
                Ok(file) => self.uploaded_file = Some(file),
                Err(flow) => return flow,
            }
        }

        self.session.mark_started();
        self.set_status(SessionStatus::Running);

        if self.document.transcript().is_empty() {
            let Some(file) = self.uploaded_file.as_ref().map(UploadedFile::reference) else {
                return Flow::Halt;
            };
            let pending = self
                .builder()
                .build_first_turn(&file, &self.config.first_turn_instruction);
            if self.execute_turn(pending).await == Flow::Halt {
                return Flow::Halt;
            }
        }

        self.continuation_loop().await
    }

    async fn continuation_loop(&mut self) -> Flow {
        while self.control.should_continue() {
            if let Some(kind) = self
                .session
                .exceeded_budget(self.document.counters().token_tally)
            {
                self.control.finish();
                self.set_status(SessionStatus::BudgetReached(kind));
                self.events
                    .notice(NoticeLevel::Warn, self.session.status.to_string());
                return Flow::Halt;
            }

            let reattach = if self.config.reattach_file_each_turn {
                self.uploaded_file.as_ref().map(UploadedFile::reference)
            } else {
                None
            };
            let history = self.document.transcript().turns();
            let pending = self.builder().build_continuation(
                &history,
                &self.config.continue_trigger,
                reattach.as_ref(),
            );
            if self.execute_turn(pending).await == Flow::Halt {
                return Flow::Halt;
            }
        }
        Flow::Halt
    }

    /// Send one turn, regenerating on content anomalies and repairing stale
    /// file references, then accept the result.
    async fn execute_turn(&mut self, mut pending: TurnRequest) -> Flow {
        self.wait_for_spacing().await;
        if !self.control.should_continue() {
            return Flow::Halt;
        }

        let detector = self.detector();
        let mut content_retries = 0u32;
        let mut stale_recoveries = 0u32;
        loop {
            self.session.last_request_started_at = Some(Instant::now());
            let executor = self.executor();
            let call = executor
                .execute(|| self.provider.generate(&pending.request))
                .await;

            let response = match call.result {
                Ok(response) => response,
                Err(CallFailure::Provider(err))
                    if is_stale_file_error(&err)
                        && stale_recoveries < self.config.stale_file_recovery_limit =>
                {
                    stale_recoveries += 1;
                    if self.recover_file_reference(&mut pending, &err).await == Flow::Halt {
                        return Flow::Halt;
                    }
                    continue;
                }
                Err(failure) => {
                    let request = request_json(&pending);
                    return self.fail(request, failure, call.attempts);
                }
            };

            let anomaly = detector.detect(&response.text, &self.session.last_accepted_text);
            if !anomaly.is_retryable() {
                return self.accept_turn(pending, response, anomaly, call.attempts + content_retries);
            }

            if content_retries >= self.config.anomaly_retry_limit {
                let reason = match anomaly {
                    Anomaly::LeakedArtifact => PauseReason::ArtifactLeak,
                    _ => PauseReason::TooShort,
                };
                warn!(
                    "Content anomaly persisted, pausing: session_id={}, anomaly={:?}, retries={}",
                    self.session.id, anomaly, content_retries
                );
                let mut entry = TraceEntry::failure(
                    request_json(&pending),
                    TraceError::message(anomaly.label()),
                    call.attempts + content_retries,
                );
                entry.response = Some(response.raw);
                self.trace.push(entry);
                self.pause_with(reason, Some(anomaly.label().to_string()));
                self.events.notice(
                    NoticeLevel::Warn,
                    format!("Paused: {}", anomaly.label().to_lowercase()),
                );
                return Flow::Halt;
            }

            warn!(
                "Content anomaly, regenerating: session_id={}, anomaly={:?}, retry={}",
                self.session.id, anomaly, content_retries
            );
            if self.wait_before_regenerating(anomaly, content_retries).await == Flow::Halt {
                return Flow::Halt;
            }
            content_retries += 1;
        }
    }

    async fn wait_before_regenerating(&self, anomaly: Anomaly, attempt: u32) -> Flow {
        let wait = self.config.anomaly_retry_wait;
        let max = Some(self.config.anomaly_retry_limit);
        let planned_ms = wait.as_millis() as u64;
        let events = &self.events;
        let progress = |remaining: Duration| {
            events.emit(DistillEvent::RetryProgress {
                reason: anomaly.label().to_string(),
                attempt,
                max,
                planned_ms,
                remaining_ms: remaining.as_millis() as u64,
                last_error: anomaly.label().to_string(),
            });
        };
        progress(wait);
        let outcome = self
            .timer
            .wait(wait, || self.control.should_continue(), progress)
            .await;
        self.events.emit(DistillEvent::RetryCleared);
        if outcome.is_interrupted() {
            Flow::Halt
        } else {
            Flow::Continue
        }
    }

    fn accept_turn(
        &mut self,
        pending: TurnRequest,
        response: GenerateResponse,
        anomaly: Anomaly,
        retries: u32,
    ) -> Flow {
        self.trace.push(TraceEntry::success(
            request_json(&pending),
            response.raw.clone(),
            retries,
        ));
        let usage = response.candidates_token_count();
        let section = self.document.accept(pending.user_turn, response.text.clone(), usage);
        let (id, title, tokens) = (section.id, section.title(), section.estimated_tokens());
        info!(
            "Section accepted: session_id={}, section_id={}, tokens={}, anomaly={:?}",
            self.session.id, id, tokens, anomaly
        );
        self.events.emit(DistillEvent::SectionAdded {
            id,
            title,
            estimated_tokens: tokens,
        });

        match anomaly {
            Anomaly::Complete => {
                self.control.finish();
                self.set_status(SessionStatus::Complete);
                self.events.notice(NoticeLevel::Good, "Distillation complete");
                Flow::Halt
            }
            Anomaly::Refusal => {
                self.pause_with(PauseReason::Refusal, Some(anomaly.label().to_string()));
                self.events.notice(NoticeLevel::Warn, "Paused: likely refusal");
                Flow::Halt
            }
            Anomaly::Repeating => {
                self.pause_with(PauseReason::Repeating, Some(anomaly.label().to_string()));
                self.events.notice(NoticeLevel::Warn, "Paused: response repeating");
                Flow::Halt
            }
            _ => {
                self.session.last_accepted_text = response.text;
                Flow::Continue
            }
        }
    }

    /// Upload the source and poll until the provider reports it usable.
    async fn upload_and_activate(&mut self) -> Result<UploadedFile, Flow> {
        let Some(source) = self.source.clone() else {
            return Err(Flow::Halt);
        };

        let executor = self.executor();
        let upload = executor
            .execute(|| self.provider.upload_file(&source))
            .await;
        let mut file = match upload.result {
            Ok(file) => file,
            Err(failure) => {
                let request = json!({ "step": "files.upload", "name": source.name });
                return Err(self.fail(request, failure, upload.attempts));
            }
        };
        info!(
            "Source uploaded: session_id={}, file={}, state={:?}",
            self.session.id, file.name, file.state
        );

        let mut polls = 0u32;
        while file.state == FileState::Processing {
            if polls >= self.config.upload_poll_limit {
                let request = json!({ "step": "files.get", "name": file.name });
                return Err(self.fail_with_message(request, "File processing timed out"));
            }
            let waited = self
                .timer
                .wait(
                    self.config.upload_poll_interval,
                    || self.control.should_continue(),
                    |_| {},
                )
                .await;
            if waited.is_interrupted() {
                return Err(Flow::Halt);
            }
            let name = file.name.clone();
            let status = executor
                .execute(|| self.provider.get_file_status(&name))
                .await;
            file = match status.result {
                Ok(file) => file,
                Err(failure) => {
                    let request = json!({ "step": "files.get", "name": name });
                    return Err(self.fail(request, failure, status.attempts));
                }
            };
            polls += 1;
            debug!(
                "File status polled: file={}, state={:?}, polls={}",
                file.name, file.state, polls
            );
        }

        if file.state == FileState::Failed {
            let request = json!({ "step": "files.get", "name": file.name });
            return Err(self.fail_with_message(request, "File processing failed"));
        }
        Ok(file)
    }

    async fn recover_file_reference(&mut self, pending: &mut TurnRequest, err: &ProviderError) -> Flow {
        let Some(old_uri) = self.uploaded_file.as_ref().map(|f| f.uri.clone()) else {
            return self.fail(request_json(pending), CallFailure::Provider(err.clone()), 0);
        };
        warn!(
            "Stale file reference, re-uploading: session_id={}, uri={}, error={}",
            self.session.id, old_uri, err.message
        );
        self.events.notice(
            NoticeLevel::Warn,
            "File reference invalid; re-uploading and updating history",
        );

        let file = match self.upload_and_activate().await {
            Ok(file) => file,
            Err(flow) => return flow,
        };
        let replacement = file.reference();
        self.document.repair_file_reference(&old_uri, &replacement);
        pending.replace_file_reference(&old_uri, &replacement);
        self.uploaded_file = Some(file);
        Flow::Continue
    }

    /// Hold the next request until the minimum spacing since the previous
    /// one has passed.
    async fn wait_for_spacing(&mut self) {
        if !self.config.auto_wait_between_requests {
            return;
        }
        let Some(last) = self.session.last_request_started_at else {
            return;
        };
        let interval = self.config.min_request_interval;
        let elapsed = last.elapsed();
        if elapsed >= interval {
            return;
        }

        let remaining = interval - elapsed;
        self.set_status(SessionStatus::WaitingAutoSpacing);
        let planned_ms = remaining.as_millis() as u64;
        let events = &self.events;
        events.emit(DistillEvent::AutoWaitProgress {
            planned_ms,
            remaining_ms: planned_ms,
        });
        let outcome = self
            .timer
            .wait(
                remaining,
                || self.control.should_continue(),
                |left| {
                    events.emit(DistillEvent::AutoWaitProgress {
                        planned_ms,
                        remaining_ms: left.as_millis() as u64,
                    })
                },
            )
            .await;
        self.events.emit(DistillEvent::AutoWaitCleared);
        if !outcome.is_interrupted() {
            self.set_status(SessionStatus::Running);
        }
    }

    fn fail(&mut self, request: Value, failure: CallFailure, attempts: u32) -> Flow {
        match failure {
            CallFailure::Aborted => Flow::Halt,
            CallFailure::RetriesExhausted { error, reason } => {
                warn!(
                    "Retries exhausted, pausing: session_id={}, reason={}, error={}",
                    self.session.id, reason, error.message
                );
                self.trace
                    .push(TraceEntry::failure(request, TraceError::from(&error), attempts));
                self.pause_with(PauseReason::RetryLimit, Some(error.message));
                self.events.notice(
                    NoticeLevel::Warn,
                    "Auto-retry limit reached. Resume to continue.",
                );
                Flow::Halt
            }
            CallFailure::Provider(error) => {
                error!(
                    "Distill request failed: session_id={}, status={:?}, error={}",
                    self.session.id, error.http_status, error.message
                );
                self.trace
                    .push(TraceEntry::failure(request, TraceError::from(&error), attempts));
                self.events
                    .notice(NoticeLevel::Bad, format!("API Error: {}", error.message));
                self.pause_with(PauseReason::Error, Some(error.message));
                Flow::Halt
            }
        }
    }

    fn fail_with_message(&mut self, request: Value, message: &str) -> Flow {
        error!(
            "Distill session failed: session_id={}, error={}",
            self.session.id, message
        );
        self.trace
            .push(TraceEntry::failure(request, TraceError::message(message), 0));
        self.events
            .notice(NoticeLevel::Bad, format!("API Error: {}", message));
        self.pause_with(PauseReason::Error, Some(message.to_string()));
        Flow::Halt
    }

    fn pause_with(&mut self, reason: PauseReason, message: Option<String>) {
        self.control.pause();
        self.session.last_error = message;
        self.set_status(SessionStatus::Paused(reason));
    }

    /// Pick the final status once the loop has exited.
    fn settle(&mut self) -> SessionStatus {
        if !self.control.is_running() {
            if !matches!(
                self.session.status,
                SessionStatus::Complete | SessionStatus::BudgetReached(_)
            ) {
                self.set_status(SessionStatus::Stopped);
            }
        } else if self.control.is_paused() && !self.session.status.is_paused() {
            self.set_status(SessionStatus::Paused(PauseReason::User));
        }
        self.session.status
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.session.status == status {
            return;
        }
        info!(
            "Distill status changed: session_id={}, from={}, to={}",
            self.session.id, self.session.status, status
        );
        self.session.status = status;
        self.events.emit(DistillEvent::StatusChanged {
            status: status.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    fn executor(&self) -> RetryExecutor {
        let control = self.control.clone();
        RetryExecutor::new(Arc::new(move || control.should_continue()))
            .with_hook(Arc::new(self.config.retry_policy))
            .with_events(self.events.clone())
            .with_timer(self.timer)
    }

    fn builder(&self) -> TurnRequestBuilder {
        TurnRequestBuilder::new(
            self.config.model.clone(),
            self.config.system_prompt.clone(),
            self.config.temperature,
        )
    }

    fn detector(&self) -> AnomalyDetector {
        AnomalyDetector::new(self.config.end_marker.clone())
            .with_min_chars(self.config.min_section_chars)
            .with_similarity_threshold(self.config.similarity_threshold)
            .with_pause_on_anomaly(self.config.pause_on_anomaly)
    }
}

fn request_json(pending: &TurnRequest) -> Value {
    serde_json::to_value(&pending.request).unwrap_or(Value::Null)
}
