use distill_core::agentic::distill::{
    BudgetKind, Budgets, DistillConfig, DistillOrchestrator, PauseReason, SessionStatus,
};
use distill_core::infrastructure::ai::{
    FileState, GenerateRequest, GenerateResponse, GenerationProvider, ProviderError,
    SourceDocument, UploadedFile, UsageMetadata,
};
use distill_core::infrastructure::events::{DistillEvent, EventEmitter, NoticeLevel};
use distill_core::util::estimate_tokens;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const END: &str = "<end_of_book>";
const BASE: &str = "the quick brown fox jumps over the lazy dog while the reader keeps turning pages of a long book ";

type Action = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<GenerateResponse, ProviderError>>>,
    uploads: Mutex<VecDeque<Result<UploadedFile, ProviderError>>>,
    statuses: Mutex<VecDeque<Result<UploadedFile, ProviderError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    upload_count: AtomicUsize,
    status_count: AtomicUsize,
    reply_delay: Duration,
    actions: Mutex<Vec<(usize, Action)>>,
}

impl ScriptedProvider {
    fn with_replies(replies: Vec<Result<GenerateResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    fn push_upload(&self, result: Result<UploadedFile, ProviderError>) {
        self.uploads.lock().expect("lock").push_back(result);
    }

    fn push_status(&self, result: Result<UploadedFile, ProviderError>) {
        self.statuses.lock().expect("lock").push_back(result);
    }

    fn push_replies(&self, replies: Vec<Result<GenerateResponse, ProviderError>>) {
        self.replies.lock().expect("lock").extend(replies);
    }

    /// Run `action` when the generate call with this zero-based index arrives.
    fn on_generate(&self, index: usize, action: impl FnOnce() + Send + 'static) {
        self.actions
            .lock()
            .expect("lock")
            .push((index, Box::new(action)));
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("lock").clone()
    }

    fn generate_calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock().expect("lock");
            requests.push(request.clone());
            requests.len() - 1
        };
        let action = {
            let mut actions = self.actions.lock().expect("lock");
            actions
                .iter()
                .position(|(at, _)| *at == index)
                .map(|pos| actions.remove(pos).1)
        };
        if let Some(action) = action {
            action();
        }
        if !self.reply_delay.is_zero() {
            tokio::time::sleep(self.reply_delay).await;
        }
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("script exhausted").with_status(400)))
    }

    async fn upload_file(&self, _document: &SourceDocument) -> Result<UploadedFile, ProviderError> {
        let n = self.upload_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.uploads
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(file(n, FileState::Active)))
    }

    async fn get_file_status(&self, name: &str) -> Result<UploadedFile, ProviderError> {
        self.status_count.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(UploadedFile {
                    name: name.to_string(),
                    uri: String::new(),
                    mime_type: None,
                    display_name: None,
                    state: FileState::Processing,
                })
            })
    }
}

fn file(n: usize, state: FileState) -> UploadedFile {
    UploadedFile {
        name: format!("files/{}", n),
        uri: format!("https://generativelanguage.test/v1beta/files/{}", n),
        mime_type: Some("application/pdf".to_string()),
        display_name: Some("book.pdf".to_string()),
        state,
    }
}

fn shifted(text: &str, shift: u8) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_lowercase() {
                (((c as u8 - b'a' + shift) % 26) + b'a') as char
            } else {
                c
            }
        })
        .collect()
}

/// A well-formed section whose wording differs from every other index.
fn section(n: u8) -> String {
    format!("## Part {}\n\n{}", n, shifted(&BASE.repeat(3), n * 3))
}

fn reply(text: impl Into<String>) -> Result<GenerateResponse, ProviderError> {
    Ok(GenerateResponse::from_text(text))
}

fn final_reply(n: u8) -> Result<GenerateResponse, ProviderError> {
    reply(format!("{}\n{}", section(n), END))
}

fn reply_with_usage(text: impl Into<String>, tokens: u64) -> Result<GenerateResponse, ProviderError> {
    Ok(GenerateResponse {
        usage: Some(UsageMetadata {
            candidates_token_count: Some(tokens),
            ..UsageMetadata::default()
        }),
        ..GenerateResponse::from_text(text)
    })
}

fn rate_limited() -> Result<GenerateResponse, ProviderError> {
    Err(ProviderError::new("Resource has been exhausted")
        .with_status(429)
        .with_body(json!({ "error": { "code": 429, "status": "RESOURCE_EXHAUSTED" } })))
}

fn stale_file() -> Result<GenerateResponse, ProviderError> {
    Err(ProviderError::new("The file is not in an ACTIVE state")
        .with_status(400)
        .with_body(json!({ "error": { "code": 400, "status": "FAILED_PRECONDITION" } })))
}

fn book() -> SourceDocument {
    SourceDocument::new("book.pdf", "application/pdf", b"%PDF-1.4 distill test".to_vec())
}

fn orchestrator(provider: &Arc<ScriptedProvider>, config: DistillConfig) -> DistillOrchestrator {
    DistillOrchestrator::new(provider.clone(), config)
}

fn drain(rx: &mut UnboundedReceiver<DistillEvent>) -> Vec<DistillEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn runs_until_the_end_marker() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(section(1)),
        reply(section(2)),
        final_reply(3),
    ]));
    let (events, mut rx) = EventEmitter::channel();
    let mut distill = orchestrator(&provider, DistillConfig::default()).with_events(events);

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Complete);
    assert!(!distill.is_running());
    assert_eq!(distill.sections().len(), 3);
    assert_eq!(distill.transcript().len(), 6);
    assert_eq!(distill.trace().len(), 3);

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].contents.len(), 1);
    assert!(requests[0].contents[0].references_file("https://generativelanguage.test/v1beta/files/1"));
    assert!(requests[0].contents[0].text().starts_with("Begin as instructed"));
    assert_eq!(requests[1].contents.len(), 3);
    assert!(requests[1].contents[2].is_exactly_text("Next"));
    assert_eq!(requests[2].contents.len(), 5);

    let events = drain(&mut rx);
    let added = events
        .iter()
        .filter(|e| matches!(e, DistillEvent::SectionAdded { .. }))
        .count();
    assert_eq!(added, 3);
    assert!(events.iter().any(
        |e| matches!(e, DistillEvent::StatusChanged { status, .. } if status == "complete")
    ));
    assert!(distill.combined_text().ends_with(END));
}

#[tokio::test(start_paused = true)]
async fn short_replies_pause_after_five_retries() {
    let provider = Arc::new(ScriptedProvider::with_replies(
        (0..6).map(|_| reply("Too brief.")).collect(),
    ));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::TooShort));
    assert_eq!(status.to_string(), "paused (empty/short)");
    assert_eq!(provider.generate_calls(), 6);
    assert!(distill.sections().is_empty());
    assert!(distill.transcript().is_empty());
    assert!(distill.is_paused());
    let entry = &distill.trace().entries()[0];
    assert_eq!(entry.retries, 5);
    assert!(entry.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn leaked_artifacts_are_regenerated() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(format!("{}<ctrl94>", section(1))),
        final_reply(1),
    ]));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(provider.generate_calls(), 2);
    assert_eq!(distill.sections().len(), 1);
    assert!(!distill.sections()[0].text.contains("<ctrl94>"));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_transparently() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        rate_limited(),
        rate_limited(),
        final_reply(1),
    ]));
    let (events, mut rx) = EventEmitter::channel();
    let mut distill = orchestrator(&provider, DistillConfig::default()).with_events(events);

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(provider.generate_calls(), 3);
    assert_eq!(distill.trace().entries()[0].retries, 2);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        DistillEvent::RetryProgress { reason, planned_ms: 60_000, max: Some(4), .. } if reason == "rate limited"
    )));
    assert!(events.contains(&DistillEvent::RetryCleared));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_cap_pauses_the_session() {
    let provider = Arc::new(ScriptedProvider::with_replies(
        (0..4).map(|_| rate_limited()).collect(),
    ));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::RetryLimit));
    assert_eq!(status.to_string(), "paused (auto-retry limit reached)");
    assert_eq!(provider.generate_calls(), 4);
    assert_eq!(
        distill.session().last_error.as_deref(),
        Some("Resource has been exhausted")
    );
}

#[tokio::test(start_paused = true)]
async fn fatal_errors_pause_and_are_traced() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![Err(ProviderError::new(
        "API key not valid",
    )
    .with_status(400))]));
    let (events, mut rx) = EventEmitter::channel();
    let mut distill = orchestrator(&provider, DistillConfig::default()).with_events(events);

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::Error));
    assert_eq!(provider.generate_calls(), 1);
    let entry = &distill.trace().entries()[0];
    assert_eq!(
        entry.error.as_ref().map(|e| e.message.as_str()),
        Some("API key not valid")
    );
    assert_eq!(entry.error.as_ref().and_then(|e| e.http_status), Some(400));
    assert!(drain(&mut rx).contains(&DistillEvent::Notice {
        level: NoticeLevel::Bad,
        message: "API Error: API key not valid".to_string(),
    }));
}

#[tokio::test(start_paused = true)]
async fn resume_redoes_a_failed_first_turn() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![Err(ProviderError::new(
        "Internal error",
    )
    .with_status(400))]));
    let mut distill = orchestrator(&provider, DistillConfig::default());
    assert_eq!(
        distill.start(book()).await.expect("start"),
        SessionStatus::Paused(PauseReason::Error)
    );

    provider.push_replies(vec![final_reply(1)]);
    let status = distill.resume().await.expect("resume");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(provider.upload_count.load(Ordering::SeqCst), 1);
    let requests = provider.requests();
    assert_eq!(requests[1].contents.len(), 1);
    assert!(requests[1].contents[0].text().starts_with("Begin as instructed"));
}

#[tokio::test(start_paused = true)]
async fn waits_for_processing_uploads() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![final_reply(1)]));
    provider.push_upload(Ok(file(7, FileState::Processing)));
    provider.push_status(Ok(file(7, FileState::Processing)));
    provider.push_status(Ok(file(7, FileState::Active)));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(provider.status_count.load(Ordering::SeqCst), 2);
    assert_eq!(distill.uploaded_file().map(|f| f.state), Some(FileState::Active));
}

#[tokio::test(start_paused = true)]
async fn failed_processing_pauses_before_generating() {
    let provider = Arc::new(ScriptedProvider::default());
    provider.push_upload(Ok(file(1, FileState::Processing)));
    provider.push_status(Ok(file(1, FileState::Failed)));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::Error));
    assert_eq!(provider.generate_calls(), 0);
    assert!(distill.uploaded_file().is_none());
    assert_eq!(
        distill.session().last_error.as_deref(),
        Some("File processing failed")
    );
}

#[tokio::test(start_paused = true)]
async fn processing_poll_is_bounded() {
    let provider = Arc::new(ScriptedProvider::default());
    provider.push_upload(Ok(file(1, FileState::Processing)));
    let config = DistillConfig {
        upload_poll_limit: 3,
        ..DistillConfig::default()
    };
    let mut distill = orchestrator(&provider, config);

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::Error));
    assert_eq!(provider.status_count.load(Ordering::SeqCst), 3);
    assert_eq!(
        distill.session().last_error.as_deref(),
        Some("File processing timed out")
    );
}

#[tokio::test(start_paused = true)]
async fn resume_after_failed_upload_uploads_again() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![final_reply(1)]));
    provider.push_upload(Err(ProviderError::new("Permission denied").with_status(403)));
    let mut distill = orchestrator(&provider, DistillConfig::default());
    assert_eq!(
        distill.start(book()).await.expect("start"),
        SessionStatus::Paused(PauseReason::Error)
    );

    let status = distill.resume().await.expect("resume");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(provider.upload_count.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_file_references_are_repaired() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(section(1)),
        stale_file(),
        final_reply(2),
    ]));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(provider.upload_count.load(Ordering::SeqCst), 2);
    let old_uri = "https://generativelanguage.test/v1beta/files/1";
    let new_uri = "https://generativelanguage.test/v1beta/files/2";
    let retried = provider.requests().pop().expect("last request");
    assert!(retried.contents.iter().all(|t| !t.references_file(old_uri)));
    assert!(retried.contents[0].references_file(new_uri));
    assert!(!distill.transcript().references_file(old_uri));
    assert!(distill.transcript().references_file(new_uri));
}

#[tokio::test(start_paused = true)]
async fn stale_file_recovery_is_bounded() {
    let provider = Arc::new(ScriptedProvider::with_replies(
        (0..4).map(|_| stale_file()).collect(),
    ));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::Error));
    assert_eq!(provider.generate_calls(), 4);
    assert_eq!(provider.upload_count.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn token_budget_counts_estimates_not_provider_usage() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply_with_usage(section(1), 50_000),
        reply_with_usage(section(2), 50_000),
        reply(section(3)),
    ]));
    let per_section = estimate_tokens(&section(1));
    let config = DistillConfig::default().with_budgets(Budgets {
        max_tokens: Some(per_section + 1),
        max_seconds: None,
    });
    let mut distill = orchestrator(&provider, config);

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::BudgetReached(BudgetKind::Tokens));
    assert_eq!(status.to_string(), "token budget reached (est)");
    assert_eq!(provider.generate_calls(), 2);
    let expected: u64 = distill.sections().iter().map(|s| estimate_tokens(&s.text)).sum();
    assert_eq!(distill.counters().token_tally, expected);
    assert_eq!(distill.sections()[0].usage_tokens, Some(50_000));
}

#[tokio::test(start_paused = true)]
async fn time_budget_stops_the_loop() {
    let provider = Arc::new(ScriptedProvider {
        reply_delay: Duration::from_secs(20),
        ..ScriptedProvider::with_replies(vec![reply(section(1)), reply(section(2)), reply(section(3))])
    });
    let config = DistillConfig::default().with_budgets(Budgets {
        max_tokens: None,
        max_seconds: Some(30),
    });
    let mut distill = orchestrator(&provider, config);

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status.to_string(), "time budget reached");
    assert_eq!(provider.generate_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn refusals_pause_without_retrying() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![reply(format!(
        "I cannot continue with this request. {}",
        BASE.repeat(3)
    ))]));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");

    assert_eq!(status, SessionStatus::Paused(PauseReason::Refusal));
    assert_eq!(provider.generate_calls(), 1);
    assert_eq!(distill.sections().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn repetition_pauses_and_resume_continues() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(section(1)),
        reply(section(1)),
    ]));
    let mut distill = orchestrator(&provider, DistillConfig::default());

    let status = distill.start(book()).await.expect("start");
    assert_eq!(status, SessionStatus::Paused(PauseReason::Repeating));
    assert_eq!(status.to_string(), "paused (loop)");
    assert_eq!(distill.sections().len(), 2);

    provider.push_replies(vec![final_reply(2)]);
    let status = distill.resume().await.expect("resume");

    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(distill.sections().len(), 3);
    assert_eq!(provider.requests()[2].contents.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn external_pause_is_observed_between_turns() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(section(1)),
        reply(section(2)),
        final_reply(3),
    ]));
    let mut distill = orchestrator(&provider, DistillConfig::default());
    let handle = distill.handle();
    provider.on_generate(1, move || handle.pause());

    let status = distill.start(book()).await.expect("start");
    assert_eq!(status, SessionStatus::Paused(PauseReason::User));
    assert_eq!(status.to_string(), "paused");
    assert_eq!(distill.sections().len(), 2);

    let status = distill.resume().await.expect("resume");
    assert_eq!(status, SessionStatus::Complete);
    assert_eq!(distill.sections().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_during_auto_spacing_ends_the_run() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(section(1)),
        reply(section(2)),
    ]));
    let (events, mut rx) = EventEmitter::channel();
    let config = DistillConfig {
        auto_wait_between_requests: true,
        ..DistillConfig::default()
    };
    let mut distill = orchestrator(&provider, config).with_events(events);
    let handle = distill.handle();

    let watcher = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if matches!(&event, DistillEvent::StatusChanged { status, .. } if status == "waiting (auto-spacing)") {
                handle.stop();
                return true;
            }
        }
        false
    });

    let status = distill.start(book()).await.expect("start");
    drop(distill);

    assert_eq!(status, SessionStatus::Stopped);
    assert_eq!(provider.generate_calls(), 1);
    assert!(watcher.await.expect("watcher task"));
}

#[tokio::test(start_paused = true)]
async fn deleting_sections_keeps_the_transcript_aligned() {
    let provider = Arc::new(ScriptedProvider::with_replies(vec![
        reply(section(1)),
        reply(section(2)),
        final_reply(3),
    ]));
    let (events, mut rx) = EventEmitter::channel();
    let mut distill = orchestrator(&provider, DistillConfig::default()).with_events(events);
    distill.start(book()).await.expect("start");
    drain(&mut rx);

    let removed = distill.delete_section(1).expect("delete middle");
    assert_eq!(removed.text, section(2));
    assert_eq!(distill.transcript().len(), 4);
    assert_eq!(distill.counters().sections, 2);
    assert_eq!(drain(&mut rx), vec![DistillEvent::SectionDeleted { id: 1 }]);

    distill.delete_section(0).expect("delete first");
    let turns = distill.transcript().turns();
    assert_eq!(turns.len(), 3);
    assert!(turns[0].references_file("https://generativelanguage.test/v1beta/files/1"));
    assert_eq!(distill.session().last_accepted_text, distill.sections()[0].text);

    assert!(distill.delete_section(1).is_err());
}

#[tokio::test(start_paused = true)]
async fn start_rejects_an_empty_prompt() {
    let provider = Arc::new(ScriptedProvider::default());
    let config = DistillConfig {
        system_prompt: "   ".to_string(),
        ..DistillConfig::default()
    };
    let mut distill = orchestrator(&provider, config);

    assert!(distill.start(book()).await.is_err());
    assert_eq!(provider.upload_count.load(Ordering::SeqCst), 0);
}
