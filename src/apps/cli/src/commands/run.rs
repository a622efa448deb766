//! `distill run`: drive one session in the foreground.

use anyhow::{bail, Context};
use clap::Args;
use distill_core::agentic::distill::{
    Budgets, DistillConfig, DistillOrchestrator, SectionRecord, SourceDocument,
};
use distill_core::infrastructure::ai::GeminiClient;
use distill_core::infrastructure::events::{DistillEvent, EventEmitter, NoticeLevel};
use distill_core::infrastructure::storage::{DistillSettings, JsonFileSettingsStore};
use distill_core::service::{
    export_base_name, render_markdown, render_pdf, render_text, ExportMeta,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Args)]
pub struct RunArgs {
    /// Book file (pdf, epub, txt, md, html)
    pub file: PathBuf,

    /// Model to use instead of the saved one
    #[arg(long)]
    pub model: Option<String>,

    /// Read the system prompt from this file
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Sampling temperature
    #[arg(long, conflicts_with = "no_temperature")]
    pub temperature: Option<f32>,

    /// Send no temperature, use the provider default
    #[arg(long)]
    pub no_temperature: bool,

    /// Stop once this many output tokens are accepted
    #[arg(long)]
    pub max_tokens: Option<u64>,

    /// Stop once the run has lasted this many seconds
    #[arg(long)]
    pub max_seconds: Option<u64>,

    /// Completion marker the model ends the book with
    #[arg(long)]
    pub end_marker: Option<String>,

    /// Space requests at least a minute apart
    #[arg(long)]
    pub auto_wait: bool,

    /// Attach the document to every continuation request
    #[arg(long)]
    pub reattach: bool,

    /// Accept short, refusing or repeating replies instead of pausing
    #[arg(long)]
    pub no_pause_on_anomaly: bool,

    /// Directory for the exported files
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Also write the request/response trace as JSON
    #[arg(long)]
    pub trace: bool,

    /// Also write a paginated PDF, with the trace appended when --trace is set
    #[arg(long)]
    pub pdf: bool,
}

pub async fn run(store: &JsonFileSettingsStore, args: RunArgs) -> anyhow::Result<()> {
    let mut settings = DistillSettings::load(store);
    apply_overrides(&mut settings, &args)?;

    let api_key = std::env::var(API_KEY_ENV)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| settings.api_key.clone());
    if api_key.trim().is_empty() {
        bail!(
            "No API key. Set one with `distill settings set api-key <key>` or {}",
            API_KEY_ENV
        );
    }

    let source = read_source(&args.file)?;
    let mut config = DistillConfig::from_settings(&settings).with_budgets(Budgets {
        max_tokens: args.max_tokens,
        max_seconds: args.max_seconds,
    });
    config.pause_on_anomaly = !args.no_pause_on_anomaly;
    config.reattach_file_each_turn = args.reattach;
    if let Some(marker) = args.end_marker.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        config.end_marker = marker.to_string();
    }

    let client = GeminiClient::new(api_key.trim())?;
    let (events, rx) = EventEmitter::channel();
    let mut orchestrator = DistillOrchestrator::new(Arc::new(client), config).with_events(events);
    let printer = tokio::spawn(print_events(rx));

    let handle = orchestrator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping session");
            handle.stop();
        }
    });

    println!(
        "Distilling {} with {} ({} bytes)",
        source.name,
        orchestrator.config().model,
        source.bytes.len()
    );
    let mut status = orchestrator.start(source).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while status.is_paused() && orchestrator.is_running() {
        match prompt_paused(&mut orchestrator, &mut stdin).await? {
            PauseChoice::Resume => status = orchestrator.resume().await?,
            PauseChoice::Quit => {
                orchestrator.stop();
                status = orchestrator.status();
            }
        }
    }
    println!("Finished: {}", status);

    write_outputs(&orchestrator, &args)?;
    drop(orchestrator);
    let _ = printer.await;
    Ok(())
}

fn apply_overrides(settings: &mut DistillSettings, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(model) = &args.model {
        settings.set_model(model)?;
    }
    if let Some(path) = &args.prompt_file {
        settings.prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
    }
    if let Some(t) = args.temperature {
        settings.use_temperature = true;
        settings.temperature = t;
    }
    if args.no_temperature {
        settings.use_temperature = false;
    }
    if args.auto_wait {
        settings.auto_wait_between_requests = true;
    }
    Ok(())
}

fn read_source(path: &Path) -> anyhow::Result<SourceDocument> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    let mime_type = SourceDocument::mime_type_for(&name);
    Ok(SourceDocument::new(name, mime_type, bytes))
}

enum PauseChoice {
    Resume,
    Quit,
}

async fn prompt_paused(
    orchestrator: &mut DistillOrchestrator,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<PauseChoice> {
    loop {
        println!(
            "{}. [r]esume, [l]ist sections, [d N] delete section N, [q]uit",
            capitalize(&orchestrator.status().to_string())
        );
        let line = tokio::select! {
            line = stdin.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(PauseChoice::Quit);
        };
        let mut words = line.split_whitespace();
        match words.next() {
            None | Some("r") | Some("resume") => return Ok(PauseChoice::Resume),
            Some("q") | Some("quit") => return Ok(PauseChoice::Quit),
            Some("l") | Some("list") => {
                for section in orchestrator.sections() {
                    println!("{}", section_line(section));
                }
            }
            Some("d") | Some("delete") => match words.next().and_then(parse_section_number) {
                Some(id) => match orchestrator.delete_section(id) {
                    Ok(removed) => println!("Deleted: {}", removed.title()),
                    Err(e) => println!("{}", e),
                },
                None => println!("Usage: d N, where N is a section number from the list"),
            },
            Some(other) => println!("Unknown command: {}", other),
        }
    }
}

fn write_outputs(orchestrator: &DistillOrchestrator, args: &RunArgs) -> anyhow::Result<()> {
    let source_name = orchestrator.source().map(|s| s.name.as_str());
    let base = export_base_name(source_name);
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let trace_json = if args.trace {
        Some(orchestrator.trace().to_json_pretty()?)
    } else {
        None
    };

    if orchestrator.sections().is_empty() {
        warn!("Nothing to export: no sections accepted");
    } else {
        let config = orchestrator.config();
        let meta = ExportMeta::new(
            source_name,
            &config.model,
            config.temperature,
            orchestrator.sections().len(),
        );
        let body = orchestrator.combined_text();
        let md_path = args.out_dir.join(format!("{}.md", base));
        std::fs::write(&md_path, render_markdown(&meta, &body))
            .with_context(|| format!("Failed to write {}", md_path.display()))?;
        let txt_path = args.out_dir.join(format!("{}.txt", base));
        std::fs::write(&txt_path, render_text(&meta, &body))
            .with_context(|| format!("Failed to write {}", txt_path.display()))?;
        println!("Wrote {} and {}", md_path.display(), txt_path.display());

        if args.pdf {
            let pdf_path = args.out_dir.join(format!("{}.pdf", base));
            let pdf = render_pdf(&meta, &body, trace_json.as_deref())?;
            std::fs::write(&pdf_path, pdf)
                .with_context(|| format!("Failed to write {}", pdf_path.display()))?;
            println!("Wrote {}", pdf_path.display());
        }
    }

    if let Some(trace_json) = &trace_json {
        let trace_path = args.out_dir.join(format!("{}.trace.json", base));
        std::fs::write(&trace_path, trace_json)
            .with_context(|| format!("Failed to write {}", trace_path.display()))?;
        println!("Wrote {}", trace_path.display());
    }
    Ok(())
}

/// Print events as they arrive; countdowns are reported once per wait.
async fn print_events(mut rx: UnboundedReceiver<DistillEvent>) {
    let mut retry_shown: Option<(String, u32)> = None;
    let mut wait_shown = false;
    while let Some(event) = rx.recv().await {
        match event {
            DistillEvent::StatusChanged { status, .. } => println!("[status] {}", status),
            DistillEvent::RetryProgress {
                reason,
                attempt,
                max,
                planned_ms,
                last_error,
                ..
            } => {
                let key = (reason.clone(), attempt);
                if retry_shown.as_ref() != Some(&key) {
                    let of = max.map(|m| format!("/{}", m)).unwrap_or_default();
                    println!(
                        "[retry] {} ({}{}), waiting {}s: {}",
                        reason,
                        attempt + 1,
                        of,
                        planned_ms.div_ceil(1000),
                        last_error
                    );
                    retry_shown = Some(key);
                }
            }
            DistillEvent::RetryCleared => retry_shown = None,
            DistillEvent::AutoWaitProgress { planned_ms, .. } => {
                if !wait_shown {
                    println!("[wait] spacing requests, {}s", planned_ms.div_ceil(1000));
                    wait_shown = true;
                }
            }
            DistillEvent::AutoWaitCleared => wait_shown = false,
            DistillEvent::SectionAdded {
                id,
                title,
                estimated_tokens,
            } => println!("[section {}] {} (~{} tokens)", section_number(id), title, estimated_tokens),
            DistillEvent::SectionDeleted { id } => println!("[section {}] deleted", section_number(id)),
            DistillEvent::Notice { level, message } => {
                let tag = match level {
                    NoticeLevel::Info => "info",
                    NoticeLevel::Good => "ok",
                    NoticeLevel::Warn => "warn",
                    NoticeLevel::Bad => "error",
                };
                println!("[{}] {}", tag, message);
            }
        }
    }
}

/// Sections are shown by `id + 1`, which stays stable across deletions.
fn section_number(id: u64) -> u64 {
    id + 1
}

fn parse_section_number(word: &str) -> Option<u64> {
    word.parse::<u64>().ok()?.checked_sub(1)
}

fn section_line(section: &SectionRecord) -> String {
    let usage = section
        .usage_tokens
        .map(|t| format!(", {} reported", t))
        .unwrap_or_default();
    format!(
        "{:>3}. {} (~{} tokens{})",
        section_number(section.id),
        section.title(),
        section.estimated_tokens(),
        usage
    )
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
