//! The orchestrator: wires the five agents into one run.
//!
//! `run` never returns `Result` at the top level: a run is `COMPLETE` iff
//! Agent E produced a `FinalVerdict`, otherwise it is `FAILED` with
//! `errors` explaining why — that classification lives inside the returned
//! `RunState`, not as an `Err`, so partial results are always available to
//! the caller. Sequencing is `A`; `futures::join!(B, C -> D)`;
//! `merge_additive`; `E` — a fixed, explicit `async fn` pipeline rather than
//! a generic engine that walks `Graph` at runtime.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::RunConfig;
use crate::error::{Error, ErrorKind};
use crate::llm::LlmGateway;
use crate::logging::LogSink;
use crate::session::Session;
use crate::state::{PartialUpdate, RunInput, RunState};
use crate::tools::{BrowserBackend, ExtractionTools, PdfParserTool, StaticScannerTool, WhoisLookup};

const AGENT: &str = "Orchestrator";

/// Every trait object an investigation run needs, bundled by `Arc` so the
/// orchestrator can hand clones into concurrently-spawned branches —
/// long-lived clients are passed around as shared handles, never by value.
#[derive(Clone)]
pub struct Dependencies {
    pub gateway: Arc<dyn LlmGateway>,
    pub extraction: Arc<ExtractionTools>,
    pub scanner: Arc<dyn StaticScannerTool>,
    pub parser: Arc<dyn PdfParserTool>,
    pub browser_backend: Arc<dyn BrowserBackend>,
    pub whois: Arc<dyn WhoisLookup>,
}

/// RAII session-cleanup guard: logs a `RUN_FINISHED` event on drop, so
/// cleanup runs on every exit path without an explicit try/finally helper.
struct RunGuard<'a> {
    log: &'a LogSink,
    session_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.log.event("run", "RUN_FINISHED", serde_json::json!({"session_id": self.session_id}));
    }
}

async fn run_extraction(input: &RunInput, session: &Session, deps: &Dependencies, log: &LogSink) -> PartialUpdate {
    let pdf_path = input.file_path.as_path();
    let images_update = crate::agents::extraction::extract_pdf_images(
        pdf_path,
        session,
        input.pages_to_process,
        &deps.extraction.renderer,
        log,
    )
    .await;

    let mut update = PartialUpdate::new();
    update.page_count = Some(images_update.extracted_images.len() as u32);
    update.merge_additive(images_update);

    let urls_update = crate::agents::extraction::find_embedded_urls(pdf_path, &update.extracted_images, &deps.extraction.text_source, log);
    update.merge_additive(urls_update);

    let qr_update = crate::agents::extraction::scan_qr_codes(&update.extracted_images, &deps.extraction.qr_decoder, log);
    update.merge_additive(qr_update);

    update
}

async fn run_b(pdf_path: &Path, session: &Session, deps: &Dependencies, config: &RunConfig, log: &LogSink) -> PartialUpdate {
    crate::agents::file_analysis::run(
        pdf_path,
        session,
        deps.gateway.clone(),
        deps.scanner.clone(),
        deps.parser.clone(),
        config,
        log,
    )
    .await
}

/// The C -> D chain: Agent C's prioritized URLs feed directly into Agent D's
/// filter/investigate stage.
async fn run_c_then_d(
    images: &[crate::state::ExtractedImage],
    extracted_urls: &[crate::state::ExtractedUrl],
    session: &Session,
    deps: &Dependencies,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let c_update = crate::agents::image_analysis::run(images, extracted_urls, session, deps.gateway.as_ref(), config, log).await;

    let urls = c_update
        .image_analysis_report
        .as_ref()
        .map(|r| r.prioritized_urls.clone())
        .unwrap_or_default();

    let d_update = crate::agents::url_investigation::run(
        urls,
        session,
        deps.gateway.clone(),
        deps.browser_backend.clone(),
        deps.whois.clone(),
        config,
        log,
    )
    .await;

    let mut update = c_update;
    update.merge_additive(d_update);
    update
}

/// A best-effort, partial-`RunState` call into Agent E for the
/// `global_super_step_budget` abort path: a verdict is attempted even when
/// the run is cut short, so a caller never receives a `RunState` with no
/// `final_verdict` at all if E can still be reached.
async fn run_e(state: &RunState, session: &Session, deps: &Dependencies, config: &RunConfig, log: &LogSink) -> PartialUpdate {
    crate::agents::report::run(state, session, deps.gateway.as_ref(), config.llm_timeout_text, log).await
}

/// Runs the whole five-agent pipeline and returns the terminal `RunState`.
/// Never panics on agent failure; only an unreadable input file during
/// session setup aborts before any artifacts exist.
pub async fn run(input: RunInput, config: RunConfig, deps: &Dependencies) -> RunState {
    let started_at = chrono::DateTime::<chrono::Utc>::from(SystemTime::now());

    if input.pages_to_process == 0 {
        let mut state = RunState::new();
        let e = Error::Input("pages_to_process must be >= 1".to_string());
        state.push_error(AGENT, "setup_session", e.kind(), e.to_string());
        return state;
    }

    let (session, update) = match crate::agents::extraction::setup_session(
        &input.file_path,
        &config,
        started_at,
        input.session_id.as_deref(),
        input.output_directory.as_deref(),
    ) {
        Ok(pair) => pair,
        Err(e) => {
            let mut state = RunState::new();
            state.push_error(AGENT, "setup_session", e.kind(), e.to_string());
            return state;
        }
    };
    let mut state = update;

    let log = LogSink::spawn(session.session_id().to_string(), AGENT, session.logs_dir().join("session.jsonl"));
    let _guard = RunGuard { log: &log, session_id: session.session_id().to_string() };

    log.event(
        "setup_session",
        "SESSION_CREATED",
        serde_json::json!({"session_id": session.session_id(), "output_directory": session.root().to_string_lossy()}),
    );

    let mut super_steps = 0u32;
    macro_rules! step_or_abort {
        () => {{
            super_steps += 1;
            if super_steps > config.global_super_step_budget {
                state.push_error(
                    AGENT,
                    "run",
                    ErrorKind::RecursionLimit,
                    format!("global super-step budget ({}) exhausted", config.global_super_step_budget),
                );
                let report_log = log.for_agent("ReportGenerator");
                let report_update = run_e(&state, &session, deps, &config, &report_log).await;
                state.merge_additive(report_update);
                return state;
            }
        }};
    }

    step_or_abort!();
    let extraction_update = run_extraction(&input, &session, deps, &log.for_agent("PdfExtraction")).await;
    state.merge_additive(extraction_update);

    step_or_abort!();
    let pdf_path = input.file_path.clone();
    let images = state.extracted_images.clone();
    let extracted_urls = state.extracted_urls.clone();

    let (b_update, cd_update) = futures::join!(
        run_b(&pdf_path, &session, deps, &config, &log.for_agent("FileAnalysis")),
        run_c_then_d(&images, &extracted_urls, &session, deps, &config, &log.for_agent("ImageAnalysis")),
    );
    state.merge_additive(b_update);
    state.merge_additive(cd_update);

    step_or_abort!();
    let report_update = run_e(&state, &session, deps, &config, &log.for_agent("ReportGenerator")).await;
    state.merge_additive(report_update);

    state
}
