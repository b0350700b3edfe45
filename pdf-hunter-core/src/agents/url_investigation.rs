//! Agent D - URL Investigation: filter by priority, then one isolated
//! browser-backed ReAct investigator per in-scope URL, synthesized by an
//! analyst node with no tools (spec §4.8).
//!
//! Implements the URL state machine literally:
//! `New -> (filter) -> {InProgress, NotRelevant}`,
//! `InProgress -> (investigate + analyst) -> {Completed, Failed}`.
//! There are no other transitions and no loops (spec §4.8's diagram).

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::RunConfig;
use crate::error::ErrorKind;
use crate::llm::{complete_structured, ChatMessage, LlmGateway};
use crate::logging::LogSink;
use crate::prompt::escape_for_prompt;
use crate::react::{run_react_loop, ReactStatus, ToolRegistry};
use crate::session::Session;
use crate::state::{
    AnalystFindings, PartialUpdate, PrioritizedUrl, UrlAnalysisResult, UrlAnalystMissionStatus,
    UrlMissionStatus, UrlVerdict,
};
use crate::tools::{
    task_id_for_url, BrowserBackend, BrowserSession, ClickTool, EvaluateTool, FillFormTool,
    NavigateTool, NetworkRequestsTool, ReflectTool, ScreenshotTool, WhoisLookup, WhoisTool,
};

const AGENT: &str = "URLInvestigation";

/// What the model actually returns when synthesizing a transcript: the
/// fields `investigate_one_url` cannot determine on its own (verdict,
/// confidence, narrative). `mission_status` is never model-supplied - the
/// driver's termination status decides it, not the analyst (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "analyst_findings")]
struct AnalystFindingsDraft {
    final_url: String,
    verdict: UrlVerdict,
    confidence: f64,
    summary: String,
    detected_threats: Vec<String>,
    #[structured(optional)]
    domain_whois_record: Option<String>,
    screenshot_paths: Vec<String>,
}

/// `filter_urls`: the only node that moves a URL out of `New` (spec §4.8).
/// Returns `(in_progress, not_relevant)`; nothing is ever dropped, so
/// spec.md's open question ("must every URL reach a terminal state") is
/// answered by construction - every input URL appears in exactly one of
/// the two output lists.
pub fn filter_urls(urls: Vec<PrioritizedUrl>, threshold: u8) -> (Vec<PrioritizedUrl>, Vec<PrioritizedUrl>) {
    let mut in_progress = Vec::new();
    let mut not_relevant = Vec::new();

    for mut url in urls {
        url.mission_status = UrlMissionStatus::filter(url.priority, threshold);
        match url.mission_status {
            UrlMissionStatus::InProgress => in_progress.push(url),
            _ => not_relevant.push(url),
        }
    }

    (in_progress, not_relevant)
}

fn investigator_tools(session: Arc<Mutex<BrowserSession>>, whois: Arc<dyn WhoisLookup>) -> ToolRegistry {
    ToolRegistry::new()
        .register(Arc::new(NavigateTool(session.clone())))
        .register(Arc::new(ClickTool(session.clone())))
        .register(Arc::new(FillFormTool(session.clone())))
        .register(Arc::new(ScreenshotTool(session.clone())))
        .register(Arc::new(EvaluateTool(session.clone())))
        .register(Arc::new(NetworkRequestsTool(session)))
        .register(Arc::new(WhoisTool::new(whois)))
        .register(Arc::new(ReflectTool))
}

const OODA_SYSTEM_PROMPT: &str = "You are investigating a URL found in a suspicious PDF. Follow \
    an Observe-Orient-Decide-Act loop: dismiss any cookie/consent dialog before analysis, follow \
    redirect chains to their final destination, call domain_whois on suspicious root domains, \
    and if you find a credential-harvesting form, fill it with fake credentials to surface the \
    submission endpoint. Use reflect to think without spending an action. JavaScript passed to \
    evaluate must be an arrow function string, e.g. `() => document.title`.";

/// One URL's isolated investigation: opens a browser session rooted at
/// `url_investigation/task_<id>/`, runs the bounded ReAct loop, and returns
/// its outcome. The session is released by `BrowserSession`'s `Drop` guard
/// regardless of how this function returns (spec §5: "always finalised...
/// even on run failure").
async fn investigate_one_url(
    url: &PrioritizedUrl,
    session: &Session,
    gateway: Arc<dyn LlmGateway>,
    browser_backend: Arc<dyn BrowserBackend>,
    whois: Arc<dyn WhoisLookup>,
    config: &RunConfig,
) -> (String, crate::error::Result<crate::react::ReactOutcome>) {
    let task_id = task_id_for_url(&url.url);
    let task_dir = session.url_investigation_task_dir(&task_id);
    if let Err(e) = std::fs::create_dir_all(&task_dir) {
        return (task_id, Err(crate::error::Error::Persistence(e.to_string())));
    }

    let browser_session = match BrowserSession::open(browser_backend.as_ref(), task_id.clone(), task_dir).await {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => return (task_id, Err(e)),
    };

    let tools = investigator_tools(browser_session, whois);
    let system = format!(
        "{OODA_SYSTEM_PROMPT}\n\n<target_url>{}</target_url>\n<priority>{}</priority>\n<reason>{}</reason>",
        escape_for_prompt(&url.url),
        url.priority,
        escape_for_prompt(&url.reason),
    );
    let transcript = vec![ChatMessage::user("Begin your investigation.")];

    let outcome = run_react_loop(
        gateway.as_ref(),
        &tools,
        &system,
        transcript,
        config.react_step_budget,
        config.action_budget_soft,
        config.action_budget_hard,
        config.llm_timeout_tool,
    )
    .await;

    (task_id, outcome)
}

/// A synthetic `AnalystFindings` for a driver error or step/action budget
/// exhaustion - spec.md's `RECURSION_LIMIT -> Inaccessible` mapping. This
/// is the one place driver termination is interpreted, and it is the
/// analyst's job, not the driver's (spec §4.4).
fn inaccessible_findings(reason: String) -> AnalystFindings {
    AnalystFindings {
        final_url: String::new(),
        verdict: UrlVerdict::Inaccessible,
        confidence: 0.0,
        summary: reason,
        detected_threats: vec![],
        domain_whois_record: None,
        screenshot_paths: vec![],
        mission_status: UrlAnalystMissionStatus::Failed,
    }
}

fn collect_screenshot_paths(session: &Session, task_id: &str) -> Vec<String> {
    let dir = session.url_investigation_task_dir(task_id);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return vec![];
    };
    let mut paths: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_string_lossy().to_string())
        .collect();
    paths.sort();
    paths
}

/// `analyze_url_content`: on natural termination, a no-tools structured
/// completion over the transcript; on `Blocked` (step/action budget
/// exhaustion) or a driver error, a synthetic `Inaccessible`/`Failed`
/// result without calling the model at all.
async fn analyze_url_content(
    task_id: &str,
    session: &Session,
    outcome: crate::error::Result<crate::react::ReactOutcome>,
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    update: &mut PartialUpdate,
) -> AnalystFindings {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            update.push_error(AGENT, "investigate_one_url", e.kind(), e.to_string());
            return inaccessible_findings(format!("investigation failed before analysis: {e}"));
        }
    };

    if outcome.was_blocked() {
        update.push_error(
            AGENT,
            "run_investigation",
            ErrorKind::RecursionLimit,
            format!("investigation for task {task_id} blocked: {:?}", outcome.status),
        );
        return inaccessible_findings(format!("investigation blocked: {:?}", outcome.status));
    }

    let system = "Summarize this URL investigation's transcript into a final verdict: the \
        resolved final URL after redirects, a confidence, detected threats, and a WHOIS summary \
        if one was looked up.";
    let messages = vec![ChatMessage::user(format!(
        "<transcript>{}</transcript>",
        escape_for_prompt(&outcome.final_text)
    ))];

    match complete_structured::<AnalystFindingsDraft>(gateway, system, &messages, config.llm_timeout_text).await {
        Ok(draft) => AnalystFindings {
            final_url: draft.final_url,
            verdict: draft.verdict,
            confidence: draft.confidence.clamp(0.0, 1.0),
            summary: draft.summary,
            detected_threats: draft.detected_threats,
            domain_whois_record: draft.domain_whois_record,
            screenshot_paths: {
                let on_disk = collect_screenshot_paths(session, task_id);
                if on_disk.is_empty() { draft.screenshot_paths } else { on_disk }
            },
            mission_status: UrlAnalystMissionStatus::Completed,
        },
        Err(e) => {
            update.push_error(AGENT, "analyze_url_content", e.kind(), e.to_string());
            inaccessible_findings(format!("analyst could not synthesize findings: {e}"))
        }
    }
}

/// `route_url_analysis`: fans one `investigate_one_url` + `analyze_url_content`
/// pair out per `InProgress` URL, in parallel (spec §4.8/§5).
async fn route_url_analysis(
    in_progress: Vec<PrioritizedUrl>,
    session: &Session,
    gateway: Arc<dyn LlmGateway>,
    browser_backend: Arc<dyn BrowserBackend>,
    whois: Arc<dyn WhoisLookup>,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();

    let futures = in_progress.into_iter().map(|url| {
        let gateway = gateway.clone();
        let browser_backend = browser_backend.clone();
        let whois = whois.clone();
        async move {
            let (task_id, outcome) = investigate_one_url(&url, session, gateway.clone(), browser_backend, whois, config).await;
            (url, task_id, outcome)
        }
    });

    let results = join_all(futures).await;

    for (mut url, task_id, outcome) in results {
        let findings = analyze_url_content(&task_id, session, outcome, gateway.as_ref(), config, &mut update).await;

        url.mission_status = match findings.mission_status {
            UrlAnalystMissionStatus::Completed => UrlMissionStatus::Completed,
            UrlAnalystMissionStatus::Failed => UrlMissionStatus::Failed,
        };

        log.event(
            "analyze_url_content",
            "ANALYSIS_COMPLETE",
            serde_json::json!({
                "url": url.url,
                "verdict": findings.verdict,
                "confidence": findings.confidence,
                "mission_status": findings.mission_status,
            }),
        );

        update.url_analysis_results.push(UrlAnalysisResult {
            initial_url: url,
            transcript_summary: findings.summary.clone(),
            findings,
        });
    }

    update
}

/// `save_results`: persists the per-run URL investigation state under
/// `url_investigation/results.json`.
fn save_results(session: &Session, results: &[UrlAnalysisResult], update: &mut PartialUpdate) {
    if let Ok(path) = session.path_for("url_investigation/results.json") {
        match serde_json::to_vec_pretty(results) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    update.push_error(AGENT, "save_results", ErrorKind::PersistenceError, e.to_string());
                }
            }
            Err(e) => update.push_error(AGENT, "save_results", ErrorKind::PersistenceError, e.to_string()),
        }
    }
}

/// Top-level driver: runs the whole URL Investigation subgraph and returns
/// the single `PartialUpdate` the orchestrator merges in. `urls` is the
/// aggregated, pre-investigation list Agent C produced.
pub async fn run(
    urls: Vec<PrioritizedUrl>,
    session: &Session,
    gateway: Arc<dyn LlmGateway>,
    browser_backend: Arc<dyn BrowserBackend>,
    whois: Arc<dyn WhoisLookup>,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let total = urls.len();
    let (in_progress, not_relevant) = filter_urls(urls, config.priority_threshold);

    log.event(
        "filter_urls",
        "FILTER_COMPLETE",
        serde_json::json!({"urls_to_investigate": in_progress.len(), "urls_skipped": not_relevant.len()}),
    );

    let mut update = route_url_analysis(in_progress, session, gateway, browser_backend, whois, config, log).await;

    let mut final_urls: Vec<PrioritizedUrl> = not_relevant;
    final_urls.extend(update.url_analysis_results.iter().map(|r| r.initial_url.clone()));
    debug_assert_eq!(final_urls.len(), total);
    debug_assert!(final_urls.iter().all(|u| u.mission_status.is_terminal()));

    save_results(session, &update.url_analysis_results, &mut update);

    update.final_prioritized_urls = Some(final_urls);
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, ModelSpec, StopReason, TokenUsage, ToolCallOutcome, ToolDefinition};
    use crate::tools::{BrowserError, BrowserHandle};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeHandle;

    #[async_trait]
    impl BrowserHandle for FakeHandle {
        async fn navigate(&self, url: &str) -> std::result::Result<String, BrowserError> {
            Ok(format!("navigated to {url}"))
        }
        async fn click(&self, _selector: &str) -> std::result::Result<(), BrowserError> {
            Ok(())
        }
        async fn fill_form(&self, _selector: &str, _value: &str) -> std::result::Result<(), BrowserError> {
            Ok(())
        }
        async fn screenshot(&self, output_path: &std::path::Path, _forensic: bool) -> std::result::Result<(), BrowserError> {
            std::fs::write(output_path, b"fake png").map_err(|e| BrowserError::Navigation(e.to_string()))
        }
        async fn evaluate(&self, _js: &str) -> std::result::Result<String, BrowserError> {
            Ok("ok".to_string())
        }
        async fn network_requests(&self) -> std::result::Result<Vec<String>, BrowserError> {
            Ok(vec![])
        }
        async fn close(&self) {}
    }

    struct FakeBackend;

    #[async_trait]
    impl BrowserBackend for FakeBackend {
        async fn open(&self, _task_id: &str) -> std::result::Result<Box<dyn BrowserHandle>, BrowserError> {
            Ok(Box::new(FakeHandle))
        }
    }

    struct FakeWhois;

    #[async_trait]
    impl WhoisLookup for FakeWhois {
        async fn lookup(&self, domain: &str) -> crate::error::Result<String> {
            Ok(format!("Registrar: Example Inc.\nDomain: {domain}"))
        }
    }

    struct FakeGateway {
        blocked: bool,
    }

    #[async_trait]
    impl LlmGateway for FakeGateway {
        async fn complete(&self, _s: &str, _m: &[ChatMessage], _d: Duration) -> crate::error::Result<CompletionResponse> {
            unimplemented!()
        }

        async fn complete_structured_raw(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            tool_name: &str,
            _schema: serde_json::Value,
            _deadline: Duration,
        ) -> crate::error::Result<serde_json::Value> {
            assert_eq!(tool_name, "analyst_findings");
            Ok(serde_json::json!({
                "final_url": "http://example.com/",
                "verdict": "benign",
                "confidence": 0.9,
                "summary": "landed on vendor site, no deception observed",
                "detected_threats": [],
                "screenshot_paths": [],
            }))
        }

        async fn complete_with_tools(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _deadline: Duration,
        ) -> crate::error::Result<ToolCallOutcome> {
            if self.blocked {
                let call = crate::llm::ToolCall { id: "c1".into(), name: "reflect".into(), arguments: serde_json::json!({"thought": "still looking"}) };
                Ok(ToolCallOutcome::ToolCalls(CompletionResponse {
                    id: "r".into(),
                    model: "m".into(),
                    content: String::new(),
                    tool_calls: vec![call],
                    stop_reason: Some(StopReason::ToolUse),
                    usage: TokenUsage::default(),
                    timestamp: chrono::Utc::now(),
                    cost: None,
                }))
            } else {
                Ok(ToolCallOutcome::FinalAnswer(CompletionResponse {
                    id: "r".into(),
                    model: "m".into(),
                    content: "navigated and confirmed vendor site".into(),
                    tool_calls: vec![],
                    stop_reason: Some(StopReason::EndTurn),
                    usage: TokenUsage::default(),
                    timestamp: chrono::Utc::now(),
                    cost: None,
                }))
            }
        }

        fn default_model(&self) -> ModelSpec {
            ModelSpec::claude_sonnet()
        }
    }

    fn session(tmp: &std::path::Path) -> Session {
        let input = tmp.join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let config = RunConfig::new(tmp);
        let (session, _) = crate::agents::extraction::setup_session(&input, &config, chrono::Utc::now(), None, None).unwrap();
        session
    }

    #[test]
    fn filter_urls_splits_by_priority_threshold() {
        let urls = vec![
            PrioritizedUrl::new("http://a", 0, 3, "r", "c"),
            PrioritizedUrl::new("http://b", 0, 8, "r", "c"),
        ];
        let (in_progress, not_relevant) = filter_urls(urls, 5);

        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].mission_status, UrlMissionStatus::InProgress);
        assert_eq!(not_relevant.len(), 1);
        assert_eq!(not_relevant[0].mission_status, UrlMissionStatus::NotRelevant);
    }

    #[test]
    fn filter_urls_never_drops_a_url() {
        let urls = vec![PrioritizedUrl::new("http://a", 0, 1, "r", "c")];
        let (in_progress, not_relevant) = filter_urls(urls, 5);
        assert_eq!(in_progress.len() + not_relevant.len(), 1);
    }

    #[tokio::test]
    async fn empty_url_list_still_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let session = session(tmp.path());
        let config = RunConfig::new(tmp.path());
        let log = LogSink::noop("s1", AGENT);
        let gateway: Arc<dyn LlmGateway> = Arc::new(FakeGateway { blocked: false });
        let backend: Arc<dyn BrowserBackend> = Arc::new(FakeBackend);
        let whois: Arc<dyn WhoisLookup> = Arc::new(FakeWhois);

        let update = run(vec![], &session, gateway, backend, whois, &config, &log).await;

        assert!(update.final_prioritized_urls.unwrap().is_empty());
        assert!(update.url_analysis_results.is_empty());
    }

    #[tokio::test]
    async fn every_investigated_url_reaches_a_terminal_status() {
        let tmp = tempfile::tempdir().unwrap();
        let session = session(tmp.path());
        let config = RunConfig::new(tmp.path()).with_priority_threshold(5);
        let log = LogSink::noop("s2", AGENT);
        let gateway: Arc<dyn LlmGateway> = Arc::new(FakeGateway { blocked: false });
        let backend: Arc<dyn BrowserBackend> = Arc::new(FakeBackend);
        let whois: Arc<dyn WhoisLookup> = Arc::new(FakeWhois);

        let urls = vec![
            PrioritizedUrl::new("http://suspicious.example", 0, 2, "embedded link", "annotation"),
            PrioritizedUrl::new("http://irrelevant.example", 0, 9, "low priority", "text"),
        ];

        let update = run(urls, &session, gateway, backend, whois, &config, &log).await;

        let finals = update.final_prioritized_urls.unwrap();
        assert_eq!(finals.len(), 2);
        assert!(finals.iter().all(|u| u.mission_status.is_terminal()));
        assert_eq!(update.url_analysis_results.len(), 1);
        assert_eq!(update.url_analysis_results[0].findings.verdict, UrlVerdict::Benign);
    }

    #[tokio::test]
    async fn step_budget_exhaustion_maps_to_inaccessible_and_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let session = session(tmp.path());
        let config = RunConfig::new(tmp.path()).with_priority_threshold(5);
        let config = RunConfig { react_step_budget: 1, ..config };
        let log = LogSink::noop("s3", AGENT);
        let gateway: Arc<dyn LlmGateway> = Arc::new(FakeGateway { blocked: true });
        let backend: Arc<dyn BrowserBackend> = Arc::new(FakeBackend);
        let whois: Arc<dyn WhoisLookup> = Arc::new(FakeWhois);

        let urls = vec![PrioritizedUrl::new("http://stuck.example", 0, 1, "r", "c")];

        let update = run(urls, &session, gateway, backend, whois, &config, &log).await;

        let finals = update.final_prioritized_urls.unwrap();
        assert_eq!(finals[0].mission_status, UrlMissionStatus::Failed);
        assert_eq!(update.url_analysis_results[0].findings.verdict, UrlVerdict::Inaccessible);
        assert!(update.errors.iter().any(|e| e.kind == ErrorKind::RecursionLimit));
    }
}
