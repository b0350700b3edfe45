//! Agent E - Report Generator: the barrier's sole consumer. Synthesizes a
//! `FinalVerdict` over the merged `RunState`, writes the Markdown report,
//! and persists every artifact spec.md §6's filesystem layout names (spec
//! §4.9).

use std::time::Duration;

use crate::error::ErrorKind;
use crate::llm::{complete_structured, ChatMessage, LlmGateway};
use crate::logging::LogSink;
use crate::prompt::escape_for_prompt;
use crate::session::Session;
use crate::state::{FinalVerdict, PartialUpdate, RunState};

const AGENT: &str = "ReportGenerator";

fn run_state_digest(state: &RunState) -> String {
    serde_json::to_string_pretty(state).unwrap_or_else(|_| "{}".to_string())
}

fn error_summary(state: &RunState) -> String {
    if state.errors.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = state
        .errors
        .iter()
        .map(|e| format!("- [{}/{}] {}: {}", e.agent, e.node, e.kind, e.message))
        .collect();
    lines.join("\n")
}

/// `determine_threat_verdict`: one forced structured completion over the
/// entire merged `RunState`. If this fails the run cannot classify - a
/// degraded `FinalVerdict` is still produced so a caller always has
/// *something* to act on (spec.md §7: never silently drop the only
/// user-visible output).
async fn determine_threat_verdict(
    state: &RunState,
    gateway: &dyn LlmGateway,
    timeout: Duration,
    update: &mut PartialUpdate,
) -> FinalVerdict {
    let system = "You are the final arbiter of a PDF forensic triage run. Review the complete \
        investigation state - static file analysis missions, image/page analysis, URL \
        investigation findings, and any errors encountered - and produce one final verdict. \
        Malicious requires concrete evidence of an exploit, credential harvesting, or a \
        deception chain actually reaching a payload; Suspicious covers anomalies without \
        confirmed intent; Benign means nothing actionable was found.";
    let messages = vec![ChatMessage::user(format!(
        "<run_state>{}</run_state>",
        escape_for_prompt(&run_state_digest(state))
    ))];

    match complete_structured::<FinalVerdict>(gateway, system, &messages, timeout).await {
        Ok(verdict) => verdict,
        Err(e) => {
            update.push_error(AGENT, "determine_threat_verdict", e.kind(), e.to_string());
            FinalVerdict {
                verdict: crate::state::Verdict::Suspicious,
                confidence: 0.0,
                key_findings: vec!["verdict synthesis failed; see errors".to_string()],
                reasoning: format!("could not determine a verdict: {e}"),
            }
        }
    }
}

/// `generate_final_report`: free-text Markdown, prompted to stay consistent
/// with the already-decided verdict and to surface a "Limitations" section
/// whenever `errors` is non-empty (spec.md §7's user-visible failure
/// behavior).
async fn generate_final_report(
    state: &RunState,
    verdict: &FinalVerdict,
    gateway: &dyn LlmGateway,
    timeout: Duration,
    update: &mut PartialUpdate,
) -> String {
    let errors = error_summary(state);
    let system = "Write a Markdown forensic triage report for a human analyst. Open with the \
        verdict and confidence, then Evidence, then Recommendations. If a Limitations section's \
        inputs are provided, include a Limitations section listing them verbatim. Stay strictly \
        consistent with the verdict already decided - do not contradict it.";
    let findings = verdict.key_findings.join("\n- ");
    let user_content = if errors.is_empty() {
        format!(
            "<verdict>{:?}</verdict>\n<confidence>{}</confidence>\n<key_findings>\n- {}\n</key_findings>\n<reasoning>{}</reasoning>",
            verdict.verdict,
            verdict.confidence,
            escape_for_prompt(&findings),
            escape_for_prompt(&verdict.reasoning),
        )
    } else {
        format!(
            "<verdict>{:?}</verdict>\n<confidence>{}</confidence>\n<key_findings>\n- {}\n</key_findings>\n<reasoning>{}</reasoning>\n<errors>\n{}\n</errors>",
            verdict.verdict,
            verdict.confidence,
            escape_for_prompt(&findings),
            escape_for_prompt(&verdict.reasoning),
            escape_for_prompt(&errors),
        )
    };
    let messages = vec![ChatMessage::user(user_content)];

    match gateway.complete(system, &messages, timeout).await {
        Ok(response) => response.content,
        Err(e) => {
            update.push_error(AGENT, "generate_final_report", e.kind(), e.to_string());
            format!(
                "# PDF Hunter Report (degraded)\n\nVerdict: {:?} (confidence {})\n\n{}\n\nReport \
                 text generation failed: {e}",
                verdict.verdict, verdict.confidence, verdict.reasoning
            )
        }
    }
}

/// `save_analysis_results`: writes the three artifacts spec.md §6 names.
/// A failure here is fatal (spec.md §7: "fatal only if it affects the
/// final report write"), so this returns `Result` rather than
/// accumulating an `ErrorRecord` like every other persistence point in
/// this crate.
fn save_analysis_results(session: &Session, state: &RunState, report_markdown: &str) -> crate::error::Result<()> {
    let session_id = session.session_id();

    let final_state_path = session.path_for(format!("report_generator/final_state_session_{session_id}.json"))?;
    let final_state_json = serde_json::to_vec_pretty(state).map_err(crate::error::Error::Serialization)?;
    std::fs::write(&final_state_path, final_state_json)
        .map_err(|e| crate::error::Error::Persistence(format!("final state write failed: {e}")))?;

    let final_report_path = session.path_for(format!("report_generator/final_report_session_{session_id}.md"))?;
    std::fs::write(&final_report_path, report_markdown.as_bytes())
        .map_err(|e| crate::error::Error::Persistence(format!("final report write failed: {e}")))?;

    let convenience_path = session.path_for(format!("analysis_report_session_{session_id}.json"))?;
    std::fs::copy(&final_state_path, &convenience_path)
        .map_err(|e| crate::error::Error::Persistence(format!("convenience copy write failed: {e}")))?;

    Ok(())
}

/// Top-level Agent E entry point. Always returns a `PartialUpdate` with
/// `final_verdict` and `final_report_markdown` set, even in the degraded
/// cases above - only the persistence step can make this function's caller
/// treat the run as failed.
pub async fn run(
    state: &RunState,
    session: &Session,
    gateway: &dyn LlmGateway,
    llm_timeout_text: Duration,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();

    let verdict = determine_threat_verdict(state, gateway, llm_timeout_text, &mut update).await;
    log.event(
        "determine_threat_verdict",
        "VERDICT_DETERMINED",
        serde_json::json!({"verdict": verdict.verdict, "confidence": verdict.confidence}),
    );

    let report_markdown = generate_final_report(state, &verdict, gateway, llm_timeout_text, &mut update).await;

    let mut full_state = state.clone();
    full_state.final_verdict = Some(verdict.clone());
    full_state.final_report_markdown = Some(report_markdown.clone());
    full_state.merge_additive(update.clone());

    if let Err(e) = save_analysis_results(session, &full_state, &report_markdown) {
        update.push_error(AGENT, "save_analysis_results", ErrorKind::PersistenceError, e.to_string());
    } else {
        log.event("save_analysis_results", "REPORT_SAVED", serde_json::json!({"session_id": session.session_id()}));
    }

    update.final_verdict = Some(verdict);
    update.final_report_markdown = Some(report_markdown);
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, ModelSpec, StopReason, TokenUsage, ToolCallOutcome, ToolDefinition};
    use crate::state::Verdict;
    use async_trait::async_trait;

    struct FakeGateway {
        fail_structured: bool,
        fail_text: bool,
    }

    #[async_trait]
    impl LlmGateway for FakeGateway {
        async fn complete(&self, _system: &str, _messages: &[ChatMessage], _deadline: Duration) -> crate::error::Result<CompletionResponse> {
            if self.fail_text {
                return Err(crate::error::Error::llm_timeout(60_000));
            }
            Ok(CompletionResponse {
                id: "r".into(),
                model: "m".into(),
                content: "# Report\n\nVerdict: Malicious".into(),
                tool_calls: vec![],
                stop_reason: Some(StopReason::EndTurn),
                usage: TokenUsage::default(),
                timestamp: chrono::Utc::now(),
                cost: None,
            })
        }

        async fn complete_structured_raw(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            tool_name: &str,
            _schema: serde_json::Value,
            _deadline: Duration,
        ) -> crate::error::Result<serde_json::Value> {
            if self.fail_structured {
                return Err(crate::error::Error::LlmSchemaError("bad output".into()));
            }
            assert_eq!(tool_name, "final_verdict");
            Ok(serde_json::json!({
                "verdict": "malicious",
                "confidence": 0.95,
                "key_findings": ["embedded JavaScript launches a remote payload"],
                "reasoning": "OpenAction triggers /JS which fetches and executes a second stage",
            }))
        }

        async fn complete_with_tools(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _deadline: Duration,
        ) -> crate::error::Result<ToolCallOutcome> {
            unimplemented!()
        }

        fn default_model(&self) -> ModelSpec {
            ModelSpec::claude_sonnet()
        }
    }

    fn session(tmp: &std::path::Path) -> Session {
        let input = tmp.join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let config = crate::config::RunConfig::new(tmp);
        let (session, _) = crate::agents::extraction::setup_session(&input, &config, chrono::Utc::now(), None, None).unwrap();
        session
    }

    #[tokio::test]
    async fn run_produces_a_verdict_and_persists_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let session = session(tmp.path());
        let gateway = FakeGateway { fail_structured: false, fail_text: false };
        let log = LogSink::noop(session.session_id(), AGENT);
        let state = RunState::new();

        let update = run(&state, &session, &gateway, Duration::from_secs(5), &log).await;

        let verdict = update.final_verdict.unwrap();
        assert_eq!(verdict.verdict, Verdict::Malicious);
        assert!(update.final_report_markdown.unwrap().contains("Malicious"));

        let id = session.session_id();
        assert!(session.root().join(format!("report_generator/final_state_session_{id}.json")).exists());
        assert!(session.root().join(format!("report_generator/final_report_session_{id}.md")).exists());
        assert!(session.root().join(format!("analysis_report_session_{id}.json")).exists());
    }

    #[tokio::test]
    async fn structured_output_failure_yields_degraded_verdict_not_a_crash() {
        let tmp = tempfile::tempdir().unwrap();
        let session = session(tmp.path());
        let gateway = FakeGateway { fail_structured: true, fail_text: false };
        let log = LogSink::noop(session.session_id(), AGENT);
        let state = RunState::new();

        let update = run(&state, &session, &gateway, Duration::from_secs(5), &log).await;

        let verdict = update.final_verdict.unwrap();
        assert_eq!(verdict.verdict, Verdict::Suspicious);
        assert_eq!(verdict.confidence, 0.0);
        assert!(update.errors.iter().any(|e| e.kind == ErrorKind::LlmSchemaError));
    }

    #[tokio::test]
    async fn report_text_failure_falls_back_to_a_degraded_markdown_report() {
        let tmp = tempfile::tempdir().unwrap();
        let session = session(tmp.path());
        let gateway = FakeGateway { fail_structured: false, fail_text: true };
        let log = LogSink::noop(session.session_id(), AGENT);
        let state = RunState::new();

        let update = run(&state, &session, &gateway, Duration::from_secs(5), &log).await;

        let report = update.final_report_markdown.unwrap();
        assert!(report.contains("degraded"));
        assert!(update.errors.iter().any(|e| e.kind == ErrorKind::LlmTimeout));
    }

    #[test]
    fn error_summary_formats_one_line_per_record() {
        let mut state = RunState::new();
        state.push_error("FileAnalysis", "run_investigation", ErrorKind::ToolError, "pdf-parser crashed");
        let summary = error_summary(&state);
        assert!(summary.contains("FileAnalysis/run_investigation"));
        assert!(summary.contains("pdf-parser crashed"));
    }
}
