//! Agent B - File Analysis: triage -> mission planning -> parallel ReAct
//! investigators -> bounded review -> evidence merge -> final report.
//!
//! The largest agent (spec's own size budget gives it the largest share).
//! Every node returns a [`PartialUpdate`] the orchestrator merges in; a
//! single mission's failure never aborts the agent (spec §4.6).

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RunConfig;
use crate::error::ErrorKind;
use crate::llm::{complete_structured, ChatMessage, LlmGateway};
use crate::logging::LogSink;
use crate::prompt::escape_for_prompt;
use crate::react::{run_react_loop, ReactStatus, Tool, ToolRegistry};
use crate::session::Session;
use crate::state::{
    EvidenceEdge, EvidenceEdgeType, EvidenceGraph, EvidenceNode, InvestigationMission,
    MissionReport, MissionStatus, PartialUpdate, StaticAnalysisFinalReport,
};
use crate::tools::{PdfDumpStreamTool, PdfObjectContentTool, PdfObjectTools, PdfParserTool, ReflectTool, StaticScannerTool};

const AGENT: &str = "FileAnalysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageDecision {
    Innocent,
    Suspicious,
    Malicious,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "triage_result")]
pub struct TriageResult {
    pub decision: TriageDecision,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionDraft {
    pub mission_id: String,
    pub description: String,
    pub threat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "mission_batch")]
pub struct MissionBatch {
    pub missions: Vec<MissionDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "mission_review")]
pub struct MissionReview {
    pub additional_missions: Vec<MissionDraft>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvidenceNodeDraft {
    object_id: String,
    label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvidenceEdgeDraft {
    src: String,
    dst: String,
    edge_type: EvidenceEdgeType,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "mission_findings")]
struct MissionFindingsDraft {
    summary: String,
    evidence_nodes: Vec<EvidenceNodeDraft>,
    evidence_edges: Vec<EvidenceEdgeDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "final_report_draft")]
struct FinalReportDraft {
    verdict_summary: String,
    iocs: Vec<String>,
}

/// `triage`: runs the external static scanner trio, asks the model for a
/// go/no-go decision. `Innocent` short-circuits the caller straight to
/// `compile_file_analysis` (spec.md's "skips investigation entirely" rule).
pub async fn triage(
    pdf_path: &Path,
    scanner: &Arc<dyn StaticScannerTool>,
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    log: &LogSink,
) -> Result<TriageResult, PartialUpdate> {
    let mut update = PartialUpdate::new();

    let reports = match scanner.scan(pdf_path).await {
        Ok(reports) => reports,
        Err(e) => {
            update.push_error(AGENT, "triage", ErrorKind::ToolError, e.to_string());
            vec![]
        }
    };

    let mut summary = String::from("Static scanner findings:\n");
    for report in &reports {
        summary.push_str(&format!(
            "- {}: {}\n  indicators: {}\n",
            escape_for_prompt(&report.scanner),
            escape_for_prompt(&report.summary),
            report
                .suspicious_indicators
                .iter()
                .map(|i| escape_for_prompt(i))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if reports.is_empty() {
        summary.push_str("(no scanner output available)\n");
    }

    let system = "You are a PDF forensic triage analyst. Decide whether the static scanner \
        findings below warrant a full investigation, or whether the file is innocent.";
    let messages = vec![ChatMessage::user(format!("<scan_reports>\n{summary}</scan_reports>"))];

    match complete_structured::<TriageResult>(gateway, system, &messages, config.llm_timeout_text).await {
        Ok(result) => {
            log.event(
                "triage",
                "TRIAGE_COMPLETE",
                serde_json::json!({"decision": result.decision, "scanner_count": reports.len()}),
            );
            Ok(result)
        }
        Err(e) => {
            update.push_error(AGENT, "triage", e.kind(), e.to_string());
            Err(update)
        }
    }
}

/// `create_analysis_tasks`: asks the model for a batch of investigation
/// missions, enforcing `mission_id` uniqueness against `existing_ids` with
/// one re-prompt on collision (spec.md's `MissionIdRegistry` rule).
pub async fn create_analysis_tasks(
    triage: &TriageResult,
    existing_ids: &HashSet<String>,
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();
    let system = "You are planning file-analysis missions for a suspicious PDF. Each mission \
        investigates one concrete threat hypothesis. Mission ids must be unique and follow \
        `mission_<threat_type>_<NNN>`.";
    let messages = vec![ChatMessage::user(format!(
        "<triage_reasoning>{}</triage_reasoning>",
        escape_for_prompt(&triage.reasoning)
    ))];

    let mut seen: HashSet<String> = existing_ids.clone();

    let mut batch = match complete_structured::<MissionBatch>(gateway, system, &messages, config.llm_timeout_text).await {
        Ok(batch) => batch,
        Err(e) => {
            update.push_error(AGENT, "create_analysis_tasks", e.kind(), e.to_string());
            return update;
        }
    };

    if batch.missions.iter().any(|m| seen.contains(&m.mission_id)) {
        let retry_messages = vec![
            messages[0].clone(),
            ChatMessage::user(
                "One or more mission_id values collided with an existing mission. Re-plan the \
                 batch with fresh, unique mission_ids.",
            ),
        ];
        match complete_structured::<MissionBatch>(gateway, system, &retry_messages, config.llm_timeout_text).await {
            Ok(retried) => batch = retried,
            Err(e) => update.push_error(AGENT, "create_analysis_tasks", e.kind(), e.to_string()),
        }
    }

    for (i, draft) in batch.missions.into_iter().enumerate() {
        let mission_id = if seen.insert(draft.mission_id.clone()) {
            draft.mission_id
        } else {
            let mangled = format!("{}_{i}", draft.mission_id);
            update.push_error(
                AGENT,
                "create_analysis_tasks",
                ErrorKind::LlmSchemaError,
                format!("duplicate mission_id `{}` mangled to `{mangled}`", draft.mission_id),
            );
            seen.insert(mangled.clone());
            mangled
        };

        update.missions.push(InvestigationMission {
            mission_id,
            description: draft.description,
            threat_type: draft.threat_type,
            status: MissionStatus::Pending,
        });
    }

    log.event(
        "create_analysis_tasks",
        "MISSIONS_CREATED",
        serde_json::json!({"mission_count": update.missions.len()}),
    );

    update
}

/// `assign_analysis_tasks`: the next `Pending` mission by creation order, or
/// `None` (spec.md's `NO_PENDING_MISSIONS` sentinel) when exhausted.
pub fn assign_analysis_tasks(missions: &[InvestigationMission]) -> Option<&InvestigationMission> {
    missions.iter().find(|m| m.status == MissionStatus::Pending)
}

/// Build the tool registry one mission's ReAct loop sees: the PDF object
/// parser trio plus `reflect`.
fn mission_tools(pdf_path: &Path, dump_dir: std::path::PathBuf, parser: Arc<dyn PdfParserTool>) -> ToolRegistry {
    let shared = Arc::new(PdfObjectTools::new(pdf_path.to_path_buf(), dump_dir, parser));
    ToolRegistry::new()
        .register(shared.clone())
        .register(Arc::new(PdfObjectContentTool(shared.clone())))
        .register(Arc::new(PdfDumpStreamTool(shared)))
        .register(Arc::new(ReflectTool))
}

/// `run_investigation`: fans every `Pending` mission out to its own
/// `run_react_loop`, in parallel. A mission's step/action-budget exhaustion
/// or LLM error never aborts the batch (spec.md §4.6).
pub async fn run_investigation(
    pdf_path: &Path,
    session: &Session,
    missions: Vec<InvestigationMission>,
    gateway: Arc<dyn LlmGateway>,
    parser: Arc<dyn PdfParserTool>,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();

    let futures = missions.into_iter().map(|mission| {
        let gateway = gateway.clone();
        let parser = parser.clone();
        let pdf_path = pdf_path.to_path_buf();
        let dump_dir = session.file_analysis_dir();
        let config = config.clone();
        let log = log.for_agent(format!("{AGENT}.{}", mission.mission_id));

        async move {
            let tools = mission_tools(&pdf_path, dump_dir, parser);
            let system = format!(
                "You are investigating mission `{}`: {}. Threat type: {}. Use the PDF object \
                 tools to gather evidence; call `reflect` to think out loud without spending an \
                 action. When you have enough evidence, stop calling tools and summarize.",
                mission.mission_id, mission.description, mission.threat_type,
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

            (mission, outcome, log)
        }
    });

    let results = join_all(futures).await;

    for (mut mission, outcome, log) in results {
        match outcome {
            Ok(outcome) if outcome.status == ReactStatus::Done => {
                let findings_system = "Summarize this investigation's findings: evidence \
                    (PDF object ids and how they relate), and a concise summary.";
                let findings_messages = vec![ChatMessage::user(format!(
                    "<transcript>{}</transcript>",
                    escape_for_prompt(&outcome.final_text)
                ))];

                match complete_structured::<MissionFindingsDraft>(
                    gateway.as_ref(),
                    findings_system,
                    &findings_messages,
                    config.llm_timeout_text,
                )
                .await
                {
                    Ok(draft) => {
                        mission.status = MissionStatus::Completed;
                        let mut graph = EvidenceGraph::default();
                        graph.nodes = draft
                            .evidence_nodes
                            .into_iter()
                            .map(|n| EvidenceNode { object_id: n.object_id, label: n.label })
                            .collect();
                        graph.edges = draft
                            .evidence_edges
                            .into_iter()
                            .map(|e| EvidenceEdge { src: e.src, dst: e.dst, edge_type: e.edge_type })
                            .collect();
                        update
                            .master_evidence_graph
                            .get_or_insert_with(EvidenceGraph::default)
                            .merge(&graph);
                        update.link_analysis_final_reports.push(MissionReport {
                            mission_id: mission.mission_id.clone(),
                            status: MissionStatus::Completed,
                            summary: draft.summary,
                        });
                        log.event(
                            "run_investigation",
                            "INVESTIGATION_COMPLETE",
                            serde_json::json!({"mission_id": mission.mission_id}),
                        );
                    }
                    Err(e) => {
                        mission.status = MissionStatus::Failed;
                        update.push_error(AGENT, "run_investigation", e.kind(), e.to_string());
                        update.link_analysis_final_reports.push(MissionReport {
                            mission_id: mission.mission_id.clone(),
                            status: MissionStatus::Failed,
                            summary: "analyst could not synthesize findings".to_string(),
                        });
                    }
                }
            }
            Ok(outcome) => {
                mission.status = MissionStatus::Blocked;
                update.link_analysis_final_reports.push(MissionReport {
                    mission_id: mission.mission_id.clone(),
                    status: MissionStatus::Blocked,
                    summary: format!("investigation blocked: {:?}", outcome.status),
                });
                log.event(
                    "run_investigation",
                    "INVESTIGATION_BLOCKED",
                    serde_json::json!({"mission_id": mission.mission_id, "status": format!("{:?}", outcome.status)}),
                );
            }
            Err(e) => {
                mission.status = MissionStatus::Failed;
                update.push_error(AGENT, "run_investigation", e.kind(), e.to_string());
                update.link_analysis_final_reports.push(MissionReport {
                    mission_id: mission.mission_id.clone(),
                    status: MissionStatus::Failed,
                    summary: "react loop returned an error".to_string(),
                });
            }
        }

        update.missions.push(mission);
    }

    update
}

/// `review_analysis_results`: asks the model whether the current findings
/// warrant additional missions, up to `config.review_rounds_max` rounds.
pub async fn review_analysis_results(
    reports: &[MissionReport],
    gateway: &dyn LlmGateway,
    config: &RunConfig,
) -> Result<Vec<MissionDraft>, crate::error::Error> {
    let system = "Review these file-analysis mission reports. If a genuine gap remains, propose \
        additional missions; otherwise return an empty list.";
    let mut body = String::new();
    for report in reports {
        body.push_str(&format!(
            "- {} [{:?}]: {}\n",
            report.mission_id,
            report.status,
            escape_for_prompt(&report.summary)
        ));
    }
    let messages = vec![ChatMessage::user(format!("<mission_reports>\n{body}</mission_reports>"))];

    let review = complete_structured::<MissionReview>(gateway, system, &messages, config.llm_timeout_text).await?;
    Ok(review.additional_missions)
}

/// `compile_file_analysis`: the final structured report over the merged
/// evidence graph and all mission reports, persisted under `file_analysis/`.
pub async fn compile_file_analysis(
    triage: &TriageResult,
    evidence_graph: EvidenceGraph,
    mission_reports: Vec<MissionReport>,
    session: &Session,
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();

    let system = "Write a final static-analysis verdict summary and a list of indicators of \
        compromise (IOCs), consistent with the triage decision and mission reports below.";
    let mut body = format!("<triage_decision>{:?}</triage_decision>\n", triage.decision);
    for report in &mission_reports {
        body.push_str(&format!(
            "- {} [{:?}]: {}\n",
            report.mission_id,
            report.status,
            escape_for_prompt(&report.summary)
        ));
    }
    let messages = vec![ChatMessage::user(body)];

    let draft = match complete_structured::<FinalReportDraft>(gateway, system, &messages, config.llm_timeout_text).await {
        Ok(draft) => draft,
        Err(e) => {
            update.push_error(AGENT, "compile_file_analysis", e.kind(), e.to_string());
            FinalReportDraft { verdict_summary: "analysis incomplete".to_string(), iocs: vec![] }
        }
    };

    let report = StaticAnalysisFinalReport {
        triage_decision: format!("{:?}", triage.decision).to_lowercase(),
        triage_reasoning: triage.reasoning.clone(),
        evidence_graph,
        mission_reports,
        verdict_summary: draft.verdict_summary,
        iocs: draft.iocs,
    };

    if let Ok(path) = session.path_for("file_analysis/final_report.json") {
        if let Ok(bytes) = serde_json::to_vec_pretty(&report) {
            if let Err(e) = std::fs::write(&path, bytes) {
                update.push_error(AGENT, "compile_file_analysis", ErrorKind::PersistenceError, e.to_string());
            }
        }
    }

    update.static_analysis_final_report = Some(report);
    update
}

/// Top-level driver: runs the whole File Analysis subgraph and returns the
/// single `PartialUpdate` the orchestrator merges in.
pub async fn run(
    pdf_path: &Path,
    session: &Session,
    gateway: Arc<dyn LlmGateway>,
    scanner: Arc<dyn StaticScannerTool>,
    parser: Arc<dyn PdfParserTool>,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let triage_result = match triage(pdf_path, &scanner, gateway.as_ref(), config, log).await {
        Ok(t) => t,
        Err(update) => return update,
    };

    if triage_result.decision == TriageDecision::Innocent {
        let mut update = compile_file_analysis(
            &triage_result,
            EvidenceGraph::default(),
            vec![],
            session,
            gateway.as_ref(),
            config,
            log,
        )
        .await;
        update.missions = vec![];
        return update;
    }

    let mut state = PartialUpdate::new();
    let mut existing_ids: HashSet<String> = HashSet::new();

    let created = create_analysis_tasks(&triage_result, &existing_ids, gateway.as_ref(), config, log).await;
    for mission in &created.missions {
        existing_ids.insert(mission.mission_id.clone());
    }
    state.merge_additive(created);

    let mut round = 0u32;
    loop {
        let pending: Vec<InvestigationMission> =
            state.missions.iter().filter(|m| m.status == MissionStatus::Pending).cloned().collect();
        if pending.is_empty() {
            break;
        }
        state.missions.retain(|m| m.status != MissionStatus::Pending);

        let investigated =
            run_investigation(pdf_path, session, pending, gateway.clone(), parser.clone(), config, log).await;
        state.merge_additive(investigated);

        if round >= config.review_rounds_max {
            break;
        }

        match review_analysis_results(&state.link_analysis_final_reports, gateway.as_ref(), config).await {
            Ok(additional) if !additional.is_empty() => {
                for draft in additional {
                    let mission_id = if existing_ids.insert(draft.mission_id.clone()) {
                        draft.mission_id
                    } else {
                        let mangled = format!("{}_r{round}", draft.mission_id);
                        existing_ids.insert(mangled.clone());
                        mangled
                    };
                    state.missions.push(InvestigationMission {
                        mission_id,
                        description: draft.description,
                        threat_type: draft.threat_type,
                        status: MissionStatus::Pending,
                    });
                }
            }
            Ok(_) => break,
            Err(e) => {
                state.push_error(AGENT, "review_analysis_results", e.kind(), e.to_string());
                break;
            }
        }

        round += 1;
    }

    let evidence_graph = state.master_evidence_graph.clone().unwrap_or_default();
    let mission_reports = state.link_analysis_final_reports.clone();

    let mut compiled = compile_file_analysis(
        &triage_result,
        evidence_graph,
        mission_reports,
        session,
        gateway.as_ref(),
        config,
        log,
    )
    .await;

    state.merge_additive(std::mem::replace(&mut compiled, PartialUpdate::new()));
    state
}
