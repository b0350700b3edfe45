//! The shared run state threaded through the whole orchestration graph,
//! plus the entities every agent reads and writes.
//!
//! Mirrors the teacher's `SessionContext`: a plain record mutated only by
//! returning a whole new value (`PartialUpdate`) that the orchestrator
//! merges in with [`RunState::merge_additive`]. No field is ever mutated in
//! place by an agent — see spec §4.1.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ErrorKind;

/// A partial update returned by a node. Same shape as [`RunState`]: fields
/// left at their default are "not touched" by that node.
pub type PartialUpdate = RunState;

// --- Agent A: extraction ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub page_index: u32,
    pub saved_path: String,
    pub phash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    Annotation,
    Text,
    Xmp,
    Qr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedUrl {
    pub url: String,
    pub page_index: u32,
    pub source: UrlSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(f64, f64, f64, f64)>,
}

// --- Agent C: prioritized URLs / mission status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlMissionStatus {
    New,
    InProgress,
    Completed,
    Failed,
    NotRelevant,
}

impl UrlMissionStatus {
    /// Whether this status is one of the three terminal states D must drive
    /// every URL into (spec P3): no URL may remain `New`/`InProgress`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NotRelevant)
    }

    /// `filter_urls`'s transition rule, the only place a `New` URL leaves
    /// that state (spec §4.8): `priority <= threshold` enters
    /// investigation, otherwise it is immediately `NotRelevant`.
    pub fn filter(priority: u8, threshold: u8) -> Self {
        if priority <= threshold {
            Self::InProgress
        } else {
            Self::NotRelevant
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedUrl {
    pub url: String,
    pub page_index: u32,
    /// 1 = highest priority, 10 = lowest.
    pub priority: u8,
    pub reason: String,
    pub source_context: String,
    pub mission_status: UrlMissionStatus,
}

impl PrioritizedUrl {
    pub fn new(url: impl Into<String>, page_index: u32, priority: u8, reason: impl Into<String>, source_context: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_index,
            priority: priority.clamp(1, 10),
            reason: reason.into(),
            source_context: source_context.into(),
            mission_status: UrlMissionStatus::New,
        }
    }
}

// --- Agent B: missions & evidence graph ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    NotRelevant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationMission {
    /// LLM-generated semantic id: `mission_<threat_type>_<NNN>`, unique within a run.
    pub mission_id: String,
    pub description: String,
    pub threat_type: String,
    pub status: MissionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceNode {
    pub object_id: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceEdgeType {
    References,
    Triggers,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceEdge {
    pub src: String,
    pub dst: String,
    pub edge_type: EvidenceEdgeType,
}

/// Typed directed graph over PDF object ids. `merge` is the only mutator:
/// nodes union by id, edges union by `(src, dst, type)` triple (spec I4/P5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceGraph {
    pub nodes: Vec<EvidenceNode>,
    pub edges: Vec<EvidenceEdge>,
}

impl EvidenceGraph {
    pub fn merge(&mut self, other: &EvidenceGraph) {
        let mut node_ids: HashSet<String> = self.nodes.iter().map(|n| n.object_id.clone()).collect();
        for node in &other.nodes {
            if node_ids.insert(node.object_id.clone()) {
                self.nodes.push(node.clone());
            }
        }

        let mut edge_keys: HashSet<(String, String, EvidenceEdgeType)> = self
            .edges
            .iter()
            .map(|e| (e.src.clone(), e.dst.clone(), e.edge_type))
            .collect();
        for edge in &other.edges {
            let key = (edge.src.clone(), edge.dst.clone(), edge.edge_type);
            if edge_keys.insert(key) {
                self.edges.push(edge.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAnalysisFinalReport {
    pub triage_decision: String,
    pub triage_reasoning: String,
    pub evidence_graph: EvidenceGraph,
    pub mission_reports: Vec<MissionReport>,
    pub verdict_summary: String,
    pub iocs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionReport {
    pub mission_id: String,
    pub status: MissionStatus,
    pub summary: String,
}

// --- Agent C output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Benign,
    Suspicious,
    Malicious,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub page_index: u32,
    pub findings: Vec<String>,
    pub deception_tactics: Vec<String>,
    pub benign_signals: Vec<String>,
    pub prioritized_urls: Vec<PrioritizedUrl>,
    pub page_verdict: Verdict,
    pub page_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysisReport {
    pub page_analyses: Vec<PageAnalysis>,
    pub overall_verdict: Verdict,
    pub overall_confidence: f64,
    pub prioritized_urls: Vec<PrioritizedUrl>,
}

// --- Agent D output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlVerdict {
    Benign,
    Suspicious,
    Malicious,
    Inaccessible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlAnalystMissionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystFindings {
    pub final_url: String,
    pub verdict: UrlVerdict,
    pub confidence: f64,
    pub summary: String,
    pub detected_threats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_whois_record: Option<String>,
    pub screenshot_paths: Vec<String>,
    pub mission_status: UrlAnalystMissionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlAnalysisResult {
    pub initial_url: PrioritizedUrl,
    pub transcript_summary: String,
    pub findings: AnalystFindings,
}

// --- Agent E output ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "final_verdict")]
pub struct FinalVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub key_findings: Vec<String>,
    pub reasoning: String,
}

// --- errors ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub agent: String,
    pub node: String,
    pub kind: ErrorKind,
    pub message: String,
}

// --- RunInput ---

#[derive(Debug, Clone)]
pub struct RunInput {
    pub file_path: std::path::PathBuf,
    pub pages_to_process: u32,
    pub additional_context: Option<String>,
    pub session_id: Option<String>,
    pub output_directory: Option<std::path::PathBuf>,
}

/// The shared record threaded through the whole graph.
///
/// Every field is additive (merged by append/union across concurrent
/// branches) or last-writer-wins (a plain `Option` overwritten by whichever
/// node sets it); see spec §4.1. There is no third kind of field and no
/// in-place mutation — nodes only ever return a new `RunState` to merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    // last-writer-wins singletons
    pub session_id: Option<String>,
    pub output_dir: Option<String>,
    pub pdf_sha1: Option<String>,
    pub pdf_md5: Option<String>,
    pub page_count: Option<u32>,
    pub static_analysis_final_report: Option<StaticAnalysisFinalReport>,
    pub image_analysis_report: Option<ImageAnalysisReport>,
    pub master_evidence_graph: Option<EvidenceGraph>,
    pub final_verdict: Option<FinalVerdict>,
    pub final_report_markdown: Option<String>,
    /// The authoritative, terminal-status view of every prioritized URL,
    /// set once by Agent D after investigation (spec P3: every URL must
    /// reach `COMPLETED`/`FAILED`/`NOT_RELEVANT`). Supersedes the
    /// pre-investigation list Agent C produced inside `image_analysis_report`.
    pub final_prioritized_urls: Option<Vec<PrioritizedUrl>>,

    // additive lists
    pub extracted_images: Vec<ExtractedImage>,
    pub extracted_urls: Vec<ExtractedUrl>,
    pub missions: Vec<InvestigationMission>,
    pub link_analysis_final_reports: Vec<MissionReport>,
    pub url_analysis_results: Vec<UrlAnalysisResult>,
    pub errors: Vec<ErrorRecord>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` into `self`: additive fields append/union, singleton
    /// fields take `other`'s value if present (last-writer-wins, and the
    /// barrier before Agent E is the only place concurrent writers to a
    /// singleton field are possible by construction — see orchestrator).
    pub fn merge_additive(&mut self, other: RunState) {
        self.session_id = other.session_id.or_else(|| self.session_id.take());
        self.output_dir = other.output_dir.or_else(|| self.output_dir.take());
        self.pdf_sha1 = other.pdf_sha1.or_else(|| self.pdf_sha1.take());
        self.pdf_md5 = other.pdf_md5.or_else(|| self.pdf_md5.take());
        self.page_count = other.page_count.or_else(|| self.page_count.take());
        self.static_analysis_final_report = other
            .static_analysis_final_report
            .or_else(|| self.static_analysis_final_report.take());
        self.image_analysis_report = other
            .image_analysis_report
            .or_else(|| self.image_analysis_report.take());
        self.final_verdict = other.final_verdict.or_else(|| self.final_verdict.take());
        self.final_report_markdown = other
            .final_report_markdown
            .or_else(|| self.final_report_markdown.take());
        self.final_prioritized_urls = other
            .final_prioritized_urls
            .or_else(|| self.final_prioritized_urls.take());

        match (&mut self.master_evidence_graph, other.master_evidence_graph) {
            (Some(existing), Some(incoming)) => existing.merge(&incoming),
            (slot @ None, Some(incoming)) => *slot = Some(incoming),
            _ => {}
        }

        self.extracted_images.extend(other.extracted_images);
        self.extracted_urls.extend(other.extracted_urls);
        self.missions.extend(other.missions);
        self.link_analysis_final_reports.extend(other.link_analysis_final_reports);
        self.url_analysis_results.extend(other.url_analysis_results);
        self.errors.extend(other.errors);
    }

    pub fn push_error(&mut self, agent: impl Into<String>, node: impl Into<String>, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            agent: agent.into(),
            node: node.into(),
            kind,
            message: message.into(),
        });
    }

    /// True once Agent E has produced a verdict (spec §7: "a run is
    /// `COMPLETE` iff Agent E produced a `FinalVerdict`").
    pub fn is_complete(&self) -> bool {
        self.final_verdict.is_some()
    }

    /// Registry view over existing mission ids, for uniqueness checks when
    /// Agent B's planner/reviewer mints new ones.
    pub fn mission_id_set(&self) -> HashSet<&str> {
        self.missions.iter().map(|m| m.mission_id.as_str()).collect()
    }

    pub fn urls_by_status(&self) -> HashMap<UrlMissionStatus, usize> {
        let mut counts = HashMap::new();
        for url in self.aggregated_prioritized_urls() {
            *counts.entry(url.mission_status).or_insert(0) += 1;
        }
        counts
    }

    /// The prioritized URL list with the most authoritative status known so
    /// far: Agent D's post-investigation view once it exists, falling back
    /// to Agent C's pre-investigation list.
    pub fn aggregated_prioritized_urls(&self) -> Vec<&PrioritizedUrl> {
        if let Some(urls) = &self.final_prioritized_urls {
            return urls.iter().collect();
        }
        self.image_analysis_report
            .as_ref()
            .map(|r| r.prioritized_urls.iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_additive_unions_errors_and_keeps_order() {
        let mut a = RunState::new();
        a.push_error("FileAnalysis", "triage", ErrorKind::ToolError, "first");
        let mut b = RunState::new();
        b.push_error("ImageAnalysis", "analyze_images", ErrorKind::RenderError, "second");

        a.merge_additive(b);

        assert_eq!(a.errors.len(), 2);
        assert_eq!(a.errors[0].message, "first");
        assert_eq!(a.errors[1].message, "second");
    }

    #[test]
    fn merge_additive_prefers_incoming_singleton() {
        let mut a = RunState::new();
        a.session_id = Some("old".to_string());
        let mut b = RunState::new();
        b.session_id = Some("new".to_string());

        a.merge_additive(b);
        assert_eq!(a.session_id.as_deref(), Some("new"));
    }

    #[test]
    fn merge_additive_missing_singleton_keeps_existing() {
        let mut a = RunState::new();
        a.session_id = Some("kept".to_string());
        let b = RunState::new();

        a.merge_additive(b);
        assert_eq!(a.session_id.as_deref(), Some("kept"));
    }

    #[test]
    fn evidence_graph_merge_is_union_by_id_and_typed_edge() {
        let mut g1 = EvidenceGraph::default();
        g1.nodes.push(EvidenceNode { object_id: "12".into(), label: "Catalog".into() });
        g1.edges.push(EvidenceEdge {
            src: "12".into(),
            dst: "13".into(),
            edge_type: EvidenceEdgeType::References,
        });

        let mut g2 = EvidenceGraph::default();
        g2.nodes.push(EvidenceNode { object_id: "12".into(), label: "Catalog".into() });
        g2.nodes.push(EvidenceNode { object_id: "14".into(), label: "OpenAction".into() });
        g2.edges.push(EvidenceEdge {
            src: "12".into(),
            dst: "13".into(),
            edge_type: EvidenceEdgeType::References,
        });
        g2.edges.push(EvidenceEdge {
            src: "12".into(),
            dst: "14".into(),
            edge_type: EvidenceEdgeType::Triggers,
        });

        g1.merge(&g2);

        assert_eq!(g1.nodes.len(), 2);
        assert_eq!(g1.edges.len(), 2);
    }

    #[test]
    fn prioritized_url_priority_is_clamped_to_valid_range() {
        let url = PrioritizedUrl::new("http://x", 0, 15, "r", "c");
        assert_eq!(url.priority, 10);
        let url = PrioritizedUrl::new("http://x", 0, 0, "r", "c");
        assert_eq!(url.priority, 1);
    }

    #[test]
    fn aggregated_prioritized_urls_prefers_agent_d_over_agent_c() {
        let mut state = RunState::new();
        state.image_analysis_report = Some(ImageAnalysisReport {
            page_analyses: vec![],
            overall_verdict: Verdict::Suspicious,
            overall_confidence: 0.5,
            prioritized_urls: vec![PrioritizedUrl::new("http://x", 0, 3, "r", "c")],
        });
        assert_eq!(state.aggregated_prioritized_urls().len(), 1);
        assert_eq!(state.aggregated_prioritized_urls()[0].mission_status, UrlMissionStatus::New);

        let mut resolved = PrioritizedUrl::new("http://x", 0, 3, "r", "c");
        resolved.mission_status = UrlMissionStatus::Completed;
        state.final_prioritized_urls = Some(vec![resolved]);

        assert_eq!(state.aggregated_prioritized_urls()[0].mission_status, UrlMissionStatus::Completed);
    }

    #[test]
    fn url_mission_status_terminal_classification() {
        assert!(UrlMissionStatus::Completed.is_terminal());
        assert!(UrlMissionStatus::Failed.is_terminal());
        assert!(UrlMissionStatus::NotRelevant.is_terminal());
        assert!(!UrlMissionStatus::New.is_terminal());
        assert!(!UrlMissionStatus::InProgress.is_terminal());
    }
}
