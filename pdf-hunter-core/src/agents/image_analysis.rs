//! Agent C - Image Analysis: per-page visual LLM analysis, then a
//! cross-page synthesis into an overall verdict and a prioritized URL list
//! (spec §4.7).
//!
//! Pages are analyzed sequentially in ascending `page_index` order (no
//! cross-page dependency at this stage per spec.md); page 0 additionally
//! gets the XMP tool-chain coherence check spec.md calls out as
//! mission-critical.

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::ErrorKind;
use crate::llm::{complete_structured, ChatMessage, LlmGateway};
use crate::logging::LogSink;
use crate::prompt::escape_for_prompt;
use crate::session::Session;
use crate::state::{
    ExtractedImage, ExtractedUrl, ImageAnalysisReport, PageAnalysis, PartialUpdate, PrioritizedUrl,
    UrlSource, Verdict,
};

const AGENT: &str = "ImageAnalysis";

/// What the model actually returns for one page: a prioritized URL draft
/// without `mission_status`, since Agent C never sets anything but `New`
/// (`PrioritizedUrl::new` does that for us) - see spec.md I3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritizedUrlDraft {
    pub url: String,
    pub page_index: u32,
    pub priority: u8,
    pub reason: String,
    pub source_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "page_analysis")]
struct PageAnalysisDraft {
    findings: Vec<String>,
    deception_tactics: Vec<String>,
    benign_signals: Vec<String>,
    prioritized_urls: Vec<PrioritizedUrlDraft>,
    page_verdict: Verdict,
    page_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, pdf_hunter_derive::Structured)]
#[structured(name = "image_compilation")]
struct ImageCompilationDraft {
    overall_verdict: Verdict,
    overall_confidence: f64,
    prioritized_urls: Vec<PrioritizedUrlDraft>,
}

/// Converts a model-provided URL draft into the canonical `PrioritizedUrl`,
/// clamping an out-of-range priority and recording a `ValidationError`-style
/// entry in `errors` rather than silently trusting the model (spec I3/P6:
/// confidence and priority fields must hold their declared range
/// regardless of what the model returns).
fn build_prioritized_url(draft: PrioritizedUrlDraft, node: &str, update: &mut PartialUpdate) -> PrioritizedUrl {
    if !(1..=10).contains(&draft.priority) {
        update.push_error(
            AGENT,
            node,
            ErrorKind::LlmSchemaError,
            format!("priority {} for `{}` out of range 1..=10, clamped", draft.priority, draft.url),
        );
    }
    PrioritizedUrl::new(draft.url, draft.page_index, draft.priority, draft.reason, draft.source_context)
}

/// `analyze_images`: one structured completion per rendered page, in
/// ascending `page_index` order. A single page's LLM failure is recorded
/// and skipped; it never aborts the remaining pages (mirrors Agent B's
/// per-mission failure isolation, spec.md §4.6 applied to §4.7).
pub async fn analyze_images(
    images: &[ExtractedImage],
    extracted_urls: &[ExtractedUrl],
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    log: &LogSink,
) -> (Vec<PageAnalysis>, PartialUpdate) {
    let mut update = PartialUpdate::new();
    let mut analyses = Vec::with_capacity(images.len());

    let mut ordered: Vec<&ExtractedImage> = images.iter().collect();
    ordered.sort_by_key(|image| image.page_index);

    for image in ordered {
        let mut system = String::from(
            "You are a forensic visual analyst. Examine this rendered PDF page for deceptive \
             design (fake login forms, spoofed brand chrome, urgency/fear language), distinguish \
             it from genuine benign content, and list any URLs visible on the page with a \
             priority (1 = highest risk) for further investigation.",
        );

        if image.page_index == 0 {
            let xmp_urls: Vec<&str> = extracted_urls
                .iter()
                .filter(|u| u.source == UrlSource::Xmp)
                .map(|u| u.url.as_str())
                .collect();
            system.push_str(
                "\n\nThis is page 0. Cross-reference the document's XMP-declared producer/creator \
                 tool chain against any XMP-sourced URLs below for coherence - a mismatched or \
                 suspicious tool chain is itself a finding.",
            );
            system.push_str(&format!(
                "\n<xmp_urls>{}</xmp_urls>",
                xmp_urls.iter().map(|u| escape_for_prompt(u)).collect::<Vec<_>>().join(", ")
            ));
        }

        let messages = vec![ChatMessage::user(format!(
            "<page_index>{}</page_index>\n<image_path>{}</image_path>\n<phash>{}</phash>",
            image.page_index,
            escape_for_prompt(&image.saved_path),
            escape_for_prompt(&image.phash),
        ))];

        match complete_structured::<PageAnalysisDraft>(gateway, &system, &messages, config.llm_timeout_text).await {
            Ok(draft) => {
                let prioritized_urls = draft
                    .prioritized_urls
                    .into_iter()
                    .map(|d| build_prioritized_url(d, "analyze_images", &mut update))
                    .collect();

                let findings_count = draft.findings.len();
                let tactics_count = draft.deception_tactics.len();
                let benign_count = draft.benign_signals.len();
                let urls_count = prioritized_urls.len();

                analyses.push(PageAnalysis {
                    page_index: image.page_index,
                    findings: draft.findings,
                    deception_tactics: draft.deception_tactics,
                    benign_signals: draft.benign_signals,
                    prioritized_urls,
                    page_verdict: draft.page_verdict,
                    page_confidence: draft.page_confidence.clamp(0.0, 1.0),
                });

                log.event(
                    "analyze_images",
                    "PAGE_ANALYSIS_COMPLETE",
                    serde_json::json!({
                        "page_number": image.page_index,
                        "findings_count": findings_count,
                        "tactics_count": tactics_count,
                        "benign_count": benign_count,
                        "urls_count": urls_count,
                    }),
                );
            }
            Err(e) => {
                update.push_error(AGENT, "analyze_images", e.kind(), e.to_string());
            }
        }
    }

    (analyses, update)
}

/// `compile_image_findings`: synthesizes all per-page analyses into one
/// `ImageAnalysisReport`, persisted under `image_analysis/`.
pub async fn compile_image_findings(
    page_analyses: Vec<PageAnalysis>,
    session: &Session,
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();

    let system = "Synthesize these per-page forensic analyses into one overall verdict, \
        confidence, and a single prioritized URL list across all pages.";
    let mut body = String::new();
    for page in &page_analyses {
        body.push_str(&format!(
            "- page {} [{:?}, confidence={:.2}]: {} finding(s), {} deception tactic(s), {} benign signal(s)\n",
            page.page_index,
            page.page_verdict,
            page.page_confidence,
            page.findings.len(),
            page.deception_tactics.len(),
            page.benign_signals.len(),
        ));
    }
    let messages = vec![ChatMessage::user(format!("<page_analyses>\n{body}</page_analyses>"))];

    let report = match complete_structured::<ImageCompilationDraft>(gateway, system, &messages, config.llm_timeout_text).await
    {
        Ok(draft) => {
            let prioritized_urls = draft
                .prioritized_urls
                .into_iter()
                .map(|d| build_prioritized_url(d, "compile_image_findings", &mut update))
                .collect();
            ImageAnalysisReport {
                page_analyses,
                overall_verdict: draft.overall_verdict,
                overall_confidence: draft.overall_confidence.clamp(0.0, 1.0),
                prioritized_urls,
            }
        }
        Err(e) => {
            update.push_error(AGENT, "compile_image_findings", e.kind(), e.to_string());
            ImageAnalysisReport {
                page_analyses,
                overall_verdict: Verdict::Suspicious,
                overall_confidence: 0.0,
                prioritized_urls: vec![],
            }
        }
    };

    if let Ok(path) = session.path_for("image_analysis/compiled_report.json") {
        if let Ok(bytes) = serde_json::to_vec_pretty(&report) {
            if let Err(e) = std::fs::write(&path, bytes) {
                update.push_error(AGENT, "compile_image_findings", ErrorKind::PersistenceError, e.to_string());
            }
        }
    }

    update.image_analysis_report = Some(report);
    update
}

/// Top-level driver: runs the whole Image Analysis subgraph and returns the
/// single `PartialUpdate` the orchestrator merges in.
pub async fn run(
    images: &[ExtractedImage],
    extracted_urls: &[ExtractedUrl],
    session: &Session,
    gateway: &dyn LlmGateway,
    config: &RunConfig,
    log: &LogSink,
) -> PartialUpdate {
    let (page_analyses, mut update) = analyze_images(images, extracted_urls, gateway, config, log).await;
    let compiled = compile_image_findings(page_analyses, session, gateway, config, log).await;
    update.merge_additive(compiled);
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, ModelSpec, StopReason, TokenUsage, ToolCallOutcome, ToolDefinition};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeGateway;

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
            match tool_name {
                "page_analysis" => Ok(serde_json::json!({
                    "findings": ["embedded form mimics a bank login"],
                    "deception_tactics": ["spoofed logo"],
                    "benign_signals": [],
                    "prioritized_urls": [{
                        "url": "http://phish.example/login",
                        "page_index": 0,
                        "priority": 2,
                        "reason": "credential harvesting form",
                        "source_context": "page image",
                    }],
                    "page_verdict": "suspicious",
                    "page_confidence": 0.8,
                })),
                "image_compilation" => Ok(serde_json::json!({
                    "overall_verdict": "suspicious",
                    "overall_confidence": 0.75,
                    "prioritized_urls": [{
                        "url": "http://phish.example/login",
                        "page_index": 0,
                        "priority": 2,
                        "reason": "credential harvesting form",
                        "source_context": "page image",
                    }],
                })),
                other => panic!("unexpected structured call: {other}"),
            }
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

    struct OutOfRangeGateway;

    #[async_trait]
    impl LlmGateway for OutOfRangeGateway {
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
            match tool_name {
                "page_analysis" => Ok(serde_json::json!({
                    "findings": [],
                    "deception_tactics": [],
                    "benign_signals": ["plain academic text"],
                    "prioritized_urls": [{
                        "url": "http://benign.example",
                        "page_index": 0,
                        "priority": 99,
                        "reason": "listed for completeness",
                        "source_context": "footer",
                    }],
                    "page_verdict": "benign",
                    "page_confidence": 0.9,
                })),
                "image_compilation" => Ok(serde_json::json!({
                    "overall_verdict": "benign",
                    "overall_confidence": 0.9,
                    "prioritized_urls": [],
                })),
                other => panic!("unexpected structured call: {other}"),
            }
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

    fn one_image(page_index: u32) -> ExtractedImage {
        ExtractedImage { page_index, saved_path: format!("/out/{page_index}.png"), phash: "h".into() }
    }

    #[tokio::test]
    async fn analyze_images_processes_in_ascending_page_order() {
        let images = vec![one_image(1), one_image(0)];
        let gateway = FakeGateway;
        let config = RunConfig::new("/tmp/out");
        let log = LogSink::noop("s1", AGENT);

        let (analyses, update) = analyze_images(&images, &[], &gateway, &config, &log).await;

        assert_eq!(analyses.len(), 2);
        assert_eq!(analyses[0].page_index, 0);
        assert_eq!(analyses[1].page_index, 1);
        assert!(update.errors.is_empty());
    }

    #[tokio::test]
    async fn prioritized_urls_start_as_new() {
        let images = vec![one_image(0)];
        let gateway = FakeGateway;
        let config = RunConfig::new("/tmp/out");
        let log = LogSink::noop("s2", AGENT);

        let (analyses, _) = analyze_images(&images, &[], &gateway, &config, &log).await;

        assert_eq!(analyses[0].prioritized_urls.len(), 1);
        assert_eq!(
            analyses[0].prioritized_urls[0].mission_status,
            crate::state::UrlMissionStatus::New
        );
    }

    #[tokio::test]
    async fn out_of_range_priority_is_clamped_and_logged() {
        let images = vec![one_image(0)];
        let gateway = OutOfRangeGateway;
        let config = RunConfig::new("/tmp/out");
        let log = LogSink::noop("s3", AGENT);

        let (analyses, update) = analyze_images(&images, &[], &gateway, &config, &log).await;

        assert_eq!(analyses[0].prioritized_urls[0].priority, 10);
        assert_eq!(update.errors.len(), 1);
        assert_eq!(update.errors[0].kind, ErrorKind::LlmSchemaError);
    }

    #[tokio::test]
    async fn compile_image_findings_persists_report_under_session() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let config = RunConfig::new(tmp.path());
        let started_at = chrono::Utc::now();
        let (session, _) = crate::agents::extraction::setup_session(&input, &config, started_at, None, None).unwrap();
        let gateway = FakeGateway;
        let log = LogSink::noop("s4", AGENT);

        let page = PageAnalysis {
            page_index: 0,
            findings: vec![],
            deception_tactics: vec![],
            benign_signals: vec![],
            prioritized_urls: vec![],
            page_verdict: Verdict::Suspicious,
            page_confidence: 0.5,
        };

        let update = compile_image_findings(vec![page], &session, &gateway, &config, &log).await;

        let report = update.image_analysis_report.unwrap();
        assert_eq!(report.overall_verdict, Verdict::Suspicious);
        assert!(session.path_for("image_analysis/compiled_report.json").unwrap().exists());
    }
}
