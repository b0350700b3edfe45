//! # pdf-hunter-core
//!
//! Agent orchestration and investigation engine for PDF Hunter, a forensic
//! triage system for suspected-malicious PDFs.
//!
//! ## Core components
//!
//! - **State**: the shared `RunState`/`PartialUpdate` record and its two
//!   reducers (additive, last-writer-wins).
//! - **Session**: identity derivation and the on-disk artifact tree.
//! - **LLM Gateway**: the one seam every agent talks to a model through,
//!   plus the `AnthropicGateway` adapter and structured-output contracts.
//! - **ReAct loop**: the generic bounded tool-calling driver Agents B and D
//!   run their investigations on top of.
//! - **Agents**: A (extraction) through E (report), each a set of plain
//!   `async fn` nodes over `RunState`.
//! - **Orchestrator**: wires the five agents into one run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pdf_hunter_core::{orchestrator, Dependencies, RunConfig, RunInput};
//!
//! let input = RunInput::new("suspect.pdf");
//! let config = RunConfig::new("/var/lib/pdf-hunter/sessions");
//! let state = orchestrator::run(input, config, &deps).await;
//! if state.is_complete() {
//!     println!("verdict: {:?}", state.final_verdict);
//! }
//! ```

// Self-alias for derive macro support within the crate.
extern crate self as pdf_hunter_core;

pub mod agents;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod react;
pub mod session;
pub mod state;
pub mod tools;

pub use config::RunConfig;
pub use error::{Error, Result};
pub use graph::{pdf_hunter_topology, Graph, GraphBuilder, NodeId, NodeKind};
pub use logging::{LogLevel, LogRecord, LogSink};
pub use orchestrator::{run, Dependencies};
pub use prompt::escape_for_prompt;
pub use react::{run_react_loop, ReactOutcome, ReactStatus, Tool, ToolRegistry};
pub use session::Session;
pub use state::{
    AnalystFindings, ErrorRecord, EvidenceEdge, EvidenceEdgeType, EvidenceGraph, EvidenceNode,
    ExtractedImage, ExtractedUrl, FinalVerdict, ImageAnalysisReport, InvestigationMission,
    MissionReport, MissionStatus, PageAnalysis, PartialUpdate, PrioritizedUrl, RunInput, RunState,
    UrlAnalysisResult, UrlAnalystMissionStatus, UrlMissionStatus, UrlSource, Verdict, UrlVerdict,
};
pub use tools::{
    image_filename, task_id_for_url, BrowserBackend, BrowserError, BrowserHandle, BrowserSession,
    BrowserTool, ExtractionTools, ObjectSummary, PdfDumpStreamTool, PdfObjectContentTool,
    PdfObjectTools, PdfParserTool, PdfRenderer, PdfTextSource, QrDecoder, ReflectTool,
    StaticScanReport, StaticScannerTool, WhoisLookup, WhoisTool,
};
