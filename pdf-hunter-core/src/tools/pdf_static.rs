//! PDF static analysis tool wrappers: pdfid/pdf-parser/peepdf/PyMuPDF are
//! consumed as opaque trait implementations, the way spec §1 scopes them
//! out ("consumed as opaque command-line/library wrappers").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::react::Tool;

/// One external scanner's verdict contribution, composed by `triage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticScanReport {
    pub scanner: String,
    pub summary: String,
    pub suspicious_indicators: Vec<String>,
}

/// Runs the fixed trio of external scanners (pdfid, pdf-parser, peepdf)
/// over the input file. Implemented outside this crate; consumed as an
/// opaque subprocess wrapper.
#[async_trait]
pub trait StaticScannerTool: Send + Sync {
    async fn scan(&self, pdf_path: &Path) -> Result<Vec<StaticScanReport>>;
}

/// Metadata about one PDF object, returned without its (possibly large)
/// decoded stream content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub object_id: String,
    pub object_type: String,
    pub stream_length: Option<u64>,
}

/// The interactive parser wrapper a file-analysis mission's ReAct loop
/// calls. `object_content` must reject decompressing a stream over the
/// 100 KB guard and direct the model to `dump_object_stream` instead (spec
/// §6, "must reject decompression of streams >100 KB").
#[async_trait]
pub trait PdfParserTool: Send + Sync {
    async fn object_summary(&self, pdf_path: &Path, object_id: &str) -> Result<ObjectSummary>;

    /// Returns the object's content, or `Err` guidance if the stream is
    /// over the size guard and `filter_stream` was requested.
    async fn object_content(&self, pdf_path: &Path, object_id: &str, filter_stream: bool) -> Result<String>;

    async fn dump_object_stream(&self, pdf_path: &Path, object_id: &str, output_path: &Path) -> Result<()>;
}

const STREAM_SIZE_GUARD_BYTES: u64 = 100 * 1024;

/// Adapts a [`PdfParserTool`] into the three tool calls a mission's ReAct
/// loop sees: `pdf_object_summary`, `pdf_object_content`,
/// `pdf_dump_object_stream`. Owns the session's `file_analysis/` directory
/// so dumped streams land under the session root, never `/tmp` (spec I7).
pub struct PdfObjectTools {
    pdf_path: PathBuf,
    dump_dir: PathBuf,
    parser: Arc<dyn PdfParserTool>,
}

impl PdfObjectTools {
    pub fn new(pdf_path: PathBuf, dump_dir: PathBuf, parser: Arc<dyn PdfParserTool>) -> Self {
        Self { pdf_path, dump_dir, parser }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectArgs {
    object_id: String,
    #[serde(default)]
    filter_stream: bool,
}

#[async_trait]
impl Tool for PdfObjectTools {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "pdf_object_summary".into(),
            description: "Return metadata for one PDF object by id (type, stream length) without decoding its content.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"object_id": {"type": "string"}},
                "required": ["object_id"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: ObjectArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("pdf_object_summary", e.to_string()))?;
        let summary = self.parser.object_summary(&self.pdf_path, &args.object_id).await?;
        serde_json::to_string(&summary).map_err(Error::Serialization)
    }
}

/// A second tool entry point over the same parser, exposed separately so
/// the ReAct loop's tool registry lists `pdf_object_content` and
/// `pdf_dump_object_stream` as independently callable tools with distinct
/// schemas, matching the parser wrapper contract in spec §6.
pub struct PdfObjectContentTool(pub Arc<PdfObjectTools>);

#[async_trait]
impl Tool for PdfObjectContentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "pdf_object_content".into(),
            description: "Return an object's content. Streams over 100KB compressed are never \
                auto-decompressed into context; use pdf_dump_object_stream instead."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "object_id": {"type": "string"},
                    "filter_stream": {"type": "boolean"}
                },
                "required": ["object_id"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: ObjectArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("pdf_object_content", e.to_string()))?;

        let summary = self.0.parser.object_summary(&self.0.pdf_path, &args.object_id).await?;
        if args.filter_stream {
            if let Some(len) = summary.stream_length {
                if len > STREAM_SIZE_GUARD_BYTES {
                    return Ok(format!(
                        "stream for object {} is {len} bytes (> 100KB guard); use \
                         pdf_dump_object_stream with an output path under file_analysis/ instead \
                         of requesting inline decompression",
                        args.object_id
                    ));
                }
            }
        }

        self.0.parser.object_content(&self.0.pdf_path, &args.object_id, args.filter_stream).await
    }
}

#[derive(Debug, Deserialize)]
struct DumpArgs {
    object_id: String,
    output_filename: String,
}

pub struct PdfDumpStreamTool(pub Arc<PdfObjectTools>);

#[async_trait]
impl Tool for PdfDumpStreamTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "pdf_dump_object_stream".into(),
            description: "Write an object's raw decoded stream to a file under the session's file_analysis directory, instead of returning it inline.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "object_id": {"type": "string"},
                    "output_filename": {"type": "string"}
                },
                "required": ["object_id", "output_filename"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: DumpArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("pdf_dump_object_stream", e.to_string()))?;

        if Path::new(&args.output_filename).is_absolute()
            || args.output_filename.contains("..")
        {
            return Err(Error::tool(
                "pdf_dump_object_stream",
                "output_filename must be a relative, non-escaping path",
            ));
        }

        let output_path = self.0.dump_dir.join(&args.output_filename);
        self.0
            .parser
            .dump_object_stream(&self.0.pdf_path, &args.object_id, &output_path)
            .await?;
        Ok(format!("wrote stream for object {} to {}", args.object_id, output_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeParser {
        lengths: Mutex<std::collections::HashMap<String, u64>>,
    }

    #[async_trait]
    impl PdfParserTool for FakeParser {
        async fn object_summary(&self, _pdf_path: &Path, object_id: &str) -> Result<ObjectSummary> {
            let lengths = self.lengths.lock().unwrap();
            Ok(ObjectSummary {
                object_id: object_id.to_string(),
                object_type: "Stream".into(),
                stream_length: lengths.get(object_id).copied(),
            })
        }

        async fn object_content(&self, _pdf_path: &Path, object_id: &str, _filter_stream: bool) -> Result<String> {
            Ok(format!("content of {object_id}"))
        }

        async fn dump_object_stream(&self, _pdf_path: &Path, _object_id: &str, output_path: &Path) -> Result<()> {
            std::fs::write(output_path, b"dumped").map_err(|e| Error::tool("dump", e.to_string()))
        }
    }

    #[tokio::test]
    async fn large_stream_is_guarded_instead_of_decompressed() {
        let mut lengths = std::collections::HashMap::new();
        lengths.insert("12".to_string(), 200 * 1024);
        let parser = Arc::new(FakeParser { lengths: Mutex::new(lengths) });
        let base = PdfObjectTools::new(PathBuf::from("/in.pdf"), PathBuf::from("/out"), parser);
        let tool = PdfObjectContentTool(Arc::new(base));

        let result = tool
            .call(serde_json::json!({"object_id": "12", "filter_stream": true}))
            .await
            .unwrap();

        assert!(result.contains("100KB guard"));
    }

    #[tokio::test]
    async fn small_stream_is_returned_directly() {
        let parser = Arc::new(FakeParser { lengths: Mutex::new(Default::default()) });
        let base = PdfObjectTools::new(PathBuf::from("/in.pdf"), PathBuf::from("/out"), parser);
        let tool = PdfObjectContentTool(Arc::new(base));

        let result = tool
            .call(serde_json::json!({"object_id": "7", "filter_stream": true}))
            .await
            .unwrap();

        assert_eq!(result, "content of 7");
    }

    #[tokio::test]
    async fn dump_tool_rejects_escaping_filenames() {
        let parser = Arc::new(FakeParser { lengths: Mutex::new(Default::default()) });
        let base = Arc::new(PdfObjectTools::new(PathBuf::from("/in.pdf"), PathBuf::from("/out"), parser));
        let tool = PdfDumpStreamTool(base);

        let result = tool
            .call(serde_json::json!({"object_id": "7", "output_filename": "../../etc/passwd"}))
            .await;
        assert!(result.is_err());
    }
}
