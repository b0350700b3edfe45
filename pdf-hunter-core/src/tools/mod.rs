//! Tool adapters: uniform async wrappers the ReAct driver and Agent A call
//! through. Every external surface named out of scope by the spec (the PDF
//! static toolchain, QR/perceptual-hash extraction, WHOIS, browser
//! automation) is represented here only as a trait — concrete
//! implementations are an integration concern outside this crate.

mod browser;
mod pdf_static;
mod qr;
mod reflect;
mod whois;

pub use browser::{
    task_id_for_url, BrowserBackend, BrowserError, BrowserHandle, BrowserSession, BrowserTool,
    ClickTool, EvaluateTool, FillFormTool, NavigateTool, NetworkRequestsTool, ScreenshotTool,
};
pub use pdf_static::{
    ObjectSummary, PdfDumpStreamTool, PdfObjectContentTool, PdfObjectTools, PdfParserTool,
    StaticScanReport, StaticScannerTool,
};
pub use qr::{image_filename, ExtractionTools, PdfRenderer, PdfTextSource, QrDecoder};
pub use reflect::ReflectTool;
pub use whois::{WhoisLookup, WhoisTool};
