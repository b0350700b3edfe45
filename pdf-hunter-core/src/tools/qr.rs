//! Page rendering, perceptual hashing, and QR decoding: Agent A's pure
//! (non-LLM) pipeline consumes these as opaque traits, per spec §1
//! ("QR/image extraction and perceptual hashing - consumed as a pure
//! function producing images + decoded URLs").

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Renders PDF pages to images and extracts text/annotation/XMP content.
/// A concrete implementation wraps PyMuPDF or similar; this crate only
/// depends on the trait boundary.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Render page `page_index` (0-based) to a PNG at `output_path`,
    /// returning its perceptual hash.
    async fn render_page(&self, pdf_path: &Path, page_index: u32, output_path: &Path) -> Result<String>;

    fn page_count(&self, pdf_path: &Path) -> Result<u32>;
}

/// Reads link annotations, visible text, and XMP metadata for URL
/// extraction. Kept distinct from [`PdfRenderer`] because a renderer
/// implementation need not also be a text/metadata source.
pub trait PdfTextSource: Send + Sync {
    fn link_annotations(&self, pdf_path: &Path, page_index: u32) -> Result<Vec<(String, Option<(f64, f64, f64, f64)>)>>;

    fn visible_text_urls(&self, pdf_path: &Path, page_index: u32) -> Result<Vec<String>>;

    fn xmp_urls(&self, pdf_path: &Path) -> Result<Vec<String>>;
}

/// Decodes QR codes present in a rendered page image.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, image_path: &Path) -> Result<Vec<String>>;
}

/// Bundles the three trait objects Agent A needs, so `orchestrator::run`'s
/// `Dependencies` struct holds one field instead of three.
pub struct ExtractionTools {
    pub renderer: std::sync::Arc<dyn PdfRenderer>,
    pub text_source: std::sync::Arc<dyn PdfTextSource>,
    pub qr_decoder: std::sync::Arc<dyn QrDecoder>,
}

impl ExtractionTools {
    pub fn new(
        renderer: std::sync::Arc<dyn PdfRenderer>,
        text_source: std::sync::Arc<dyn PdfTextSource>,
        qr_decoder: std::sync::Arc<dyn QrDecoder>,
    ) -> Self {
        Self { renderer, text_source, qr_decoder }
    }
}

/// Filename convention Agent A uses for rendered pages: `{page_index}_{phash}.png`.
pub fn image_filename(page_index: u32, phash: &str) -> PathBuf {
    PathBuf::from(format!("{page_index}_{phash}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_filename_matches_convention() {
        assert_eq!(image_filename(3, "abc123"), PathBuf::from("3_abc123.png"));
    }
}
