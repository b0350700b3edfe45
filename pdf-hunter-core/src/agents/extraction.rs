//! Agent A - PDF Extraction (deterministic, no LLM).
//!
//! Four retry-free nodes: session setup, page rendering, URL extraction,
//! QR decoding. Partial failure is acceptable and logged (spec §4.5).

use sha2::Digest;
use std::path::Path;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::ErrorKind;
use crate::logging::LogSink;
use crate::session::Session;
use crate::state::{ExtractedImage, ExtractedUrl, PartialUpdate, UrlSource};
use crate::tools::{PdfRenderer, PdfTextSource, QrDecoder};

const AGENT: &str = "PdfExtraction";

/// `setup_session`: derives identity, creates the directory tree, writes
/// `session_id`/`output_dir`/hashes/page_count into state. The only node
/// in the whole graph allowed to fail fatally (`INPUT_ERROR`).
pub fn setup_session(
    input_path: &Path,
    config: &RunConfig,
    started_at: chrono::DateTime<chrono::Utc>,
    session_id_override: Option<&str>,
    output_directory_override: Option<&Path>,
) -> crate::error::Result<(Session, PartialUpdate)> {
    let output_directory = output_directory_override.unwrap_or(&config.output_directory);
    let session = Session::begin_with_id(input_path, output_directory, started_at, session_id_override)?;

    let bytes = std::fs::read(input_path)
        .map_err(|e| crate::error::Error::Input(format!("cannot read {}: {e}", input_path.display())))?;
    let pdf_sha1 = {
        use sha1::Digest as _;
        hex::encode(sha1::Sha1::digest(&bytes))
    };
    let pdf_md5 = hex::encode(md5::Md5::digest(&bytes));

    let mut update = PartialUpdate::new();
    update.session_id = Some(session.session_id().to_string());
    update.output_dir = Some(session.root().to_string_lossy().to_string());
    update.pdf_sha1 = Some(pdf_sha1);
    update.pdf_md5 = Some(pdf_md5);

    Ok((session, update))
}

/// `extract_pdf_images`: renders the first `pages_to_process` pages,
/// ordered by ascending page index. A per-page render failure is recorded
/// as `RENDER_ERROR` and the page is skipped; the run continues (spec
/// §4.5, §7).
pub async fn extract_pdf_images(
    pdf_path: &Path,
    session: &Session,
    pages_to_process: u32,
    renderer: &Arc<dyn PdfRenderer>,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();

    let total_pages = match renderer.page_count(pdf_path) {
        Ok(n) => n,
        Err(e) => {
            update.push_error(AGENT, "extract_pdf_images", ErrorKind::RenderError, e.to_string());
            return update;
        }
    };

    let last_page = pages_to_process.min(total_pages);

    for page_index in 0..last_page {
        let tmp_filename = format!("{page_index}_pending.png");
        let output_path = session.pdf_extraction_dir().join(&tmp_filename);

        match renderer.render_page(pdf_path, page_index, &output_path).await {
            Ok(phash) => {
                let final_filename = crate::tools::image_filename(page_index, &phash);
                let final_path = session.pdf_extraction_dir().join(&final_filename);
                if let Err(e) = std::fs::rename(&output_path, &final_path) {
                    update.push_error(AGENT, "extract_pdf_images", ErrorKind::RenderError, e.to_string());
                    continue;
                }
                update.extracted_images.push(ExtractedImage {
                    page_index,
                    saved_path: final_path.to_string_lossy().to_string(),
                    phash,
                });
            }
            Err(e) => {
                update.push_error(AGENT, "extract_pdf_images", ErrorKind::RenderError, e.to_string());
            }
        }
    }

    log.event(
        "extract_pdf_images",
        "IMAGE_EXTRACTION_COMPLETE",
        serde_json::json!({
            "image_count": update.extracted_images.len(),
            "output_directory": session.pdf_extraction_dir().to_string_lossy(),
        }),
    );

    update
}

/// `find_embedded_urls`: link annotations + visible text + XMP, dedup by
/// `(url, page_index, source)`.
pub fn find_embedded_urls(
    pdf_path: &Path,
    pages: &[ExtractedImage],
    text_source: &Arc<dyn PdfTextSource>,
    log: &LogSink,
) -> PartialUpdate {
    let mut update = PartialUpdate::new();
    let mut seen = std::collections::HashSet::new();

    for image in pages {
        let page_index = image.page_index;

        if let Ok(annotations) = text_source.link_annotations(pdf_path, page_index) {
            for (url, coordinates) in annotations {
                push_unique_url(&mut update.extracted_urls, &mut seen, url, page_index, UrlSource::Annotation, coordinates);
            }
        }

        if let Ok(urls) = text_source.visible_text_urls(pdf_path, page_index) {
            for url in urls {
                push_unique_url(&mut update.extracted_urls, &mut seen, url, page_index, UrlSource::Text, None);
            }
        }
    }

    if let Ok(urls) = text_source.xmp_urls(pdf_path) {
        for url in urls {
            push_unique_url(&mut update.extracted_urls, &mut seen, url, 0, UrlSource::Xmp, None);
        }
    }

    log.event(
        "find_embedded_urls",
        "URL_SEARCH_COMPLETE",
        serde_json::json!({"url_count": update.extracted_urls.len()}),
    );

    update
}

fn push_unique_url(
    urls: &mut Vec<ExtractedUrl>,
    seen: &mut std::collections::HashSet<(String, u32, UrlSource)>,
    url: String,
    page_index: u32,
    source: UrlSource,
    coordinates: Option<(f64, f64, f64, f64)>,
) {
    let key = (url.clone(), page_index, source);
    if seen.insert(key) {
        urls.push(ExtractedUrl { url, page_index, source, coordinates });
    }
}

/// `scan_qr_codes`: decodes QR codes from rendered images; any decoded URL
/// is appended with `source=qr`.
pub fn scan_qr_codes(images: &[ExtractedImage], qr_decoder: &Arc<dyn QrDecoder>, log: &LogSink) -> PartialUpdate {
    let mut update = PartialUpdate::new();
    let mut qr_count = 0u32;

    for image in images {
        if let Ok(urls) = qr_decoder.decode(Path::new(&image.saved_path)) {
            qr_count += 1;
            for url in urls {
                update.extracted_urls.push(ExtractedUrl {
                    url,
                    page_index: image.page_index,
                    source: UrlSource::Qr,
                    coordinates: None,
                });
            }
        }
    }

    log.event(
        "scan_qr_codes",
        "QR_SCAN_COMPLETE",
        serde_json::json!({"qr_count": qr_count, "urls_decoded": update.extracted_urls.len()}),
    );

    update
}
