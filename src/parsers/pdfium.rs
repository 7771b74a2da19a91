//! Text-layer extraction through pdfium.
//!
//! Reads the embedded text of each page; no rasterisation, no OCR. Scanned
//! documents without a text layer come out empty and should go through the
//! vision backend instead.

use super::{bind_pdfium, open_pdf, NO_OCR};
use crate::cancel::CancellationToken;
use crate::error::{MarkitError, Result};
use crate::format::{render_content, OutputFormat};
use crate::parser::{option_str, DocumentParser, OcrMethod, ParseOptions};
use std::path::Path;
use tracing::{debug, info};

const NAME: &str = "Pdfium";

/// Extracts the text layer of a PDF page by page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumParser;

impl DocumentParser for PdfiumParser {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Fast extraction of the embedded PDF text layer via pdfium"
    }

    fn supported_ocr_methods(&self) -> Vec<OcrMethod> {
        vec![OcrMethod::new(NO_OCR, "No OCR")]
    }

    fn parse(
        &self,
        path: &Path,
        _ocr_method_id: &str,
        format: OutputFormat,
        options: &ParseOptions,
        token: &CancellationToken,
    ) -> Result<String> {
        if token.is_cancelled() {
            return Ok(String::new());
        }

        let pdfium = bind_pdfium(NAME)?;
        let document = open_pdf(&pdfium, NAME, path, option_str(options, "password"))?;
        let pages = document.pages();
        let total = pages.len();
        info!("PDF loaded: {} pages", total);

        let mut sections = Vec::with_capacity(total as usize);
        for index in 0..total {
            if token.is_cancelled() {
                info!("Stopping text extraction at page {}/{}", index + 1, total);
                return Ok(String::new());
            }

            let page = pages
                .get(index)
                .map_err(|e| MarkitError::backend(NAME, format!("page {}: {e:?}", index + 1)))?;
            let text = page
                .text()
                .map_err(|e| MarkitError::backend(NAME, format!("page {} text: {e:?}", index + 1)))?
                .all();
            debug!("Page {}: {} chars", index + 1, text.len());

            let text = text.trim();
            if !text.is_empty() {
                sections.push(text.to_string());
            }
        }

        let markdown = sections.join("\n\n");
        Ok(render_content(&markdown, format))
    }
}
