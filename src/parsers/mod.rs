//! Built-in parser backends.
//!
//! | Parser       | OCR options                             | Input            |
//! |--------------|-----------------------------------------|------------------|
//! | `Pdfium`     | `No OCR`                                | PDF text layer   |
//! | `Vision LLM` | `Basic`, `Structured`, `High Fidelity`  | PDF pages, images|
//! | `Plain Text` | `No OCR`                                | text-like files  |
//!
//! Registration order is display order; `Pdfium` is the default parser.

pub mod pdfium;
pub mod plain_text;
pub mod postprocess;
pub mod prompts;
pub mod vision;

pub use pdfium::PdfiumParser;
pub use plain_text::PlainTextParser;
pub use vision::VisionParser;

use crate::error::{MarkitError, Result};
use crate::registry::ParserRegistry;
use pdfium_render::prelude::*;
use std::path::Path;

/// OCR id shared by backends that read an existing text layer.
pub const NO_OCR: &str = "no_ocr";

/// Register the built-in backends in default order.
pub fn register_builtin(registry: &mut ParserRegistry) -> Result<()> {
    registry.register_parser::<PdfiumParser>()?;
    registry.register_parser::<VisionParser>()?;
    registry.register_parser::<PlainTextParser>()?;
    Ok(())
}

/// MIME type for a path, by extension. Unknown extensions are treated as PDF.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "xml" => "text/xml",
        "csv" => "text/csv",
        "rtf" => "text/rtf",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "tex" => "application/x-tex",
        "js" => "application/javascript",
        "py" => "text/x-python",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "doc" => "application/msword",
        "xls" => "application/vnd.ms-excel",
        "ppt" => "application/vnd.ms-powerpoint",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        _ => "application/pdf",
    }
}

/// Whether a MIME type is one the text backends can read as UTF-8.
pub fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/x-yaml" | "application/x-tex" | "application/javascript"
        )
}

/// Bind pdfium from the working directory, falling back to the system
/// library.
pub(crate) fn bind_pdfium(parser: &str) -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| {
            MarkitError::backend(
                parser,
                format!("pdfium library not found ({e:?}); install libpdfium or place it next to the binary"),
            )
        })?;
    Ok(Pdfium::new(bindings))
}

/// Open a PDF, telling password problems apart from corrupt files.
pub(crate) fn open_pdf<'a>(
    pdfium: &'a Pdfium,
    parser: &str,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_ascii_lowercase().contains("password") {
            let hint = if password.is_some() {
                "wrong password"
            } else {
                "document is encrypted; pass a `password` option"
            };
            MarkitError::backend(parser, format!("{hint} ({detail})"))
        } else {
            MarkitError::backend(parser, format!("cannot open PDF: {detail}"))
        }
    })
}
