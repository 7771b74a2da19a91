//! Plain text passthrough for text-like inputs (`.txt`, `.md`, `.csv`, ...).

use super::{is_text_mime, mime_type_for_path, NO_OCR};
use crate::cancel::CancellationToken;
use crate::error::{MarkitError, Result};
use crate::format::{render_content, OutputFormat};
use crate::parser::{option_u64, DocumentParser, OcrMethod, ParseOptions};
use std::borrow::Cow;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{debug, info, warn};

const NAME: &str = "Plain Text";
const READ_CHUNK: usize = 64 * 1024;

/// Reads a text file in chunks, checking the token between them.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Reads plain text and Markdown files as-is"
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
        let chunk = option_u64(options, "read_chunk")
            .map(|n| n.max(1) as usize)
            .unwrap_or(READ_CHUNK);
        let mime = mime_type_for_path(path);

        let mut file = File::open(path).map_err(|e| MarkitError::backend(NAME, e))?;
        let mut bytes = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            if token.is_cancelled() {
                info!("Stopping text read after {} bytes", bytes.len());
                return Ok(String::new());
            }
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => bytes.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(MarkitError::backend(NAME, e)),
            }
        }

        // Unknown extensions map to PDF, so sniff content rather than trust the
        // extension alone.
        if bytes.contains(&0) || bytes.starts_with(b"%PDF") {
            return Err(MarkitError::backend(
                NAME,
                format!("'{}' is not a text file; pick a PDF or vision parser", path.display()),
            ));
        }
        if !is_text_mime(mime) {
            debug!("Reading {} as text despite MIME type {}", path.display(), mime);
        }

        let text = String::from_utf8_lossy(&bytes);
        if let Cow::Owned(_) = text {
            warn!(
                "'{}' is not valid UTF-8; invalid bytes were replaced with U+FFFD",
                path.display()
            );
        }
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text);
        Ok(render_content(text, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn parse(path: &Path, format: OutputFormat) -> Result<String> {
        PlainTextParser.parse(path, NO_OCR, format, &ParseOptions::new(), &CancellationToken::new())
    }

    #[test]
    fn markdown_passes_through() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.md", b"# Title\n\nbody\n");
        assert_eq!(parse(&path, OutputFormat::Markdown).unwrap(), "# Title\n\nbody\n");
    }

    #[test]
    fn json_wraps_content() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.txt", b"hello");
        let out = parse(&path, OutputFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["content"], "hello");
    }

    #[test]
    fn small_chunks_read_everything() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.txt", b"0123456789abcdef");
        let mut options = ParseOptions::new();
        options.insert("read_chunk".into(), 3.into());
        let out = PlainTextParser
            .parse(&path, NO_OCR, OutputFormat::Markdown, &options, &CancellationToken::new())
            .unwrap();
        assert_eq!(out, "0123456789abcdef");
    }

    #[test]
    fn binary_content_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.pdf", b"%PDF-1.7\n\0\x01");
        assert!(matches!(
            parse(&path, OutputFormat::Markdown),
            Err(MarkitError::Backend { .. })
        ));
    }

    #[test]
    fn cancelled_returns_early() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.txt", b"hello");
        let token = CancellationToken::new();
        token.cancel();
        let out = PlainTextParser
            .parse(&path, NO_OCR, OutputFormat::Markdown, &ParseOptions::new(), &token)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "latin1.txt", b"caf\xE9 au lait");
        let out = parse(&path, OutputFormat::Markdown).unwrap();
        assert_eq!(out, "caf\u{FFFD} au lait");
    }
}
