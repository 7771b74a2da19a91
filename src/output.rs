//! Request and result types for a single conversion job.

use crate::error::MarkitError;
use crate::format::extension_for_label;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// What the caller asked for: one document, one backend, one OCR option and
/// one output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Path to the source document. Empty means "no file selected".
    pub source: PathBuf,
    /// Registered parser name.
    pub parser: String,
    /// OCR option display name, as listed by the registry.
    pub ocr_option: String,
    /// Output format label (`Markdown`, `JSON`, `Text`, `Document Tags`).
    pub output_format: String,
}

impl ConversionRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        parser: impl Into<String>,
        ocr_option: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            parser: parser.into(),
            ocr_option: ocr_option.into(),
            output_format: output_format.into(),
        }
    }

    /// Extension of the output artifact this request will produce.
    pub fn artifact_extension(&self) -> &'static str {
        extension_for_label(&self.output_format)
    }
}

/// Result of one backend invocation through the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The backend produced content and no cancellation was observed.
    Content(String),
    /// Cancellation was observed at a checkpoint; any content was discarded.
    Cancelled,
}

/// A successful conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// Converted content, as returned by the backend.
    pub content: String,
    /// Temporary file holding `content`, with the format's extension.
    /// The caller owns it from here on.
    pub artifact: PathBuf,
    pub parser: String,
    pub ocr_method_id: String,
    pub output_format: String,
    /// Wall-clock time spent inside the backend.
    pub parse_duration_ms: u64,
    /// Wall-clock time for the whole job, staging included.
    pub total_duration_ms: u64,
}

impl ConversionOutput {
    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }
}

/// Final state of a conversion job. Exactly one of these is returned for
/// every call; the pipeline never panics or raises past this point.
#[derive(Debug)]
pub enum ConversionOutcome {
    Completed(ConversionOutput),
    Cancelled,
    Failed(MarkitError),
}

impl ConversionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ConversionOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConversionOutcome::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConversionOutcome::Failed(_))
    }

    /// The successful output, if any.
    pub fn output(&self) -> Option<&ConversionOutput> {
        match self {
            ConversionOutcome::Completed(out) => Some(out),
            _ => None,
        }
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&MarkitError> {
        match self {
            ConversionOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Short message suitable for showing in place of content.
    pub fn message(&self) -> String {
        match self {
            ConversionOutcome::Completed(out) => out.content.clone(),
            ConversionOutcome::Cancelled => "Conversion cancelled.".to_string(),
            ConversionOutcome::Failed(MarkitError::NoInputFile) => MarkitError::NoInputFile.to_string(),
            ConversionOutcome::Failed(e) => format!("Error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_extension_follows_format() {
        let r = ConversionRequest::new("a.pdf", "P1", "No OCR", "Document Tags");
        assert_eq!(r.artifact_extension(), ".doctags");
        let r = ConversionRequest::new("a.pdf", "P1", "No OCR", "YAML");
        assert_eq!(r.artifact_extension(), ".txt");
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(ConversionOutcome::Cancelled.message(), "Conversion cancelled.");
        assert_eq!(
            ConversionOutcome::Failed(MarkitError::NoInputFile).message(),
            "Please upload a file."
        );
        let failed = ConversionOutcome::Failed(MarkitError::UnknownParser { name: "X".into() });
        assert!(failed.message().starts_with("Error: Unknown parser: X"));
        assert!(failed.is_failed());
        assert!(failed.output().is_none());
    }

    #[test]
    fn legitimate_content_never_looks_cancelled() {
        let out = ConversionOutput {
            content: "Conversion cancelled.".into(),
            artifact: PathBuf::from("/tmp/x.md"),
            parser: "P1".into(),
            ocr_method_id: "no_ocr".into(),
            output_format: "Markdown".into(),
            parse_duration_ms: 1,
            total_duration_ms: 2,
        };
        let outcome = ConversionOutcome::Completed(out);
        assert!(outcome.is_completed());
        assert!(!outcome.is_cancelled());
    }
}
