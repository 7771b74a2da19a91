//! Error types for the markit library.
//!
//! [`MarkitError`] covers every way a conversion can fail. Cancellation is
//! absent: a cancelled job is a normal outcome, reported through
//! [`crate::output::ParseOutcome::Cancelled`] and
//! [`crate::output::ConversionOutcome::Cancelled`], never through `Err`.
//!
//! The variants fall into three groups:
//!
//! * **Caller mistakes**: unknown parser or OCR option, missing input file,
//!   bad configuration. Reported as-is; retrying will not help.
//! * **I/O failures**: staging the input copy or writing the output
//!   artifact failed.
//! * **Backend failures**: the selected parser raised an error while
//!   converting the document.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the markit library.
#[derive(Debug, Error)]
pub enum MarkitError {
    // ── Caller errors ─────────────────────────────────────────────────────
    /// No input path was supplied.
    #[error("Please upload a file.")]
    NoInputFile,

    /// The input path does not exist or cannot be opened.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// No parser is registered under this name.
    #[error("Unknown parser: {name}\nRun `markit --list` to see the available parsers.")]
    UnknownParser { name: String },

    /// The parser exists but offers no OCR option with this display name.
    #[error("Unknown OCR method: {option} for parser {parser}")]
    UnknownOcrMethod { parser: String, option: String },

    /// A parser with the same name was already registered.
    #[error("Parser '{name}' is already registered")]
    DuplicateParser { name: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Creating or filling the private input copy failed.
    #[error("Error creating temporary file for '{path}': {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating or writing the output artifact failed.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The parser backend failed while converting the document.
    #[error("Parser '{parser}' failed: {detail}")]
    Backend { parser: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarkitError {
    /// Shorthand used by backends to wrap their own failures.
    pub fn backend(parser: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        MarkitError::Backend {
            parser: parser.into(),
            detail: detail.to_string(),
        }
    }

    /// True for errors caused by the caller's selection or input, as opposed
    /// to I/O or backend failures.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MarkitError::NoInputFile
                | MarkitError::SourceNotFound { .. }
                | MarkitError::UnknownParser { .. }
                | MarkitError::UnknownOcrMethod { .. }
                | MarkitError::DuplicateParser { .. }
                | MarkitError::InvalidConfig(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarkitError>;
