//! # markit
//!
//! Convert documents to Markdown, JSON, plain text or document tags through
//! pluggable parser backends, with cooperative cancellation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ConversionRequest (path, parser, OCR option, format)
//!  │
//!  ├─ 1. Validate  registry lookup of parser and OCR option
//!  ├─ 2. Stage     chunked private copy of the input (temp file)
//!  ├─ 3. Parse     ParserFactory → DocumentParser, between token checkpoints
//!  ├─ 4. Write     artifact temp file with the format's extension
//!  └─ 5. Cleanup   staged copy removed on every path
//! ```
//!
//! The outcome is always one of `Completed`, `Cancelled` or `Failed`; nothing
//! panics past [`Converter::convert`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markit::{CancellationToken, ConversionRequest, Converter};
//!
//! let converter = Converter::with_builtin_parsers();
//! let request = ConversionRequest::new("notes.md", "Plain Text", "No OCR", "JSON");
//! let outcome = converter.convert(&request, &CancellationToken::new());
//! println!("{}", outcome.message());
//! ```
//!
//! ## Running a job in the background
//!
//! [`JobHandle`] runs a conversion on a worker thread with a monitor that
//! watches the job's own token. Call [`JobHandle::cancel`] from anywhere;
//! [`JobHandle::wait`] then returns `Cancelled` within the configured join
//! timeout even if the backend ignores the token.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `markit` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! markit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod convert;
pub mod error;
pub mod factory;
pub mod format;
pub mod job;
pub mod output;
pub mod parser;
pub mod parsers;
pub mod pipeline;
pub mod registry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancellationToken;
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{convert_async, Converter};
pub use error::{MarkitError, Result};
pub use factory::ParserFactory;
pub use format::OutputFormat;
pub use job::{JobHandle, JobState};
pub use output::{ConversionOutcome, ConversionOutput, ConversionRequest, ParseOutcome};
pub use parser::{DocumentParser, OcrMethod, ParseOptions, ParserDescriptor};
pub use pipeline::artifact::save_artifact;
pub use registry::ParserRegistry;
