//! The single-job conversion pipeline.
//!
//! [`Converter::convert`] takes one [`ConversionRequest`] from a path to an
//! output artifact:
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Validate  empty path → NoInputFile; unknown parser/OCR → error
//!  ├─ 2. Check     token already set → Cancelled, no I/O
//!  ├─ 3. Stage     chunked private copy (token checked per chunk)
//!  ├─ 4. Parse     factory + backend between checkpoints
//!  ├─ 5. Write     temp artifact with the format's extension
//!  └─ 6. Cleanup   staged copy removed on every path
//! ```
//!
//! The staged input is deleted exactly once, after the artifact is written
//! or as soon as failure or cancellation is known. An artifact exists only
//! when the outcome is [`ConversionOutcome::Completed`].

use crate::cancel::CancellationToken;
use crate::config::ConversionConfig;
use crate::error::{MarkitError, Result};
use crate::factory::ParserFactory;
use crate::format::OutputFormat;
use crate::output::{ConversionOutcome, ConversionOutput, ConversionRequest, ParseOutcome};
use crate::pipeline::artifact::{discard_artifact, write_artifact};
use crate::pipeline::stage::{stage_input_tracked, StagedInput, Staging};
use crate::registry::ParserRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Runs conversion jobs against a frozen parser registry.
#[derive(Debug, Clone)]
pub struct Converter {
    factory: ParserFactory,
    config: ConversionConfig,
}

impl Converter {
    pub fn new(registry: Arc<ParserRegistry>, config: ConversionConfig) -> Self {
        Self {
            factory: ParserFactory::new(registry),
            config,
        }
    }

    /// Converter over the built-in parsers with default configuration.
    pub fn with_builtin_parsers() -> Self {
        Self::new(
            Arc::new(ParserRegistry::with_builtin_parsers()),
            ConversionConfig::default(),
        )
    }

    pub fn registry(&self) -> &ParserRegistry {
        self.factory.registry()
    }

    pub fn factory(&self) -> &ParserFactory {
        &self.factory
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Run one conversion job to completion, cancellation or failure.
    ///
    /// Never panics on I/O or backend errors; every failure is returned as
    /// [`ConversionOutcome::Failed`].
    pub fn convert(&self, request: &ConversionRequest, token: &CancellationToken) -> ConversionOutcome {
        self.convert_tracked(request, token, &|_| {})
    }

    /// [`convert`](Self::convert), telling `on_staged` where the staged copy
    /// lives (`Some`) and when it is gone (`None`).
    pub(crate) fn convert_tracked(
        &self,
        request: &ConversionRequest,
        token: &CancellationToken,
        on_staged: &dyn Fn(Option<&Path>),
    ) -> ConversionOutcome {
        let start = Instant::now();
        info!(
            "Starting conversion: '{}' with {} / {} → {}",
            request.source.display(),
            request.parser,
            request.ocr_option,
            request.output_format
        );

        match self.run(request, token, start, on_staged) {
            Ok(ConversionOutcome::Cancelled) => {
                info!("Conversion cancelled after {}ms", start.elapsed().as_millis());
                ConversionOutcome::Cancelled
            }
            Ok(outcome) => outcome,
            Err(e) if e.is_caller_error() => {
                warn!("Conversion rejected: {}", e);
                ConversionOutcome::Failed(e)
            }
            Err(e) => {
                error!("Conversion failed: {}", e);
                ConversionOutcome::Failed(e)
            }
        }
    }

    fn run(
        &self,
        request: &ConversionRequest,
        token: &CancellationToken,
        start: Instant,
        on_staged: &dyn Fn(Option<&Path>),
    ) -> Result<ConversionOutcome> {
        if request.source.as_os_str().is_empty() {
            return Err(MarkitError::NoInputFile);
        }

        if token.is_cancelled() {
            info!("Cancellation requested before staging");
            return Ok(ConversionOutcome::Cancelled);
        }

        // Reject bad selections before any file is created.
        self.validate_selection(request)?;

        let staging = stage_input_tracked(
            &request.source,
            self.config.staging_dir.as_deref(),
            self.config.chunk_size,
            token,
            &|path| on_staged(Some(path)),
        );
        let staged = match staging {
            Ok(Staging::Staged(staged)) => staged,
            Ok(Staging::Cancelled) => {
                on_staged(None);
                return Ok(ConversionOutcome::Cancelled);
            }
            Err(e) => {
                on_staged(None);
                return Err(e);
            }
        };

        let outcome = self.parse_and_write(&staged, request, token, start);
        staged.cleanup();
        on_staged(None);
        outcome
    }

    fn validate_selection(&self, request: &ConversionRequest) -> Result<()> {
        let registry = self.factory.registry();
        if registry.get(&request.parser).is_none() {
            return Err(MarkitError::UnknownParser {
                name: request.parser.clone(),
            });
        }
        if registry
            .ocr_method_id(&request.parser, &request.ocr_option)
            .is_none()
        {
            return Err(MarkitError::UnknownOcrMethod {
                parser: request.parser.clone(),
                option: request.ocr_option.clone(),
            });
        }
        Ok(())
    }

    fn parse_and_write(
        &self,
        staged: &StagedInput,
        request: &ConversionRequest,
        token: &CancellationToken,
        start: Instant,
    ) -> Result<ConversionOutcome> {
        // Unrecognised labels still get content: backends render Markdown
        // and the artifact falls back to `.txt`.
        let format = OutputFormat::from_label(&request.output_format).unwrap_or_default();

        let parse_start = Instant::now();
        let content = match self.factory.parse_document(
            staged.path(),
            &request.parser,
            &request.ocr_option,
            format,
            token,
            &self.config.extra_options,
        )? {
            ParseOutcome::Content(content) => content,
            ParseOutcome::Cancelled => return Ok(ConversionOutcome::Cancelled),
        };
        let parse_duration_ms = parse_start.elapsed().as_millis() as u64;

        let artifact = write_artifact(
            &content,
            request.artifact_extension(),
            self.config.output_dir.as_deref(),
        )?;

        // A cancel that landed while the artifact was being written still wins.
        if token.is_cancelled() {
            info!("Cancellation requested after output was written; discarding it");
            discard_artifact(&artifact);
            return Ok(ConversionOutcome::Cancelled);
        }

        let ocr_method_id = self
            .factory
            .registry()
            .ocr_method_id(&request.parser, &request.ocr_option)
            .unwrap_or_default()
            .to_string();

        let total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Conversion complete: {} bytes → {} ({}ms total)",
            content.len(),
            artifact.display(),
            total_duration_ms
        );

        Ok(ConversionOutcome::Completed(ConversionOutput {
            content,
            artifact,
            parser: request.parser.clone(),
            ocr_method_id,
            output_format: request.output_format.clone(),
            parse_duration_ms,
            total_duration_ms,
        }))
    }
}

/// Run a job on tokio's blocking pool.
///
/// Backends are blocking, CPU- or network-bound code, so they run under
/// `spawn_blocking` the same way a worker thread would run them.
pub async fn convert_async(
    converter: Arc<Converter>,
    request: ConversionRequest,
    token: CancellationToken,
) -> ConversionOutcome {
    match tokio::task::spawn_blocking(move || converter.convert(&request, &token)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Conversion task panicked: {}", e);
            ConversionOutcome::Failed(MarkitError::Internal(format!(
                "Conversion task panicked: {e}"
            )))
        }
    }
}
