//! Parser factory: resolve a backend by name, resolve the OCR option, and
//! invoke the backend between cancellation checkpoints.
//!
//! ## Checkpoints
//!
//! ```text
//! A  token set?            → Cancelled   (nothing constructed)
//!    resolve parser        → UnknownParser
//!    resolve OCR option    → UnknownOcrMethod
//! B  token set?            → Cancelled   (backend never called)
//!    backend.parse(..)     (token forwarded; may return early)
//! C  token set?            → Cancelled   (result or error discarded)
//! ```
//!
//! Checkpoint C makes a cancellation raised during the call win over both a
//! completed result and a backend error.

use crate::cancel::CancellationToken;
use crate::error::{MarkitError, Result};
use crate::format::OutputFormat;
use crate::output::ParseOutcome;
use crate::parser::{merge_options, DocumentParser, ParseOptions};
use crate::registry::ParserRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Creates backends from a frozen registry and runs them.
#[derive(Debug, Clone)]
pub struct ParserFactory {
    registry: Arc<ParserRegistry>,
}

impl ParserFactory {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Instantiate a fresh backend for `name`.
    pub fn create_parser(&self, name: &str) -> Result<Box<dyn DocumentParser>> {
        self.registry
            .get(name)
            .map(|p| p.create())
            .ok_or_else(|| MarkitError::UnknownParser {
                name: name.to_string(),
            })
    }

    /// Parse a document with the named parser and OCR option.
    ///
    /// Returns `Ok(ParseOutcome::Cancelled)` whenever the token is observed
    /// set at a checkpoint. Backend errors are returned as `Err` unless the
    /// token is set by the time the call returns.
    pub fn parse_document(
        &self,
        path: &Path,
        parser_name: &str,
        ocr_option: &str,
        format: OutputFormat,
        token: &CancellationToken,
        extra_options: &ParseOptions,
    ) -> Result<ParseOutcome> {
        // ── Checkpoint A ────────────────────────────────────────────────
        if token.is_cancelled() {
            info!("Cancellation requested before parser '{}' was created", parser_name);
            return Ok(ParseOutcome::Cancelled);
        }

        let registered = self
            .registry
            .get(parser_name)
            .ok_or_else(|| MarkitError::UnknownParser {
                name: parser_name.to_string(),
            })?;

        let method = registered
            .descriptor
            .ocr_method(ocr_option)
            .ok_or_else(|| MarkitError::UnknownOcrMethod {
                parser: parser_name.to_string(),
                option: ocr_option.to_string(),
            })?;
        let options = merge_options(&method.default_params, extra_options);
        debug!(
            "Resolved '{}' / '{}' → ocr id '{}' ({} option(s))",
            parser_name,
            ocr_option,
            method.id,
            options.len()
        );

        // ── Checkpoint B ────────────────────────────────────────────────
        if token.is_cancelled() {
            info!("Cancellation requested before parser '{}' was invoked", parser_name);
            return Ok(ParseOutcome::Cancelled);
        }

        let parser = registered.create();
        let start = Instant::now();
        let result = parser.parse(path, &method.id, format, &options, token);
        let elapsed = start.elapsed();

        // ── Checkpoint C ────────────────────────────────────────────────
        if token.is_cancelled() {
            match &result {
                Ok(_) => info!(
                    "Cancellation requested while '{}' was running; discarding result",
                    parser_name
                ),
                Err(e) => warn!(
                    "Cancellation requested while '{}' was running; ignoring error: {}",
                    parser_name, e
                ),
            }
            return Ok(ParseOutcome::Cancelled);
        }

        let content = result?;
        info!(
            "Processed with '{}' in {:.2} seconds ({} bytes)",
            parser_name,
            elapsed.as_secs_f64(),
            content.len()
        );
        Ok(ParseOutcome::Content(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{option_str, OcrMethod, ParserDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records how often it was constructed and invoked; optionally cancels
    /// the token or fails from inside `parse`.
    struct Probe {
        calls: Arc<AtomicUsize>,
        cancel_during_call: bool,
        fail: bool,
    }

    impl DocumentParser for Probe {
        fn name(&self) -> &str {
            "Probe"
        }

        fn supported_ocr_methods(&self) -> Vec<OcrMethod> {
            vec![OcrMethod::new("no_ocr", "No OCR").with_param("greeting", "default")]
        }

        fn parse(
            &self,
            _path: &Path,
            ocr_method_id: &str,
            format: OutputFormat,
            options: &ParseOptions,
            token: &CancellationToken,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_during_call {
                token.cancel();
            }
            if self.fail {
                return Err(MarkitError::backend("Probe", "engine crashed"));
            }
            Ok(format!(
                "{}:{}:{}",
                ocr_method_id,
                format.id(),
                option_str(options, "greeting").unwrap_or("")
            ))
        }
    }

    struct Fixture {
        factory: ParserFactory,
        constructed: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    fn fixture(cancel_during_call: bool, fail: bool) -> Fixture {
        let constructed = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ParserRegistry::new();
        let (c, k) = (Arc::clone(&constructed), Arc::clone(&calls));
        let descriptor = ParserDescriptor {
            name: "Probe".into(),
            description: "test double".into(),
            ocr_methods: vec![OcrMethod::new("no_ocr", "No OCR").with_param("greeting", "default")],
        };
        registry
            .register(descriptor, move || {
                c.fetch_add(1, Ordering::SeqCst);
                Box::new(Probe {
                    calls: Arc::clone(&k),
                    cancel_during_call,
                    fail,
                })
            })
            .unwrap();
        Fixture {
            factory: ParserFactory::new(Arc::new(registry)),
            constructed,
            calls,
        }
    }

    fn parse(f: &Fixture, parser: &str, ocr: &str, token: &CancellationToken) -> Result<ParseOutcome> {
        f.factory.parse_document(
            Path::new("/tmp/doc.txt"),
            parser,
            ocr,
            OutputFormat::Markdown,
            token,
            &ParseOptions::new(),
        )
    }

    #[test]
    fn parses_with_default_params() {
        let f = fixture(false, false);
        let out = parse(&f, "Probe", "No OCR", &CancellationToken::new()).unwrap();
        assert_eq!(out, ParseOutcome::Content("no_ocr:markdown:default".into()));
    }

    #[test]
    fn extra_options_override_defaults() {
        let f = fixture(false, false);
        let mut extra = ParseOptions::new();
        extra.insert("greeting".into(), "hi".into());
        let out = f
            .factory
            .parse_document(
                Path::new("/tmp/doc.txt"),
                "Probe",
                "No OCR",
                OutputFormat::Text,
                &CancellationToken::new(),
                &extra,
            )
            .unwrap();
        assert_eq!(out, ParseOutcome::Content("no_ocr:text:hi".into()));
    }

    #[test]
    fn cancelled_before_start_constructs_nothing() {
        let f = fixture(false, false);
        let token = CancellationToken::new();
        token.cancel();
        let out = parse(&f, "NoSuchParser", "No OCR", &token).unwrap();
        assert_eq!(out, ParseOutcome::Cancelled);
        assert_eq!(f.constructed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_parser() {
        let f = fixture(false, false);
        let err = parse(&f, "NoSuchParser", "No OCR", &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, MarkitError::UnknownParser { .. }));
        assert!(f.factory.create_parser("NoSuchParser").is_err());
    }

    #[test]
    fn unknown_ocr_option() {
        let f = fixture(false, false);
        let err = parse(&f, "Probe", "EasyOCR", &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, MarkitError::UnknownOcrMethod { .. }));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancellation_during_call_discards_result() {
        let f = fixture(true, false);
        let out = parse(&f, "Probe", "No OCR", &CancellationToken::new()).unwrap();
        assert_eq!(out, ParseOutcome::Cancelled);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_wins_over_backend_error() {
        let f = fixture(true, true);
        let out = parse(&f, "Probe", "No OCR", &CancellationToken::new()).unwrap();
        assert_eq!(out, ParseOutcome::Cancelled);
    }

    #[test]
    fn backend_error_propagates() {
        let f = fixture(false, true);
        let err = parse(&f, "Probe", "No OCR", &CancellationToken::new()).unwrap_err();
        assert!(err.to_string().contains("engine crashed"));
    }

    #[test]
    fn fresh_instance_per_call() {
        let f = fixture(false, false);
        let token = CancellationToken::new();
        parse(&f, "Probe", "No OCR", &token).unwrap();
        parse(&f, "Probe", "No OCR", &token).unwrap();
        assert_eq!(f.constructed.load(Ordering::SeqCst), 2);
    }
}
