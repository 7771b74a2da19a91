//! The parser plugin contract.
//!
//! A backend implements [`DocumentParser`]; the registry stores a
//! [`ParserDescriptor`] (name, description, OCR methods) next to a
//! constructor that builds a fresh backend instance per job.
//!
//! OCR methods have two names. `id` is the stable internal identifier passed
//! to [`DocumentParser::parse`]; `display_name` is what users pick from, and
//! the factory maps it back to the id.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::format::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Free-form backend options: JSON object keyed by option name.
pub type ParseOptions = serde_json::Map<String, serde_json::Value>;

/// One OCR mode a parser supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrMethod {
    /// Stable internal identifier, e.g. `no_ocr`.
    pub id: String,
    /// User-facing name, e.g. `No OCR`. Unique per parser.
    pub display_name: String,
    /// Options applied before the caller's own extra options.
    #[serde(default)]
    pub default_params: ParseOptions,
}

impl OcrMethod {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            default_params: ParseOptions::new(),
        }
    }

    /// Add a default parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }
}

/// Static catalog entry describing a parser backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserDescriptor {
    pub name: String,
    pub description: String,
    pub ocr_methods: Vec<OcrMethod>,
}

impl ParserDescriptor {
    /// Look up an OCR method by its display name.
    pub fn ocr_method(&self, display_name: &str) -> Option<&OcrMethod> {
        self.ocr_methods
            .iter()
            .find(|m| m.display_name == display_name)
    }
}

/// A document conversion backend.
///
/// Implementations must be `Send` so a fresh instance can move onto the
/// worker thread. `parse` may block for a long time; it should poll `token`
/// between units of work (pages, chunks) and return early once it is set,
/// but the pipeline does not rely on it.
pub trait DocumentParser: Send {
    /// Unique parser name, used as the registry key.
    fn name(&self) -> &str;

    /// One-line description for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Supported OCR methods, in display order. The first is the default.
    fn supported_ocr_methods(&self) -> Vec<OcrMethod>;

    /// Convert the document at `path`.
    ///
    /// `options` already contains the OCR method's default parameters merged
    /// under the caller's extra options.
    fn parse(
        &self,
        path: &Path,
        ocr_method_id: &str,
        format: OutputFormat,
        options: &ParseOptions,
        token: &CancellationToken,
    ) -> Result<String>;

    /// Build the catalog entry for this parser.
    fn descriptor(&self) -> ParserDescriptor {
        ParserDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            ocr_methods: self.supported_ocr_methods(),
        }
    }
}

/// Read a string option.
pub fn option_str<'a>(options: &'a ParseOptions, key: &str) -> Option<&'a str> {
    options.get(key).and_then(|v| v.as_str())
}

/// Read an unsigned integer option.
pub fn option_u64(options: &ParseOptions, key: &str) -> Option<u64> {
    options.get(key).and_then(|v| v.as_u64())
}

/// Read a float option.
pub fn option_f64(options: &ParseOptions, key: &str) -> Option<f64> {
    options.get(key).and_then(|v| v.as_f64())
}

/// Merge OCR default params with caller options. Caller keys win.
pub fn merge_options(defaults: &ParseOptions, extra: &ParseOptions) -> ParseOptions {
    let mut merged = defaults.clone();
    for (k, v) in extra {
        merged.insert(k.clone(), v.clone());
    }
    merged
}
