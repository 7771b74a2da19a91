//! Parser registration and discovery.
//!
//! The registry is an insertion-ordered catalog of parser backends: the first
//! parser registered is the default one offered to users. It is populated
//! once at startup through `&mut self` methods, then shared read-only behind
//! an `Arc`, so lookups need no locking.
//!
//! ```rust
//! use markit::ParserRegistry;
//!
//! let registry = ParserRegistry::with_builtin_parsers();
//! assert_eq!(registry.default_parser(), Some("Pdfium"));
//! assert_eq!(registry.ocr_method_id("Pdfium", "No OCR"), Some("no_ocr"));
//! ```

use crate::error::{MarkitError, Result};
use crate::parser::{DocumentParser, ParserDescriptor};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a fresh backend instance.
pub type ParserConstructor = Arc<dyn Fn() -> Box<dyn DocumentParser> + Send + Sync>;

/// A registered parser: its catalog entry and how to construct it.
#[derive(Clone)]
pub struct RegisteredParser {
    pub descriptor: ParserDescriptor,
    constructor: ParserConstructor,
}

impl RegisteredParser {
    /// Construct a new backend instance.
    pub fn create(&self) -> Box<dyn DocumentParser> {
        (self.constructor)()
    }
}

impl fmt::Debug for RegisteredParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredParser")
            .field("descriptor", &self.descriptor)
            .field("constructor", &"<fn>")
            .finish()
    }
}

/// Insertion-ordered parser catalog.
#[derive(Debug, Default, Clone)]
pub struct ParserRegistry {
    parsers: IndexMap<String, RegisteredParser>,
}

impl ParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in backends, in default order.
    pub fn with_builtin_parsers() -> Self {
        let mut registry = Self::new();
        if let Err(e) = crate::parsers::register_builtin(&mut registry) {
            warn!("Built-in parser registration incomplete: {}", e);
        }
        registry
    }

    /// Register a parser under `descriptor.name`.
    ///
    /// # Errors
    /// - [`MarkitError::DuplicateParser`] if the name is taken. The existing
    ///   entry is kept.
    /// - [`MarkitError::InvalidConfig`] if the name is empty or two OCR
    ///   methods share a display name.
    pub fn register<F>(&mut self, descriptor: ParserDescriptor, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn DocumentParser> + Send + Sync + 'static,
    {
        validate_descriptor(&descriptor)?;

        if self.parsers.contains_key(&descriptor.name) {
            return Err(MarkitError::DuplicateParser {
                name: descriptor.name,
            });
        }

        debug!(
            "Registered parser '{}' with {} OCR option(s)",
            descriptor.name,
            descriptor.ocr_methods.len()
        );
        self.parsers.insert(
            descriptor.name.clone(),
            RegisteredParser {
                descriptor,
                constructor: Arc::new(constructor),
            },
        );
        Ok(())
    }

    /// Register a backend type, taking its descriptor from a prototype
    /// instance.
    pub fn register_parser<P>(&mut self) -> Result<()>
    where
        P: DocumentParser + Default + 'static,
    {
        let descriptor = P::default().descriptor();
        self.register(descriptor, || Box::new(P::default()))
    }

    /// Registered parser names, in registration order.
    pub fn parser_names(&self) -> Vec<String> {
        self.parsers.keys().cloned().collect()
    }

    /// The first registered parser, if any.
    pub fn default_parser(&self) -> Option<&str> {
        self.parsers.keys().next().map(String::as_str)
    }

    /// OCR display names for a parser, in order. Empty for unknown parsers.
    pub fn ocr_options(&self, parser_name: &str) -> Vec<String> {
        self.parsers
            .get(parser_name)
            .map(|p| {
                p.descriptor
                    .ocr_methods
                    .iter()
                    .map(|m| m.display_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first OCR display name for a parser.
    pub fn default_ocr_option(&self, parser_name: &str) -> Option<&str> {
        self.parsers
            .get(parser_name)
            .and_then(|p| p.descriptor.ocr_methods.first())
            .map(|m| m.display_name.as_str())
    }

    /// Map an OCR display name to its internal id.
    ///
    /// `None` when either the parser or the display name is unknown.
    pub fn ocr_method_id(&self, parser_name: &str, display_name: &str) -> Option<&str> {
        self.parsers
            .get(parser_name)
            .and_then(|p| p.descriptor.ocr_method(display_name))
            .map(|m| m.id.as_str())
    }

    /// Catalog entry plus constructor for a parser.
    pub fn get(&self, parser_name: &str) -> Option<&RegisteredParser> {
        self.parsers.get(parser_name)
    }

    /// Catalog entry for a parser.
    pub fn descriptor(&self, parser_name: &str) -> Option<&ParserDescriptor> {
        self.parsers.get(parser_name).map(|p| &p.descriptor)
    }

    /// All catalog entries, in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ParserDescriptor> {
        self.parsers.values().map(|p| &p.descriptor)
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

fn validate_descriptor(descriptor: &ParserDescriptor) -> Result<()> {
    if descriptor.name.trim().is_empty() {
        return Err(MarkitError::InvalidConfig(
            "Parser name cannot be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for method in &descriptor.ocr_methods {
        if !seen.insert(method.display_name.as_str()) {
            return Err(MarkitError::InvalidConfig(format!(
                "Parser '{}' lists OCR option '{}' more than once",
                descriptor.name, method.display_name
            )));
        }
    }
    Ok(())
}
