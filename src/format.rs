//! Output formats and their on-disk file extensions.
//!
//! The label ↔ extension table is the one piece of on-disk compatibility the
//! converter must keep exactly:
//!
//! | Label           | Extension  |
//! |-----------------|------------|
//! | `Markdown`      | `.md`      |
//! | `JSON`          | `.json`    |
//! | `Text`          | `.txt`     |
//! | `Document Tags` | `.doctags` |
//! | anything else   | `.txt`     |
//!
//! [`render_content`] turns a backend's Markdown into the other formats for
//! backends that only produce Markdown natively.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extension used for labels that do not name a known format.
pub const FALLBACK_EXTENSION: &str = ".txt";

/// The fixed set of output kinds a backend can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Text,
    DocumentTags,
}

impl OutputFormat {
    /// Every format, in display order.
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Markdown,
        OutputFormat::Json,
        OutputFormat::Text,
        OutputFormat::DocumentTags,
    ];

    /// Parse a user-facing label. Case-insensitive; `Document Tags`,
    /// `DocumentTags` and `document_tags` are all accepted.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalised: String = label
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalised.as_str() {
            "markdown" | "md" => Some(OutputFormat::Markdown),
            "json" => Some(OutputFormat::Json),
            "text" | "txt" => Some(OutputFormat::Text),
            "documenttags" | "doctags" => Some(OutputFormat::DocumentTags),
            _ => None,
        }
    }

    /// The label shown to users.
    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "Markdown",
            OutputFormat::Json => "JSON",
            OutputFormat::Text => "Text",
            OutputFormat::DocumentTags => "Document Tags",
        }
    }

    /// Stable lowercase identifier handed to backends.
    pub fn id(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
            OutputFormat::DocumentTags => "document_tags",
        }
    }

    /// File extension (with leading dot) for artifacts in this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => ".md",
            OutputFormat::Json => ".json",
            OutputFormat::Text => ".txt",
            OutputFormat::DocumentTags => ".doctags",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Extension for an arbitrary format label; total over all strings.
pub fn extension_for_label(label: &str) -> &'static str {
    OutputFormat::from_label(label)
        .map(OutputFormat::extension)
        .unwrap_or(FALLBACK_EXTENSION)
}

/// Render Markdown content in the requested format.
pub fn render_content(markdown: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Markdown => markdown.to_string(),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&serde_json::json!({ "content": markdown }))
                .unwrap_or_else(|_| markdown.to_string())
        }
        OutputFormat::Text => strip_markdown(markdown),
        OutputFormat::DocumentTags => format!("<doc>\n{}\n</doc>", markdown.trim_end()),
    }
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+").unwrap());
static RE_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\*\*|__)(.+?)(\*\*|__)|(\*|_)([^*_\s][^*_]*?)(\*|_)").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```[^\n]*\n?").unwrap());
static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());

/// Remove common Markdown markup, keeping the text.
pub fn strip_markdown(markdown: &str) -> String {
    let s = RE_FENCE.replace_all(markdown, "");
    let s = RE_HEADING.replace_all(&s, "");
    let s = RE_LINK.replace_all(&s, "$1");
    let s = RE_INLINE_CODE.replace_all(&s, "$1");
    RE_EMPHASIS
        .replace_all(&s, |caps: &regex::Captures<'_>| {
            caps.get(2)
                .or_else(|| caps.get(5))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        })
        .to_string()
}
