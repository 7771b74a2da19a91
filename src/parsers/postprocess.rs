//! Deterministic cleanup of model-transcribed Markdown.
//!
//! Vision models sometimes ignore the output contract in small, predictable
//! ways. Each rule below repairs one such quirk without touching content.
//! Order matters: fences are unwrapped before line handling, and the final
//! newline pass runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one transcribed page.
///
/// 1. Unwrap an outer ```` ```markdown ```` fence around the whole answer
/// 2. Normalise line endings and drop trailing whitespace
/// 3. Remove zero-width and other invisible characters
/// 4. Collapse runs of blank lines to a single blank line
/// 5. Turn placeholder image links into italic captions
/// 6. End with exactly one newline
pub fn tidy_transcription(raw: &str) -> String {
    let s = unwrap_outer_fence(raw);
    let s = normalise_lines(&s);
    let s = drop_invisible(&s);
    let s = collapse_blank_runs(&s);
    let s = caption_placeholder_images(&s);
    single_final_newline(&s)
}

// ── Outer fence ──────────────────────────────────────────────────────────

static RE_WRAPPING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn unwrap_outer_fence(input: &str) -> String {
    match RE_WRAPPING_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Lines ────────────────────────────────────────────────────────────────

fn normalise_lines(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn drop_invisible(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'))
        .collect()
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

// ── Images ───────────────────────────────────────────────────────────────

static RE_IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &["example.com", "placeholder.com", "placehold.it", "dummyimage.com"];

/// A page image has no real URL; anything not absolute http(s) was invented.
fn is_invented_url(url: &str) -> bool {
    let url = url.trim();
    let absolute = url.starts_with("http://") || url.starts_with("https://");
    !absolute || PLACEHOLDER_HOSTS.iter().any(|h| url.contains(h))
}

fn caption_placeholder_images(input: &str) -> String {
    RE_IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !is_invented_url(&caps[2]) {
                return caps[0].to_string();
            }
            match caps[1].trim() {
                "" => String::new(),
                alt => format!("*{alt}*"),
            }
        })
        .into_owned()
}

fn single_final_newline(input: &str) -> String {
    let body = input.trim_matches('\n');
    if body.trim().is_empty() {
        String::new()
    } else {
        format!("{body}\n")
    }
}
