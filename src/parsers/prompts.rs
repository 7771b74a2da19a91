//! Transcription prompts for the vision backend, one per OCR mode.
//!
//! Every prompt shares the same output contract (Markdown only, no fences,
//! no commentary). Higher modes add instructions for tables, formulae and
//! figures at the cost of more output tokens.

const OUTPUT_CONTRACT: &str = r#"OUTPUT
- Output ONLY the Markdown transcription
- Do NOT wrap the answer in ```markdown fences
- Do NOT add commentary, explanations or "Page X of Y" markers
- Start directly with the page content"#;

const BASIC_RULES: &str = r#"You transcribe a single document page image into Markdown.

TEXT
- Transcribe all visible text in natural reading order
- Use # / ## / ### for headings that are visually distinct
- Use - for bullet lists and 1. for numbered lists
- Skip page numbers and running headers or footers"#;

const STRUCTURED_RULES: &str = r#"
TABLES
- Convert tables to GFM pipe tables with a header separator row
- Keep one table row per visual row; never invent empty columns

EMPHASIS AND CODE
- Mirror visual emphasis with **bold** and *italic*
- Wrap code listings in fenced blocks with a language tag when obvious"#;

const HIGH_FIDELITY_RULES: &str = r#"
FORMULAE
- Render mathematical notation as LaTeX: $inline$ and $$display$$

COMPLEX LAYOUT
- Fall back to HTML <table> markup when merged cells make pipe tables lossy
- Describe figures in one italic line: *Figure: short description*
- Preserve footnote markers and list them at the end of the page"#;

/// OCR mode id for plain transcription.
pub const VLM_BASIC: &str = "vlm_basic";
/// OCR mode id adding tables and emphasis.
pub const VLM_STRUCTURED: &str = "vlm_structured";
/// OCR mode id adding formulae and complex layout.
pub const VLM_HIGH_FIDELITY: &str = "vlm_high_fidelity";

/// Build the system prompt for an OCR mode id. Unknown ids get the
/// structured prompt.
pub fn system_prompt(ocr_method_id: &str) -> String {
    let mut prompt = String::from(BASIC_RULES);
    match ocr_method_id {
        VLM_BASIC => {}
        VLM_HIGH_FIDELITY => {
            prompt.push_str(STRUCTURED_RULES);
            prompt.push_str(HIGH_FIDELITY_RULES);
        }
        _ => prompt.push_str(STRUCTURED_RULES),
    }
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_CONTRACT);
    prompt
}

/// Context message carrying the previous page, so numbering and style stay
/// consistent across page boundaries.
pub fn previous_page_context(prior_page: &str) -> String {
    format!(
        "The previous page was transcribed as follows. Continue its lists, numbering and style:\n\n\"\"\"{}\"\"\"",
        prior_page
    )
}
