//! Vision-model transcription.
//!
//! ```text
//! input ──▶ pages ──▶ PNG/base64 ──▶ vision LLM ──▶ tidy ──▶ join ──▶ format
//!           (pdfium render, or the image file itself)
//! ```
//!
//! Pages are transcribed one at a time so the token can be checked between
//! them; a cancelled job stops after the page in flight. The three OCR modes
//! differ only in the system prompt and their default render/token budget.
//!
//! Provider resolution, most specific first:
//! 1. a provider injected with [`VisionParser::with_provider`]
//! 2. `provider` / `model` options
//! 3. `EDGEQUAKE_LLM_PROVIDER` / `EDGEQUAKE_MODEL` environment variables
//! 4. auto-detection from API key variables

use super::postprocess::tidy_transcription;
use super::prompts::{previous_page_context, system_prompt, VLM_BASIC, VLM_HIGH_FIDELITY, VLM_STRUCTURED};
use super::{bind_pdfium, mime_type_for_path, open_pdf};
use crate::cancel::CancellationToken;
use crate::error::{MarkitError, Result};
use crate::format::{render_content, OutputFormat};
use crate::parser::{option_f64, option_str, option_u64, DocumentParser, OcrMethod, ParseOptions};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::fmt;
use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

const NAME: &str = "Vision LLM";
const DEFAULT_MODEL: &str = "gpt-4.1-nano";
const MAX_BACKOFF_MS: u64 = 60_000;
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Transcribes page images with a vision-capable LLM.
#[derive(Default, Clone)]
pub struct VisionParser {
    provider: Option<Arc<dyn LLMProvider>>,
}

impl VisionParser {
    /// Use a pre-built provider instead of resolving one per call.
    pub fn with_provider(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }
}

impl fmt::Debug for VisionParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionParser")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

/// Per-call settings read from the merged parse options.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionSettings {
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Render resolution for PDF pages. Default: 150.
    pub dpi: u32,
    /// Longest rendered edge in pixels. Default: 2000.
    pub max_pixels: u32,
    pub max_tokens: usize,
    pub temperature: f32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Send the previous page as context. Default: false.
    pub maintain_format: bool,
    pub password: Option<String>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            dpi: 150,
            max_pixels: 2000,
            max_tokens: 4096,
            temperature: 0.1,
            max_retries: 2,
            retry_backoff_ms: 500,
            maintain_format: false,
            password: None,
        }
    }
}

impl VisionSettings {
    /// Read settings from options, falling back to the environment for the
    /// provider pair and to defaults for the rest. Numbers are clamped.
    pub fn from_options(options: &ParseOptions) -> Self {
        let d = Self::default();
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            provider: option_str(options, "provider")
                .map(str::to_string)
                .or_else(|| env("EDGEQUAKE_LLM_PROVIDER")),
            model: option_str(options, "model")
                .map(str::to_string)
                .or_else(|| env("EDGEQUAKE_MODEL")),
            dpi: option_u64(options, "dpi")
                .map(|v| v.clamp(72, 400) as u32)
                .unwrap_or(d.dpi),
            max_pixels: option_u64(options, "max_pixels")
                .map(|v| v.clamp(256, 8000) as u32)
                .unwrap_or(d.max_pixels),
            max_tokens: option_u64(options, "max_tokens")
                .map(|v| v.clamp(256, 32_768) as usize)
                .unwrap_or(d.max_tokens),
            temperature: option_f64(options, "temperature")
                .map(|v| v.clamp(0.0, 2.0) as f32)
                .unwrap_or(d.temperature),
            max_retries: option_u64(options, "max_retries")
                .map(|v| v.min(10) as u32)
                .unwrap_or(d.max_retries),
            retry_backoff_ms: option_u64(options, "retry_backoff_ms")
                .map(|v| v.min(MAX_BACKOFF_MS))
                .unwrap_or(d.retry_backoff_ms),
            maintain_format: options
                .get("maintain_format")
                .and_then(|v| v.as_bool())
                .unwrap_or(d.maintain_format),
            password: option_str(options, "password").map(str::to_string),
        }
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl DocumentParser for VisionParser {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Transcribes rendered pages or images with a vision LLM (needs an API key)"
    }

    fn supported_ocr_methods(&self) -> Vec<OcrMethod> {
        vec![
            OcrMethod::new(VLM_BASIC, "Basic")
                .with_param("dpi", 120)
                .with_param("max_tokens", 2048),
            OcrMethod::new(VLM_STRUCTURED, "Structured"),
            OcrMethod::new(VLM_HIGH_FIDELITY, "High Fidelity")
                .with_param("dpi", 200)
                .with_param("max_tokens", 8192)
                .with_param("maintain_format", true),
        ]
    }

    fn parse(
        &self,
        path: &Path,
        ocr_method_id: &str,
        format: OutputFormat,
        options: &ParseOptions,
        token: &CancellationToken,
    ) -> Result<String> {
        if Handle::try_current().is_err() {
            return self.transcribe_document(path, ocr_method_id, format, options, token);
        }

        // Called from inside a runtime: blocking on provider calls here would
        // panic, so the whole transcription runs on a helper thread.
        thread::scope(|scope| -> Result<String> {
            let worker = thread::Builder::new()
                .name("markit-vision".into())
                .spawn_scoped(scope, || {
                    self.transcribe_document(path, ocr_method_id, format, options, token)
                })
                .map_err(|e| MarkitError::Internal(format!("failed to spawn vision thread: {e}")))?;
            worker
                .join()
                .map_err(|_| MarkitError::Internal("vision transcription panicked".into()))?
        })
    }
}

impl VisionParser {
    fn transcribe_document(
        &self,
        path: &Path,
        ocr_method_id: &str,
        format: OutputFormat,
        options: &ParseOptions,
        token: &CancellationToken,
    ) -> Result<String> {
        let settings = VisionSettings::from_options(options);
        let mime = mime_type_for_path(path);
        let source = if mime.starts_with("image/") {
            PageSource::Image(load_image(path, mime)?)
        } else if mime == "application/pdf" {
            PageSource::Pdf
        } else {
            return Err(MarkitError::backend(
                NAME,
                format!("unsupported input type {mime}; use a PDF or an image"),
            ));
        };

        if token.is_cancelled() {
            return Ok(String::new());
        }

        let provider = match &self.provider {
            Some(p) => Arc::clone(p),
            None => resolve_provider(&settings)?,
        };
        info!(
            "Vision LLM: provider={} model={} mode={}",
            settings.provider.as_deref().unwrap_or("auto"),
            settings.model.as_deref().unwrap_or(DEFAULT_MODEL),
            ocr_method_id
        );

        let exec = Executor::new()?;
        let mut session = Session {
            provider,
            system_prompt: system_prompt(ocr_method_id),
            settings: &settings,
            token,
            exec: &exec,
            pages: Vec::new(),
        };

        let finished = match source {
            PageSource::Image(image) => session.transcribe(1, image)?,
            PageSource::Pdf => session.transcribe_pdf(path)?,
        };
        if !finished {
            return Ok(String::new());
        }

        let markdown = session.pages.join("\n\n");
        Ok(render_content(&markdown, format))
    }
}

enum PageSource {
    Image(ImageData),
    Pdf,
}

/// Accumulates page transcriptions for one parse call.
struct Session<'a> {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    settings: &'a VisionSettings,
    token: &'a CancellationToken,
    exec: &'a Executor,
    pages: Vec<String>,
}

impl Session<'_> {
    /// Returns `false` when the token stopped the run.
    fn transcribe_pdf(&mut self, path: &Path) -> Result<bool> {
        let pdfium = bind_pdfium(NAME)?;
        let document = open_pdf(&pdfium, NAME, path, self.settings.password.as_deref())?;
        let pages = document.pages();
        let total = pages.len();
        info!("PDF loaded: {} pages", total);

        for index in 0..total {
            if self.token.is_cancelled() {
                info!("Stopping before page {}/{}", index + 1, total);
                return Ok(false);
            }
            let page = pages
                .get(index)
                .map_err(|e| MarkitError::backend(NAME, format!("page {}: {e:?}", index + 1)))?;
            let image = render_page(&page, self.settings)
                .map_err(|e| MarkitError::backend(NAME, format!("page {}: {e}", index + 1)))?;
            let data = encode_png(&image)
                .map_err(|e| MarkitError::backend(NAME, format!("page {} encode: {e}", index + 1)))?;
            if !self.transcribe(index as usize + 1, data)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn transcribe(&mut self, page_num: usize, image: ImageData) -> Result<bool> {
        let prior = if self.settings.maintain_format {
            self.pages.last().map(String::as_str)
        } else {
            None
        };
        let messages = build_messages(&self.system_prompt, prior, image);
        let answer = self.exec.run(call_with_retry(
            &self.provider,
            page_num,
            &messages,
            self.settings,
            self.token,
        ))?;

        match answer {
            Some(raw) => {
                let cleaned = tidy_transcription(&raw);
                self.pages.push(cleaned.trim_end().to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn build_messages(system_prompt: &str, prior: Option<&str>, image: ImageData) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(prior) = prior.filter(|p| !p.is_empty()) {
        messages.push(ChatMessage::system(previous_page_context(prior)));
    }
    messages.push(ChatMessage::user_with_images("", vec![image]));
    messages
}

/// Call the provider with exponential backoff. `Ok(None)` means the token
/// was set between attempts.
async fn call_with_retry(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    messages: &[ChatMessage],
    settings: &VisionSettings,
    token: &CancellationToken,
) -> Result<Option<String>> {
    let options = settings.completion_options();
    let start = Instant::now();
    let mut last_err = String::from("no attempt made");

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = backoff_delay(settings.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num,
                attempt,
                settings.max_retries,
                backoff.as_millis()
            );
            if !sleep_unless_cancelled(backoff, token).await {
                return Ok(None);
            }
        }
        if token.is_cancelled() {
            return Ok(None);
        }

        match provider.chat(messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                return Ok(Some(response.content));
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                last_err = e.to_string();
            }
        }
    }

    Err(MarkitError::backend(
        NAME,
        format!(
            "page {page_num} failed after {} attempt(s): {last_err}",
            settings.max_retries + 1
        ),
    ))
}

/// Delay before retry `attempt` (1-based): `base_ms * 2^(attempt - 1)`,
/// capped at one minute.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Sleep for `delay` in short slices. Returns `false` as soon as the token is
/// set.
async fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(BACKOFF_SLICE)).await;
    }
}

fn resolve_provider(settings: &VisionSettings) -> Result<Arc<dyn LLMProvider>> {
    if let Some(name) = &settings.provider {
        let model = settings.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            MarkitError::backend(NAME, format!("provider '{name}' is not configured: {e}"))
        });
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        MarkitError::backend(
            NAME,
            format!(
                "no LLM provider detected; set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY ({e})"
            ),
        )
    })?;
    Ok(llm)
}

fn render_page(page: &PdfPage<'_>, settings: &VisionSettings) -> std::result::Result<DynamicImage, String> {
    let max = settings.max_pixels as i32;
    let width = ((page.width().value * settings.dpi as f32 / 72.0).round() as i32).clamp(1, max);
    let config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_maximum_height(max);
    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| format!("render failed: {e:?}"))?;
    let image = bitmap.as_image();
    debug!("Rendered page → {}x{} px", image.width(), image.height());
    Ok(image)
}

/// Encode a rendered page as base64 PNG. PNG keeps text edges crisp.
fn encode_png(image: &DynamicImage) -> std::result::Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}

/// Image inputs are sent as-is under their own MIME type.
fn load_image(path: &Path, mime: &str) -> Result<ImageData> {
    let bytes = std::fs::read(path).map_err(|e| MarkitError::backend(NAME, e))?;
    if bytes.is_empty() {
        return Err(MarkitError::backend(NAME, format!("'{}' is empty", path.display())));
    }
    Ok(ImageData::new(STANDARD.encode(&bytes), mime).with_detail("high"))
}

/// Drives async provider calls from a thread outside any runtime.
struct Executor(Runtime);

impl Executor {
    fn new() -> Result<Self> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Executor)
            .map_err(|e| MarkitError::Internal(format!("failed to start async runtime: {e}")))
    }

    fn run<F: Future>(&self, fut: F) -> F::Output {
        self.0.block_on(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgequake_llm::MockProvider;
    use image::{Rgba, RgbaImage};
    use serde_json::json;

    fn options(value: serde_json::Value) -> ParseOptions {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn modes_and_defaults() {
        let d = VisionParser::default().descriptor();
        let names: Vec<_> = d.ocr_methods.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, ["Basic", "Structured", "High Fidelity"]);
        let high = d.ocr_method("High Fidelity").unwrap();
        assert_eq!(high.id, "vlm_high_fidelity");
        assert_eq!(high.default_params["maintain_format"], true);
    }

    #[test]
    fn settings_from_options_are_clamped() {
        let s = VisionSettings::from_options(&options(json!({
            "provider": "openai",
            "model": "gpt-4.1-mini",
            "dpi": 10_000,
            "temperature": 0.4,
            "max_tokens": 1,
            "maintain_format": true
        })));
        assert_eq!(s.provider.as_deref(), Some("openai"));
        assert_eq!(s.model.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(s.dpi, 400);
        assert_eq!(s.max_tokens, 256);
        assert!((s.temperature - 0.4).abs() < 1e-6);
        assert!(s.maintain_format);

        let opts = s.completion_options();
        assert_eq!(opts.max_tokens, Some(256));
    }

    #[test]
    fn settings_defaults() {
        let s = VisionSettings::from_options(&options(json!({ "provider": "x", "model": "y" })));
        assert_eq!(s.dpi, 150);
        assert_eq!(s.max_pixels, 2000);
        assert_eq!(s.max_retries, 2);
        assert!(!s.maintain_format);
    }

    #[test]
    fn encode_png_is_base64() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255])));
        let data = encode_png(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert!(decoded.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn image_input_keeps_its_mime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();
        let data = load_image(&path, mime_type_for_path(&path)).unwrap();
        assert_eq!(data.mime_type, "image/jpeg");
    }

    #[test]
    fn text_input_is_rejected_before_any_call() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let err = VisionParser::default()
            .parse(&path, VLM_BASIC, OutputFormat::Markdown, &ParseOptions::new(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, MarkitError::Backend { .. }));
    }

    #[test]
    fn prior_page_goes_in_second_message() {
        let img = ImageData::new("AAAA", "image/png");
        assert_eq!(build_messages("sys", None, img.clone()).len(), 2);
        assert_eq!(build_messages("sys", Some("# p1"), img.clone()).len(), 3);
        assert_eq!(build_messages("sys", Some(""), img).len(), 2);
    }

    fn png_fixture(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("page.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();
        path
    }

    fn mocked() -> VisionParser {
        VisionParser::with_provider(Arc::new(MockProvider::new()))
    }

    #[test]
    fn image_is_transcribed_without_a_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = png_fixture(&dir);
        let out = mocked()
            .parse(&path, VLM_BASIC, OutputFormat::Markdown, &ParseOptions::new(), &CancellationToken::new())
            .unwrap();
        assert_eq!(out, "Mock response");
    }

    #[tokio::test]
    async fn image_is_transcribed_from_inside_a_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = png_fixture(&dir);
        let out = mocked()
            .parse(&path, VLM_STRUCTURED, OutputFormat::Json, &ParseOptions::new(), &CancellationToken::new())
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["content"], "Mock response");
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(u64::MAX, 10), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(1, 200), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn huge_backoff_option_is_clamped() {
        let s = VisionSettings::from_options(&options(json!({ "retry_backoff_ms": u64::MAX })));
        assert_eq!(s.retry_backoff_ms, MAX_BACKOFF_MS);
    }

    #[tokio::test]
    async fn backoff_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };
        let started = Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(30), &token).await);
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();

        assert!(sleep_unless_cancelled(Duration::from_millis(10), &CancellationToken::new()).await);
    }
}
