//! Worker/monitor coordination through the public `JobHandle` API.

use markit::error::Result as MarkitResult;
use markit::pipeline::stage::STAGED_PREFIX;
use markit::{
    CancellationToken, ConversionConfig, ConversionRequest, Converter, DocumentParser, JobHandle,
    JobState, OcrMethod, OutputFormat, ParseOptions, ParserRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Ignores the token entirely, like a backend stuck in third-party code.
#[derive(Default)]
struct Blocking;

impl DocumentParser for Blocking {
    fn name(&self) -> &str {
        "Blocking"
    }

    fn supported_ocr_methods(&self) -> Vec<OcrMethod> {
        vec![OcrMethod::new("no_ocr", "No OCR")]
    }

    fn parse(
        &self,
        _path: &Path,
        _ocr_method_id: &str,
        _format: OutputFormat,
        _options: &ParseOptions,
        _token: &CancellationToken,
    ) -> MarkitResult<String> {
        thread::sleep(Duration::from_millis(800));
        Ok("late".into())
    }
}

#[derive(Default)]
struct Quick;

impl DocumentParser for Quick {
    fn name(&self) -> &str {
        "Quick"
    }

    fn supported_ocr_methods(&self) -> Vec<OcrMethod> {
        vec![OcrMethod::new("no_ocr", "No OCR")]
    }

    fn parse(
        &self,
        _path: &Path,
        _ocr_method_id: &str,
        format: OutputFormat,
        _options: &ParseOptions,
        _token: &CancellationToken,
    ) -> MarkitResult<String> {
        Ok(format!("quick {}", format.label()))
    }
}

struct Setup {
    src: TempDir,
    stage: TempDir,
    out: TempDir,
    converter: Arc<Converter>,
}

fn setup() -> Setup {
    let mut registry = ParserRegistry::new();
    registry.register_parser::<Blocking>().unwrap();
    registry.register_parser::<Quick>().unwrap();

    let src = TempDir::new().unwrap();
    let stage = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(src.path().join("doc.txt"), "content").unwrap();

    let config = ConversionConfig::builder()
        .staging_dir(stage.path())
        .output_dir(out.path())
        .poll_interval_ms(20)
        .join_timeout_ms(200)
        .build()
        .unwrap();
    Setup {
        converter: Arc::new(Converter::new(Arc::new(registry), config)),
        src,
        stage,
        out,
    }
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn staged_inputs(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(STAGED_PREFIX))
        .collect()
}

#[test]
fn completed_job_reports_content() {
    let s = setup();
    let request = ConversionRequest::new(s.src.path().join("doc.txt"), "Quick", "No OCR", "JSON");
    let job = JobHandle::spawn(Arc::clone(&s.converter), request).unwrap();

    let outcome = job.wait();
    let out = outcome.output().expect("completed");
    assert_eq!(out.content, "quick JSON");
    assert!(out.artifact.to_string_lossy().ends_with(".json"));
    assert_eq!(entries(s.stage.path()), 0);
}

#[test]
fn cancel_returns_within_join_timeout_and_discards_late_result() {
    let s = setup();
    let request = ConversionRequest::new(s.src.path().join("doc.txt"), "Blocking", "No OCR", "Markdown");
    let job = JobHandle::spawn(Arc::clone(&s.converter), request).unwrap();
    assert_eq!(job.state(), JobState::Running);

    thread::sleep(Duration::from_millis(50));
    job.cancel();
    let started = Instant::now();
    let outcome = job.wait();

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.message(), "Conversion cancelled.");
    assert!(
        started.elapsed() < Duration::from_millis(600),
        "wait took {:?}",
        started.elapsed()
    );

    // The worker is still inside the backend, but a caller that exits now
    // must not leave the input copy behind.
    assert_eq!(staged_inputs(s.stage.path()), Vec::<String>::new());

    // The detached worker finishes later; nothing may be left behind.
    thread::sleep(Duration::from_millis(1_200));
    assert_eq!(entries(s.out.path()), 0);
    assert_eq!(staged_inputs(s.stage.path()), Vec::<String>::new());
}

#[test]
fn staged_copy_is_gone_when_cancelled_wait_returns_for_a_pdf() {
    let s = setup();
    let source = s.src.path().join("scan.pdf");
    std::fs::write(&source, b"%PDF-1.7 stub").unwrap();
    let request = ConversionRequest::new(&source, "Blocking", "No OCR", "Markdown");
    let job = JobHandle::spawn(Arc::clone(&s.converter), request).unwrap();

    thread::sleep(Duration::from_millis(100));
    job.cancel();
    assert!(job.wait().is_cancelled());
    assert_eq!(staged_inputs(s.stage.path()), Vec::<String>::new());
}

#[test]
fn dropped_handle_leaves_no_artifact() {
    let s = setup();
    let request = ConversionRequest::new(s.src.path().join("doc.txt"), "Blocking", "No OCR", "Markdown");
    let job = JobHandle::spawn(Arc::clone(&s.converter), request).unwrap();
    drop(job);

    thread::sleep(Duration::from_millis(1_200));
    assert_eq!(entries(s.out.path()), 0);
    assert_eq!(entries(s.stage.path()), 0);
}
