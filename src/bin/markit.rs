//! CLI binary for markit.
//!
//! A thin shim over the library crate: maps flags to a `ConversionConfig`
//! and a `ConversionRequest`, runs the job on a worker thread and prints the
//! result. Ctrl-C cancels the running job.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use markit::{
    save_artifact, ConversionConfig, ConversionOutcome, ConversionRequest, Converter, JobHandle,
    OutputFormat, ParserRegistry,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List parsers and their OCR options
  markit --list

  # Convert with the default parser (first listed) to Markdown on stdout
  markit report.pdf

  # Vision transcription, JSON output, copied to a file
  markit --parser "Vision LLM" --ocr "High Fidelity" --format JSON scan.png -o scan.json

  # Pass a backend option
  markit --parser "Vision LLM" --option model=gpt-4.1-mini --option dpi=200 paper.pdf

OUTPUT FORMATS:
  Markdown (.md)   JSON (.json)   Text (.txt)   Document Tags (.doctags)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (Vision LLM parser)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Vision provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Vision model ID
  RUST_LOG                Log filter, overrides -v / -q

Press Ctrl-C during a conversion to cancel it; no temporary files are left.
"#;

/// Convert documents to Markdown, JSON, text or document tags.
#[derive(Parser, Debug)]
#[command(
    name = "markit",
    version,
    about = "Convert documents with pluggable parser backends",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document to convert.
    #[arg(required_unless_present = "list")]
    input: Option<PathBuf>,

    /// Parser backend name. Default: first registered parser.
    #[arg(short, long, env = "MARKIT_PARSER")]
    parser: Option<String>,

    /// OCR option display name. Default: the parser's first option.
    #[arg(long, env = "MARKIT_OCR")]
    ocr: Option<String>,

    /// Output format: Markdown, JSON, Text, Document Tags.
    #[arg(short, long, env = "MARKIT_FORMAT", default_value = "Markdown")]
    format: String,

    /// Copy the output artifact to this path.
    #[arg(short, long, env = "MARKIT_OUTPUT")]
    output: Option<PathBuf>,

    /// Backend option as KEY=VALUE. VALUE is parsed as JSON when possible.
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Directory for the staged input copy.
    #[arg(long, env = "MARKIT_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Staging copy chunk size in bytes.
    #[arg(long, env = "MARKIT_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// How long to wait for the worker after Ctrl-C, in milliseconds.
    #[arg(long, env = "MARKIT_JOIN_TIMEOUT_MS", default_value_t = 500)]
    join_timeout_ms: u64,

    /// List parsers and OCR options, then exit.
    #[arg(long)]
    list: bool,

    /// Print the structured result as JSON.
    #[arg(long, env = "MARKIT_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "MARKIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MARKIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MARKIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let registry = Arc::new(ParserRegistry::with_builtin_parsers());

    if cli.list {
        return print_parsers(&registry, cli.json);
    }

    // ── Resolve selections ───────────────────────────────────────────────
    let input = cli.input.clone().context("No input file given")?;
    let parser = match &cli.parser {
        Some(p) => p.clone(),
        None => registry
            .default_parser()
            .context("No parsers are registered")?
            .to_string(),
    };
    let ocr = match &cli.ocr {
        Some(o) => o.clone(),
        None => registry
            .default_ocr_option(&parser)
            .map(str::to_string)
            .unwrap_or_default(),
    };
    if OutputFormat::from_label(&cli.format).is_none() && !cli.quiet {
        eprintln!(
            "{} unknown format '{}'; writing Markdown content to a .txt artifact",
            dim("note:"),
            cli.format
        );
    }

    let config = build_config(&cli)?;
    let converter = Arc::new(Converter::new(Arc::clone(&registry), config));
    let request = ConversionRequest::new(&input, &parser, &ocr, &cli.format);

    // ── Run the job ──────────────────────────────────────────────────────
    let job = JobHandle::spawn(converter, request).context("Failed to start conversion")?;
    let token = job.token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let spinner = show_progress.then(|| spinner(&parser, &input));
    let outcome = tokio::task::spawn_blocking(move || job.wait())
        .await
        .context("Conversion worker join failed")?;
    ctrl_c.abort();

    if let Some(bar) = &spinner {
        match &outcome {
            ConversionOutcome::Completed(out) => bar.finish_with_message(green(&format!(
                "done in {:.2}s",
                out.total_duration_ms as f64 / 1000.0
            ))),
            ConversionOutcome::Cancelled => bar.finish_with_message(red("cancelled")),
            ConversionOutcome::Failed(_) => bar.finish_with_message(red("failed")),
        }
    }

    // ── Report ───────────────────────────────────────────────────────────
    match outcome {
        ConversionOutcome::Completed(out) => {
            if let Some(dest) = &cli.output {
                save_artifact(&out.artifact, dest)
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
                if !cli.quiet {
                    eprintln!("{} {}", green("✓"), dest.display());
                }
            }

            let stdout = io::stdout();
            let mut lock = stdout.lock();
            if cli.json {
                let json = serde_json::to_string_pretty(&out).context("Failed to serialize output")?;
                writeln!(lock, "{json}")?;
            } else if cli.output.is_none() {
                write!(lock, "{}", out.content)?;
                if !out.content.ends_with('\n') {
                    writeln!(lock)?;
                }
            }
            Ok(())
        }
        ConversionOutcome::Cancelled => {
            eprintln!("{}", ConversionOutcome::Cancelled.message());
            std::process::exit(130);
        }
        ConversionOutcome::Failed(e) => {
            Err(anyhow::Error::new(e)).context(format!("Conversion of {} failed", input.display()))
        }
    }
}

fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder().join_timeout_ms(cli.join_timeout_ms);
    if let Some(dir) = &cli.staging_dir {
        builder = builder.staging_dir(dir);
    }
    if let Some(size) = cli.chunk_size {
        builder = builder.chunk_size(size);
    }
    for raw in &cli.options {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("Invalid --option '{raw}': expected KEY=VALUE");
        };
        let value = serde_json::from_str::<serde_json::Value>(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        builder = builder.option(key.trim(), value);
    }
    builder.build().context("Invalid configuration")
}

fn spinner(parser: &str, input: &std::path::Path) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix(parser.to_string());
    bar.set_message(format!("converting {}…", input.display()));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn print_parsers(registry: &ParserRegistry, json: bool) -> Result<()> {
    if json {
        let all: Vec<_> = registry.descriptors().collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&all).context("Failed to serialize parser list")?
        );
        return Ok(());
    }

    let default = registry.default_parser();
    for d in registry.descriptors() {
        let marker = if Some(d.name.as_str()) == default {
            dim(" (default)")
        } else {
            String::new()
        };
        println!("{}{}", bold(&d.name), marker);
        if !d.description.is_empty() {
            println!("  {}", dim(&d.description));
        }
        for m in &d.ocr_methods {
            println!("  - {} {}", m.display_name, dim(&format!("[{}]", m.id)));
        }
    }
    Ok(())
}
