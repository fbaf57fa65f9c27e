//! CLI binary for parsestudio.
//!
//! A thin shim over the library: flags pick a backend and its options,
//! results go to stdout or to one JSON file per input.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use parsestudio::{ParseProgressCallback, ParserOutput, PdfParser, BACKEND_NAMES};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the input documents plus a log line per document.
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ParseProgressCallback for CliProgress {
    fn on_parse_start(&self, backend: &str, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&TICKS),
        );
        self.bar.set_prefix("Parsing");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Parsing {total} document(s) with {backend}…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, path: &Path) {
        self.bar.set_message(path.display().to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} Document {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{text_len:>7} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = match error.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} Document {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_parse_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} document(s) parsed", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} document(s) parsed  ({} empty after errors)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text of a born-digital PDF, no network
  parsestudio report.pdf

  # Tables through docling-serve, one JSON file per input
  parsestudio --backend docling --modalities tables -o out/ a.pdf b.pdf

  # Vision model with custom options
  parsestudio --backend vision --options '{"model": "gpt-4o", "max_tokens": 6000}' scan.pdf

  # Options from a file
  parsestudio --backend llama --options @llama.json --json report.pdf > report.json

BACKENDS:
  docling     docling-serve layout model          DOCLING_SERVE_URL, DOCLING_SERVE_API_KEY
  pymupdf     PDFium text layer (alias: pdfium)   PDFIUM_LIB_PATH
  llama       LlamaParse                          LLAMA_CLOUD_API_KEY (or LLAMA_PARSE_KEY)
  vision      page images → vision chat model     OPENAI_API_KEY, PDFIUM_LIB_PATH
  anthropic   page images → Claude                ANTHROPIC_API_KEY, PDFIUM_LIB_PATH
  openai      OpenAI file search                  OPENAI_API_KEY

LOGGING:
  PARSESTUDIO_LOG     tracing filter, e.g. "parsestudio=debug"
"#;

/// Extract text, tables and images from PDFs through one of several back ends.
#[derive(Parser, Debug)]
#[command(
    name = "parsestudio",
    version,
    about = "Extract text, tables and images from PDFs through one of several back ends",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Backend name (case-insensitive).
    #[arg(short, long, env = "PARSESTUDIO_BACKEND", default_value = "pymupdf")]
    backend: String,

    /// Comma-separated modalities: text, tables, images.
    #[arg(
        short,
        long,
        env = "PARSESTUDIO_MODALITIES",
        value_delimiter = ',',
        default_value = "text,tables,images"
    )]
    modalities: Vec<String>,

    /// Backend options as a JSON object, or @path to a JSON file.
    #[arg(long, env = "PARSESTUDIO_OPTIONS")]
    options: Option<String>,

    /// Write one <stem>.json per input into this directory (same-named inputs get a -<n> suffix).
    #[arg(short, long, env = "PARSESTUDIO_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the full results as JSON instead of plain text.
    #[arg(long, env = "PARSESTUDIO_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PARSESTUDIO_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PARSESTUDIO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PARSESTUDIO_QUIET")]
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
            EnvFilter::try_from_env("PARSESTUDIO_LOG").unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build parser ─────────────────────────────────────────────────────
    let options = load_options(cli.options.as_deref()).await?;
    let mut parser = PdfParser::from_name(&cli.backend, options).with_context(|| {
        format!(
            "Could not set up backend '{}' (valid: {})",
            cli.backend,
            BACKEND_NAMES.join(", ")
        )
    })?;
    if show_progress {
        parser = parser.with_progress(CliProgress::new());
    }

    // ── Parse ────────────────────────────────────────────────────────────
    let modalities: Vec<&str> = cli.modalities.iter().map(|m| m.trim()).collect();
    let outputs = parser
        .parse(cli.inputs.as_slice(), &modalities)
        .await
        .context("Parsing failed")?;

    // ── Emit ─────────────────────────────────────────────────────────────
    if let Some(dir) = &cli.output {
        write_json_files(dir, &cli.inputs, &outputs).await?;
        if !cli.quiet {
            eprintln!(
                "{}  {} file(s)  →  {}",
                green("✔"),
                outputs.len(),
                bold(&dir.display().to_string())
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&outputs).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_text(&cli.inputs, &outputs)?;
    }

    Ok(())
}

/// `--options`: inline JSON, `@file`, or nothing.
async fn load_options(raw: Option<&str>) -> Result<serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(serde_json::Value::Null);
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read options from {path:?}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("--options is not valid JSON")
}

/// One `<stem>.json` name per input. Stems shared by several inputs get
/// the input's 1-based position appended (`report-2.json`), bumped further
/// if that name is already taken.
fn output_names(inputs: &[PathBuf]) -> Vec<String> {
    let stems: Vec<String> = inputs
        .iter()
        .map(|input| {
            input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".into())
        })
        .collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.as_str()).or_default() += 1;
    }
    let mut taken: HashSet<String> = stems
        .iter()
        .filter(|s| counts[s.as_str()] == 1)
        .map(|s| format!("{s}.json"))
        .collect();

    stems
        .iter()
        .enumerate()
        .map(|(idx, stem)| {
            if counts[stem.as_str()] == 1 {
                return format!("{stem}.json");
            }
            let mut n = idx + 1;
            loop {
                let name = format!("{stem}-{n}.json");
                if taken.insert(name.clone()) {
                    return name;
                }
                n += 1;
            }
        })
        .collect()
}

async fn write_json_files(dir: &Path, inputs: &[PathBuf], outputs: &[ParserOutput]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    for (name, output) in output_names(inputs).iter().zip(outputs) {
        let dest = dir.join(name);
        let json = serde_json::to_vec_pretty(output).context("Failed to serialise output")?;
        tokio::fs::write(&dest, json)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
    }
    Ok(())
}

fn print_text(inputs: &[PathBuf], outputs: &[ParserOutput]) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (input, output) in inputs.iter().zip(outputs) {
        if inputs.len() > 1 {
            writeln!(handle, "==> {} <==", input.display()).context("Failed to write to stdout")?;
        }
        handle
            .write_all(output.text.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.text.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        for table in &output.tables {
            writeln!(
                handle,
                "\n[table, page {}]\n{}",
                table.metadata.page_number, table.markdown
            )
            .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}
