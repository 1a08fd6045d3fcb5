//! CLI binary for bol-extract.
//!
//! A thin shim over the library crate that maps CLI flags (or a run file)
//! to `ExtractionConfig` and prints the result table.

use anyhow::{Context, Result};
use bol_extract::{
    extract_with_cancel, Backend, ExtractionConfig, ExtractionConfigBuilder,
    ExtractionProgressCallback, FieldSpec, PageSelection, ProgressCallback, ResultTable, RunFile,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a page bar while rendering, then a spinner while the
/// single model call is in flight.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
    }

    fn on_page_rendered(&self, _page_num: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_model_call_start(&self, backend: &str, images: usize) {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar
            .set_message(format!("{images} page image(s) sent to {backend}"));
    }

    fn on_model_call_complete(&self, backend: &str, response_len: usize) {
        self.bar.println(format!(
            "  {} {} answered  {}",
            green("✓"),
            backend,
            dim(&format!("{response_len} chars"))
        ));
    }

    fn on_run_complete(&self, records: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} record(s) extracted", green("✔"), bold(&records.to_string()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Default bill-of-lading fields, DashScope (Qwen-VL), JSON to stdout
  bol-extract CV00111931S.pdf

  # Selected fields via Doubao on Ark, Markdown table
  bol-extract --backend ark --fields "Invoice No.,Invoice Date,Gross Weight" \
      --format markdown CV00111931S.pdf

  # Run file (TOML or JSON), output written atomically
  bol-extract --config run.toml -o result.json

RUN FILE (run.toml):
  document_path    = "CV00111931S.pdf"
  fields           = ["Invoice No.", "Invoice Date"]
  resolution_dpi   = 300
  backend          = "ark"
  model_identifier = "doubao-1.5-vision-pro-250328"
  temperature      = 0.1
  max_output_tokens = 4000

ENVIRONMENT VARIABLES:
  DASHSCOPE_API_KEY   DashScope API key (backend dashscope / qwen)
  ARK_API_KEY         Volcengine Ark API key (backend ark / doubao)
  OPENAI_API_KEY      OpenAI API key (backend openai)
  PDFIUM_LIB_PATH     Path to libpdfium (file or directory)
"#;

/// Extract bill-of-lading fields from scanned PDFs using vision models.
#[derive(Parser, Debug)]
#[command(
    name = "bol-extract",
    version,
    about = "Extract bill-of-lading fields from scanned PDFs using vision models",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path. Optional when --config names a document.
    input: Option<PathBuf>,

    /// Run file (TOML, or JSON when the extension is .json).
    #[arg(long, env = "BOL_EXTRACT_CONFIG")]
    config: Option<PathBuf>,

    /// Comma-separated field names. Default: the bill-of-lading field set.
    #[arg(long, env = "BOL_EXTRACT_FIELDS", value_delimiter = ',')]
    fields: Option<Vec<String>>,

    /// Backend: dashscope (qwen), ark (doubao), openai.
    #[arg(long, env = "BOL_EXTRACT_BACKEND")]
    backend: Option<Backend>,

    /// Model identifier. Default: the backend's default model.
    #[arg(long, env = "BOL_EXTRACT_MODEL")]
    model: Option<String>,

    /// Endpoint base URL override.
    #[arg(long, env = "BOL_EXTRACT_BASE_URL")]
    base_url: Option<String>,

    /// Rendering DPI (72–600). Default: 300.
    #[arg(long, env = "BOL_EXTRACT_DPI",
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "BOL_EXTRACT_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "BOL_EXTRACT_PASSWORD")]
    password: Option<String>,

    /// Sampling temperature (0.0–2.0). Default: the backend profile's.
    #[arg(long, env = "BOL_EXTRACT_TEMPERATURE")]
    temperature: Option<f32>,

    /// Max output tokens. Default: the backend profile's.
    #[arg(long, env = "BOL_EXTRACT_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Model call timeout in seconds.
    #[arg(long, env = "BOL_EXTRACT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "BOL_EXTRACT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Keep per-run copies of rendered pages under this directory while the run lasts.
    #[arg(long, env = "BOL_EXTRACT_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, env = "BOL_EXTRACT_FORMAT", value_enum, default_value = "json")]
    format: OutputFormat,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "BOL_EXTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the backend's raw response text instead of the table.
    #[arg(long)]
    raw: bool,

    /// Disable progress bar.
    #[arg(long, env = "BOL_EXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BOL_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BOL_EXTRACT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Array of objects.
    Json,
    /// One object per line.
    Jsonl,
    /// Pipe table.
    Markdown,
    /// Tab-separated values with a header row.
    Tsv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let (input, config) = build_config(&cli, progress_cb).await?;

    // ── Run extraction (Ctrl-C cancels) ──────────────────────────────────
    let output = extract_with_cancel(&input, &config, cancel_on(tokio::signal::ctrl_c()))
        .await
        .with_context(|| format!("Extraction failed for {}", input.display()))?;

    let mut table = output.table;
    table.reorder_columns(&config.fields);

    let rendered = if cli.raw {
        let mut text = output.raw_response.text.clone();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    } else {
        render_table(&table, cli.format).context("Failed to serialise output")?
    };

    match cli.output {
        Some(ref path) => {
            write_atomic(path, &rendered).await?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} record(s)  {}ms  →  {}",
                    green("✔"),
                    output.stats.records,
                    output.stats.total_duration_ms,
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }

    if !cli.quiet {
        eprintln!(
            "   {} {}  /  {} tokens in  /  {} tokens out  —  {}ms total",
            cyan("run"),
            dim(&output.run_id.to_string()),
            dim(&output.stats.input_tokens.to_string()),
            dim(&output.stats.output_tokens.to_string()),
            output.stats.total_duration_ms,
        );
    }

    Ok(())
}

/// Map the run file and CLI args to `ExtractionConfig`. CLI flags win.
/// Resolve when `signal` fires. If the signal handler cannot be installed,
/// log it and never resolve, so the run is not cancelled spuriously.
async fn cancel_on<F>(signal: F)
where
    F: std::future::Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::warn!("Ctrl-C handler unavailable, cancellation disabled: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
) -> Result<(PathBuf, ExtractionConfig)> {
    let (run_path, mut builder): (Option<PathBuf>, ExtractionConfigBuilder) = match cli.config {
        Some(ref path) => {
            let run = RunFile::from_path(path)
                .with_context(|| format!("Failed to load run file {}", path.display()))?;
            let (doc, builder) = run.into_builder();
            // Relative document paths resolve against the run file's directory.
            let doc = match path.parent() {
                Some(dir) if doc.is_relative() => dir.join(doc),
                _ => doc,
            };
            (Some(doc), builder)
        }
        None => (None, ExtractionConfig::builder()),
    };

    let input = cli
        .input
        .clone()
        .or(run_path)
        .context("No input document: pass a PDF path or a run file with document_path")?;

    if let Some(ref names) = cli.fields {
        let fields = FieldSpec::new(names.iter().map(|s| s.as_str()))
            .context("Invalid --fields")?;
        builder = builder.fields(fields);
    }
    if let Some(backend) = cli.backend {
        builder = builder.backend(backend);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url.clone());
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(n) = cli.max_tokens {
        builder = builder.max_output_tokens(n);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let config = builder
        .pages(parse_pages(&cli.pages)?)
        .api_timeout_secs(cli.api_timeout)
        .build()
        .context("Invalid configuration")?;

    Ok((input, config))
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1");
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

// ── Output formats ───────────────────────────────────────────────────────

fn render_table(table: &ResultTable, format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            out.push_str(&serde_json::to_string_pretty(table)?);
            out.push('\n');
        }
        OutputFormat::Jsonl => {
            for record in table.to_records() {
                out.push_str(&serde_json::to_string(&record)?);
                out.push('\n');
            }
        }
        OutputFormat::Markdown => {
            let cols = table.columns();
            if cols.is_empty() {
                return Ok(out);
            }
            let header: Vec<String> = cols.iter().map(|c| escape_pipe(c)).collect();
            out.push_str(&format!("| {} |\n", header.join(" | ")));
            out.push_str(&format!("|{}\n", " --- |".repeat(cols.len())));
            for row in table.rows() {
                let cells: Vec<String> = row.iter().map(|v| escape_pipe(&cell_text(v))).collect();
                out.push_str(&format!("| {} |\n", cells.join(" | ")));
            }
        }
        OutputFormat::Tsv => {
            let clean = |s: &str| s.replace(['\t', '\n', '\r'], " ");
            let header: Vec<String> = table.columns().iter().map(|c| clean(c)).collect();
            out.push_str(&header.join("\t"));
            out.push('\n');
            for row in table.rows() {
                let cells: Vec<String> = row.iter().map(|v| clean(&cell_text(v))).collect();
                out.push_str(&cells.join("\t"));
                out.push('\n');
            }
        }
    }
    Ok(out)
}

/// Strings print bare; absent cells and `null` print empty; anything else as JSON.
fn cell_text(v: &Option<Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_pipe(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// Atomic write: write to a temp file next to `path`, then rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}
