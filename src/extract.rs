//! Extraction entry points.
//!
//! A run is a strict sequence: validate the input, rasterise the selected
//! pages, build one request carrying every page, make one model call,
//! normalise the answer and assemble the table. Any failure ends the run;
//! there is no partial result.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::{ExtractionOutput, ExtractionStats, RunId};
use crate::pipeline::input;
use crate::pipeline::llm::{self, RawResponse, VisionBackend};
use crate::pipeline::normalize::normalize_response;
use crate::pipeline::render::{Document, PageImage, PdfiumRasterizer, Rasterizer};
use crate::pipeline::request::{build_request, ExtractionRequest, PromptOverrides};
use crate::pipeline::scratch::ScratchSpace;
use crate::table::ResultTable;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Extract the configured fields from the PDF at `path`.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// - [`ExtractError::EmptyFieldSpec`] before any work if no fields are configured
/// - [`ExtractError::MissingCredential`] before any rendering or network I/O
/// - [`ExtractError::DocumentOpen`] / [`ExtractError::EmptyDocument`] for bad input
/// - [`ExtractError::ModelCall`] when the backend call fails or times out
/// - [`ExtractError::MalformedResponse`] when the answer is not JSON
pub async fn extract(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let run_id = RunId::new();
    let span = info_span!("extract", run_id = %run_id);
    run(path.as_ref(), config, run_id).instrument(span).await
}

/// Like [`extract`], but abandons the run when `signal` completes first.
///
/// The pending model call is dropped, rendered images and scratch files are
/// discarded, and [`ExtractError::Cancelled`] is returned. A page render
/// already in progress on the blocking pool finishes in the background and
/// its result is thrown away.
pub async fn extract_with_cancel<F>(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
    signal: F,
) -> Result<ExtractionOutput, ExtractError>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = extract(path, config) => result,
        _ = signal => {
            warn!("Extraction cancelled by caller");
            Err(ExtractError::Cancelled)
        }
    }
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(path, config))
}

/// Extract from PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed when the
/// call returns.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    tmp.flush()
        .map_err(|e| ExtractError::Internal(format!("tempfile flush: {e}")))?;
    extract(tmp.path(), config).await
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run(
    path: &Path,
    config: &ExtractionConfig,
    run_id: RunId,
) -> Result<ExtractionOutput, ExtractError> {
    let total_start = Instant::now();
    info!("Starting extraction: {}", path.display());

    // ── Step 1: Fields and credentials, before any work ──────────────────
    if config.fields.is_empty() {
        return Err(ExtractError::EmptyFieldSpec);
    }
    let client = llm::resolve_client(config)?;

    // ── Step 2: Resolve input ────────────────────────────────────────────
    let pdf_path = input::resolve_local(path)?;

    // ── Step 3: Rasterise selected pages ─────────────────────────────────
    let render_start = Instant::now();
    let (total_pages, pages) = render_selected(pdf_path.clone(), config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Rendered {} of {} pages in {}ms",
        pages.len(),
        total_pages,
        render_duration_ms
    );

    // ── Step 4: Optional scratch staging ─────────────────────────────────
    let (pages, scratch) = match config.scratch_dir {
        Some(ref base) => {
            let space = ScratchSpace::create(base, &run_id.short())?;
            let staged = pages
                .into_iter()
                .map(|page| space.stage(page))
                .collect::<Result<Vec<_>, _>>()?;
            (staged, Some(space))
        }
        None => (pages, None),
    };

    // ── Step 5: Build the request ────────────────────────────────────────
    let overrides = PromptOverrides {
        system: config.system_prompt.as_deref(),
        user: config.user_prompt.as_deref(),
    };
    let request = build_request(&pdf_path, &pages, &config.fields, overrides)?;
    let sent_pages = pages.len();
    drop(pages);

    // ── Step 6: One model call ───────────────────────────────────────────
    let (raw, model_duration_ms) = call(client.as_ref(), &request, config).await?;
    drop(request);

    if let Some(space) = scratch {
        space.close();
    }

    // ── Step 7: Normalise and assemble ───────────────────────────────────
    let records = normalize_response(&raw.text)?;
    let table = ResultTable::assemble(&records);

    let usage = raw.usage.unwrap_or_default();
    let stats = ExtractionStats {
        total_pages,
        sent_pages,
        records: table.row_count(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        render_duration_ms,
        model_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} record(s), {} column(s), {}ms total",
        stats.records,
        table.columns().len(),
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(stats.records);
    }

    Ok(ExtractionOutput {
        run_id,
        table,
        raw_response: raw,
        stats,
    })
}

/// Open the document and render the configured page selection.
///
/// Runs inside `spawn_blocking` since rasterisation is CPU-bound and pdfium
/// is a blocking C library.
async fn render_selected(
    pdf_path: PathBuf,
    config: &ExtractionConfig,
) -> Result<(usize, Vec<PageImage>), ExtractError> {
    let rasterizer: Arc<dyn Rasterizer> = match config.rasterizer {
        Some(ref r) => Arc::clone(r),
        None => Arc::new(PdfiumRasterizer::new(
            config.password.clone(),
            config.max_rendered_pixels,
        )),
    };
    let dpi = config.dpi;
    let selection = config.pages.clone();
    let callback = config.progress_callback.clone();

    tokio::task::spawn_blocking(move || -> Result<(usize, Vec<PageImage>), ExtractError> {
        let document = Document::open(rasterizer, pdf_path)?;
        let total_pages = document.page_count();

        let indices = selection.to_indices(total_pages);
        if indices.is_empty() {
            return Err(ExtractError::InvalidConfig(format!(
                "page selection {:?} matches no page of a {}-page document",
                selection, total_pages
            )));
        }
        debug!("Selected {} pages for extraction", indices.len());

        if let Some(ref cb) = callback {
            cb.on_run_start(indices.len());
        }

        let pages = document.render(dpi, indices, &mut |page| {
            if let Some(ref cb) = callback {
                cb.on_page_rendered(page.page_index, total_pages);
            }
        })?;
        Ok((total_pages, pages))
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Issue the model call with progress events; returns the response and its duration.
async fn call(
    client: &dyn VisionBackend,
    request: &ExtractionRequest,
    config: &ExtractionConfig,
) -> Result<(RawResponse, u64), ExtractError> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_model_call_start(client.id(), request.images.len());
    }
    info!(
        "Sending {} page image(s) to backend '{}'",
        request.images.len(),
        client.id()
    );

    let start = Instant::now();
    let raw = llm::call_model(
        client,
        request,
        Duration::from_secs(config.api_timeout_secs),
    )
    .await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_model_call_complete(client.id(), raw.text.len());
    }
    Ok((raw, start.elapsed().as_millis() as u64))
}
