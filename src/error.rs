//! Error types for the bol-extract library.
//!
//! Every failure is fatal for the run that hit it: an extraction produces one
//! model request for the whole document, so there is no partial result to
//! salvage. [`ExtractError`] is therefore the single error type returned by
//! the top-level `extract*` functions.
//!
//! Backend transport problems are described by [`crate::backend::BackendError`]
//! and wrapped in [`ExtractError::ModelCall`] together with the backend id, so
//! an operator can tell which endpoint failed without re-running the pipeline.

use crate::backend::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the bol-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The path does not resolve to a readable document.
    #[error("Cannot open document '{path}': {reason}")]
    DocumentOpen { path: PathBuf, reason: String },

    /// The document opened but has no pages to extract from.
    #[error("Document '{path}' has no pages to extract from")]
    EmptyDocument { path: PathBuf },

    /// pdfium failed on one page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    /// No pdfium library could be bound.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    RasterizerUnavailable(String),

    // ── Request errors ────────────────────────────────────────────────────
    /// The field specification is empty.
    #[error("Field specification is empty: name at least one field to extract")]
    EmptyFieldSpec,

    /// The same field name appears twice in the field specification.
    #[error("Field '{name}' appears more than once in the field specification")]
    DuplicateField { name: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The backend credential is not set; raised before any network I/O.
    #[error("No credential for backend '{backend}'.\nSet the {env_var} environment variable.")]
    MissingCredential { backend: String, env_var: String },

    /// The model call failed in transport or on the backend side.
    #[error("Model call to backend '{backend}' failed: {source}")]
    ModelCall {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// The backend answered, but the text is not JSON after fence stripping.
    ///
    /// `raw` is the backend text exactly as received.
    #[error("Model returned text that is not valid JSON ({detail}):\n{raw}")]
    MalformedResponse { raw: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or run-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An external cancellation signal fired before the run finished.
    #[error("Extraction cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// The verbatim backend text, when the failure happened after the model answered.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            ExtractError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
