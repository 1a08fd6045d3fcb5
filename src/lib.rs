//! # bol-extract
//!
//! Extract structured fields from scanned bills of lading using vision models.
//!
//! ## Why this crate?
//!
//! Bills of lading arrive as scanned PDFs: there is no text layer to parse,
//! and layouts differ by carrier. This crate rasterises the pages and sends
//! all of them, in one request, to a vision-capable model together with the
//! list of fields to read. The model's JSON answer is normalised into a
//! table with one row per record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      validate the local file
//!  ├─ 2. Render     rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Request    system instruction + page images + user instruction
//!  ├─ 4. Model      one call to DashScope (Qwen-VL) / Ark (Doubao) / OpenAI
//!  ├─ 5. Normalise  strip Markdown fences, parse JSON, wrap single objects
//!  └─ 6. Assemble   union of keys → column-aligned ResultTable
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bol_extract::{extract, ExtractionConfig, FieldSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential read from DASHSCOPE_API_KEY
//!     let config = ExtractionConfig::builder()
//!         .fields(FieldSpec::new(["Invoice No.", "Invoice Date", "Gross Weight"])?)
//!         .build()?;
//!     let output = extract("CV00111931S.pdf", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.table)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bol-extract` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! bol-extract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends
//!
//! | Backend | Credential | Default model |
//! |---------|-----------|---------------|
//! | `dashscope` (alias `qwen`) | `DASHSCOPE_API_KEY` | `qwen-vl-max` |
//! | `ark` (alias `doubao`)     | `ARK_API_KEY`       | `doubao-1.5-vision-pro-250328` |
//! | `openai`                   | `OPENAI_API_KEY`    | `gpt-4.1-mini` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Backend, BackendError, BackendProfile, Credential, HttpVisionBackend};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, FieldSpec, PageSelection, RunFile};
pub use error::ExtractError;
pub use extract::{extract, extract_from_bytes, extract_sync, extract_with_cancel};
pub use output::{ExtractionOutput, ExtractionStats, RunId};
pub use pipeline::llm::{RawResponse, TokenUsage, VisionBackend};
pub use pipeline::render::{Document, PageImage, PdfiumRasterizer, Rasterizer};
pub use pipeline::request::ExtractionRequest;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use table::ResultTable;
