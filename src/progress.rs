//! Progress-callback trait for extraction run events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the run moves from rendering to the model call.
//!
//! A run makes exactly one model call, so the interesting progress is in
//! rasterisation (one event per page) and in the wait for the backend.
//!
//! # Example
//!
//! ```rust
//! use bol_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     rendered: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for PageCounter {
//!     fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Rendered page {}/{}", page_num, total_pages);
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { rendered: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline at each stage of a run.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Rendering runs on a blocking thread, so
/// `on_page_rendered` is called from there.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any page is rendered.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages that will be rendered
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each page is rasterised.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number in the document
    /// * `total_pages` — total document pages
    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called just before the single model request is sent.
    ///
    /// # Arguments
    /// * `backend` — backend id
    /// * `images`  — number of page images in the request
    fn on_model_call_start(&self, backend: &str, images: usize) {
        let _ = (backend, images);
    }

    /// Called when the backend has answered.
    ///
    /// # Arguments
    /// * `backend`       — backend id
    /// * `response_len`  — length of the raw response text in bytes
    fn on_model_call_complete(&self, backend: &str, response_len: usize) {
        let _ = (backend, response_len);
    }

    /// Called once after the table has been assembled.
    ///
    /// # Arguments
    /// * `records` — number of rows in the result table
    fn on_run_complete(&self, records: usize) {
        let _ = records;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
