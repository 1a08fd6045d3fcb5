//! Pipeline stages for bill-of-lading field extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ request ──▶ llm ──▶ normalize ──▶ (table)
//! (path)    (pdfium)   (prompt +   (one     (fences,
//!                       images)     call)    JSON)
//! ```
//!
//! 1. [`input`]     validate the user-supplied path
//! 2. [`render`]    rasterise selected pages; runs in `spawn_blocking` because
//!    pdfium is blocking
//! 3. [`encode`]    PNG encoding and `data:` URIs
//! 4. [`scratch`]   optional run-scoped copies of rendered pages
//! 5. [`request`]   assemble the single multi-image request
//! 6. [`llm`]       the only stage with network I/O
//! 7. [`normalize`] strip fences and parse the model's JSON

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod render;
pub mod request;
pub mod scratch;
