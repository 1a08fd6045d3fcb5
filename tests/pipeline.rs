//! Pipeline integration tests with a stub rasteriser and a stub backend.
//!
//! No pdfium library and no network are needed: the rasteriser produces
//! small fake page images and the backend answers with canned text while
//! counting calls and recording the request it received.

use async_trait::async_trait;
use bol_extract::{
    extract, extract_from_bytes, extract_with_cancel, BackendError, ExtractError,
    ExtractionConfig, ExtractionProgressCallback, ExtractionRequest, FieldSpec, PageImage,
    PageSelection, RawResponse, Rasterizer, VisionBackend,
};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct StubRasterizer {
    pages: usize,
    renders: AtomicUsize,
}

impl StubRasterizer {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            renders: AtomicUsize::new(0),
        })
    }
}

impl Rasterizer for StubRasterizer {
    fn page_count(&self, _path: &Path) -> Result<usize, ExtractError> {
        Ok(self.pages)
    }

    fn render_page(&self, _path: &Path, index: usize, dpi: u32) -> Result<PageImage, ExtractError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(PageImage {
            page_index: index + 1,
            dpi,
            mime_type: "image/png".into(),
            bytes: format!("page-{}", index + 1).into_bytes(),
        })
    }
}

enum Reply {
    Text(String),
    Fail(BackendError),
    Hang,
}

struct StubBackend {
    reply: Reply,
    calls: AtomicUsize,
    last_request: Mutex<Option<ExtractionRequest>>,
}

impl StubBackend {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    fn replying(text: &str) -> Arc<Self> {
        Self::new(Reply::Text(text.to_string()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> ExtractionRequest {
        self.last_request
            .lock()
            .unwrap()
            .clone()
            .expect("backend was never called")
    }
}

#[async_trait]
impl VisionBackend for StubBackend {
    fn id(&self) -> &str {
        "stub"
    }

    async fn send(&self, request: &ExtractionRequest) -> Result<RawResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.reply {
            Reply::Text(t) => Ok(RawResponse::from_text(t.clone())),
            Reply::Fail(e) => Err(e.clone()),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(RawResponse::from_text("[]"))
            }
        }
    }
}

/// A file that passes the `%PDF` magic check; the stub rasteriser never parses it.
fn fixture_pdf() -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    f.write_all(b"%PDF-1.4\n%stub\n").unwrap();
    f
}

fn invoice_fields() -> FieldSpec {
    FieldSpec::new(["Invoice No.", "Invoice Date"]).unwrap()
}

fn config(
    rasterizer: Arc<StubRasterizer>,
    backend: Arc<StubBackend>,
) -> bol_extract::ExtractionConfigBuilder {
    ExtractionConfig::builder()
        .fields(invoice_fields())
        .rasterizer(rasterizer)
        .client(backend)
}

// ── End-to-end through stubs ─────────────────────────────────────────────────

#[tokio::test]
async fn test_two_page_document_fenced_answer() {
    let raster = StubRasterizer::new(2);
    let backend = StubBackend::replying(
        "```json\n[{\"Invoice No.\":\"INV-1\",\"Invoice Date\":\"2024-01-01\"}]\n```",
    );
    let pdf = fixture_pdf();
    let cfg = config(raster.clone(), backend.clone()).build().unwrap();

    let out = extract(pdf.path(), &cfg).await.unwrap();

    assert_eq!(out.table.columns(), &["Invoice No.", "Invoice Date"]);
    assert_eq!(out.table.row_count(), 1);
    assert_eq!(out.table.get(0, "Invoice No."), Some(&json!("INV-1")));
    assert_eq!(out.table.get(0, "Invoice Date"), Some(&json!("2024-01-01")));

    assert_eq!(backend.calls(), 1, "exactly one model call per run");
    let req = backend.last_request();
    let pages: Vec<_> = req.images.iter().map(|i| i.page_index).collect();
    assert_eq!(pages, vec![1, 2]);
    assert!(req.system_instruction.contains("Invoice No."));

    assert_eq!(out.stats.total_pages, 2);
    assert_eq!(out.stats.sent_pages, 2);
    assert_eq!(out.stats.records, 1);
    assert!(out.raw_response.text.starts_with("```json"));
}

#[tokio::test]
async fn test_record_count_follows_the_model() {
    let backend = StubBackend::replying(
        r#"[{"Invoice No.":"A"},{"Invoice No.":"B","Fax":"021"},{"Invoice No.":"C"}]"#,
    );
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(1), backend).build().unwrap();

    let out = extract(pdf.path(), &cfg).await.unwrap();
    assert_eq!(out.table.row_count(), 3);
    assert_eq!(out.table.columns(), &["Invoice No.", "Fax"]);
    assert_eq!(out.table.rows()[0][1], None);
    assert_eq!(out.table.get(1, "Fax"), Some(&json!("021")));
}

#[tokio::test]
async fn test_single_object_answer_becomes_one_row() {
    let backend = StubBackend::replying(r#"{"Invoice No.":"X-9","Invoice Date":null}"#);
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(3), backend).build().unwrap();

    let out = extract(pdf.path(), &cfg).await.unwrap();
    assert_eq!(out.table.row_count(), 1);
    assert_eq!(out.table.rows()[0][1], Some(serde_json::Value::Null));
}

#[tokio::test]
async fn test_empty_array_answer_gives_empty_table() {
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(1), StubBackend::replying("[]"))
        .build()
        .unwrap();
    let out = extract(pdf.path(), &cfg).await.unwrap();
    assert!(out.table.is_empty());
    assert!(out.table.columns().is_empty());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_answer_keeps_raw_text() {
    let raw = "I'm sorry, the scan is unreadable.";
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(1), StubBackend::replying(raw))
        .build()
        .unwrap();

    let err = extract(pdf.path(), &cfg).await.unwrap_err();
    assert!(matches!(err, ExtractError::MalformedResponse { .. }));
    assert_eq!(err.raw_response(), Some(raw));
}

#[tokio::test]
async fn test_empty_field_spec_fails_before_any_work() {
    let raster = StubRasterizer::new(2);
    let backend = StubBackend::replying("[]");
    let pdf = fixture_pdf();
    let cfg = config(raster.clone(), backend.clone())
        .fields(FieldSpec::new(Vec::<String>::new()).unwrap())
        .build()
        .unwrap();

    let err = extract(pdf.path(), &cfg).await.unwrap_err();
    assert!(matches!(err, ExtractError::EmptyFieldSpec));
    assert_eq!(raster.renders.load(Ordering::SeqCst), 0);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_missing_document_makes_no_call() {
    let backend = StubBackend::replying("[]");
    let cfg = config(StubRasterizer::new(1), backend.clone())
        .build()
        .unwrap();

    let err = extract("/no/such/bill-of-lading.pdf", &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::DocumentOpen { .. }));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_zero_page_document_makes_no_call() {
    let backend = StubBackend::replying("[]");
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(0), backend.clone())
        .build()
        .unwrap();

    let err = extract(pdf.path(), &cfg).await.unwrap_err();
    assert!(matches!(err, ExtractError::EmptyDocument { .. }));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_backend_failure_is_not_retried() {
    let backend = StubBackend::new(Reply::Fail(BackendError::Status {
        status: 429,
        body: "rate limited".into(),
    }));
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(1), backend.clone())
        .build()
        .unwrap();

    let err = extract(pdf.path(), &cfg).await.unwrap_err();
    match err {
        ExtractError::ModelCall { backend: id, source } => {
            assert_eq!(id, "stub");
            assert!(matches!(source, BackendError::Status { status: 429, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_model_call_timeout() {
    let backend = StubBackend::new(Reply::Hang);
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(1), backend)
        .api_timeout_secs(1)
        .build()
        .unwrap();

    let err = extract(pdf.path(), &cfg).await.unwrap_err();
    assert!(matches!(
        err,
        ExtractError::ModelCall {
            source: BackendError::Timeout { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_during_model_call() {
    let backend = StubBackend::new(Reply::Hang);
    let pdf = fixture_pdf();
    let scratch = tempfile::tempdir().unwrap();
    let cfg = config(StubRasterizer::new(2), backend.clone())
        .scratch_dir(scratch.path())
        .build()
        .unwrap();

    let signal = tokio::time::sleep(Duration::from_millis(200));
    let err = extract_with_cancel(pdf.path(), &cfg, signal)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Cancelled));
    assert_eq!(backend.calls(), 1);

    let leftovers = std::fs::read_dir(scratch.path()).unwrap().count();
    assert_eq!(leftovers, 0, "scratch files must be discarded on cancel");
}

// ── Options ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_page_selection_limits_images() {
    let raster = StubRasterizer::new(4);
    let backend = StubBackend::replying("[]");
    let pdf = fixture_pdf();
    let cfg = config(raster.clone(), backend.clone())
        .pages(PageSelection::Set(vec![4, 2]))
        .build()
        .unwrap();

    let out = extract(pdf.path(), &cfg).await.unwrap();
    let pages: Vec<_> = backend
        .last_request()
        .images
        .iter()
        .map(|i| i.page_index)
        .collect();
    assert_eq!(pages, vec![2, 4]);
    assert_eq!(raster.renders.load(Ordering::SeqCst), 2);
    assert_eq!(out.stats.total_pages, 4);
    assert_eq!(out.stats.sent_pages, 2);
}

#[tokio::test]
async fn test_page_selection_out_of_range() {
    let backend = StubBackend::replying("[]");
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(2), backend.clone())
        .pages(PageSelection::Single(9))
        .build()
        .unwrap();

    let err = extract(pdf.path(), &cfg).await.unwrap_err();
    assert!(matches!(err, ExtractError::InvalidConfig(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_prompt_overrides_reach_the_backend() {
    let backend = StubBackend::replying("[]");
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(1), backend.clone())
        .system_prompt("system override")
        .user_prompt("user override")
        .build()
        .unwrap();

    extract(pdf.path(), &cfg).await.unwrap();
    let req = backend.last_request();
    assert_eq!(req.system_instruction, "system override");
    assert_eq!(req.user_instruction, "user override");
}

#[tokio::test]
async fn test_scratch_dir_is_removed_after_run() {
    let scratch = tempfile::tempdir().unwrap();
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(2), StubBackend::replying("[]"))
        .scratch_dir(scratch.path())
        .build()
        .unwrap();

    extract(pdf.path(), &cfg).await.unwrap();
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_extract_from_bytes() {
    let backend = StubBackend::replying(r#"[{"Invoice No.":"B-1"}]"#);
    let cfg = config(StubRasterizer::new(1), backend).build().unwrap();

    let out = extract_from_bytes(b"%PDF-1.7\n", &cfg).await.unwrap();
    assert_eq!(out.table.get(0, "Invoice No."), Some(&json!("B-1")));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let pdf = fixture_pdf();
    let a = config(StubRasterizer::new(1), StubBackend::replying(r#"[{"k":"a"}]"#))
        .scratch_dir(std::env::temp_dir())
        .build()
        .unwrap();
    let b = config(StubRasterizer::new(2), StubBackend::replying(r#"[{"k":"b"}]"#))
        .scratch_dir(std::env::temp_dir())
        .build()
        .unwrap();

    let (ra, rb) = tokio::join!(extract(pdf.path(), &a), extract(pdf.path(), &b));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_ne!(ra.run_id, rb.run_id);
    assert_eq!(ra.table.get(0, "k"), Some(&json!("a")));
    assert_eq!(rb.table.get(0, "k"), Some(&json!("b")));
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    fn push(&self, s: String) {
        self.0.lock().unwrap().push(s);
    }
}

impl ExtractionProgressCallback for EventLog {
    fn on_run_start(&self, total_pages: usize) {
        self.push(format!("start {total_pages}"));
    }
    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        self.push(format!("page {page_num}/{total_pages}"));
    }
    fn on_model_call_start(&self, backend: &str, images: usize) {
        self.push(format!("call {backend} {images}"));
    }
    fn on_model_call_complete(&self, backend: &str, _response_len: usize) {
        self.push(format!("answer {backend}"));
    }
    fn on_run_complete(&self, records: usize) {
        self.push(format!("done {records}"));
    }
}

#[tokio::test]
async fn test_progress_events_in_order() {
    let log = Arc::new(EventLog::default());
    let pdf = fixture_pdf();
    let cfg = config(StubRasterizer::new(2), StubBackend::replying(r#"[{"a":1}]"#))
        .progress_callback(log.clone())
        .build()
        .unwrap();

    extract(pdf.path(), &cfg).await.unwrap();
    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            "start 2",
            "page 1/2",
            "page 2/2",
            "call stub 2",
            "answer stub",
            "done 1",
        ]
    );
}

#[test]
fn test_callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<EventLog>();
    assert_send_sync::<bol_extract::NoopProgressCallback>();
}
