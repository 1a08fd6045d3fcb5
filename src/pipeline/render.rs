//! Rasterisation: turn document pages into PNG page images.
//!
//! The [`Rasterizer`] trait is the seam to the rendering engine. The pipeline
//! only asks two things of it: how many pages a document has, and the image
//! of one page at a given DPI. [`PdfiumRasterizer`] is the production
//! implementation; tests plug in a stub.
//!
//! [`Document::pages`] yields pages lazily and in page order. Calling it
//! again restarts from the first selected page.
//!
//! [`Document::render`] renders a whole selection eagerly through
//! [`Rasterizer::render_pages`], which pdfium implements with one bind and one
//! document load for the batch.
//!
//! ## Why bind pdfium per call?
//!
//! A `PdfDocument` borrows the `Pdfium` instance that loaded it, so neither
//! can be stored in a `Send + Sync` rasteriser without a self-referential
//! struct. A run therefore binds twice: once to count pages, once to render
//! the selection.

use crate::error::ExtractError;
use crate::pipeline::encode::{encode_png, PNG_MIME};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Points per inch in PDF user space.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// One rasterised page.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number in the source document.
    pub page_index: usize,
    pub dpi: u32,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("page_index", &self.page_index)
            .field("dpi", &self.dpi)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A page-rendering engine.
pub trait Rasterizer: Send + Sync {
    /// Open `path` and count its pages.
    ///
    /// Fails with [`ExtractError::DocumentOpen`] if the file cannot be loaded.
    fn page_count(&self, path: &Path) -> Result<usize, ExtractError>;

    /// Render the page at 0-based `index` of `path` at `dpi`.
    fn render_page(&self, path: &Path, index: usize, dpi: u32) -> Result<PageImage, ExtractError>;

    /// Render every page in `indices`, in order, loading `path` once.
    ///
    /// `on_page` sees each page as soon as it is rendered. The default
    /// falls back to [`Rasterizer::render_page`] per index.
    fn render_pages(
        &self,
        path: &Path,
        indices: &[usize],
        dpi: u32,
        on_page: &mut dyn FnMut(&PageImage),
    ) -> Result<Vec<PageImage>, ExtractError> {
        let mut pages = Vec::with_capacity(indices.len());
        for &index in indices {
            let page = self.render_page(path, index, dpi)?;
            on_page(&page);
            pages.push(page);
        }
        Ok(pages)
    }
}

/// An opened document: a source path and a fixed page count.
#[derive(Clone)]
pub struct Document {
    path: PathBuf,
    page_count: usize,
    rasterizer: Arc<dyn Rasterizer>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path)
            .field("page_count", &self.page_count)
            .finish()
    }
}

impl Document {
    /// Open `path` with `rasterizer`.
    ///
    /// A document with zero pages is rejected with [`ExtractError::EmptyDocument`].
    pub fn open(rasterizer: Arc<dyn Rasterizer>, path: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let path = path.into();
        let page_count = rasterizer.page_count(&path)?;
        if page_count == 0 {
            return Err(ExtractError::EmptyDocument { path });
        }
        info!("Document loaded: {} ({} pages)", path.display(), page_count);
        Ok(Self {
            path,
            page_count,
            rasterizer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Every page, in order.
    pub fn pages(&self, dpi: u32) -> PageImages<'_> {
        self.select(dpi, (0..self.page_count).collect())
    }

    /// The pages at the given 0-based `indices`, in the order given.
    /// Out-of-range indices are skipped.
    pub fn select(&self, dpi: u32, indices: Vec<usize>) -> PageImages<'_> {
        let indices = self.in_range(indices);
        PageImages {
            document: self,
            dpi,
            indices: indices.into_iter(),
        }
    }

    /// Render the pages at `indices` eagerly, with a single document load.
    /// Out-of-range indices are skipped.
    pub fn render(
        &self,
        dpi: u32,
        indices: Vec<usize>,
        on_page: &mut dyn FnMut(&PageImage),
    ) -> Result<Vec<PageImage>, ExtractError> {
        let indices = self.in_range(indices);
        self.rasterizer
            .render_pages(&self.path, &indices, dpi, on_page)
    }

    fn in_range(&self, indices: Vec<usize>) -> Vec<usize> {
        indices
            .into_iter()
            .filter(|&i| i < self.page_count)
            .collect()
    }
}

/// Lazy iterator over rendered pages.
pub struct PageImages<'a> {
    document: &'a Document,
    dpi: u32,
    indices: std::vec::IntoIter<usize>,
}

impl Iterator for PageImages<'_> {
    type Item = Result<PageImage, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.indices.next()?;
        Some(
            self.document
                .rasterizer
                .render_page(&self.document.path, idx, self.dpi),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl ExactSizeIterator for PageImages<'_> {}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Renders PDF pages with pdfium.
///
/// The library is located via `PDFIUM_LIB_PATH` (a file or a directory),
/// then the current directory, then the system library path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    password: Option<String>,
    max_pixels: Option<u32>,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(password: Option<String>, max_pixels: Option<u32>) -> Self {
        Self {
            password,
            max_pixels,
            library_path: std::env::var_os("PDFIUM_LIB_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }

    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let bindings = match self.library_path {
            Some(ref p) if p.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
            }
            Some(ref p) => Pdfium::bind_to_library(p),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| ExtractError::RasterizerUnavailable(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn load<'a>(&'a self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, ExtractError> {
        pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{e:?}");
                let reason = if detail.to_lowercase().contains("password") {
                    if self.password.is_some() {
                        "wrong password".to_string()
                    } else {
                        "document is encrypted; a password is required".to_string()
                    }
                } else {
                    format!("pdfium could not load the file: {detail}")
                };
                ExtractError::DocumentOpen {
                    path: path.to_path_buf(),
                    reason,
                }
            })
    }

    fn render_loaded(
        &self,
        document: &PdfDocument<'_>,
        index: usize,
        dpi: u32,
    ) -> Result<PageImage, ExtractError> {
        let page_num = index + 1;
        let page = document
            .pages()
            .get(index as u16)
            .map_err(|e| ExtractError::Rasterisation {
                page: page_num,
                detail: format!("{e:?}"),
            })?;

        let mut render_config =
            PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / PDF_POINTS_PER_INCH);
        if let Some(max) = self.max_pixels {
            render_config = render_config
                .set_maximum_width(max as i32)
                .set_maximum_height(max as i32);
        }

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractError::Rasterisation {
                page: page_num,
                detail: format!("{e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            page_num,
            dpi,
            image.width(),
            image.height()
        );

        let bytes = encode_png(&image).map_err(|e| ExtractError::Rasterisation {
            page: page_num,
            detail: format!("PNG encoding failed: {e}"),
        })?;

        Ok(PageImage {
            page_index: page_num,
            dpi,
            mime_type: PNG_MIME.to_string(),
            bytes,
        })
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self, path: &Path) -> Result<usize, ExtractError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium, path)?;
        let count = document.pages().len() as usize;
        Ok(count)
    }

    fn render_page(&self, path: &Path, index: usize, dpi: u32) -> Result<PageImage, ExtractError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium, path)?;
        self.render_loaded(&document, index, dpi)
    }

    fn render_pages(
        &self,
        path: &Path,
        indices: &[usize],
        dpi: u32,
        on_page: &mut dyn FnMut(&PageImage),
    ) -> Result<Vec<PageImage>, ExtractError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium, path)?;
        let mut pages = Vec::with_capacity(indices.len());
        for &index in indices {
            let page = self.render_loaded(&document, index, dpi)?;
            on_page(&page);
            pages.push(page);
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRasterizer {
        pages: usize,
        renders: AtomicUsize,
    }

    impl Rasterizer for CountingRasterizer {
        fn page_count(&self, _path: &Path) -> Result<usize, ExtractError> {
            Ok(self.pages)
        }

        fn render_page(&self, _path: &Path, index: usize, dpi: u32) -> Result<PageImage, ExtractError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(PageImage {
                page_index: index + 1,
                dpi,
                mime_type: PNG_MIME.to_string(),
                bytes: vec![index as u8],
            })
        }
    }

    fn document(pages: usize) -> (Document, Arc<CountingRasterizer>) {
        let r = Arc::new(CountingRasterizer {
            pages,
            renders: AtomicUsize::new(0),
        });
        let doc = Document::open(r.clone(), "doc.pdf").unwrap();
        (doc, r)
    }

    #[test]
    fn yields_every_page_in_increasing_order() {
        for n in [1, 2, 7] {
            let (doc, _) = document(n);
            let pages: Vec<_> = doc.pages(300).collect::<Result<_, _>>().unwrap();
            assert_eq!(pages.len(), n);
            assert!(pages.windows(2).all(|w| w[0].page_index < w[1].page_index));
            assert_eq!(pages[0].page_index, 1);
            assert!(pages.iter().all(|p| p.dpi == 300));
        }
    }

    #[test]
    fn iteration_is_lazy() {
        let (doc, r) = document(5);
        let mut it = doc.pages(150);
        assert_eq!(r.renders.load(Ordering::SeqCst), 0);
        it.next();
        assert_eq!(r.renders.load(Ordering::SeqCst), 1);
        assert_eq!(it.len(), 4);
    }

    #[test]
    fn sequence_is_restartable() {
        let (doc, _) = document(3);
        let first: Vec<_> = doc.pages(72).map(|p| p.unwrap().page_index).collect();
        let second: Vec<_> = doc.pages(72).map(|p| p.unwrap().page_index).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn select_skips_out_of_range() {
        let (doc, _) = document(2);
        let pages: Vec<_> = doc
            .select(72, vec![1, 5])
            .map(|p| p.unwrap().page_index)
            .collect();
        assert_eq!(pages, vec![2]);
    }

    #[test]
    fn zero_page_document_is_rejected() {
        let r = Arc::new(CountingRasterizer {
            pages: 0,
            renders: AtomicUsize::new(0),
        });
        let err = Document::open(r, "empty.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::EmptyDocument { .. }));
    }

    #[test]
    fn render_reports_each_page_in_order() {
        let (doc, r) = document(4);
        let mut seen = Vec::new();
        let pages = doc
            .render(96, vec![2, 0, 9], &mut |p| seen.push(p.page_index))
            .unwrap();
        assert_eq!(seen, vec![3, 1]);
        assert_eq!(pages.iter().map(|p| p.page_index).collect::<Vec<_>>(), seen);
        assert_eq!(r.renders.load(Ordering::SeqCst), 2);
    }

    struct BatchRasterizer {
        loads: AtomicUsize,
    }

    impl Rasterizer for BatchRasterizer {
        fn page_count(&self, _path: &Path) -> Result<usize, ExtractError> {
            Ok(10)
        }

        fn render_page(&self, _path: &Path, _index: usize, _dpi: u32) -> Result<PageImage, ExtractError> {
            panic!("batch rendering must not fall back to single pages")
        }

        fn render_pages(
            &self,
            _path: &Path,
            indices: &[usize],
            dpi: u32,
            on_page: &mut dyn FnMut(&PageImage),
        ) -> Result<Vec<PageImage>, ExtractError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let pages: Vec<_> = indices
                .iter()
                .map(|&i| PageImage {
                    page_index: i + 1,
                    dpi,
                    mime_type: PNG_MIME.to_string(),
                    bytes: vec![],
                })
                .collect();
            pages.iter().for_each(|p| on_page(p));
            Ok(pages)
        }
    }

    #[test]
    fn render_loads_the_document_once_for_the_selection() {
        let r = Arc::new(BatchRasterizer {
            loads: AtomicUsize::new(0),
        });
        let doc = Document::open(r.clone(), "doc.pdf").unwrap();
        let pages = doc.render(150, (0..10).collect(), &mut |_| {}).unwrap();
        assert_eq!(pages.len(), 10);
        assert_eq!(r.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pdfium_password_load_fails_cleanly_on_missing_file() {
        let r = PdfiumRasterizer::new(Some("secret".into()), None);
        let missing = Path::new("/nonexistent/bol-extract/missing.pdf");
        let err = r.page_count(missing).unwrap_err();
        assert!(
            matches!(
                err,
                ExtractError::RasterizerUnavailable(_) | ExtractError::DocumentOpen { .. }
            ),
            "unexpected error: {err:?}"
        );
        let err = r.render_pages(missing, &[0], 72, &mut |_| {}).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::RasterizerUnavailable(_) | ExtractError::DocumentOpen { .. }
        ));
    }

    #[test]
    fn page_image_debug_hides_bytes() {
        let p = PageImage {
            page_index: 1,
            dpi: 300,
            mime_type: PNG_MIME.into(),
            bytes: vec![0; 1024],
        };
        assert!(format!("{p:?}").contains("bytes: 1024"));
    }
}
