//! Configuration types for field extraction.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The config is the only place backend choice,
//! credentials overrides, and sampling parameters live; nothing in the
//! pipeline reads process-wide state except credential resolution, which
//! happens once when the model client is constructed.
//!
//! A run can also be described by a [`RunFile`] (TOML or JSON) using the
//! option names `document_path`, `fields`, `resolution_dpi`, `backend`,
//! `model_identifier`, `temperature` and `max_output_tokens`.

use crate::backend::Backend;
use crate::error::ExtractError;
use crate::pipeline::llm::VisionBackend;
use crate::pipeline::render::Rasterizer;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use bol_extract::{Backend, ExtractionConfig, FieldSpec};
///
/// let config = ExtractionConfig::builder()
///     .fields(FieldSpec::new(["Invoice No.", "Invoice Date"]).unwrap())
///     .backend(Backend::Ark)
///     .dpi(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Fields the model is asked to extract. Default: [`FieldSpec::bill_of_lading`].
    pub fields: FieldSpec,

    /// Rendering DPI used when rasterising each page. Range: 72–600. Default: 300.
    ///
    /// Scanned bills of lading carry small print (weights, codes, phone
    /// numbers); 300 DPI keeps it legible to the model at the cost of larger
    /// image payloads.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels, applied after DPI scaling.
    /// `None` disables the cap. Default: 4000.
    pub max_rendered_pixels: Option<u32>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Which vision backend to call. Default: [`Backend::DashScope`].
    pub backend: Backend,

    /// Model identifier. If None, uses the backend profile default.
    pub model: Option<String>,

    /// Endpoint base URL override (e.g. an international region endpoint).
    pub base_url: Option<String>,

    /// Explicit API key. Takes precedence over the environment.
    pub api_key: Option<String>,

    /// Name of the environment variable holding the API key, replacing the
    /// backend's default variable.
    pub credential_env: Option<String>,

    /// Sampling temperature. If None, uses the backend profile default.
    pub temperature: Option<f32>,

    /// Maximum output tokens. If None, uses the backend profile default
    /// (which may itself be unset).
    pub max_output_tokens: Option<u32>,

    /// Model call timeout in seconds. Default: 120.
    ///
    /// One request carries every page, so responses take noticeably longer
    /// than single-image calls.
    pub api_timeout_secs: u64,

    /// Custom system instruction. If None, built from [`crate::prompts`].
    pub system_prompt: Option<String>,

    /// Custom user instruction. If None, uses [`crate::prompts::DEFAULT_USER_PROMPT`].
    pub user_prompt: Option<String>,

    /// Base directory for per-run page staging. When set, pages are written
    /// here and the request is built from the staged files.
    /// None keeps page images in memory only. Default: None.
    pub scratch_dir: Option<PathBuf>,

    /// Pre-constructed rasteriser. If None, pdfium is bound at run time.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Pre-constructed model client. Takes precedence over `backend`.
    pub client: Option<Arc<dyn VisionBackend>>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            fields: FieldSpec::bill_of_lading(),
            dpi: 300,
            max_rendered_pixels: Some(4000),
            pages: PageSelection::default(),
            password: None,
            backend: Backend::default(),
            model: None,
            base_url: None,
            api_key: None,
            credential_env: None,
            temperature: None,
            max_output_tokens: None,
            api_timeout_secs: 120,
            system_prompt: None,
            user_prompt: None,
            scratch_dir: None,
            rasterizer: None,
            client: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("fields", &self.fields)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pages", &self.pages)
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("credential_env", &self.credential_env)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("scratch_dir", &self.scratch_dir)
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .field("client", &self.client.as_ref().map(|c| c.id().to_string()))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn fields(mut self, fields: FieldSpec) -> Self {
        self.config.fields = fields;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: Option<u32>) -> Self {
        self.config.max_rendered_pixels = px.map(|p| p.max(100));
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn credential_env(mut self, var: impl Into<String>) -> Self {
        self.config.credential_env = Some(var.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = Some(n);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.user_prompt = Some(prompt.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn client(mut self, client: Arc<dyn VisionBackend>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_output_tokens == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "max_output_tokens must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Field specification ──────────────────────────────────────────────────

/// Ordered, duplicate-free list of field names to extract.
///
/// Order is kept for display; the model is not required to honour it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct FieldSpec(Vec<String>);

impl FieldSpec {
    /// Build a field spec, rejecting blank and duplicate names.
    ///
    /// An empty list is accepted here; the request builder rejects it with
    /// [`ExtractError::EmptyFieldSpec`].
    pub fn new<I, S>(names: I) -> Result<Self, ExtractError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for name in names {
            let name: String = name.into();
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(ExtractError::InvalidConfig(
                    "field names must not be blank".into(),
                ));
            }
            if !seen.insert(trimmed.to_string()) {
                return Err(ExtractError::DuplicateField {
                    name: trimmed.to_string(),
                });
            }
            fields.push(trimmed.to_string());
        }
        Ok(Self(fields))
    }

    /// The bill-of-lading field set used when no fields are configured.
    pub fn bill_of_lading() -> Self {
        Self(
            BILL_OF_LADING_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        FieldSpec::new(names).map_err(serde::de::Error::custom)
    }
}

const BILL_OF_LADING_FIELDS: &[&str] = &[
    "Place of Receipt",
    "Port of Discharge",
    "Port of Loading",
    "Place of Delivery",
    "Gross Weight",
    "Measurement",
    "Invoice No.",
    "Invoice Date",
    "Customer Name",
    "Telephone",
    "Fax",
    "E-Mail",
    "Customer Code",
];

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the document to send to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

// ── Run file ─────────────────────────────────────────────────────────────

/// A run description loaded from TOML or JSON.
///
/// ```toml
/// document_path = "CV00111931S.pdf"
/// fields = ["Invoice No.", "Invoice Date"]
/// resolution_dpi = 300
/// backend = "ark"
/// model_identifier = "doubao-1.5-vision-pro-250328"
/// temperature = 0.1
/// max_output_tokens = 4000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    pub document_path: PathBuf,
    #[serde(default)]
    pub fields: Option<FieldSpec>,
    #[serde(default = "default_dpi")]
    pub resolution_dpi: u32,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub model_identifier: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_dpi() -> u32 {
    300
}

impl RunFile {
    /// Parse a run file; `.json` files are read as JSON, everything else as TOML.
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::InvalidConfig(format!("cannot read run file '{}': {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ExtractError> {
        toml::from_str(text).map_err(|e| ExtractError::InvalidConfig(format!("run file: {e}")))
    }

    pub fn from_json_str(text: &str) -> Result<Self, ExtractError> {
        serde_json::from_str(text)
            .map_err(|e| ExtractError::InvalidConfig(format!("run file: {e}")))
    }

    /// Seed a builder from this run file. The document path is returned separately
    /// because it is an argument of [`crate::extract()`], not a config knob.
    pub fn into_builder(self) -> (PathBuf, ExtractionConfigBuilder) {
        let mut builder = ExtractionConfig::builder()
            .backend(self.backend)
            .dpi(self.resolution_dpi);
        if let Some(fields) = self.fields {
            builder = builder.fields(fields);
        }
        if let Some(model) = self.model_identifier {
            builder = builder.model(model);
        }
        if let Some(t) = self.temperature {
            builder = builder.temperature(t);
        }
        if let Some(n) = self.max_output_tokens {
            builder = builder.max_output_tokens(n);
        }
        (self.document_path, builder)
    }
}
