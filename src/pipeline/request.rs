//! Request builder: page images + field list → one multi-part request.
//!
//! Pure transformation, no I/O. The result is backend-agnostic; each
//! [`crate::pipeline::llm::VisionBackend`] decides how to put it on the wire.

use crate::config::FieldSpec;
use crate::error::ExtractError;
use crate::pipeline::encode::to_data_uri;
use crate::pipeline::render::PageImage;
use crate::prompts::{self, DEFAULT_USER_PROMPT};
use serde::Serialize;
use std::path::Path;

/// One extraction call: instructions plus every page, in page order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub fields: FieldSpec,
    pub system_instruction: String,
    pub user_instruction: String,
    pub images: Vec<ImageAttachment>,
}

/// A page image carried inline as a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAttachment {
    /// 1-based page index of the source page.
    pub page_index: usize,
    pub mime_type: String,
    #[serde(skip)]
    pub data_uri: String,
}

/// Optional replacements for the default instructions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptOverrides<'a> {
    pub system: Option<&'a str>,
    pub user: Option<&'a str>,
}

/// Build the request for `pages` of the document at `source` and `fields`.
///
/// # Errors
/// - [`ExtractError::EmptyFieldSpec`] when `fields` is empty
/// - [`ExtractError::EmptyDocument`] for `source` when `pages` is empty
pub fn build_request(
    source: &Path,
    pages: &[PageImage],
    fields: &FieldSpec,
    overrides: PromptOverrides<'_>,
) -> Result<ExtractionRequest, ExtractError> {
    if fields.is_empty() {
        return Err(ExtractError::EmptyFieldSpec);
    }
    if pages.is_empty() {
        return Err(ExtractError::EmptyDocument {
            path: source.to_path_buf(),
        });
    }

    let system_instruction = match overrides.system {
        Some(s) => s.to_string(),
        None => prompts::system_prompt(fields),
    };
    let user_instruction = overrides.user.unwrap_or(DEFAULT_USER_PROMPT).to_string();

    let images = pages
        .iter()
        .map(|page| ImageAttachment {
            page_index: page.page_index,
            mime_type: page.mime_type.clone(),
            data_uri: to_data_uri(&page.bytes, &page.mime_type),
        })
        .collect();

    Ok(ExtractionRequest {
        fields: fields.clone(),
        system_instruction,
        user_instruction,
        images,
    })
}
