//! Page-level text extraction from uploaded documents.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Text of one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub page_number: u32,
    /// Extracted text.
    pub text: String,
}

/// A parsed document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedPdf {
    /// Display title.
    pub title: String,
    /// Number of pages.
    pub page_count: usize,
    /// Page texts in order.
    pub pages: Vec<PageText>,
}

/// Turns raw document bytes into page texts.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Extract the pages of the file `file_name` whose content is `bytes`.
    async fn extract(&self, bytes: Vec<u8>, file_name: &str) -> Result<ParsedPdf>;
}

/// The title used for a file: its name without directory or extension.
pub fn title_from_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| file_name.to_string())
}

/// Number the extracted page texts from 1.
pub fn number_pages(texts: Vec<String>) -> Vec<PageText> {
    texts
        .into_iter()
        .zip(1u32..)
        .map(|(text, page_number)| PageText { page_number, text })
        .collect()
}

#[cfg(feature = "pdf")]
pub use pdf::PdfExtractor;

#[cfg(feature = "pdf")]
mod pdf {
    use async_trait::async_trait;
    use tracing::debug;

    use super::{PageExtractor, ParsedPdf, number_pages, title_from_file_name};
    use crate::error::{RagError, Result};

    /// A [`PageExtractor`] for PDF files built on `pdf-extract`.
    ///
    /// Extraction runs on the blocking thread pool.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PdfExtractor;

    impl PdfExtractor {
        /// Create an extractor.
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl PageExtractor for PdfExtractor {
        async fn extract(&self, bytes: Vec<u8>, file_name: &str) -> Result<ParsedPdf> {
            let texts = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem_by_pages(&bytes)
            })
            .await
            .map_err(|e| RagError::PipelineError(format!("extraction task failed: {e}")))?
            .map_err(|e| RagError::ParseError(format!("failed to extract PDF text: {e}")))?;

            let pages = number_pages(texts);
            debug!(file_name, page_count = pages.len(), "extracted PDF pages");

            Ok(ParsedPdf { title: title_from_file_name(file_name), page_count: pages.len(), pages })
        }
    }

}
