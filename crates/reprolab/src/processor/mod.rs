//! Document metadata extraction used by the job pipeline.

pub mod pdf;

pub use pdf::PdfTitleExtractor;

use crate::error::ProcessError;

/// Reads a human-readable title out of an uploaded document.
pub trait TitleExtractor: Send + Sync {
    /// `Ok(None)` means the document carries no usable title.
    fn extract_title(&self, bytes: &[u8]) -> Result<Option<String>, ProcessError>;
}

/// Collapses whitespace runs and drops empty titles.
pub fn normalize_title(raw: &str) -> Option<String> {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
