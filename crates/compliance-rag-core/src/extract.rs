//! Document text extraction contract.
//!
//! Format parsing (PDF text layers, DOCX XML, OCR for scans) happens in
//! the application behind [`TextExtractor`]. The core only sees plain text
//! plus the byte span of every page.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DocumentFormat, PageSpan};

/// Output of a successful extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedText {
    pub text: String,
    /// Contiguous page spans covering `text`, in page order.
    pub pages: Vec<PageSpan>,
    /// Mean OCR confidence when any page was recognized from an image.
    pub ocr_confidence: Option<f64>,
}

impl ExtractedText {
    /// Join per-page texts, separating pages with a blank line.
    ///
    /// The separator belongs to the preceding page, so spans are
    /// contiguous and a page boundary always falls on a paragraph break.
    pub fn from_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            let start = text.len();
            text.push_str(page.as_ref().trim_end());
            if i + 1 < pages.len() {
                text.push_str("\n\n");
            }
            spans.push(PageSpan {
                number: i as u32 + 1,
                start,
                end: text.len(),
            });
        }
        Self {
            text,
            pages: spans,
            ocr_confidence: None,
        }
    }

    pub fn with_ocr_confidence(mut self, confidence: Option<f64>) -> Self {
        self.ocr_confidence = confidence;
        self
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// True when extraction produced nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// `extract_text(bytes, format) → text, page boundaries`.
///
/// Fails with [`Error::UnsupportedFormat`](crate::Error::UnsupportedFormat)
/// or [`Error::Extraction`](crate::Error::Extraction).
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, content: &[u8], format: DocumentFormat) -> Result<ExtractedText>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pages_spans_are_contiguous() {
        let ex = ExtractedText::from_pages(&["Intro page.", "The audit deadline is Q3 2024.", "Appendix."]);
        assert_eq!(ex.page_count(), 3);
        assert_eq!(ex.pages[0].start, 0);
        for pair in ex.pages.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ex.pages[2].end, ex.text.len());
        let p2 = &ex.pages[1];
        assert!(ex.text[p2.start..p2.end].starts_with("The audit deadline"));
    }

    #[test]
    fn test_blank_detection() {
        assert!(ExtractedText::from_pages(&["  ", "\n"]).is_blank());
        assert!(!ExtractedText::from_pages(&["x"]).is_blank());
    }
}
