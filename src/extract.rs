//! Format parsing behind the core [`TextExtractor`] contract.
//!
//! - PDF: per-page text layer via `pdf-extract`. A PDF whose text layer is
//!   blank is handed to OCR when the configured engine accepts PDFs.
//! - DOCX: `word/document.xml` runs (`w:t`), one line per paragraph, one
//!   line per table row with cells joined by ` | `, explicit page breaks
//!   (`w:br w:type="page"`) split pages.
//! - PNG/JPEG: always OCR. Fails when OCR is disabled.
//!
//! Extraction never panics: `pdf-extract` runs on a blocking thread and a
//! panic there becomes [`Error::Extraction`].

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info};

use compliance_rag_core::extract::{ExtractedText, TextExtractor};
use compliance_rag_core::models::DocumentFormat;
use compliance_rag_core::{Error, Result};

use crate::ocr::OcrEngine;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub struct DocumentExtractor {
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl DocumentExtractor {
    pub fn new(ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { ocr }
    }

    async fn ocr(&self, content: &[u8], format: DocumentFormat) -> Result<ExtractedText> {
        let engine = match &self.ocr {
            Some(engine) if engine.accepts(format) => engine,
            Some(engine) => {
                return Err(Error::Extraction(format!(
                    "{} OCR cannot read {} content",
                    engine.name(),
                    format.as_str()
                )))
            }
            None => {
                return Err(Error::Extraction(format!(
                    "{} content requires OCR, which is disabled",
                    format.as_str()
                )))
            }
        };
        let output = engine.recognize(content, format).await?;
        info!(
            engine = engine.name(),
            pages = output.pages.len(),
            confidence = output.confidence().unwrap_or(0.0),
            "OCR complete"
        );
        Ok(ExtractedText::from_pages(&output.pages).with_ocr_confidence(output.confidence()))
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, content: &[u8], format: DocumentFormat) -> Result<ExtractedText> {
        match format {
            DocumentFormat::Pdf => {
                let pages = extract_pdf_pages(content.to_vec()).await?;
                if pages.iter().all(|p| p.trim().is_empty()) {
                    debug!("PDF has no text layer");
                    if self.ocr.is_some() {
                        return self.ocr(content, format).await;
                    }
                    return Err(Error::Extraction("PDF has no text layer and OCR is disabled".into()));
                }
                Ok(ExtractedText::from_pages(&pages))
            }
            DocumentFormat::Docx => Ok(ExtractedText::from_pages(&extract_docx_pages(content)?)),
            DocumentFormat::Png | DocumentFormat::Jpeg => self.ocr(content, format).await,
        }
    }
}

async fn extract_pdf_pages(bytes: Vec<u8>) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| Error::Extraction(format!("PDF extraction failed: {e}")))
    })
    .await
    .map_err(|e| Error::Extraction(format!("PDF extraction aborted: {e}")))?
}

fn ooxml_err(e: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("DOCX extraction failed: {e}"))
}

fn extract_docx_pages(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml_err("word/document.xml not found"))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(ooxml_err)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err("word/document.xml exceeds size limit"));
    }
    docx_pages(&xml)
}

fn is_page_break(e: &BytesStart) -> bool {
    e.local_name().as_ref() == b"br"
        && e.attributes()
            .flatten()
            .any(|a| a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page")
}

fn docx_pages(xml: &[u8]) -> Result<Vec<String>> {
    let mut pages = Vec::new();
    let mut page = String::new();
    let mut in_text = false;
    let mut cell_depth = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tc" => cell_depth += 1,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                page.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if cell_depth > 0 => page.push(' '),
                b"p" => page.push('\n'),
                b"tc" => {
                    cell_depth = cell_depth.saturating_sub(1);
                    page.truncate(page.trim_end_matches(' ').len());
                    page.push_str(" | ");
                }
                b"tr" => {
                    page.truncate(page.trim_end_matches(" | ").len());
                    page.push('\n');
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if is_page_break(&e) {
                    pages.push(std::mem::take(&mut page));
                } else if e.local_name().as_ref() == b"tab" {
                    page.push('\t');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    pages.push(page);
    // A trailing break leaves an empty final page.
    while pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrOutput;
    use std::io::Write;

    fn docx(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        );
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    struct FixedOcr;

    #[async_trait]
    impl OcrEngine for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }
        fn accepts(&self, format: DocumentFormat) -> bool {
            format.is_image()
        }
        async fn recognize(&self, _content: &[u8], _format: DocumentFormat) -> Result<OcrOutput> {
            Ok(OcrOutput {
                pages: vec!["Scanned access review log.".into()],
                page_confidence: vec![0.7],
            })
        }
    }

    #[tokio::test]
    async fn test_docx_paragraphs_and_page_breaks() {
        let bytes = docx(
            r#"<w:p><w:r><w:t>Policy overview.</w:t></w:r></w:p><w:p><w:r><w:br w:type="page"/></w:r></w:p><w:p><w:r><w:t xml:space="preserve">The audit deadline </w:t></w:r><w:r><w:t>is Q3 2024.</w:t></w:r></w:p>"#,
        );
        let extracted = DocumentExtractor::new(None)
            .extract(&bytes, DocumentFormat::Docx)
            .await
            .unwrap();
        assert_eq!(extracted.page_count(), 2);
        let p2 = &extracted.pages[1];
        assert_eq!(extracted.text[p2.start..p2.end].trim(), "The audit deadline is Q3 2024.");
    }

    #[test]
    fn test_docx_table_rows_are_pipe_separated() {
        let pages = docx_pages(
            br#"<w:document xmlns:w="w"><w:body><w:tbl><w:tr><w:tc><w:p><w:r><w:t>AC-1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>CFO</w:t></w:r></w:p></w:tc></w:tr></w:tbl></w:body></w:document>"#,
        )
        .unwrap();
        assert_eq!(pages, vec!["AC-1 | CFO\n".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_docx_is_extraction_error() {
        let err = DocumentExtractor::new(None)
            .extract(b"not a zip", DocumentFormat::Docx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_images_need_ocr() {
        let err = DocumentExtractor::new(None)
            .extract(b"\x89PNG", DocumentFormat::Png)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));

        let extracted = DocumentExtractor::new(Some(Arc::new(FixedOcr)))
            .extract(b"\x89PNG", DocumentFormat::Png)
            .await
            .unwrap();
        assert_eq!(extracted.text, "Scanned access review log.");
        assert_eq!(extracted.ocr_confidence, Some(0.7));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_does_not_panic() {
        let err = DocumentExtractor::new(None)
            .extract(b"%PDF-1.4 garbage", DocumentFormat::Pdf)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
