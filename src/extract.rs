//! Multi-format text extraction for binary documents (PDF, OOXML).
//!
//! Extraction is pipeline-layer: the docs-folder scanner supplies bytes +
//! content-type; this module returns plain UTF-8 text, with per-page
//! markers (`\n[Page {n}]\n`) for PDFs so downstream chunking can track
//! page numbers through to Q&A generation and document splitting.

use std::io::Read;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TXT: &str = "text/plain";
pub const MIME_MD: &str = "text/markdown";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracted text plus, when known, the page boundaries within it (byte
/// offset of the start of each page, in order).
pub struct Extracted {
    pub text: String,
    pub page_starts: Vec<usize>,
}

/// Extract plain text from binary content, given its content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<Extracted, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => Ok(Extracted {
            text: extract_docx(bytes)?,
            page_starts: Vec::new(),
        }),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Extract a PDF's text page by page, joining with `\n[Page {n}]\n`
/// markers. `lopdf` enumerates the page count; per-page text comes from
/// `pdf-extract`'s page-range API. If a PDF cannot be split into pages
/// (e.g. `pdf-extract` can't process one page independently), the whole
/// document is extracted as a single unmarked page.
fn extract_pdf(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let page_count = lopdf::Document::load_mem(bytes)
        .map(|doc| doc.get_pages().len())
        .unwrap_or(0);

    if page_count == 0 {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        return Ok(Extracted {
            text,
            page_starts: vec![0],
        });
    }

    match pdf_extract::extract_text_from_mem_by_pages(bytes) {
        Ok(pages) => {
            let mut text = String::new();
            let mut page_starts = Vec::with_capacity(pages.len());
            for (i, page_text) in pages.iter().enumerate() {
                page_starts.push(text.len());
                text.push_str(&format!("\n[Page {}]\n", i + 1));
                text.push_str(page_text);
            }
            Ok(Extracted { text, page_starts })
        }
        Err(_) => {
            let text = pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractError::Pdf(e.to_string()))?;
            Ok(Extracted {
                text,
                page_starts: vec![0],
            })
        }
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(ExtractError::Ooxml(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }
}
