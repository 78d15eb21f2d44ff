//! Text extraction for uploaded document files.
//!
//! Documents enter the knowledge base as stored files; sync turns them
//! into per-page text spans so chunks can carry a page number. Supported
//! types: `pdf`, `docx`, and plain `md`/`txt`. Anything else, or a file
//! that fails to parse, is reported as an error, which the sync engine
//! treats as a per-record skip, never a pass abort.

use std::io::Read;

use anyhow::{bail, Context, Result};

/// Cap on a single decompressed ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract the text of a stored document as a list of pages.
///
/// `file_type` is the lowercase file extension. Plain-text formats yield
/// a single page; PDFs yield one entry per page (form-feed separated by
/// the extractor); DOCX has no page concept and yields a single page of
/// paragraph-joined text.
pub fn extract_pages(bytes: &[u8], file_type: &str) -> Result<Vec<String>> {
    let pages = match file_type {
        "pdf" => extract_pdf_pages(bytes)?,
        "docx" => vec![extract_docx(bytes)?],
        "md" | "txt" => {
            let text = String::from_utf8(bytes.to_vec())
                .with_context(|| format!("{} file is not valid UTF-8", file_type))?;
            vec![text]
        }
        other => bail!("Unsupported document type: {}", other),
    };

    Ok(pages
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))?;
    // The extractor separates pages with form feeds; a PDF without them
    // is treated as a single page.
    Ok(text.split('\u{c}').map(|p| p.to_string()).collect())
}

/// Pull the paragraph text out of `word/document.xml`.
fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| anyhow::anyhow!("DOCX is not a readable archive: {}", e))?;

    let mut document_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| anyhow::anyhow!("DOCX has no word/document.xml"))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut document_xml)?;
        if document_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            bail!("word/document.xml exceeds size limit");
        }
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(document_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                // Paragraph ends become line breaks so the chunker still
                // sees paragraph boundaries.
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("DOCX XML parse error: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
