//! Page-aware text extraction for document sources (PDF, plain text, EPUB).
//!
//! Returns plain UTF-8 text per page. Paginated formats carry zero-based page
//! numbers; the others produce a single unnumbered page (plain text) or one
//! unnumbered section per spine item (EPUB).

use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::{AnalysisError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Text of one page (or section) of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub text: String,
    pub page: Option<u32>,
}

/// Loads a document and fails fast when no text can be extracted.
pub fn load_document(path: &Path) -> Result<Vec<PageText>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let bytes = std::fs::read(path)?;

    let pages = match ext.as_str() {
        "pdf" => extract_pdf_pages(&bytes)?,
        "txt" => vec![PageText {
            text: decode_utf8(&bytes)?,
            page: None,
        }],
        "epub" => extract_epub_sections(&bytes)?,
        other => {
            return Err(AnalysisError::format(format!(
                "'.{}' is not a document format",
                other
            )))
        }
    };

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(AnalysisError::format(format!(
            "{} contains no extractable text",
            path.display()
        )));
    }
    Ok(pages)
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| AnalysisError::format(format!("text is not valid UTF-8: {}", e)))
}

pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| AnalysisError::format(format!("PDF extraction failed: {}", e)))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            text,
            page: Some(i as u32),
        })
        .collect())
}

pub(crate) type ZipReader<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Reads a ZIP entry, bounded by [`MAX_ZIP_ENTRY_BYTES`].
pub(crate) fn read_zip_entry(archive: &mut ZipReader<'_>, name: &str) -> Result<Vec<u8>> {
    try_read_zip_entry(archive, name)?
        .ok_or_else(|| AnalysisError::format(format!("{} not found in archive", name)))
}

/// Like [`read_zip_entry`] but an absent entry is `Ok(None)`.
pub(crate) fn try_read_zip_entry(
    archive: &mut ZipReader<'_>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(AnalysisError::format(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| AnalysisError::format(e.to_string()))?;
    if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
        return Err(AnalysisError::format(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_ZIP_ENTRY_BYTES
        )));
    }
    Ok(Some(out))
}

fn epub_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::format(format!("EPUB extraction failed: {}", e))
}

pub fn extract_epub_sections(bytes: &[u8]) -> Result<Vec<PageText>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(epub_err)?;

    let container = read_zip_entry(&mut archive, "META-INF/container.xml")?;
    let opf_path = find_attribute(&container, b"rootfile", "full-path")?
        .ok_or_else(|| epub_err("container.xml has no rootfile"))?;
    let opf = read_zip_entry(&mut archive, &opf_path)?;
    let base = match opf_path.rfind('/') {
        Some(pos) => opf_path[..=pos].to_string(),
        None => String::new(),
    };

    let (manifest, spine) = read_package(&opf)?;
    let mut sections = Vec::new();
    for idref in spine {
        let Some(href) = manifest.get(&idref) else {
            continue;
        };
        let full = format!("{}{}", base, href);
        let xhtml = read_zip_entry(&mut archive, &full)?;
        let text = xhtml_to_text(&xhtml)?;
        if !text.trim().is_empty() {
            sections.push(PageText { text, page: None });
        }
    }
    Ok(sections)
}

/// First value of `attr` on any element named `element`.
fn find_attribute(xml: &[u8], element: &[u8], attr: &str) -> Result<Option<String>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == element => {
                if let Some(a) = e.try_get_attribute(attr).map_err(epub_err)? {
                    return Ok(Some(a.unescape_value().map_err(epub_err)?.into_owned()));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(epub_err(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Manifest (`id` → `href`) and spine order from an OPF package document.
fn read_package(opf: &[u8]) -> Result<(HashMap<String, String>, Vec<String>)> {
    let mut reader = quick_xml::Reader::from_reader(opf);
    let mut buf = Vec::new();
    let mut manifest = HashMap::new();
    let mut spine = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    let id = e.try_get_attribute("id").map_err(epub_err)?;
                    let href = e.try_get_attribute("href").map_err(epub_err)?;
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(
                            id.unescape_value().map_err(epub_err)?.into_owned(),
                            href.unescape_value().map_err(epub_err)?.into_owned(),
                        );
                    }
                }
                b"itemref" => {
                    if let Some(idref) = e.try_get_attribute("idref").map_err(epub_err)? {
                        spine.push(idref.unescape_value().map_err(epub_err)?.into_owned());
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(epub_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok((manifest, spine))
}

const BLOCK_ELEMENTS: &[&[u8]] = &[
    b"p", b"div", b"br", b"li", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"tr", b"section",
];

fn xhtml_to_text(xml: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth += 1;
                }
            }
            Ok(Event::Empty(e)) => {
                if BLOCK_ELEMENTS.contains(&e.local_name().as_ref()) {
                    out.push('\n');
                }
            }
            Ok(Event::Text(te)) if skip_depth == 0 => {
                let text = te
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&te).into_owned());
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if BLOCK_ELEMENTS.contains(&name.as_ref()) {
                    out.push_str("\n\n");
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(epub_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(collapse_blank_lines(&out))
}

fn collapse_blank_lines(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, AnalysisError::DataFormat(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_epub() {
        let err = extract_epub_sections(b"not a zip").unwrap_err();
        assert!(matches!(err, AnalysisError::DataFormat(_)));
    }

    #[test]
    fn xhtml_paragraphs_become_blank_line_separated() {
        let xml = b"<html><head><style>p{}</style></head><body><h1>Title</h1><p>One &amp; two.</p><p>Three.</p></body></html>";
        let text = xhtml_to_text(xml).unwrap();
        assert_eq!(text, "Title\n\nOne & two.\n\nThree.");
    }

    #[test]
    fn empty_text_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n\n ").unwrap();
        assert!(matches!(
            load_document(&path).unwrap_err(),
            AnalysisError::DataFormat(_)
        ));
    }

    #[test]
    fn text_file_is_single_unnumbered_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "\u{feff}hello world").unwrap();
        let pages = load_document(&path).unwrap();
        assert_eq!(
            pages,
            vec![PageText {
                text: "hello world".into(),
                page: None
            }]
        );
    }
}
