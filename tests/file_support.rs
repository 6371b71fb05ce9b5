//! Loading of the binary formats: PDF, EPUB and XLSX.
//!
//! Fixtures are built in the test: a hand-assembled PDF with correct xref
//! offsets and ZIP containers written with `zip::ZipWriter`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use insight_harness::config::{ChunkingConfig, RetrievalConfig};
use insight_harness::embedding::HashEmbedder;
use insight_harness::error::AnalysisError;
use insight_harness::extract::load_document;
use insight_harness::generation::DisabledGenerator;
use insight_harness::index::IndexBuilder;
use insight_harness::models::DataSource;
use insight_harness::profile::profile;
use insight_harness::rag::RagAnswerer;
use insight_harness::table::load_table;
use tempfile::TempDir;

/// Minimal single-page PDF showing `phrase` in Helvetica.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn minimal_epub() -> Vec<u8> {
    zip_of(&[
        ("mimetype", "application/epub+zip"),
        (
            "META-INF/container.xml",
            r#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
        ),
        (
            "OEBPS/content.opf",
            r#"<?xml version="1.0"?><package xmlns="http://www.idpf.org/2007/opf" version="3.0"><manifest><item id="c2" href="ch2.xhtml" media-type="application/xhtml+xml"/><item id="c1" href="ch1.xhtml" media-type="application/xhtml+xml"/></manifest><spine><itemref idref="c1"/><itemref idref="c2"/></spine></package>"#,
        ),
        (
            "OEBPS/ch1.xhtml",
            "<html><body><h1>Chapter One</h1><p>Lighthouses guide ships.</p></body></html>",
        ),
        (
            "OEBPS/ch2.xhtml",
            "<html><body><p>Tides follow the moon.</p></body></html>",
        ),
    ])
}

fn minimal_xlsx() -> Vec<u8> {
    zip_of(&[
        (
            "xl/sharedStrings.xml",
            r#"<sst><si><t>region</t></si><si><t>revenue</t></si><si><t>north</t></si></sst>"#,
        ),
        (
            "xl/worksheets/sheet1.xml",
            r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>100</v></c></row>
<row r="3"><c r="A3" t="inlineStr"><is><t>south</t></is></c><c r="B3"><v>250.5</v></c></row>
<row r="4"><c r="B4"><v>49.5</v></c></row>
</sheetData></worksheet>"#,
        ),
        (
            "xl/worksheets/sheet2.xml",
            r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>other</t></is></c></row></sheetData></worksheet>"#,
        ),
    ])
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn pdf_pages_are_numbered_from_zero() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "report.pdf", &minimal_pdf("quarterly results phrase"));
    let pages = load_document(&path).unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].page, Some(0));
    assert!(pages[0].text.contains("quarterly results phrase"));
}

#[test]
fn corrupt_pdf_is_data_format_error() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "broken.pdf", b"not a pdf");
    assert!(matches!(
        load_document(&path),
        Err(AnalysisError::DataFormat(_))
    ));
}

#[test]
fn epub_sections_follow_spine_order() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "book.epub", &minimal_epub());
    let sections = load_document(&path).unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].text, "Chapter One\n\nLighthouses guide ships.");
    assert_eq!(sections[1].text, "Tides follow the moon.");
    assert!(sections.iter().all(|s| s.page.is_none()));
}

#[test]
fn xlsx_reads_first_sheet_with_shared_and_inline_strings() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "sales.xlsx", &minimal_xlsx());
    let table = load_table(&path).unwrap();
    assert_eq!(table.columns, vec!["region", "revenue"]);
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.rows[1], vec!["south", "250.5"]);
    assert_eq!(table.rows[2], vec!["", "49.5"]);

    let schema = profile(&table);
    let revenue = schema.numeric_column("revenue").unwrap();
    assert!((revenue.sum - 400.0).abs() < 1e-9);
}

#[test]
fn legacy_xls_is_rejected_with_format_error() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "old.xls", b"\xd0\xcf\x11\xe0binary");
    match load_table(&path) {
        Err(AnalysisError::DataFormat(msg)) => assert!(msg.contains(".xlsx")),
        other => panic!("expected data format error, got {:?}", other.map(|t| t.columns)),
    }
}

#[tokio::test]
async fn pdf_answer_cites_page_when_generation_is_down() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "report.pdf", &minimal_pdf("quarterly results phrase"));
    let source = DataSource::from_path(&path, "tester").unwrap();

    let embedder = Arc::new(HashEmbedder::new(64));
    let builder = Arc::new(IndexBuilder::new(
        &tmp.path().join("vector_store"),
        &ChunkingConfig::default(),
        &RetrievalConfig::default(),
        embedder.clone(),
    ));
    let rag = RagAnswerer::new(builder, embedder, Arc::new(DisabledGenerator), 5);

    let result = rag.answer(&source, "What are the results?").await.unwrap();
    assert!(result.answer_text.contains("quarterly results phrase"));
    assert!(result.answer_text.ends_with("- Page 0 (report.pdf)"));
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].page, Some(0));
}
