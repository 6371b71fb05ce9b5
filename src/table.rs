//! In-memory tabular datasets and their loaders.
//!
//! A [`Table`] keeps every cell as the raw string read from the file; typing
//! happens in the profiler. Loaders fail with [`AnalysisError::DataFormat`] on
//! anything they cannot parse completely. There is no partial recovery.
//!
//! | Extension | Loader |
//! |-----------|--------|
//! | `.csv` | `csv` crate, header row required, rows must be rectangular |
//! | `.xlsx` | first worksheet, read with `zip` + `quick-xml` |
//! | `.xls` | rejected (legacy BIFF workbooks are not readable) |

use quick_xml::events::Event;
use std::path::Path;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::extract::{read_zip_entry, try_read_zip_entry};

/// Values treated as missing, matching the usual dataframe defaults.
const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "-"];

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Builds a table, rejecting rows whose width differs from the header.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if columns.is_empty() {
            return Err(AnalysisError::format("table has no columns"));
        }
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(AnalysisError::format(format!(
                "row {} has {} fields, expected {}",
                i + 1,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Resolves a column by exact name, then case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
            })
    }

    pub fn cells(&self, col: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |r| r[col].as_str())
    }

    /// Non-missing numeric values of a column in row order.
    pub fn numeric_values(&self, col: usize) -> Vec<f64> {
        self.cells(col).filter_map(parse_number).collect()
    }
}

pub fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell.trim())
}

/// Parses a finite number, treating missing markers as absent.
pub fn parse_number(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return None;
    }
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Loads a tabular file, dispatching on its extension.
pub fn load_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let table = match ext.as_str() {
        "csv" => parse_csv(&std::fs::read(path)?)?,
        "xlsx" => parse_xlsx(&std::fs::read(path)?)?,
        "xls" => {
            return Err(AnalysisError::format(
                "legacy .xls workbooks are not supported; re-save the file as .xlsx",
            ))
        }
        other => {
            return Err(AnalysisError::format(format!(
                "'.{}' is not a tabular format",
                other
            )))
        }
    };

    debug!(
        path = %path.display(),
        rows = table.row_count(),
        columns = table.column_count(),
        "table loaded"
    );
    Ok(table)
}

pub fn parse_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| AnalysisError::format(format!("unreadable CSV header: {}", e)))?;
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AnalysisError::format("CSV has no header row"));
    }
    let columns = name_columns(headers.iter().map(|h| h.trim().to_string()).collect());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AnalysisError::format(format!("malformed CSV: {}", e)))?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }

    Table::new(columns, rows)
}

pub fn parse_xlsx(bytes: &[u8]) -> Result<Table> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| AnalysisError::format(format!("not an xlsx archive: {}", e)))?;

    let shared = match try_read_zip_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => read_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheets.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let first = sheets
        .first()
        .ok_or_else(|| AnalysisError::format("xlsx workbook has no worksheets"))?
        .clone();

    let xml = read_zip_entry(&mut archive, &first)?;
    let mut grid = read_sheet_rows(&xml, &shared)?;
    if grid.is_empty() {
        return Err(AnalysisError::format("worksheet is empty"));
    }

    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in grid.iter_mut() {
        row.resize(width, String::new());
    }
    let header = grid.remove(0);
    if header.iter().all(|h| h.trim().is_empty()) {
        return Err(AnalysisError::format("worksheet has no header row"));
    }

    Table::new(name_columns(header), grid)
}

/// Fills blank header cells with positional names.
fn name_columns(header: Vec<String>) -> Vec<String> {
    header
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim().to_string();
            if h.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                h
            }
        })
        .collect()
}

fn xml_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::format(format!("xlsx XML error: {}", e))
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(xml_err)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy)]
enum CellType {
    Number,
    Shared,
    Inline,
    Bool,
}

/// Columns a worksheet can have (`XFD`).
const MAX_XLSX_COLUMNS: usize = 16_384;

/// Zero-based column from an A1-style reference (`"AB12"` → 27).
///
/// `Ok(None)` when the reference has no column letters; an error when the
/// column lies beyond `XFD`.
fn column_from_ref(r: &str) -> Result<Option<usize>> {
    let letters: Vec<u8> = r
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    let out_of_range =
        || AnalysisError::format(format!("xlsx cell reference '{}' is out of range", r));
    let mut n = 0usize;
    for b in letters {
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add((b - b'A' + 1) as usize))
            .filter(|&n| n <= MAX_XLSX_COLUMNS)
            .ok_or_else(out_of_range)?;
    }
    Ok(Some(n - 1))
}

fn read_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<String>>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell_col = 0usize;
    let mut cell_type = CellType::Number;
    let mut cell_text = String::new();
    let mut in_cell = false;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    in_cell = true;
                    cell_text.clear();
                    let next = row.as_ref().map(|r| r.len()).unwrap_or(0);
                    let reference = e
                        .try_get_attribute("r")
                        .ok()
                        .flatten()
                        .map(|a| a.value.into_owned());
                    cell_col = match reference.as_deref().and_then(|v| std::str::from_utf8(v).ok()) {
                        Some(r) => column_from_ref(r)?.unwrap_or(next),
                        None => next,
                    };
                    if cell_col >= MAX_XLSX_COLUMNS {
                        return Err(AnalysisError::format("xlsx row has too many cells"));
                    }
                    cell_type = match e
                        .try_get_attribute("t")
                        .ok()
                        .flatten()
                        .map(|a| a.value.into_owned())
                        .as_deref()
                    {
                        Some(b"s") => CellType::Shared,
                        Some(b"inlineStr") | Some(b"str") => CellType::Inline,
                        Some(b"b") => CellType::Bool,
                        _ => CellType::Number,
                    };
                }
                b"v" | b"t" if in_cell => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"row" {
                    rows.push(Vec::new());
                }
            }
            Ok(Event::Text(te)) if in_value => {
                cell_text.push_str(&te.unescape().map_err(xml_err)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    in_cell = false;
                    let value = resolve_cell(cell_type, cell_text.trim(), shared)?;
                    if let Some(r) = row.as_mut() {
                        if r.len() <= cell_col {
                            r.resize(cell_col + 1, String::new());
                        }
                        r[cell_col] = value;
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    while rows.last().map(|r| r.iter().all(|c| c.is_empty())) == Some(true) {
        rows.pop();
    }
    Ok(rows)
}

fn resolve_cell(cell_type: CellType, raw: &str, shared: &[String]) -> Result<String> {
    Ok(match cell_type {
        CellType::Shared => {
            if raw.is_empty() {
                return Ok(String::new());
            }
            let idx: usize = raw
                .parse()
                .map_err(|_| AnalysisError::format(format!("bad shared string index '{}'", raw)))?;
            shared
                .get(idx)
                .cloned()
                .ok_or_else(|| AnalysisError::format(format!("shared string {} missing", idx)))?
        }
        CellType::Bool => match raw {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        CellType::Inline | CellType::Number => raw.to_string(),
    })
}
