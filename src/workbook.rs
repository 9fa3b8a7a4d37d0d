//! Workbook parsing: xlsx bytes → ordered sheets of rows of optional cells.
//!
//! The ingestion engine needs positional access (sheet name, 0-based row and
//! column indices), so unlike plain text extraction this keeps the grid
//! structure: empty rows and skipped cells become `None` placeholders, and
//! each sheet records its widest row as `column_count` for the word-column
//! heuristic. A parsed [`Workbook`] is read-only; the engine never mutates it.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::error::VaultError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Workbook parse error. Never panics; callers surface it as a failed job.
#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to read workbook: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a valid xlsx archive: {0}")]
    Zip(String),
    #[error("malformed sheet XML: {0}")]
    Xml(String),
}

impl From<WorkbookError> for VaultError {
    fn from(err: WorkbookError) -> Self {
        VaultError::Workbook(err.to_string())
    }
}

/// One worksheet: its display name and the cell grid.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    /// Rows in document order. Trailing cells a row never mentions are absent;
    /// interior gaps are `None`.
    pub rows: Vec<Vec<Option<String>>>,
    /// Width of the widest row, used to pick the word column.
    pub column_count: usize,
}

/// An ordered collection of parsed sheets.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Reads and parses an xlsx file from disk.
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Parses an xlsx workbook from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorkbookError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| WorkbookError::Zip(e.to_string()))?;

        let shared_strings = read_shared_strings(&mut archive)?;
        let sheet_files = list_worksheet_files(&mut archive);
        let display_names = read_sheet_names(&mut archive)?;

        let mut sheets = Vec::with_capacity(sheet_files.len());
        for (idx, file_name) in sheet_files.iter().enumerate() {
            let xml = read_zip_entry_bounded(&mut archive, file_name, MAX_XML_ENTRY_BYTES)?;
            let (rows, column_count) = parse_sheet_rows(&xml, &shared_strings)?;
            // Pair workbook.xml names with worksheet files positionally; fall
            // back to the file-derived name when the counts disagree.
            let name = display_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| fallback_sheet_name(file_name));
            sheets.push(Sheet {
                name,
                rows,
                column_count,
            });
        }

        Ok(Workbook { sheets })
    }

    /// Total row count across all sheets, used as the progress denominator.
    pub fn total_rows(&self) -> u64 {
        self.sheets.iter().map(|s| s.rows.len() as u64).sum()
    }
}

fn fallback_sheet_name(file_name: &str) -> String {
    file_name
        .trim_start_matches("xl/worksheets/")
        .trim_end_matches(".xml")
        .to_string()
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| WorkbookError::Zip(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Zip(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(WorkbookError::Zip(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn list_worksheet_files(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Reads sheet display names in declaration order from `xl/workbook.xml`.
fn read_sheet_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, WorkbookError> {
    let xml = match read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES) {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(
                                String::from_utf8_lossy(attr.value.as_ref()).into_owned(),
                            );
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

/// Reads the shared-strings table. A workbook with no string cells has no
/// `sharedStrings.xml` at all; that is not an error.
fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, WorkbookError> {
    let xml = match read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES) {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                    current.clear();
                } else if in_si && e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = false;
                } else if e.local_name().as_ref() == b"si" {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Decodes the column letters of an `A1`-style cell reference to a 0-based index.
fn column_index_of(cell_ref: &str) -> Option<usize> {
    let mut col: usize = 0;
    let mut seen = false;
    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            col = col * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
            seen = true;
        } else {
            break;
        }
    }
    if seen {
        Some(col - 1)
    } else {
        None
    }
}

/// Cell value type, from the `t` attribute of a `<c>` element.
#[derive(Clone, Copy, PartialEq)]
enum CellType {
    SharedString,
    InlineString,
    Other,
}

fn parse_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<(Vec<Vec<Option<String>>>, usize), WorkbookError> {
    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut column_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut current_row: Vec<Option<String>> = Vec::new();
    let mut in_row = false;
    let mut cell_type = CellType::Other;
    let mut cell_col: Option<usize> = None;
    let mut in_value = false;
    let mut in_inline_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"row" => {
                        in_row = true;
                        current_row = Vec::new();
                        // Sheets may omit empty rows entirely; pad so row
                        // indices stay aligned with the source grid.
                        if let Some(declared) = attr_value(&e, b"r")
                            .and_then(|v| v.parse::<usize>().ok())
                            .map(|r| r.saturating_sub(1))
                        {
                            while rows.len() < declared {
                                rows.push(Vec::new());
                            }
                        }
                    }
                    b"c" if in_row => {
                        cell_type = match attr_value(&e, b"t").as_deref() {
                            Some("s") => CellType::SharedString,
                            Some("inlineStr") => CellType::InlineString,
                            _ => CellType::Other,
                        };
                        cell_col = attr_value(&e, b"r")
                            .as_deref()
                            .and_then(column_index_of)
                            .or(Some(current_row.len()));
                    }
                    b"v" if in_row => {
                        in_value = true;
                    }
                    b"t" if in_row && cell_type == CellType::InlineString => {
                        in_inline_t = true;
                    }
                    _ => {}
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_value || in_inline_t => {
                let raw = te.unescape().unwrap_or_default();
                let value = if in_value && cell_type == CellType::SharedString {
                    raw.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned()
                } else {
                    Some(raw.into_owned())
                };
                if let (Some(col), Some(value)) = (cell_col, value) {
                    while current_row.len() < col {
                        current_row.push(None);
                    }
                    if current_row.len() == col {
                        current_row.push(Some(value));
                    } else {
                        current_row[col] = Some(value);
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = false;
                    column_count = column_count.max(current_row.len());
                    rows.push(std::mem::take(&mut current_row));
                }
                b"c" => {
                    cell_type = CellType::Other;
                    cell_col = None;
                }
                b"v" => in_value = false,
                b"t" => in_inline_t = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok((rows, column_count))
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key {
            Some(String::from_utf8_lossy(a.value.as_ref()).into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_xlsx(sheets: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();

            let sheet_tags: String = sheets
                .iter()
                .enumerate()
                .map(|(i, (name, _))| {
                    format!(r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#, name, i + 1, i + 1)
                })
                .collect();
            zip.start_file("xl/workbook.xml", opts).unwrap();
            zip.write_all(
                format!(
                    r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
                    sheet_tags
                )
                .as_bytes(),
            )
            .unwrap();

            for (i, (_, body)) in sheets.iter().enumerate() {
                zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)
                    .unwrap();
                zip.write_all(
                    format!(
                        r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
                        body
                    )
                    .as_bytes(),
                )
                .unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn parses_inline_strings_with_positions() {
        let bytes = build_xlsx(&[(
            "Unit 1",
            r#"<row r="1"><c r="A1"><v>1</v></c><c r="B1" t="inlineStr"><is><t>apple</t></is></c><c r="C1" t="inlineStr"><is><t>/ap.l/</t></is></c></row>
               <row r="2"><c r="B2" t="inlineStr"><is><t>banana</t></is></c></row>"#,
        )]);
        let wb = Workbook::from_bytes(&bytes).unwrap();
        assert_eq!(wb.sheets.len(), 1);
        let sheet = &wb.sheets[0];
        assert_eq!(sheet.name, "Unit 1");
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.column_count, 3);
        assert_eq!(sheet.rows[0][1].as_deref(), Some("apple"));
        assert_eq!(sheet.rows[0][2].as_deref(), Some("/ap.l/"));
        // Row 2 mentions only column B; column A is a gap.
        assert_eq!(sheet.rows[1][0], None);
        assert_eq!(sheet.rows[1][1].as_deref(), Some("banana"));
    }

    #[test]
    fn resolves_shared_strings() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("xl/sharedStrings.xml", opts).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><sst><si><t>hello</t></si><si><t>world</t></si></sst>"#).unwrap();
            zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><worksheet><sheetData><row r="1"><c r="A1" t="s"><v>1</v></c></row></sheetData></worksheet>"#).unwrap();
            zip.finish().unwrap();
        }
        let wb = Workbook::from_bytes(&buf).unwrap();
        assert_eq!(wb.sheets[0].rows[0][0].as_deref(), Some("world"));
        // No workbook.xml: the file-derived name is used.
        assert_eq!(wb.sheets[0].name, "sheet1");
    }

    #[test]
    fn pads_omitted_rows() {
        let bytes = build_xlsx(&[(
            "S",
            r#"<row r="3"><c r="A3" t="inlineStr"><is><t>late</t></is></c></row>"#,
        )]);
        let wb = Workbook::from_bytes(&bytes).unwrap();
        assert_eq!(wb.sheets[0].rows.len(), 3);
        assert!(wb.sheets[0].rows[0].is_empty());
        assert_eq!(wb.sheets[0].rows[2][0].as_deref(), Some("late"));
    }

    #[test]
    fn total_rows_sums_all_sheets() {
        let bytes = build_xlsx(&[
            ("A", r#"<row r="1"><c r="A1"><v>1</v></c></row><row r="2"><c r="A2"><v>2</v></c></row>"#),
            ("B", r#"<row r="1"><c r="A1"><v>3</v></c></row>"#),
        ]);
        let wb = Workbook::from_bytes(&bytes).unwrap();
        assert_eq!(wb.total_rows(), 3);
    }

    #[test]
    fn invalid_zip_is_an_error_not_a_panic() {
        let err = Workbook::from_bytes(b"not a zip").unwrap_err();
        assert!(matches!(err, WorkbookError::Zip(_)));
    }

    #[test]
    fn column_refs_decode() {
        assert_eq!(column_index_of("A1"), Some(0));
        assert_eq!(column_index_of("B12"), Some(1));
        assert_eq!(column_index_of("AA3"), Some(26));
        assert_eq!(column_index_of("7"), None);
    }
}
