use chrono::NaiveDate;
use itertools::Itertools;
use log::info;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::mem::take;
use std::path::{Path, PathBuf};

use crate::error::ExportError;
use crate::logic::dates::parse_canonical;
use crate::model::{is_placeholder, CanonicalRecord, InstrumentField, PersistedInstrument};

pub const GENERAL_SHEET: &str = "Instruments.csv";
pub const DEFAULT_WARNING_DAYS: i64 = 30;

/// Sheet columns, in export order.
pub const EXPORT_COLUMNS: [(&str, InstrumentField); 14] = [
    ("Group", InstrumentField::GroupCode),
    ("Test", InstrumentField::TestCode),
    ("Instrument", InstrumentField::Name),
    ("Type", InstrumentField::Type),
    ("Brand", InstrumentField::Brand),
    ("Model", InstrumentField::Model),
    ("Serial Number", InstrumentField::SerialNumber),
    ("Location", InstrumentField::Location),
    ("Range", InstrumentField::MeasurementRange),
    ("Unit", InstrumentField::Unit),
    ("Class", InstrumentField::Class),
    ("Status", InstrumentField::Status),
    ("Certificate", InstrumentField::CertificateId),
    ("Certificate Expiry", InstrumentField::CertificateExpiry),
];

pub const STATUS_MARKER_COLUMN: &str = "Status Marker";
pub const EXPIRY_MARKER_COLUMN: &str = "Expiry Marker";

/// Conditional-status semantics a spreadsheet renderer turns into colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Positive,
    Warning,
    Negative,
    None,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Positive => "positive",
            Marker::Warning => "warning",
            Marker::Negative => "negative",
            Marker::None => "",
        }
    }
}

pub fn status_marker(status: &str) -> Marker {
    match status.trim().to_uppercase().as_str() {
        "ATIVO" => Marker::Positive,
        "BLOQUEADO" => Marker::Negative,
        _ => Marker::None,
    }
}

/// Past or missing expiry is negative; expiring within `warning_days` is a warning.
pub fn expiry_marker(expiry: &str, today: NaiveDate, warning_days: i64) -> Marker {
    if is_placeholder(expiry) {
        return Marker::Negative;
    }
    let Some(date) = parse_canonical(expiry) else {
        return Marker::Negative;
    };
    let remaining = (date - today).num_days();
    if remaining < 0 {
        Marker::Negative
    } else if remaining <= warning_days {
        Marker::Warning
    } else {
        Marker::None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub today: NaiveDate,
    pub warning_days: i64,
}

impl ExportOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            warning_days: DEFAULT_WARNING_DAYS,
        }
    }
}

fn header_row() -> Vec<String> {
    EXPORT_COLUMNS
        .iter()
        .map(|(header, _)| header.to_string())
        .chain([STATUS_MARKER_COLUMN.to_string(), EXPIRY_MARKER_COLUMN.to_string()])
        .collect()
}

fn sheet_row(record: &CanonicalRecord, options: &ExportOptions) -> Vec<String> {
    let status = status_marker(&record.status);
    let expiry = expiry_marker(&record.certificate_expiry, options.today, options.warning_days);
    EXPORT_COLUMNS
        .iter()
        .map(|(_, field)| record.get(*field).to_string())
        .chain([status.as_str().to_string(), expiry.as_str().to_string()])
        .collect()
}

/// Writes one sheet, header first, rows ordered by group, test and name.
pub fn write_sheet<'a, W, I>(mut w: W, records: I, options: &ExportOptions) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    write_row(&mut w, &header_row())?;
    let ordered = records
        .into_iter()
        .sorted_by(|a, b| {
            (&a.group_code, &a.test_code, &a.name).cmp(&(&b.group_code, &b.test_code, &b.name))
        });
    for record in ordered {
        write_row(&mut w, &sheet_row(record, options))?;
    }
    w.flush()
}

/// Writes the general sheet plus one sheet per known (group, test) pair.
/// Returns the paths written, general sheet first.
pub fn export_catalog(
    dir: &Path,
    instruments: &[PersistedInstrument],
    options: &ExportOptions,
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let general = dir.join(GENERAL_SHEET);
    write_file(&general, instruments.iter().map(|i| &i.record), options)?;
    written.push(general);

    let by_test = instruments
        .iter()
        .map(|i| &i.record)
        .filter(|r| !is_placeholder(&r.group_code) && !is_placeholder(&r.test_code))
        .into_group_map_by(|r| (r.group_code.clone(), r.test_code.clone()));

    for ((group, test), records) in by_test.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        let path = dir.join(test_sheet_name(&group, &test));
        write_file(&path, records, options)?;
        written.push(path);
    }

    info!("Exported {} instruments to {} sheets in {}", instruments.len(), written.len(), dir.display());
    Ok(written)
}

/// Instruments of one group and test; an empty selection is an error.
pub fn select_test<'a>(
    instruments: &'a [PersistedInstrument],
    group: &str,
    test: &str,
) -> Result<Vec<&'a PersistedInstrument>, ExportError> {
    let selected: Vec<_> = instruments
        .iter()
        .filter(|i| i.record.group_code == group && i.record.test_code == test)
        .collect();
    if selected.is_empty() {
        return Err(ExportError::EmptySelection {
            group: group.to_string(),
            test: test.to_string(),
        });
    }
    Ok(selected)
}

/// Writes the sheet of a single (group, test) pair.
pub fn export_test(
    dir: &Path,
    instruments: &[PersistedInstrument],
    group: &str,
    test: &str,
    options: &ExportOptions,
) -> Result<PathBuf, ExportError> {
    let selected = select_test(instruments, group, test)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(test_sheet_name(group, test));
    write_file(&path, selected.into_iter().map(|i| &i.record), options)?;
    info!("Exported test sheet {}", path.display());
    Ok(path)
}

pub fn test_sheet_name(group: &str, test: &str) -> String {
    format!("[{}] {} - {}", file_safe(group), file_safe(test), GENERAL_SHEET)
}

fn file_safe(text: &str) -> String {
    text.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect()
}

fn write_file<'a, I>(path: &Path, records: I, options: &ExportOptions) -> Result<(), ExportError>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let file = File::create(path)?;
    write_sheet(BufWriter::new(file), records, options)?;
    Ok(())
}

/// Reads a sheet written by [`write_sheet`] back into canonical records.
///
/// Every export column must be present in the header; marker columns and
/// unknown columns are ignored.
pub fn read_sheet(text: &str) -> Result<Vec<CanonicalRecord>, ExportError> {
    let mut rows = parse_rows(text).into_iter();
    let Some(header) = rows.next() else {
        return Err(ExportError::MissingColumns(
            EXPORT_COLUMNS.iter().map(|(h, _)| h.to_string()).collect(),
        ));
    };

    let missing: Vec<String> = EXPORT_COLUMNS
        .iter()
        .filter(|(h, _)| !header.iter().any(|cell| cell.trim() == *h))
        .map(|(h, _)| h.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ExportError::MissingColumns(missing));
    }

    let positions: Vec<(usize, InstrumentField)> = EXPORT_COLUMNS
        .iter()
        .filter_map(|(h, field)| {
            header
                .iter()
                .position(|cell| cell.trim() == *h)
                .map(|pos| (pos, *field))
        })
        .collect();

    Ok(rows
        .map(|row| {
            let mut record = CanonicalRecord::default();
            for (pos, field) in &positions {
                if let Some(value) = row.get(*pos) {
                    record.set(*field, value);
                }
            }
            record
        })
        .collect())
}

/* ---------------- CSV ---------------- */

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[String]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}

/// Quote- and CRLF-tolerant CSV reader. Blank lines are skipped.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}
