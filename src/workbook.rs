//! In-memory workbook representation and cell coercion.
//!
//! Uploaded `.xlsx` bytes are decoded with `calamine` into plain [`Sheet`]s of
//! [`CellValue`]s. The validator and loader only ever see this representation,
//! so they can be exercised without building real Excel files.

use calamine::{Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use std::io::Cursor;

use crate::error::SchemaError;

/// Fractional digits kept for every amount (kopecks)
pub const MONEY_SCALE: u32 = 2;

/// Excel serial day 0 (the 1900 date system, with the Lotus leap-year bug folded in)
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// A single decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Excel serial date/time (days since 1899-12-30)
    DateTime(f64),
    /// Excel error value such as `#DIV/0!`
    Error(String),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Human readable rendition used in row error messages
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(serial) => serial_to_date(*serial)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| serial.to_string()),
            CellValue::Error(e) => e.clone(),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(f) => CellValue::Float(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => CellValue::Error(e.to_string()),
        }
    }
}

/// One named sheet: all rows in order, the first row being the header
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<CellValue>>,
    /// Zero-based spreadsheet row of `rows[0]`
    pub first_row: usize,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            rows,
            first_row: 0,
        }
    }

    /// Same sheet, with `rows[0]` sitting at zero-based spreadsheet row `first_row`
    pub fn starting_at(mut self, first_row: usize) -> Self {
        self.first_row = first_row;
        self
    }

    /// Header labels, trimmed; non-text header cells are rendered as text
    pub fn header(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.iter().map(|c| c.display()).collect())
            .unwrap_or_default()
    }

    /// Data rows paired with their 1-based spreadsheet row number
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[CellValue])> {
        let offset = self.first_row;
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(move |(idx, row)| (offset + idx + 1, row.as_slice()))
    }
}

/// A decoded workbook: sheets in file order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Decode `.xlsx` bytes.
    ///
    /// Any decoding failure is returned as [`SchemaError::Unreadable`] so the
    /// caller can report it alongside ordinary schema problems.
    pub fn from_xlsx_bytes(bytes: &[u8]) -> Result<Self, SchemaError> {
        let mut workbook: Xlsx<_> =
            Xlsx::new(Cursor::new(bytes.to_vec())).map_err(|e| SchemaError::Unreadable {
                reason: e.to_string(),
            })?;

        let sheet_names = workbook.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(sheet_names.len());

        for name in sheet_names {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| SchemaError::Unreadable {
                    reason: format!("{}: {}", name, e),
                })?;

            // calamine trims the range to the used area. Rows that start after
            // column A are padded so column positions stay absolute; the first
            // used row is remembered so row numbers match Excel.
            let (first_row, first_col) = range
                .start()
                .map(|(r, c)| (r as usize, c as usize))
                .unwrap_or((0, 0));

            let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(range.height());
            for row in range.rows() {
                let mut cells = Vec::with_capacity(row.len() + first_col);
                cells.extend(std::iter::repeat(CellValue::Empty).take(first_col));
                cells.extend(row.iter().map(CellValue::from));
                rows.push(cells);
            }

            sheets.push(Sheet::new(name, rows).starting_at(first_row));
        }

        Ok(Workbook { sheets })
    }
}

/// Convert an Excel serial number to a calendar date, dropping the time part
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    let base = NaiveDate::from_ymd_opt(y, m, d)?;
    base.checked_add_signed(Duration::days(serial.floor() as i64))
}

/// Excel serial number for a date (inverse of [`serial_to_date`])
pub fn date_to_serial(date: NaiveDate) -> f64 {
    let (y, m, d) = EXCEL_EPOCH;
    let base = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(date);
    (date - base).num_days() as f64
}

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Read a cell as a calendar date.
///
/// Accepts Excel date cells, bare serial numbers and the text formats in
/// `DATE_FORMATS`; any time component is discarded.
pub fn coerce_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::DateTime(serial) | CellValue::Float(serial) => serial_to_date(*serial),
        CellValue::Int(i) => serial_to_date(*i as f64),
        CellValue::Text(s) => parse_date_text(s),
        _ => None,
    }
}

/// Read a cell as a whole number. Floats are accepted only without a fraction.
pub fn coerce_integer(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Int(i) => Some(*i),
        CellValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
        CellValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a cell as a fixed-point amount rounded to [`MONEY_SCALE`] digits.
///
/// Floats go through their shortest round-trip text so `0.1` becomes exactly
/// `0.10` instead of the nearest binary fraction.
pub fn coerce_decimal(cell: &CellValue) -> Option<Decimal> {
    let parsed = match cell {
        CellValue::Int(i) => Some(Decimal::from(*i)),
        CellValue::Float(f) if f.is_finite() => parse_decimal_text(&f.to_string()),
        CellValue::Text(s) => parse_decimal_text(s),
        _ => None,
    }?;
    Some(parsed.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

fn parse_decimal_text(s: &str) -> Option<Decimal> {
    let mut cleaned: String = s
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{A0}' && *c != '\u{202F}')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if !cleaned.contains('.') {
        cleaned = cleaned.replace(',', ".");
    } else {
        cleaned = cleaned.replace(',', "");
    }
    cleaned
        .parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&cleaned).ok())
}

/// Read a cell as trimmed text. Blank cells yield `None`.
pub fn coerce_text(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Empty | CellValue::Error(_) => None,
        other => {
            let text = other.display();
            if text.is_empty() { None } else { Some(text) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn dates_from_serial_and_text() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let serial = date_to_serial(expected);
        assert_eq!(coerce_date(&CellValue::DateTime(serial + 0.75)), Some(expected));
        assert_eq!(coerce_date(&CellValue::Float(serial)), Some(expected));
        assert_eq!(coerce_date(&CellValue::Text("2024-01-05".into())), Some(expected));
        assert_eq!(coerce_date(&CellValue::Text("05.01.2024".into())), Some(expected));
        assert_eq!(
            coerce_date(&CellValue::Text("2024-01-05T13:45:00".into())),
            Some(expected)
        );
        assert_eq!(coerce_date(&CellValue::Text("вчера".into())), None);
        assert_eq!(coerce_date(&CellValue::Bool(true)), None);
    }

    #[test]
    fn serial_45292_is_new_year_2024() {
        assert_eq!(
            serial_to_date(45292.0),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
    }

    #[test]
    fn integers_reject_fractions() {
        assert_eq!(coerce_integer(&CellValue::Float(7.0)), Some(7));
        assert_eq!(coerce_integer(&CellValue::Float(7.5)), None);
        assert_eq!(coerce_integer(&CellValue::Text(" 12 ".into())), Some(12));
        assert_eq!(coerce_integer(&CellValue::Text("twelve".into())), None);
    }

    #[test]
    fn decimals_keep_exact_cents() {
        assert_eq!(coerce_decimal(&CellValue::Float(0.1)), Some(dec("0.10")));
        assert_eq!(
            coerce_decimal(&CellValue::Float(0.1 + 0.2)),
            Some(dec("0.30"))
        );
        assert_eq!(coerce_decimal(&CellValue::Int(500)), Some(dec("500")));
        assert_eq!(
            coerce_decimal(&CellValue::Text("1 234,56".into())),
            Some(dec("1234.56"))
        );
        assert_eq!(
            coerce_decimal(&CellValue::Text("1,234.56".into())),
            Some(dec("1234.56"))
        );
        assert_eq!(coerce_decimal(&CellValue::Text("abc".into())), None);
        assert_eq!(coerce_decimal(&CellValue::Empty), None);
    }

    #[test]
    fn text_is_trimmed_and_numbers_rendered() {
        assert_eq!(coerce_text(&CellValue::Text("  Еда ".into())), Some("Еда".into()));
        assert_eq!(coerce_text(&CellValue::Int(42)), Some("42".into()));
        assert_eq!(coerce_text(&CellValue::Text("   ".into())), None);
        assert_eq!(coerce_text(&CellValue::Empty), None);
    }

    #[test]
    fn data_rows_are_numbered_like_excel() {
        let sheet = Sheet::new(
            "Budget Table",
            vec![
                vec![CellValue::Text("Category".into())],
                vec![CellValue::Text("Food".into())],
            ],
        );
        let rows: Vec<_> = sheet.data_rows().map(|(n, _)| n).collect();
        assert_eq!(rows, vec![2]);
    }

    #[test]
    fn data_rows_follow_the_used_range_offset() {
        let sheet = Sheet::new(
            "Budget Table",
            vec![
                vec![CellValue::Text("Category".into())],
                vec![CellValue::Text("Food".into())],
                vec![CellValue::Text("Rent".into())],
            ],
        )
        .starting_at(1);
        let rows: Vec<_> = sheet.data_rows().map(|(n, _)| n).collect();
        assert_eq!(rows, vec![3, 4]);
    }
}
