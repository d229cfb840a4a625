//! Workbook schema and the validator that enforces it.
//!
//! The workbook must contain four sheets, each with a fixed set of columns.
//! Validation never stops at the first problem: every missing sheet, missing
//! column and mistyped column is collected so the user sees the whole list in
//! one pass.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::error::SchemaError;
use crate::workbook::{
    CellValue, Sheet, Workbook, coerce_date, coerce_decimal, coerce_integer, coerce_text,
};

/// The four sheets every upload must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SheetKind {
    NetWorth,
    Income,
    Expenses,
    Budget,
}

impl SheetKind {
    pub const ALL: [SheetKind; 4] = [
        SheetKind::NetWorth,
        SheetKind::Income,
        SheetKind::Expenses,
        SheetKind::Budget,
    ];

    /// Exact sheet name expected in the workbook
    pub fn sheet_name(&self) -> &'static str {
        match self {
            SheetKind::NetWorth => "Net Worth Table",
            SheetKind::Income => "Income Table",
            SheetKind::Expenses => "Expenses Table",
            SheetKind::Budget => "Budget Table",
        }
    }

    /// Russian caption shown next to the sheet name in the UI
    pub fn caption(&self) -> &'static str {
        match self {
            SheetKind::NetWorth => "Чистая стоимость",
            SheetKind::Income => "Доходы",
            SheetKind::Expenses => "Расходы",
            SheetKind::Budget => "Бюджет",
        }
    }

    pub fn columns(&self) -> &'static [ColumnSpec] {
        match self {
            SheetKind::NetWorth => &NET_WORTH_COLUMNS,
            SheetKind::Income => &INCOME_COLUMNS,
            SheetKind::Expenses => &EXPENSES_COLUMNS,
            SheetKind::Budget => &BUDGET_COLUMNS,
        }
    }
}

impl fmt::Display for SheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sheet_name())
    }
}

impl Serialize for SheetKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.sheet_name())
    }
}

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Date,
    Integer,
    Decimal,
    Text,
}

impl ColumnType {
    /// Whether a non-blank cell can be read as this type
    pub fn accepts(&self, cell: &CellValue) -> bool {
        match self {
            ColumnType::Date => coerce_date(cell).is_some(),
            ColumnType::Integer => coerce_integer(cell).is_some(),
            ColumnType::Decimal => coerce_decimal(cell).is_some(),
            ColumnType::Text => coerce_text(cell).is_some(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ColumnType::Date => "дата",
            ColumnType::Integer => "целое число",
            ColumnType::Decimal => "число",
            ColumnType::Text => "текст",
        };
        f.write_str(label)
    }
}

/// A column the schema requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    /// Optional columns must exist in the header but may have blank cells
    pub optional: bool,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnSpec {
    ColumnSpec {
        name,
        ty,
        optional: false,
    }
}

const NET_WORTH_COLUMNS: [ColumnSpec; 3] = [
    col("Date", ColumnType::Date),
    col("Assets", ColumnType::Decimal),
    col("Liabilities", ColumnType::Decimal),
];

const INCOME_COLUMNS: [ColumnSpec; 4] = [
    col("IncomeID", ColumnType::Integer),
    col("Date", ColumnType::Date),
    col("Source", ColumnType::Text),
    col("Amount", ColumnType::Decimal),
];

const EXPENSES_COLUMNS: [ColumnSpec; 5] = [
    col("ExpenseID", ColumnType::Integer),
    col("Date", ColumnType::Date),
    col("Category", ColumnType::Text),
    ColumnSpec {
        name: "Description",
        ty: ColumnType::Text,
        optional: true,
    },
    col("Amount", ColumnType::Decimal),
];

const BUDGET_COLUMNS: [ColumnSpec; 2] = [
    col("Category", ColumnType::Text),
    col("BudgetAmount", ColumnType::Decimal),
];

/// A sheet that passed validation, with column positions resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSheet {
    pub kind: SheetKind,
    columns: HashMap<&'static str, usize>,
    sheet: Sheet,
}

impl ValidatedSheet {
    /// Position of a schema column in the sheet's rows
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    /// Cell of `row` under schema column `name`; short rows read as empty
    pub fn cell<'a>(&self, row: &'a [CellValue], name: &str) -> &'a CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.column_index(name)
            .and_then(|idx| row.get(idx))
            .unwrap_or(&EMPTY)
    }

    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[CellValue])> {
        self.sheet.data_rows()
    }
}

/// Handle proving that every required sheet and column is present
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedWorkbook {
    sheets: HashMap<SheetKind, ValidatedSheet>,
}

impl ValidatedWorkbook {
    pub fn sheet(&self, kind: SheetKind) -> &ValidatedSheet {
        // Construction guarantees all four kinds are present
        &self.sheets[&kind]
    }
}

/// Check `workbook` against the four-sheet schema.
///
/// Returns either a [`ValidatedWorkbook`] or every violation found. Extra
/// sheets and extra columns are ignored.
pub fn validate(workbook: &Workbook) -> Result<ValidatedWorkbook, Vec<SchemaError>> {
    let mut errors = Vec::new();
    let mut sheets = HashMap::new();

    for kind in SheetKind::ALL {
        let Some(sheet) = workbook.sheet(kind.sheet_name()) else {
            errors.push(SchemaError::MissingSheet { sheet: kind });
            continue;
        };

        match validate_sheet(kind, sheet) {
            Ok(validated) => {
                sheets.insert(kind, validated);
            }
            Err(mut sheet_errors) => errors.append(&mut sheet_errors),
        }
    }

    if errors.is_empty() {
        Ok(ValidatedWorkbook { sheets })
    } else {
        Err(errors)
    }
}

fn validate_sheet(kind: SheetKind, sheet: &Sheet) -> Result<ValidatedSheet, Vec<SchemaError>> {
    let header = sheet.header();
    let mut errors = Vec::new();
    let mut columns = HashMap::new();

    for spec in kind.columns() {
        let positions: Vec<usize> = header
            .iter()
            .enumerate()
            .filter(|(_, label)| label.as_str() == spec.name)
            .map(|(idx, _)| idx)
            .collect();

        match positions.as_slice() {
            [] => errors.push(SchemaError::MissingColumn {
                sheet: kind,
                column: spec.name.to_string(),
            }),
            [idx] => {
                if !column_type_matches(sheet, *idx, spec.ty) {
                    errors.push(SchemaError::ColumnType {
                        sheet: kind,
                        column: spec.name.to_string(),
                        expected: spec.ty,
                    });
                }
                columns.insert(spec.name, *idx);
            }
            _ => errors.push(SchemaError::DuplicateColumn {
                sheet: kind,
                column: spec.name.to_string(),
            }),
        }
    }

    if errors.is_empty() {
        Ok(ValidatedSheet {
            kind,
            columns,
            sheet: sheet.clone(),
        })
    } else {
        Err(errors)
    }
}

/// A column is mistyped when it has values and none of them fit the type.
/// Individual bad cells are left to the loader to report per row.
fn column_type_matches(sheet: &Sheet, idx: usize, ty: ColumnType) -> bool {
    let mut values = sheet
        .data_rows()
        .filter_map(|(_, row)| row.get(idx))
        .filter(|cell| !cell.is_blank())
        .peekable();

    if values.peek().is_none() {
        return true;
    }
    values.any(|cell| ty.accepts(cell))
}
