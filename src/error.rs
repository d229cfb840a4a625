//! Error types for workbook ingestion and the services around it.
//!
//! Messages are shown to the user as-is, so their `Display` text is Russian.

use serde::Serialize;
use thiserror::Error;

use crate::schema::{ColumnType, SheetKind};

/// Sheet-level problem that stops ingestion of an upload.
///
/// The validator collects every violation it can find, so a single upload
/// usually yields a list of these rather than just the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaError {
    /// The file could not be decoded as an `.xlsx` workbook
    #[error("Не удалось прочитать файл Excel: {reason}")]
    Unreadable { reason: String },

    /// A required sheet is absent
    #[error("Отсутствует лист «{sheet}»")]
    MissingSheet { sheet: SheetKind },

    /// A required column is absent from the header row
    #[error("Лист «{sheet}»: отсутствует колонка «{column}»")]
    MissingColumn { sheet: SheetKind, column: String },

    /// The same required column appears more than once in the header row
    #[error("Лист «{sheet}»: колонка «{column}» встречается несколько раз")]
    DuplicateColumn { sheet: SheetKind, column: String },

    /// No value in the column can be read as the declared type
    #[error("Лист «{sheet}»: колонка «{column}» должна содержать значения типа «{expected}»")]
    ColumnType {
        sheet: SheetKind,
        column: String,
        expected: ColumnType,
    },
}

/// Why a single row was excluded from its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RowProblem {
    /// Required cell is empty
    Blank,
    /// Cell is not a calendar date
    InvalidDate(String),
    /// Cell is not a whole number
    InvalidInteger(String),
    /// Cell is not a decimal number
    InvalidNumber(String),
    /// Amount below zero
    Negative(String),
    /// Amount above the accepted maximum
    TooLarge(String),
    /// IncomeID / ExpenseID already used by an earlier row
    DuplicateId(i64),
    /// Budget category already defined by an earlier row
    DuplicateCategory(String),
}

impl std::fmt::Display for RowProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowProblem::Blank => write!(f, "пустое значение"),
            RowProblem::InvalidDate(raw) => write!(f, "некорректная дата «{}»", raw),
            RowProblem::InvalidInteger(raw) => write!(f, "некорректное целое число «{}»", raw),
            RowProblem::InvalidNumber(raw) => write!(f, "некорректное число «{}»", raw),
            RowProblem::Negative(raw) => write!(f, "отрицательная сумма «{}»", raw),
            RowProblem::TooLarge(raw) => write!(f, "сумма «{}» превышает допустимый максимум", raw),
            RowProblem::DuplicateId(id) => write!(f, "повторяющийся идентификатор {}", id),
            RowProblem::DuplicateCategory(name) => {
                write!(f, "категория «{}» уже указана выше", name)
            }
        }
    }
}

/// A single row that failed type or range validation.
///
/// `row` is the 1-based row number as the user sees it in Excel, so the first
/// data row under the header is row 2.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Лист «{sheet}», строка {row}, колонка «{column}»: {problem}")]
pub struct RowError {
    pub sheet: SheetKind,
    pub row: usize,
    pub column: &'static str,
    pub problem: RowProblem,
}

/// A sheet ended up with zero valid rows after loading.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Нет данных на листах: {}", format_sheets(.sheets))]
pub struct EmptyDatasetError {
    pub sheets: Vec<SheetKind>,
}

fn format_sheets(sheets: &[SheetKind]) -> String {
    sheets
        .iter()
        .map(|s| format!("«{}»", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure of a whole upload attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Файл не соответствует ожидаемой структуре ({} ошибок)", .0.len())]
    Schema(Vec<SchemaError>),
}

impl IngestError {
    /// Every schema violation behind this failure
    pub fn schema_errors(&self) -> &[SchemaError] {
        match self {
            IngestError::Schema(errors) => errors,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_error_names_sheet_row_and_reason() {
        let err = RowError {
            sheet: SheetKind::Expenses,
            row: 4,
            column: "Amount",
            problem: RowProblem::InvalidNumber("abc".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("Expenses Table"));
        assert!(text.contains("строка 4"));
        assert!(text.contains("«abc»"));
    }

    #[test]
    fn empty_dataset_lists_every_sheet() {
        let err = EmptyDatasetError {
            sheets: vec![SheetKind::Income, SheetKind::Expenses],
        };
        assert_eq!(
            err.to_string(),
            "Нет данных на листах: «Income Table», «Expenses Table»"
        );
    }
}
