//! Table loader: validated sheets → typed records.
//!
//! Each row is read independently. A row with an invalid required value is
//! dropped and reported as a [`RowError`]; the rest of the sheet still loads.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::error::{RowError, RowProblem};
use crate::models::{BudgetEntry, ExpenseEntry, IncomeEntry, NetWorthEntry, normalize_category};
use crate::schema::{SheetKind, ValidatedSheet, ValidatedWorkbook};
use crate::workbook::{CellValue, coerce_date, coerce_decimal, coerce_integer, coerce_text};

/// Largest accepted amount, 10^15.
///
/// With at most 2^20 rows per sheet every total, difference and percentage
/// computed from loaded tables stays inside `Decimal` range.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);

/// The four typed tables of one upload, in sheet order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub net_worth: Vec<NetWorthEntry>,
    pub income: Vec<IncomeEntry>,
    pub expenses: Vec<ExpenseEntry>,
    pub budget: Vec<BudgetEntry>,
}

impl Tables {
    /// Number of loaded rows in the table backing `kind`
    pub fn row_count(&self, kind: SheetKind) -> usize {
        match kind {
            SheetKind::NetWorth => self.net_worth.len(),
            SheetKind::Income => self.income.len(),
            SheetKind::Expenses => self.expenses.len(),
            SheetKind::Budget => self.budget.len(),
        }
    }

    pub fn is_empty(&self, kind: SheetKind) -> bool {
        self.row_count(kind) == 0
    }
}

/// Result of loading a validated workbook
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    pub tables: Tables,
    pub row_errors: Vec<RowError>,
}

/// Load every sheet of a validated workbook.
///
/// Never fails as a whole: bad rows end up in `row_errors`.
pub fn load_tables(workbook: &ValidatedWorkbook) -> LoadOutcome {
    let mut row_errors = Vec::new();

    let tables = Tables {
        net_worth: load_net_worth(workbook.sheet(SheetKind::NetWorth), &mut row_errors),
        income: load_income(workbook.sheet(SheetKind::Income), &mut row_errors),
        expenses: load_expenses(workbook.sheet(SheetKind::Expenses), &mut row_errors),
        budget: load_budget(workbook.sheet(SheetKind::Budget), &mut row_errors),
    };

    LoadOutcome { tables, row_errors }
}

/// Reads the cells of one row, remembering the first failure
struct RowReader<'a> {
    sheet: &'a ValidatedSheet,
    row: &'a [CellValue],
    row_number: usize,
    error: Option<RowError>,
}

impl<'a> RowReader<'a> {
    fn new(sheet: &'a ValidatedSheet, row_number: usize, row: &'a [CellValue]) -> Self {
        Self {
            sheet,
            row,
            row_number,
            error: None,
        }
    }

    fn fail(&mut self, column: &'static str, problem: RowProblem) {
        if self.error.is_none() {
            self.error = Some(RowError {
                sheet: self.sheet.kind,
                row: self.row_number,
                column,
                problem,
            });
        }
    }

    fn required<T>(
        &mut self,
        column: &'static str,
        parse: impl Fn(&CellValue) -> Option<T>,
        invalid: impl Fn(String) -> RowProblem,
    ) -> Option<T> {
        let cell = self.sheet.cell(self.row, column);
        if cell.is_blank() {
            self.fail(column, RowProblem::Blank);
            return None;
        }
        let value = parse(cell);
        if value.is_none() {
            self.fail(column, invalid(cell.display()));
        }
        value
    }

    fn date(&mut self, column: &'static str) -> Option<chrono::NaiveDate> {
        self.required(column, coerce_date, RowProblem::InvalidDate)
    }

    fn integer(&mut self, column: &'static str) -> Option<i64> {
        self.required(column, coerce_integer, RowProblem::InvalidInteger)
    }

    fn text(&mut self, column: &'static str) -> Option<String> {
        self.required(column, coerce_text, |_| RowProblem::Blank)
    }

    fn optional_text(&mut self, column: &'static str) -> String {
        coerce_text(self.sheet.cell(self.row, column)).unwrap_or_default()
    }

    /// Non-negative amount no larger than [`MAX_AMOUNT`]
    fn amount(&mut self, column: &'static str) -> Option<Decimal> {
        let value = self.required(column, coerce_decimal, RowProblem::InvalidNumber)?;
        if value.is_sign_negative() && !value.is_zero() {
            self.fail(column, RowProblem::Negative(value.to_string()));
            return None;
        }
        if value > MAX_AMOUNT {
            self.fail(column, RowProblem::TooLarge(value.to_string()));
            return None;
        }
        Some(value)
    }

    fn finish<T>(self, record: Option<T>, errors: &mut Vec<RowError>) -> Option<T> {
        match self.error {
            Some(err) => {
                log::debug!("Skipping row: {}", err);
                errors.push(err);
                None
            }
            None => record,
        }
    }
}

fn is_blank_row(row: &[CellValue]) -> bool {
    row.iter().all(CellValue::is_blank)
}

fn load_net_worth(sheet: &ValidatedSheet, errors: &mut Vec<RowError>) -> Vec<NetWorthEntry> {
    let mut entries = Vec::new();

    for (row_number, row) in sheet.data_rows() {
        if is_blank_row(row) {
            continue;
        }
        let mut reader = RowReader::new(sheet, row_number, row);
        let date = reader.date("Date");
        let assets = reader.amount("Assets");
        let liabilities = reader.amount("Liabilities");

        let record = match (date, assets, liabilities) {
            (Some(date), Some(assets), Some(liabilities)) => Some(NetWorthEntry {
                date,
                assets,
                liabilities,
            }),
            _ => None,
        };
        if let Some(entry) = reader.finish(record, errors) {
            entries.push(entry);
        }
    }

    entries
}

fn load_income(sheet: &ValidatedSheet, errors: &mut Vec<RowError>) -> Vec<IncomeEntry> {
    let mut entries = Vec::new();
    let mut seen_ids = HashSet::new();

    for (row_number, row) in sheet.data_rows() {
        if is_blank_row(row) {
            continue;
        }
        let mut reader = RowReader::new(sheet, row_number, row);
        let id = reader.integer("IncomeID");
        let date = reader.date("Date");
        let source = reader.text("Source");
        let amount = reader.amount("Amount");

        if let Some(id) = id {
            if reader.error.is_none() && !seen_ids.insert(id) {
                reader.fail("IncomeID", RowProblem::DuplicateId(id));
            }
        }

        let record = match (id, date, source, amount) {
            (Some(id), Some(date), Some(source), Some(amount)) => Some(IncomeEntry {
                id,
                date,
                source,
                amount,
            }),
            _ => None,
        };
        if let Some(entry) = reader.finish(record, errors) {
            entries.push(entry);
        }
    }

    entries
}

fn load_expenses(sheet: &ValidatedSheet, errors: &mut Vec<RowError>) -> Vec<ExpenseEntry> {
    let mut entries = Vec::new();
    let mut seen_ids = HashSet::new();

    for (row_number, row) in sheet.data_rows() {
        if is_blank_row(row) {
            continue;
        }
        let mut reader = RowReader::new(sheet, row_number, row);
        let id = reader.integer("ExpenseID");
        let date = reader.date("Date");
        let category = reader.text("Category");
        let description = reader.optional_text("Description");
        let amount = reader.amount("Amount");

        if let Some(id) = id {
            if reader.error.is_none() && !seen_ids.insert(id) {
                reader.fail("ExpenseID", RowProblem::DuplicateId(id));
            }
        }

        let record = match (id, date, category, amount) {
            (Some(id), Some(date), Some(category), Some(amount)) => Some(ExpenseEntry {
                id,
                date,
                category,
                description,
                amount,
            }),
            _ => None,
        };
        if let Some(entry) = reader.finish(record, errors) {
            entries.push(entry);
        }
    }

    entries
}

fn load_budget(sheet: &ValidatedSheet, errors: &mut Vec<RowError>) -> Vec<BudgetEntry> {
    let mut entries = Vec::new();
    let mut seen_categories = HashSet::new();

    for (row_number, row) in sheet.data_rows() {
        if is_blank_row(row) {
            continue;
        }
        let mut reader = RowReader::new(sheet, row_number, row);
        let category = reader.text("Category");
        let amount = reader.amount("BudgetAmount");

        if let Some(category) = &category {
            if reader.error.is_none() && !seen_categories.insert(normalize_category(category)) {
                reader.fail("Category", RowProblem::DuplicateCategory(category.clone()));
            }
        }

        let record = match (category, amount) {
            (Some(category), Some(amount)) => Some(BudgetEntry { category, amount }),
            _ => None,
        };
        if let Some(entry) = reader.finish(record, errors) {
            entries.push(entry);
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate;
    use crate::workbook::{Sheet, Workbook};
    use chrono::NaiveDate;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn num(f: f64) -> CellValue {
        CellValue::Float(f)
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn workbook_with(expenses: Vec<Vec<CellValue>>) -> Workbook {
        let mut expense_rows = vec![vec![
            text("ExpenseID"),
            text("Date"),
            text("Category"),
            text("Description"),
            text("Amount"),
        ]];
        expense_rows.extend(expenses);

        Workbook::new(vec![
            Sheet::new(
                "Net Worth Table",
                vec![
                    vec![text("Date"), text("Assets"), text("Liabilities")],
                    vec![text("2024-01-31"), num(1000.0), num(250.5)],
                ],
            ),
            Sheet::new(
                "Income Table",
                vec![
                    vec![text("IncomeID"), text("Date"), text("Source"), text("Amount")],
                    vec![CellValue::Int(1), text("2024-01-05"), text("Зарплата"), num(100.0)],
                    vec![CellValue::Int(1), text("2024-01-20"), text("Бонус"), num(50.0)],
                ],
            ),
            Sheet::new("Expenses Table", expense_rows),
            Sheet::new(
                "Budget Table",
                vec![
                    vec![text("Category"), text("BudgetAmount")],
                    vec![text("Food"), num(500.0)],
                    vec![text(" food "), num(300.0)],
                ],
            ),
        ])
    }

    fn load(workbook: &Workbook) -> LoadOutcome {
        load_tables(&validate(workbook).expect("schema should pass"))
    }

    #[test]
    fn loads_typed_records() {
        let outcome = load(&workbook_with(vec![vec![
            CellValue::Int(10),
            text("05.01.2024"),
            text("Transport"),
            CellValue::Empty,
            text("80,50"),
        ]]));

        assert_eq!(
            outcome.tables.net_worth,
            vec![NetWorthEntry {
                date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                assets: dec("1000"),
                liabilities: dec("250.50"),
            }]
        );
        let expense = &outcome.tables.expenses[0];
        assert_eq!(expense.id, 10);
        assert_eq!(expense.description, "");
        assert_eq!(expense.amount, dec("80.50"));
    }

    #[test]
    fn bad_amount_row_is_reported_and_siblings_survive() {
        let outcome = load(&workbook_with(vec![
            vec![CellValue::Int(1), text("2024-01-02"), text("Food"), text("хлеб"), num(20.0)],
            vec![CellValue::Int(2), text("2024-01-03"), text("Food"), text(""), text("n/a")],
            vec![CellValue::Int(3), text("2024-01-04"), text("Food"), text(""), num(30.0)],
        ]));

        let ids: Vec<i64> = outcome.tables.expenses.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);

        let expense_errors: Vec<&RowError> = outcome
            .row_errors
            .iter()
            .filter(|e| e.sheet == SheetKind::Expenses)
            .collect();
        assert_eq!(expense_errors.len(), 1);
        assert_eq!(expense_errors[0].row, 3);
        assert_eq!(expense_errors[0].column, "Amount");
        assert_eq!(
            expense_errors[0].problem,
            RowProblem::InvalidNumber("n/a".to_string())
        );
    }

    #[test]
    fn oversized_amounts_are_row_errors() {
        let outcome = load(&workbook_with(vec![
            vec![
                CellValue::Int(1),
                text("2024-01-02"),
                text("Food"),
                text(""),
                text("1000000000000000000000000000"),
            ],
            vec![
                CellValue::Int(2),
                text("2024-01-03"),
                text("Food"),
                text(""),
                text("1000000000000000"),
            ],
        ]));

        let ids: Vec<i64> = outcome.tables.expenses.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(outcome.tables.expenses[0].amount, MAX_AMOUNT);
        assert!(outcome.row_errors.iter().any(|e| e.sheet == SheetKind::Expenses
            && e.row == 2
            && matches!(e.problem, RowProblem::TooLarge(_))));
    }

    #[test]
    fn duplicate_ids_and_categories_keep_first() {
        let outcome = load(&workbook_with(vec![]));

        assert_eq!(outcome.tables.income.len(), 1);
        assert_eq!(outcome.tables.income[0].source, "Зарплата");
        assert_eq!(outcome.tables.budget.len(), 1);
        assert_eq!(outcome.tables.budget[0].amount, dec("500"));

        let problems: Vec<&RowProblem> = outcome.row_errors.iter().map(|e| &e.problem).collect();
        assert!(problems.contains(&&RowProblem::DuplicateId(1)));
        assert!(problems.contains(&&RowProblem::DuplicateCategory("food".to_string())));
    }

    #[test]
    fn negative_and_blank_values_are_rejected() {
        let outcome = load(&workbook_with(vec![
            vec![CellValue::Int(1), text("2024-01-02"), text("Food"), text(""), num(-5.0)],
            vec![CellValue::Int(2), CellValue::Empty, text("Food"), text(""), num(5.0)],
        ]));

        assert!(outcome.tables.expenses.is_empty());
        let problems: Vec<RowProblem> = outcome
            .row_errors
            .iter()
            .filter(|e| e.sheet == SheetKind::Expenses)
            .map(|e| e.problem.clone())
            .collect();
        assert_eq!(
            problems,
            vec![RowProblem::Negative("-5".to_string()), RowProblem::Blank]
        );
    }

    #[test]
    fn blank_rows_are_skipped_silently() {
        let outcome = load(&workbook_with(vec![
            vec![CellValue::Empty, text("  "), CellValue::Empty],
            vec![CellValue::Int(4), text("2024-01-04"), text("Food"), text(""), num(30.0)],
        ]));
        assert_eq!(outcome.tables.expenses.len(), 1);
        assert!(outcome
            .row_errors
            .iter()
            .all(|e| e.sheet != SheetKind::Expenses));
    }
}
