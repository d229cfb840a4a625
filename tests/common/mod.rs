//! Builders for `.xlsx` fixtures.

#![allow(dead_code)]

use chrono::NaiveDate;
use finance_dashboard::workbook::date_to_serial;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

pub enum Cell {
    Text(&'static str),
    Number(f64),
    Date(NaiveDate),
    Blank,
}

pub use Cell::{Blank, Number, Text};

pub fn date(y: i32, m: u32, d: u32) -> Cell {
    Cell::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

/// One sheet: name, header row, data rows
pub struct SheetFixture {
    pub name: &'static str,
    pub header: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
    /// Blank rows above the header
    pub skip_rows: u32,
}

impl SheetFixture {
    pub fn below_blank_rows(mut self, count: u32) -> Self {
        self.skip_rows = count;
        self
    }
}

pub fn sheet(name: &'static str, header: &[&'static str], rows: Vec<Vec<Cell>>) -> SheetFixture {
    SheetFixture {
        name,
        header: header.to_vec(),
        rows,
        skip_rows: 0,
    }
}

pub fn xlsx(sheets: Vec<SheetFixture>) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");

    for fixture in sheets {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(fixture.name).unwrap();
        for (c, label) in fixture.header.iter().enumerate() {
            worksheet
                .write_string(fixture.skip_rows, c as u16, *label)
                .unwrap();
        }
        for (r, row) in fixture.rows.iter().enumerate() {
            let r = fixture.skip_rows + (r + 1) as u32;
            for (c, cell) in row.iter().enumerate() {
                let c = c as u16;
                match cell {
                    Cell::Text(t) => {
                        worksheet.write_string(r, c, *t).unwrap();
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(r, c, *n).unwrap();
                    }
                    Cell::Date(d) => {
                        worksheet
                            .write_number_with_format(r, c, date_to_serial(*d), &date_format)
                            .unwrap();
                    }
                    Cell::Blank => {}
                }
            }
        }
        workbook.push_worksheet(worksheet);
    }

    workbook.save_to_buffer().unwrap()
}

pub const NET_WORTH: &[&str] = &["Date", "Assets", "Liabilities"];
pub const INCOME: &[&str] = &["IncomeID", "Date", "Source", "Amount"];
pub const EXPENSES: &[&str] = &["ExpenseID", "Date", "Category", "Description", "Amount"];
pub const BUDGET: &[&str] = &["Category", "BudgetAmount"];

/// A small valid workbook
pub fn sample_workbook() -> Vec<u8> {
    xlsx(vec![
        sheet(
            "Net Worth Table",
            NET_WORTH,
            vec![
                vec![date(2024, 1, 31), Number(1000.0), Number(400.0)],
                vec![date(2024, 2, 29), Number(1200.0), Number(300.0)],
            ],
        ),
        sheet(
            "Income Table",
            INCOME,
            vec![
                vec![Number(1.0), date(2024, 1, 5), Text("Зарплата"), Number(100.0)],
                vec![Number(2.0), date(2024, 1, 20), Text("Фриланс"), Number(50.0)],
            ],
        ),
        sheet(
            "Expenses Table",
            EXPENSES,
            vec![
                vec![Number(1.0), date(2024, 1, 7), Text("Food"), Text("Магазин"), Number(30.0)],
                vec![Number(2.0), date(2024, 1, 9), Text("Transport"), Blank, Number(10.0)],
            ],
        ),
        sheet(
            "Budget Table",
            BUDGET,
            vec![vec![Text("Food"), Number(100.0)]],
        ),
    ])
}
