//! Downloadable files: the blank workbook template and CSV exports of the
//! aggregated series.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use thiserror::Error;

use crate::aggregator::{ChartData, Dashboard, SeriesKind};
use crate::schema::{ColumnType, SheetKind};
use crate::workbook::date_to_serial;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Не удалось сформировать файл Excel: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("Не удалось сформировать CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Не удалось сформировать CSV: {0}")]
    Io(#[from] std::io::Error),
}

enum Sample {
    Date(NaiveDate),
    Number(f64),
    Text(&'static str),
}

fn sample_rows(kind: SheetKind) -> Vec<Vec<Sample>> {
    use Sample::{Date, Number, Text};
    let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).map(Date).unwrap_or(Text(""));

    match kind {
        SheetKind::NetWorth => vec![
            vec![day(2024, 1, 31), Number(1_250_000.0), Number(350_000.0)],
            vec![day(2024, 2, 29), Number(1_310_000.0), Number(340_000.0)],
        ],
        SheetKind::Income => vec![
            vec![Number(1.0), day(2024, 1, 10), Text("Зарплата"), Number(120_000.0)],
            vec![Number(2.0), day(2024, 2, 10), Text("Зарплата"), Number(120_000.0)],
        ],
        SheetKind::Expenses => vec![
            vec![Number(1.0), day(2024, 1, 12), Text("Продукты"), Text("Супермаркет"), Number(18_500.5)],
            vec![Number(2.0), day(2024, 1, 15), Text("Транспорт"), Text("Проездной"), Number(2_900.0)],
            vec![Number(3.0), day(2024, 2, 1), Text("Жильё"), Text(""), Number(45_000.0)],
        ],
        SheetKind::Budget => vec![
            vec![Text("Продукты"), Number(20_000.0)],
            vec![Text("Транспорт"), Number(3_000.0)],
            vec![Text("Жильё"), Number(45_000.0)],
        ],
    }
}

/// Build the template workbook users fill in before uploading.
///
/// Contains the four required sheets with the exact header row and a few
/// sample rows, dates formatted as dates and amounts as money.
///
/// # Returns
/// * `Result<Vec<u8>, ExportError>` - `.xlsx` file content
pub fn template_xlsx() -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let date = Format::new().set_num_format("yyyy-mm-dd");
    let money = Format::new().set_num_format("#,##0.00");

    for kind in SheetKind::ALL {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(kind.sheet_name())?;

        let columns = kind.columns();
        for (c, spec) in columns.iter().enumerate() {
            worksheet.write_string_with_format(0, c as u16, spec.name, &header)?;
            worksheet.set_column_width(c as u16, 16)?;
        }

        for (r, row) in sample_rows(kind).iter().enumerate() {
            let r = (r + 1) as u32;
            for (c, (value, spec)) in row.iter().zip(columns).enumerate() {
                let c = c as u16;
                match value {
                    Sample::Date(d) => {
                        worksheet.write_number_with_format(r, c, date_to_serial(*d), &date)?;
                    }
                    Sample::Number(n) if spec.ty == ColumnType::Decimal => {
                        worksheet.write_number_with_format(r, c, *n, &money)?;
                    }
                    Sample::Number(n) => {
                        worksheet.write_number(r, c, *n)?;
                    }
                    Sample::Text("") => {}
                    Sample::Text(t) => {
                        worksheet.write_string(r, c, *t)?;
                    }
                }
            }
        }

        workbook.push_worksheet(worksheet);
    }

    Ok(workbook.save_to_buffer()?)
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

/// Export one series of `dashboard` as CSV.
///
/// A series without data yields just its header row.
///
/// # Arguments
/// * `dashboard` - Series of the current dataset
/// * `kind` - Which series to export
pub fn series_csv(dashboard: &Dashboard, kind: SeriesKind) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

    match kind {
        SeriesKind::NetWorth => {
            writer.write_record(["date", "assets", "liabilities", "net_worth"])?;
            for p in points(&dashboard.net_worth) {
                writer.write_record([
                    p.date.format("%Y-%m-%d").to_string(),
                    money(p.assets),
                    money(p.liabilities),
                    money(p.net_worth),
                ])?;
            }
        }
        SeriesKind::IncomeExpenses => {
            writer.write_record(["month", "income", "expenses"])?;
            for m in points(&dashboard.income_vs_expenses) {
                writer.write_record([m.month.to_string(), money(m.income), money(m.expenses)])?;
            }
        }
        SeriesKind::Categories => {
            writer.write_record(["category", "total", "percent"])?;
            for s in points(&dashboard.category_breakdown) {
                writer.write_record([s.category.clone(), money(s.total), format!("{:.2}", s.percent)])?;
            }
        }
        SeriesKind::Budget => {
            writer.write_record(["category", "budget", "actual", "variance"])?;
            for b in points(&dashboard.budget_vs_actual) {
                writer.write_record([
                    b.category.clone(),
                    money(b.budget),
                    money(b.actual),
                    money(b.variance),
                ])?;
            }
        }
    }

    writer.flush()?;
    let bytes = writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn points<T>(data: &ChartData<T>) -> &[T] {
    data.points().unwrap_or(&[])
}
