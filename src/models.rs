//! Typed records produced by the table loader.
//!
//! Amounts are fixed-point decimals; dates carry no time component.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One row of the `Net Worth Table` sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetWorthEntry {
    pub date: NaiveDate,
    pub assets: Decimal,
    /// Stored as a positive magnitude
    pub liabilities: Decimal,
}

impl NetWorthEntry {
    pub fn net_worth(&self) -> Decimal {
        self.assets - self.liabilities
    }
}

/// One row of the `Income Table` sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomeEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub source: String,
    pub amount: Decimal,
}

/// One row of the `Expenses Table` sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpenseEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub category: String,
    pub description: String,
    pub amount: Decimal,
}

impl ExpenseEntry {
    pub fn category_key(&self) -> String {
        normalize_category(&self.category)
    }
}

/// One row of the `Budget Table` sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetEntry {
    pub category: String,
    pub amount: Decimal,
}

impl BudgetEntry {
    pub fn category_key(&self) -> String {
        normalize_category(&self.category)
    }
}

/// Join key for categories: trimmed, inner whitespace collapsed, lower-cased.
///
/// `"  Продукты  питания"` and `"продукты питания"` map to the same key.
pub fn normalize_category(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A calendar month, used to bucket income and expenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Returns `None` unless `month` is in `1..=12`
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{}'", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        YearMonth::new(year, month).ok_or_else(|| format!("month out of range in '{}'", s))
    }
}

impl TryFrom<String> for YearMonth {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn normalize_category_collapses_case_and_spaces() {
        assert_eq!(normalize_category("  Food "), "food");
        assert_eq!(normalize_category("Продукты   Питания"), "продукты питания");
        assert_eq!(normalize_category(""), "");
    }

    #[test]
    fn net_worth_is_assets_minus_liabilities() {
        let entry = NetWorthEntry {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            assets: dec("1500.50"),
            liabilities: dec("300.25"),
        };
        assert_eq!(entry.net_worth(), dec("1200.25"));
    }

    #[test]
    fn year_month_parses_and_formats() {
        let ym: YearMonth = "2024-01".parse().unwrap();
        assert_eq!(ym, YearMonth::new(2024, 1).unwrap());
        assert_eq!(ym.to_string(), "2024-01");
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("январь".parse::<YearMonth>().is_err());
    }

    #[test]
    fn year_month_orders_chronologically() {
        let dec_23 = YearMonth::new(2023, 12).unwrap();
        let jan_24 = YearMonth::new(2024, 1).unwrap();
        assert!(dec_23 < jan_24);
        assert!(jan_24.contains(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
    }
}
