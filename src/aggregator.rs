//! Aggregation of loaded tables into chart-ready series.
//!
//! Every function here is pure: same tables in, same series out. Amount sums
//! stay in `Decimal`; only the category percentage is converted to `f64`
//! because it is a ratio meant for display.

use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use crate::error::EmptyDatasetError;
use crate::loader::Tables;
use crate::models::{BudgetEntry, ExpenseEntry, IncomeEntry, NetWorthEntry, YearMonth, normalize_category};
use crate::schema::SheetKind;

/// Point of the net worth timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetWorthPoint {
    pub date: NaiveDate,
    pub assets: Decimal,
    pub liabilities: Decimal,
    pub net_worth: Decimal,
}

/// Income and expense totals for one calendar month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTotals {
    pub month: YearMonth,
    pub income: Decimal,
    pub expenses: Decimal,
}

/// Share of one category in total expenses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    pub total: Decimal,
    /// 0 to 100
    pub percent: f64,
}

/// Budgeted vs. spent for one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetComparison {
    pub category: String,
    pub budget: Decimal,
    pub actual: Decimal,
    /// `budget - actual`; negative when overspent
    pub variance: Decimal,
}

/// Net worth per date, ascending. When a date repeats, the later row wins.
pub fn net_worth_timeline(entries: &[NetWorthEntry]) -> Vec<NetWorthPoint> {
    let mut by_date: BTreeMap<NaiveDate, &NetWorthEntry> = BTreeMap::new();
    for entry in entries {
        by_date.insert(entry.date, entry);
    }

    by_date
        .into_values()
        .map(|entry| NetWorthPoint {
            date: entry.date,
            assets: entry.assets,
            liabilities: entry.liabilities,
            net_worth: entry.net_worth(),
        })
        .collect()
}

/// Income and expenses per month over every month that has either.
///
/// A month present on only one side reports zero for the other.
pub fn income_vs_expenses(income: &[IncomeEntry], expenses: &[ExpenseEntry]) -> Vec<MonthlyTotals> {
    let mut months: BTreeMap<YearMonth, (Decimal, Decimal)> = BTreeMap::new();

    for entry in income {
        months.entry(YearMonth::of(entry.date)).or_default().0 += entry.amount;
    }
    for entry in expenses {
        months.entry(YearMonth::of(entry.date)).or_default().1 += entry.amount;
    }

    months
        .into_iter()
        .map(|(month, (income, expenses))| MonthlyTotals {
            month,
            income,
            expenses,
        })
        .collect()
}

/// Expense totals grouped by normalized category, keyed by normalized name,
/// with the first spelling seen kept as the display label.
fn totals_by_category<'a>(
    expenses: impl IntoIterator<Item = &'a ExpenseEntry>,
) -> BTreeMap<String, (String, Decimal)> {
    let mut totals: BTreeMap<String, (String, Decimal)> = BTreeMap::new();
    for entry in expenses {
        let slot = totals
            .entry(entry.category_key())
            .or_insert_with(|| (entry.category.trim().to_string(), Decimal::ZERO));
        slot.1 += entry.amount;
    }
    totals
}

/// Expense totals per category with their share of the grand total.
///
/// Largest category first. Percentages sum to 100 when anything was spent
/// and are all zero otherwise.
pub fn category_breakdown(expenses: &[ExpenseEntry]) -> Vec<CategoryShare> {
    let totals = totals_by_category(expenses);
    let grand_total: Decimal = totals.values().map(|(_, amount)| *amount).sum();

    let mut shares: Vec<CategoryShare> = totals
        .into_values()
        .map(|(category, total)| {
            let percent = if grand_total.is_zero() {
                0.0
            } else {
                (total * Decimal::ONE_HUNDRED / grand_total)
                    .to_f64()
                    .unwrap_or(0.0)
            };
            CategoryShare {
                category,
                total,
                percent,
            }
        })
        .collect();

    shares.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.category.cmp(&b.category))
    });
    shares
}

/// Full outer join of budget and actual spending by normalized category.
///
/// With `month` set, only expenses dated in that month count as actual.
/// Rows are ordered by normalized category name.
pub fn budget_vs_actual(
    budget: &[BudgetEntry],
    expenses: &[ExpenseEntry],
    month: Option<YearMonth>,
) -> Vec<BudgetComparison> {
    let actual = totals_by_category(
        expenses
            .iter()
            .filter(|e| month.is_none_or(|m| m.contains(e.date))),
    );

    let mut rows: BTreeMap<String, BudgetComparison> = BTreeMap::new();
    for entry in budget {
        let planned = rows
            .entry(entry.category_key())
            .or_insert_with(|| BudgetComparison {
                category: entry.category.trim().to_string(),
                budget: Decimal::ZERO,
                actual: Decimal::ZERO,
                variance: Decimal::ZERO,
            });
        planned.budget += entry.amount;
    }
    for (key, (label, spent)) in actual {
        let row = rows.entry(key).or_insert_with(|| BudgetComparison {
            category: label,
            budget: Decimal::ZERO,
            actual: Decimal::ZERO,
            variance: Decimal::ZERO,
        });
        row.actual += spent;
    }

    rows.into_values()
        .map(|mut row| {
            row.variance = row.budget - row.actual;
            row
        })
        .collect()
}

/// Time window applied to the net worth timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TimeRange {
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "1Y")]
    OneYear,
    #[default]
    #[serde(rename = "MAX")]
    Max,
}

impl TimeRange {
    pub const ALL: [TimeRange; 5] = [
        TimeRange::OneMonth,
        TimeRange::ThreeMonths,
        TimeRange::SixMonths,
        TimeRange::OneYear,
        TimeRange::Max,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            TimeRange::OneMonth => "1M",
            TimeRange::ThreeMonths => "3M",
            TimeRange::SixMonths => "6M",
            TimeRange::OneYear => "1Y",
            TimeRange::Max => "MAX",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeRange::OneMonth => "1 месяц",
            TimeRange::ThreeMonths => "3 месяца",
            TimeRange::SixMonths => "6 месяцев",
            TimeRange::OneYear => "1 год",
            TimeRange::Max => "Всё время",
        }
    }

    fn months(&self) -> Option<u32> {
        match self {
            TimeRange::OneMonth => Some(1),
            TimeRange::ThreeMonths => Some(3),
            TimeRange::SixMonths => Some(6),
            TimeRange::OneYear => Some(12),
            TimeRange::Max => None,
        }
    }

    /// Keep the points no older than the window, measured back from the
    /// latest point
    pub fn apply(&self, timeline: &[NetWorthPoint]) -> Vec<NetWorthPoint> {
        let (Some(months), Some(last)) = (self.months(), timeline.last()) else {
            return timeline.to_vec();
        };
        let cutoff = last
            .date
            .checked_sub_months(Months::new(months))
            .unwrap_or(NaiveDate::MIN);
        timeline
            .iter()
            .filter(|p| p.date >= cutoff)
            .cloned()
            .collect()
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        TimeRange::ALL
            .into_iter()
            .find(|r| r.code() == wanted)
            .ok_or_else(|| format!("unknown time range '{}'", s))
    }
}

/// Display options chosen by the user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardView {
    pub range: TimeRange,
    /// Restricts the category breakdown; `None` keeps every category
    pub categories: Option<Vec<String>>,
}

impl DashboardView {
    fn keeps(&self, selected: &Option<HashSet<String>>, entry: &ExpenseEntry) -> bool {
        selected
            .as_ref()
            .is_none_or(|keys| keys.contains(&entry.category_key()))
    }
}

/// A chart's data, or the reason it has none
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChartData<T> {
    Ready { points: Vec<T> },
    NoData(EmptyDatasetError),
}

impl<T> ChartData<T> {
    /// `NoData` when every sheet in `sources` is empty
    fn from_sources(tables: &Tables, sources: &[SheetKind], points: impl FnOnce() -> Vec<T>) -> Self {
        if sources.iter().all(|kind| tables.is_empty(*kind)) {
            ChartData::NoData(EmptyDatasetError {
                sheets: sources.to_vec(),
            })
        } else {
            ChartData::Ready { points: points() }
        }
    }

    pub fn points(&self) -> Option<&[T]> {
        match self {
            ChartData::Ready { points } => Some(points),
            ChartData::NoData(_) => None,
        }
    }
}

/// Identifies one of the four series in URLs, exports and chart titles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    NetWorth,
    IncomeExpenses,
    Categories,
    Budget,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 4] = [
        SeriesKind::NetWorth,
        SeriesKind::IncomeExpenses,
        SeriesKind::Categories,
        SeriesKind::Budget,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            SeriesKind::NetWorth => "net_worth",
            SeriesKind::IncomeExpenses => "income_expenses",
            SeriesKind::Categories => "categories",
            SeriesKind::Budget => "budget",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SeriesKind::NetWorth => "Динамика чистой стоимости активов",
            SeriesKind::IncomeExpenses => "Доходы и расходы по месяцам",
            SeriesKind::Categories => "Структура расходов по категориям",
            SeriesKind::Budget => "Бюджет vs. Фактические расходы",
        }
    }
}

impl FromStr for SeriesKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SeriesKind::ALL
            .into_iter()
            .find(|k| k.slug() == s)
            .ok_or_else(|| format!("unknown series '{}'", s))
    }
}

/// The four chart series handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub net_worth: ChartData<NetWorthPoint>,
    pub income_vs_expenses: ChartData<MonthlyTotals>,
    pub category_breakdown: ChartData<CategoryShare>,
    pub budget_vs_actual: ChartData<BudgetComparison>,
}

impl Dashboard {
    pub fn build(tables: &Tables) -> Self {
        Self::build_with(tables, &DashboardView::default())
    }

    /// Why the series for `kind` has no data, if it has none
    pub fn missing(&self, kind: SeriesKind) -> Option<&EmptyDatasetError> {
        fn reason<T>(data: &ChartData<T>) -> Option<&EmptyDatasetError> {
            match data {
                ChartData::Ready { .. } => None,
                ChartData::NoData(e) => Some(e),
            }
        }
        match kind {
            SeriesKind::NetWorth => reason(&self.net_worth),
            SeriesKind::IncomeExpenses => reason(&self.income_vs_expenses),
            SeriesKind::Categories => reason(&self.category_breakdown),
            SeriesKind::Budget => reason(&self.budget_vs_actual),
        }
    }

    pub fn build_with(tables: &Tables, view: &DashboardView) -> Self {
        let selected: Option<HashSet<String>> = view
            .categories
            .as_ref()
            .map(|names| names.iter().map(|n| normalize_category(n)).collect());

        Dashboard {
            net_worth: ChartData::from_sources(tables, &[SheetKind::NetWorth], || {
                view.range.apply(&net_worth_timeline(&tables.net_worth))
            }),
            income_vs_expenses: ChartData::from_sources(
                tables,
                &[SheetKind::Income, SheetKind::Expenses],
                || income_vs_expenses(&tables.income, &tables.expenses),
            ),
            category_breakdown: ChartData::from_sources(tables, &[SheetKind::Expenses], || {
                let filtered: Vec<ExpenseEntry> = tables
                    .expenses
                    .iter()
                    .filter(|e| view.keeps(&selected, e))
                    .cloned()
                    .collect();
                category_breakdown(&filtered)
            }),
            budget_vs_actual: ChartData::from_sources(
                tables,
                &[SheetKind::Budget, SheetKind::Expenses],
                || budget_vs_actual(&tables.budget, &tables.expenses, None),
            ),
        }
    }
}

/// Distinct expense categories (display labels) in first-seen order
pub fn expense_categories(expenses: &[ExpenseEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for entry in expenses {
        if seen.insert(entry.category_key()) {
            labels.push(entry.category.trim().to_string());
        }
    }
    labels
}
