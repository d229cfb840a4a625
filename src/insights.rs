//! Headline metrics shown next to the charts.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::aggregator::{budget_vs_actual, category_breakdown, net_worth_timeline};
use crate::loader::Tables;
use crate::models::YearMonth;

/// Number of categories listed under top expenses
pub const TOP_CATEGORIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Positive,
    Negative,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::Positive => "положительный",
            Trend::Negative => "отрицательный",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetWorthInsight {
    pub current: Decimal,
    /// Change against the previous point, in percent
    pub change_percent: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyInsight {
    pub month: YearMonth,
    pub income: Decimal,
    pub expenses: Decimal,
    pub savings_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopExpense {
    pub category: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetWarning {
    pub category: String,
    pub budget: Decimal,
    pub actual: Decimal,
    pub overspend: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub net_worth: Option<NetWorthInsight>,
    pub monthly: MonthlyInsight,
    pub top_expenses: Vec<TopExpense>,
    pub budget_warnings: Vec<BudgetWarning>,
}

/// Savings as a percentage of income; 0 when there is no income
pub fn savings_rate(income: Decimal, expenses: Decimal) -> f64 {
    if income.is_zero() {
        return 0.0;
    }
    ((income - expenses) * Decimal::ONE_HUNDRED / income)
        .round_dp(2)
        .to_f64()
        .unwrap_or(0.0)
}

/// Compute the insight block for `month`.
///
/// # Arguments
/// * `tables` - Loaded tables of the current dataset
/// * `month` - Reference month for the monthly figures and budget warnings
pub fn calculate(tables: &Tables, month: YearMonth) -> Insights {
    let timeline = net_worth_timeline(&tables.net_worth);
    let net_worth = timeline.last().map(|last| {
        let previous = timeline.len().checked_sub(2).map(|i| &timeline[i]);
        let change_percent = previous
            .filter(|p| !p.net_worth.is_zero())
            .and_then(|p| {
                ((last.net_worth - p.net_worth) * Decimal::ONE_HUNDRED / p.net_worth.abs())
                    .round_dp(2)
                    .to_f64()
            });
        let trend = if change_percent.unwrap_or(0.0) < 0.0 {
            Trend::Negative
        } else {
            Trend::Positive
        };
        NetWorthInsight {
            current: last.net_worth,
            change_percent,
            trend,
        }
    });

    let income: Decimal = tables
        .income
        .iter()
        .filter(|e| month.contains(e.date))
        .map(|e| e.amount)
        .sum();
    let expenses: Decimal = tables
        .expenses
        .iter()
        .filter(|e| month.contains(e.date))
        .map(|e| e.amount)
        .sum();

    let top_expenses = category_breakdown(&tables.expenses)
        .into_iter()
        .take(TOP_CATEGORIES)
        .map(|share| TopExpense {
            category: share.category,
            total: share.total,
        })
        .collect();

    let budget_warnings = budget_vs_actual(&tables.budget, &tables.expenses, Some(month))
        .into_iter()
        .filter(|row| row.budget > Decimal::ZERO && row.actual > row.budget)
        .map(|row| BudgetWarning {
            overspend: row.actual - row.budget,
            category: row.category,
            budget: row.budget,
            actual: row.actual,
        })
        .collect();

    Insights {
        net_worth,
        monthly: MonthlyInsight {
            month,
            income,
            expenses,
            savings_rate: savings_rate(income, expenses),
        },
        top_expenses,
        budget_warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BudgetEntry, ExpenseEntry, IncomeEntry, NetWorthEntry};
    use chrono::NaiveDate;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn expense(id: i64, on: NaiveDate, category: &str, amount: &str) -> ExpenseEntry {
        ExpenseEntry {
            id,
            date: on,
            category: category.to_string(),
            description: String::new(),
            amount: dec(amount),
        }
    }

    fn sample() -> Tables {
        Tables {
            net_worth: vec![
                NetWorthEntry {
                    date: date(2024, 1, 31),
                    assets: dec("1000"),
                    liabilities: dec("200"),
                },
                NetWorthEntry {
                    date: date(2024, 2, 29),
                    assets: dec("1100"),
                    liabilities: dec("100"),
                },
            ],
            income: vec![IncomeEntry {
                id: 1,
                date: date(2024, 2, 1),
                source: "Зарплата".to_string(),
                amount: dec("1000"),
            }],
            expenses: vec![
                expense(1, date(2024, 2, 2), "Еда", "300"),
                expense(2, date(2024, 2, 3), "Транспорт", "50"),
                expense(3, date(2024, 1, 3), "Жильё", "400"),
                expense(4, date(2024, 2, 4), "Кино", "10"),
            ],
            budget: vec![
                BudgetEntry {
                    category: "Еда".to_string(),
                    amount: dec("250"),
                },
                BudgetEntry {
                    category: "Транспорт".to_string(),
                    amount: dec("100"),
                },
            ],
        }
    }

    #[test]
    fn savings_rate_is_zero_without_income() {
        assert_eq!(savings_rate(Decimal::ZERO, dec("100")), 0.0);
        assert_eq!(savings_rate(dec("1000"), dec("750")), 25.0);
    }

    #[test]
    fn net_worth_change_against_previous_point() {
        let insights = calculate(&sample(), YearMonth::new(2024, 2).unwrap());
        let net_worth = insights.net_worth.unwrap();
        assert_eq!(net_worth.current, dec("1000"));
        assert_eq!(net_worth.change_percent, Some(25.0));
        assert_eq!(net_worth.trend, Trend::Positive);
    }

    #[test]
    fn monthly_figures_use_reference_month_only() {
        let insights = calculate(&sample(), YearMonth::new(2024, 2).unwrap());
        assert_eq!(insights.monthly.income, dec("1000"));
        assert_eq!(insights.monthly.expenses, dec("360"));
        assert_eq!(insights.monthly.savings_rate, 64.0);
    }

    #[test]
    fn top_expenses_are_all_time_and_capped() {
        let insights = calculate(&sample(), YearMonth::new(2024, 2).unwrap());
        let names: Vec<&str> = insights
            .top_expenses
            .iter()
            .map(|t| t.category.as_str())
            .collect();
        assert_eq!(names, vec!["Жильё", "Еда", "Транспорт"]);
    }

    #[test]
    fn warnings_list_only_overspent_categories() {
        let insights = calculate(&sample(), YearMonth::new(2024, 2).unwrap());
        assert_eq!(
            insights.budget_warnings,
            vec![BudgetWarning {
                category: "Еда".to_string(),
                budget: dec("250"),
                actual: dec("300"),
                overspend: dec("50"),
            }]
        );
    }

    #[test]
    fn empty_tables_give_neutral_insights() {
        let insights = calculate(&Tables::default(), YearMonth::new(2024, 2).unwrap());
        assert!(insights.net_worth.is_none());
        assert_eq!(insights.monthly.savings_rate, 0.0);
        assert!(insights.top_expenses.is_empty());
        assert!(insights.budget_warnings.is_empty());
    }
}
