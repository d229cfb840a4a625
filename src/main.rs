use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use finance_dashboard::aggregator::ChartData;
use finance_dashboard::config::{DEFAULT_CONFIG_PATH, Settings};
use finance_dashboard::models::YearMonth;
use finance_dashboard::pipeline::{Dataset, SchemaErrorReport, ingest};
use finance_dashboard::{downloader, insights, logging};

#[derive(Parser)]
#[command(
    name = "finance-cli",
    version,
    about = "Check personal finance workbooks and summarize them",
    long_about = "Validates an Excel workbook against the dashboard's four-sheet \
                  format, prints the aggregated series and writes a template \
                  workbook to fill in."
)]
struct Cli {
    /// Config file (YAML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose pipeline logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workbook and report skipped rows
    Check {
        /// Workbook (.xlsx)
        file: PathBuf,
    },

    /// Print the aggregated series and insights
    Summary {
        /// Workbook (.xlsx)
        file: PathBuf,
        /// Reference month for insights (YYYY-MM); defaults to the current month
        #[arg(short, long)]
        month: Option<YearMonth>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write a blank template workbook
    Template {
        /// Output path
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config)?;
    settings.apply_env();
    if cli.debug {
        settings.logging.debug = true;
    }
    logging::init(&settings).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Check { file } => {
            let dataset = load(&file, &settings)?;
            let report = dataset.report();
            println!("{}: OK", report.file_name);
            for count in &report.rows {
                println!("  {:<16} {:>6} row(s)", count.sheet.to_string(), count.rows);
            }
            if !report.row_errors.is_empty() {
                println!("Skipped rows:");
                for error in &report.row_errors {
                    println!("  {}", error.message);
                }
            }
        }
        Commands::Summary { file, month, json } => {
            let dataset = load(&file, &settings)?;
            let month = month.unwrap_or_else(|| YearMonth::of(chrono::Local::now().date_naive()));
            let insights = insights::calculate(&dataset.tables, month);

            if json {
                let output = serde_json::json!({
                    "report": dataset.report(),
                    "series": dataset.dashboard,
                    "insights": insights,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_summary(&dataset, &insights);
            }
        }
        Commands::Template { out } => {
            let bytes = downloader::template_xlsx()?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Template written to {}", out.display());
        }
    }

    Ok(())
}

fn load(file: &Path, settings: &Settings) -> Result<Dataset> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    match ingest(&name, &bytes, &settings.pipeline_options()) {
        Ok(dataset) => Ok(dataset),
        Err(e) => {
            eprintln!("{}: {}", name, e);
            for report in e.schema_errors().iter().map(SchemaErrorReport::from) {
                eprintln!("  - {}", report.message);
            }
            bail!("{} was rejected", name)
        }
    }
}

fn section<T>(title: &str, data: &ChartData<T>, row: impl Fn(&T) -> String) {
    println!("\n{}", title);
    match data {
        ChartData::Ready { points } if points.is_empty() => println!("  (пусто)"),
        ChartData::Ready { points } => points.iter().for_each(|p| println!("  {}", row(p))),
        ChartData::NoData(e) => println!("  {}", e),
    }
}

fn print_summary(dataset: &Dataset, insights: &insights::Insights) {
    let dashboard = &dataset.dashboard;
    println!("{} ({} skipped row(s))", dataset.file_name, dataset.row_errors.len());

    section("Чистая стоимость", &dashboard.net_worth, |p| {
        format!("{}  {:>14.2}  {:>14.2}  {:>14.2}", p.date, p.assets, p.liabilities, p.net_worth)
    });
    section("Доходы и расходы", &dashboard.income_vs_expenses, |m| {
        format!("{}  {:>14.2}  {:>14.2}", m.month, m.income, m.expenses)
    });
    section("Расходы по категориям", &dashboard.category_breakdown, |s| {
        format!("{:<24} {:>14.2}  {:>6.2}%", s.category, s.total, s.percent)
    });
    section("Бюджет и факт", &dashboard.budget_vs_actual, |b| {
        format!(
            "{:<24} {:>14.2}  {:>14.2}  {:>14.2}",
            b.category, b.budget, b.actual, b.variance
        )
    });

    println!("\nПоказатели за {}", insights.monthly.month);
    if let Some(net_worth) = &insights.net_worth {
        match net_worth.change_percent {
            Some(change) => println!(
                "  Чистая стоимость: {:.2} ({:+.2}%, {})",
                net_worth.current,
                change,
                net_worth.trend.label()
            ),
            None => println!("  Чистая стоимость: {:.2}", net_worth.current),
        }
    }
    println!(
        "  Доходы: {:.2}  Расходы: {:.2}  Норма сбережений: {:.1}%",
        insights.monthly.income, insights.monthly.expenses, insights.monthly.savings_rate
    );
    for warning in &insights.budget_warnings {
        println!(
            "  Превышение бюджета «{}»: {:.2}",
            warning.category, warning.overspend
        );
    }
}
