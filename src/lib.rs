/*!
# Finance Dashboard

A personal-finance dashboard: upload an Excel workbook with your net worth,
income, expenses and budget, and get charts and headline metrics back.

## Overview

The heart of the crate is the ingestion pipeline. An uploaded `.xlsx` file is
checked against a fixed four-sheet schema, converted into typed tables and
aggregated into four chart series. A broken file is rejected as a whole with
the full list of problems; a broken row is skipped and reported while the
rest of the sheet still loads.

## Architecture

### Core (always built)
- **workbook**: `.xlsx` decoding (calamine) into sheets of typed cells, plus
  the cell coercion rules for dates, integers and money
- **schema**: the four required sheets and their columns; validation
- **loader**: validated sheets → `NetWorthEntry` / `IncomeEntry` /
  `ExpenseEntry` / `BudgetEntry`, with per-row errors
- **aggregator**: net worth timeline, monthly income vs. expenses, category
  breakdown, budget vs. actual; time range and category filters
- **insights**: current net worth and its change, monthly savings rate,
  top expense categories, over-budget warnings
- **pipeline**: read → validate → load → aggregate, and the per-session
  dataset store
- **downloader**: template workbook and CSV export of the series
- **config**, **logging**: YAML settings with environment overrides, and
  `env_logger` setup

### Web layer (`web` feature)
- **app**: axum router, dashboard pages (handlebars), JSON API, uploads
- **graph**: PNG charts with plotters
- **login**: registration and login with Argon2 password hashes, in-memory
  sessions

## Workbook format

| Sheet | Columns |
|-------|---------|
| `Net Worth Table` | `Date`, `Assets`, `Liabilities` |
| `Income Table` | `IncomeID`, `Date`, `Source`, `Amount` |
| `Expenses Table` | `ExpenseID`, `Date`, `Category`, `Description`, `Amount` |
| `Budget Table` | `Category`, `BudgetAmount` |

Header names must match exactly (surrounding spaces are ignored). Extra
sheets and columns are allowed and ignored.

## Binaries

- `website` - the dashboard server (`--features web`)
- `finance-cli` - check a workbook, print its summary, write the template

## REST API Endpoints

- `GET /health` - liveness probe
- `POST /api/upload` - multipart upload (field `file`), returns the ingest report
- `GET /api/dashboard?range=&categories=` - the four series as JSON
- `GET /api/insights?month=YYYY-MM` - headline metrics
- `GET /charts/{series}.png`, `GET /export/{series}.csv` - chart image and CSV
- `GET /template.xlsx` - blank workbook to fill in
*/

pub mod aggregator;
pub mod config;
pub mod downloader;
pub mod error;
pub mod insights;
pub mod loader;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod workbook;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod login;

pub use aggregator::{ChartData, Dashboard, DashboardView, SeriesKind, TimeRange};
pub use config::Settings;
pub use error::{EmptyDatasetError, IngestError, RowError, SchemaError};
pub use pipeline::{Dataset, DatasetStore, PipelineOptions, ingest};
