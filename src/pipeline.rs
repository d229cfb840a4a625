//! Upload pipeline and per-session dataset store.
//!
//! An upload runs read → validate → load → aggregate synchronously. Only a
//! fully processed [`Dataset`] ever reaches the [`DatasetStore`], so a failed
//! upload leaves whatever the session had before untouched.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::aggregator::{Dashboard, DashboardView};
use crate::error::{IngestError, RowError, SchemaError};
use crate::loader::{Tables, load_tables};
use crate::schema::{SheetKind, validate};
use crate::workbook::Workbook;

/// Toggles handed to the pipeline by its caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Log per-sheet row counts and every dropped row
    pub debug: bool,
}

/// Immutable result of one successful upload
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub file_name: String,
    pub uploaded_at: DateTime<Local>,
    pub tables: Tables,
    pub row_errors: Vec<RowError>,
    pub dashboard: Dashboard,
}

impl Dataset {
    /// Series for a non-default view; the stored dashboard covers the default
    pub fn dashboard_for(&self, view: &DashboardView) -> Dashboard {
        if *view == DashboardView::default() {
            self.dashboard.clone()
        } else {
            Dashboard::build_with(&self.tables, view)
        }
    }

    pub fn report(&self) -> IngestReport {
        IngestReport {
            file_name: self.file_name.clone(),
            uploaded_at: self.uploaded_at.to_rfc3339(),
            rows: SheetKind::ALL
                .into_iter()
                .map(|kind| SheetCount {
                    sheet: kind,
                    rows: self.tables.row_count(kind),
                })
                .collect(),
            row_errors: self.row_errors.iter().map(RowErrorReport::from).collect(),
        }
    }
}

/// Loaded row count of one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetCount {
    pub sheet: SheetKind,
    pub rows: usize,
}

/// A row error together with its rendered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowErrorReport {
    #[serde(flatten)]
    pub error: RowError,
    pub message: String,
}

impl From<&RowError> for RowErrorReport {
    fn from(error: &RowError) -> Self {
        Self {
            message: error.to_string(),
            error: error.clone(),
        }
    }
}

/// A schema error together with its rendered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaErrorReport {
    #[serde(flatten)]
    pub error: SchemaError,
    pub message: String,
}

impl From<&SchemaError> for SchemaErrorReport {
    fn from(error: &SchemaError) -> Self {
        Self {
            message: error.to_string(),
            error: error.clone(),
        }
    }
}

/// Summary of a successful upload returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub file_name: String,
    pub uploaded_at: String,
    pub rows: Vec<SheetCount>,
    pub row_errors: Vec<RowErrorReport>,
}

/// Turn uploaded bytes into a [`Dataset`].
///
/// # Arguments
/// * `file_name` - Name the file was uploaded under, kept for display
/// * `bytes` - Raw `.xlsx` content
/// * `options` - Pipeline toggles
///
/// # Returns
/// The dataset, or every schema violation when the workbook is unusable.
/// Row-level problems never fail the upload; they are carried in the dataset.
pub fn ingest(file_name: &str, bytes: &[u8], options: &PipelineOptions) -> Result<Dataset, IngestError> {
    let workbook = Workbook::from_xlsx_bytes(bytes).map_err(|e| IngestError::Schema(vec![e]))?;
    if options.debug {
        log::debug!("{}: sheets {:?}", file_name, workbook.sheet_names());
    }

    let validated = validate(&workbook).map_err(|errors| {
        log::warn!("{}: rejected with {} schema error(s)", file_name, errors.len());
        IngestError::Schema(errors)
    })?;

    let outcome = load_tables(&validated);
    if options.debug {
        for kind in SheetKind::ALL {
            log::debug!("{}: «{}» loaded {} row(s)", file_name, kind, outcome.tables.row_count(kind));
        }
        for error in &outcome.row_errors {
            log::debug!("{}: {}", file_name, error);
        }
    }
    if !outcome.row_errors.is_empty() {
        log::info!("{}: {} row(s) skipped", file_name, outcome.row_errors.len());
    }

    let dashboard = Dashboard::build(&outcome.tables);

    Ok(Dataset {
        file_name: file_name.to_string(),
        uploaded_at: Local::now(),
        tables: outcome.tables,
        row_errors: outcome.row_errors,
        dashboard,
    })
}

/// Current dataset of every session.
///
/// Readers get an `Arc` snapshot; replacing a session's dataset swaps the
/// pointer under the write lock, so a reader never sees a half-built one.
#[derive(Debug, Default)]
pub struct DatasetStore {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: &str) -> Option<Arc<Dataset>> {
        let datasets = self.datasets.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        datasets.get(session).cloned()
    }

    /// Install `dataset` for `session`, returning the one it replaced
    pub fn replace(&self, session: &str, dataset: Dataset) -> Option<Arc<Dataset>> {
        let dataset = Arc::new(dataset);
        let mut datasets = self.datasets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        datasets.insert(session.to_string(), dataset)
    }

    pub fn clear(&self, session: &str) {
        let mut datasets = self.datasets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        datasets.remove(session);
    }

    pub fn len(&self) -> usize {
        self.datasets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
