//! HTTP server: routing, dashboard pages and the JSON/PNG/CSV endpoints.

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::Query;
use chrono::Local;
use handlebars::Handlebars;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::aggregator::{DashboardView, SeriesKind, TimeRange, expense_categories};
use crate::config::Settings;
use crate::downloader;
use crate::error::SchemaError;
use crate::graph::{self, ChartError, ChartOptions};
use crate::insights::{self, Insights};
use crate::login::{self, Identity, SessionStore, UserStore};
use crate::models::{YearMonth, normalize_category};
use crate::pipeline::{Dataset, DatasetStore, IngestReport, SchemaErrorReport, ingest};
use crate::schema::SheetKind;

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Everything the handlers share
pub struct AppState {
    pub settings: Settings,
    pub users: UserStore,
    pub sessions: SessionStore,
    pub datasets: DatasetStore,
    pub templates: Handlebars<'static>,
}

impl AppState {
    /// Build the state for `settings`, compiling the page templates
    pub fn new(settings: Settings) -> Result<Self, handlebars::TemplateError> {
        let mut templates = Handlebars::new();
        templates.register_partial("styles", include_str!("./templates/styles.hbs"))?;
        templates.register_template_string("login", include_str!("./templates/login.hbs"))?;
        templates.register_template_string("register", include_str!("./templates/register.hbs"))?;
        templates.register_template_string("dashboard", include_str!("./templates/dashboard.hbs"))?;

        Ok(Self {
            users: UserStore::new(settings.auth.users_file.clone()),
            sessions: SessionStore::with_expiry_days(settings.auth.expiry_days),
            datasets: DatasetStore::new(),
            templates,
            settings,
        })
    }

    /// Drop expired sessions together with their datasets
    pub fn purge_expired_sessions(&self) -> usize {
        let expired = self.sessions.purge_expired();
        for session_id in &expired {
            self.datasets.clear(session_id);
        }
        expired.len()
    }
}

/// Build the application router.
///
/// Everything except health, auth pages and the template download goes
/// through the session middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(|| async { Redirect::to("/dashboard") }))
        .route("/dashboard", get(serve_dashboard))
        .route("/dashboard/upload", post(handle_dashboard_upload))
        .route("/api/upload", post(api_upload))
        .route("/api/dashboard", get(api_dashboard))
        .route("/api/insights", get(api_insights))
        .route("/charts/:file", get(serve_chart))
        .route("/export/:file", get(export_series))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_session,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route(
            "/register",
            get(login::serve_register_page).post(login::handle_register),
        )
        .route("/logout", get(login::handle_logout))
        .route("/template.xlsx", get(download_template))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.settings.server.max_upload_bytes))
        .with_state(state)
}

/// Start the server and block until it stops
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let bind = settings.server.bind.clone();
    if !settings.auth.required {
        log::warn!("Authentication is disabled; visitors get anonymous sessions");
    }
    let state = Arc::new(AppState::new(settings)?);

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            let purged = sweeper.purge_expired_sessions();
            if purged > 0 {
                log::debug!("Purged {} expired session(s)", purged);
            }
        }
    });

    let listener = TcpListener::bind(&bind).await?;
    log::info!("Listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Local::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Display options taken from the query string.
///
/// Categories come either as repeated `category=` pairs (the dashboard form)
/// or as one comma-separated `categories=` value.
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    category: Vec<String>,
    #[serde(default)]
    categories: Option<String>,
}

impl ViewQuery {
    fn view(&self) -> Result<DashboardView, String> {
        let range = match self.range.as_deref().map(str::trim) {
            None | Some("") => TimeRange::default(),
            Some(code) => code.parse()?,
        };

        let mut selected: Vec<String> = self.category.clone();
        if let Some(list) = &self.categories {
            selected.extend(list.split(',').map(|c| c.trim().to_string()));
        }
        selected.retain(|c| !c.trim().is_empty());

        Ok(DashboardView {
            range,
            categories: (!selected.is_empty()).then_some(selected),
        })
    }
}

/// Query string reproducing `view`, for chart and export links
fn query_string(view: &DashboardView) -> String {
    let mut parts = Vec::new();
    if view.range != TimeRange::default() {
        parts.push(format!("range={}", view.range.code()));
    }
    for category in view.categories.iter().flatten() {
        parts.push(format!("category={}", urlencoding::encode(category)));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}

/// `1234567.8` → `1 234 567,80 ₽`
fn format_rub(value: Decimal) -> String {
    let rounded = value.round_dp(2);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let text = format!("{:.2}", rounded.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(digit);
    }
    format!("{}{},{} ₽", sign, grouped, fraction)
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn no_dataset() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Данные не загружены" })),
    )
        .into_response()
}

#[derive(Serialize)]
struct SheetRows {
    caption: &'static str,
    rows: usize,
}

#[derive(Serialize)]
struct DatasetView {
    file_name: String,
    uploaded_at: String,
    rows: Vec<SheetRows>,
    skipped: usize,
    row_errors: Vec<String>,
}

#[derive(Serialize)]
struct InsightsView {
    month: String,
    net_worth: Option<String>,
    net_worth_change: Option<String>,
    trend: Option<&'static str>,
    income: String,
    expenses: String,
    savings_rate: String,
    top_expenses: Vec<String>,
    budget_warnings: Vec<String>,
}

impl From<&Insights> for InsightsView {
    fn from(insights: &Insights) -> Self {
        let net_worth = insights.net_worth.as_ref();
        Self {
            month: insights.monthly.month.to_string(),
            net_worth: net_worth.map(|n| format_rub(n.current)),
            net_worth_change: net_worth
                .and_then(|n| n.change_percent)
                .map(|p| format!("{:+.2}%", p)),
            trend: net_worth.map(|n| n.trend.label()),
            income: format_rub(insights.monthly.income),
            expenses: format_rub(insights.monthly.expenses),
            savings_rate: format!("{:.1}%", insights.monthly.savings_rate),
            top_expenses: insights
                .top_expenses
                .iter()
                .map(|t| format!("{}: {}", t.category, format_rub(t.total)))
                .collect(),
            budget_warnings: insights
                .budget_warnings
                .iter()
                .map(|w| {
                    format!(
                        "{}: превышение на {} (бюджет {}, факт {})",
                        w.category,
                        format_rub(w.overspend),
                        format_rub(w.budget),
                        format_rub(w.actual)
                    )
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct RangeOption {
    code: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Serialize)]
struct CategoryOption {
    name: String,
    selected: bool,
}

#[derive(Serialize)]
struct ChartView {
    slug: &'static str,
    title: &'static str,
    available: bool,
    message: Option<String>,
}

#[derive(Serialize)]
struct DashboardPage {
    user_name: Option<String>,
    auth_required: bool,
    schema_errors: Vec<String>,
    dataset: Option<DatasetView>,
    insights: Option<InsightsView>,
    ranges: Vec<RangeOption>,
    categories: Vec<CategoryOption>,
    charts: Vec<ChartView>,
    view_query: String,
}

fn dashboard_page(
    state: &AppState,
    identity: &Identity,
    dataset: Option<&Dataset>,
    view: &DashboardView,
    schema_errors: &[SchemaError],
) -> DashboardPage {
    let selected_keys: Option<Vec<String>> = view
        .categories
        .as_ref()
        .map(|names| names.iter().map(|n| normalize_category(n)).collect());

    let mut page = DashboardPage {
        user_name: identity.name.clone().or_else(|| identity.username.clone()),
        auth_required: state.settings.auth.required,
        schema_errors: schema_errors.iter().map(|e| e.to_string()).collect(),
        dataset: None,
        insights: None,
        ranges: TimeRange::ALL
            .into_iter()
            .map(|r| RangeOption {
                code: r.code(),
                label: r.label(),
                selected: r == view.range,
            })
            .collect(),
        categories: Vec::new(),
        charts: Vec::new(),
        view_query: query_string(view),
    };

    let Some(dataset) = dataset else {
        return page;
    };

    let dashboard = dataset.dashboard_for(view);
    let month = YearMonth::of(Local::now().date_naive());

    page.dataset = Some(DatasetView {
        file_name: dataset.file_name.clone(),
        uploaded_at: dataset.uploaded_at.format("%d.%m.%Y %H:%M").to_string(),
        rows: SheetKind::ALL
            .into_iter()
            .map(|kind| SheetRows {
                caption: kind.caption(),
                rows: dataset.tables.row_count(kind),
            })
            .collect(),
        skipped: dataset.row_errors.len(),
        row_errors: dataset.row_errors.iter().map(|e| e.to_string()).collect(),
    });
    page.insights = Some(InsightsView::from(&insights::calculate(&dataset.tables, month)));
    page.categories = expense_categories(&dataset.tables.expenses)
        .into_iter()
        .map(|name| CategoryOption {
            selected: selected_keys
                .as_ref()
                .is_some_and(|keys| keys.contains(&normalize_category(&name))),
            name,
        })
        .collect();
    page.charts = SeriesKind::ALL
        .into_iter()
        .map(|kind| {
            let missing = dashboard.missing(kind);
            ChartView {
                slug: kind.slug(),
                title: kind.title(),
                available: missing.is_none(),
                message: missing.map(|e| e.to_string()),
            }
        })
        .collect();
    page
}

fn render_dashboard(
    state: &AppState,
    identity: &Identity,
    view: &DashboardView,
    schema_errors: &[SchemaError],
    status: StatusCode,
) -> Response {
    let dataset = state.datasets.get(&identity.session_id);
    let page = dashboard_page(state, identity, dataset.as_deref(), view, schema_errors);
    match state.templates.render("dashboard", &page) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            log::error!("Failed to render dashboard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка отображения страницы").into_response()
        }
    }
}

async fn serve_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ViewQuery>,
) -> Response {
    match query.view() {
        Ok(view) => render_dashboard(&state, &identity, &view, &[], StatusCode::OK),
        Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

/// Pull the `file` field out of a multipart upload
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), e.body_text()))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload.xlsx").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| (e.status(), e.body_text()))?;
            return Ok((file_name, bytes.to_vec()));
        }
    }
    Err((StatusCode::BAD_REQUEST, "Файл не выбран".to_string()))
}

enum UploadOutcome {
    Stored(IngestReport),
    Rejected(Vec<SchemaError>),
}

/// Run the pipeline off the async executor and store the result for the
/// session. A rejected upload leaves the session's dataset untouched.
async fn process_upload(
    state: &AppState,
    identity: &Identity,
    file_name: String,
    bytes: Vec<u8>,
) -> Result<UploadOutcome, (StatusCode, String)> {
    let options = state.settings.pipeline_options();
    log::info!("Upload of {} ({} bytes)", file_name, bytes.len());

    let result = tokio::task::spawn_blocking(move || ingest(&file_name, &bytes, &options))
        .await
        .map_err(|e| {
            log::error!("Upload processing failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Ошибка обработки файла".to_string(),
            )
        })?;

    match result {
        Ok(dataset) => {
            let report = dataset.report();
            state.datasets.replace(&identity.session_id, dataset);
            Ok(UploadOutcome::Stored(report))
        }
        Err(e) => Ok(UploadOutcome::Rejected(e.schema_errors().to_vec())),
    }
}

async fn handle_dashboard_upload(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Response {
    let (file_name, bytes) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err((status, message)) => return (status, message).into_response(),
    };

    match process_upload(&state, &identity, file_name, bytes).await {
        Ok(UploadOutcome::Stored(_)) => Redirect::to("/dashboard").into_response(),
        Ok(UploadOutcome::Rejected(errors)) => render_dashboard(
            &state,
            &identity,
            &DashboardView::default(),
            &errors,
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        Err((status, message)) => (status, message).into_response(),
    }
}

async fn api_upload(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Response {
    let (file_name, bytes) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err((status, message)) => {
            return (status, Json(serde_json::json!({ "error": message }))).into_response();
        }
    };

    match process_upload(&state, &identity, file_name, bytes).await {
        Ok(UploadOutcome::Stored(report)) => Json(report).into_response(),
        Ok(UploadOutcome::Rejected(errors)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "error": "Файл не соответствует ожидаемой структуре",
                "schema_errors": errors.iter().map(SchemaErrorReport::from).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err((status, message)) => {
            (status, Json(serde_json::json!({ "error": message }))).into_response()
        }
    }
}

async fn api_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ViewQuery>,
) -> Response {
    let view = match query.view() {
        Ok(view) => view,
        Err(message) => return bad_request(message),
    };
    let Some(dataset) = state.datasets.get(&identity.session_id) else {
        return no_dataset();
    };

    Json(serde_json::json!({
        "file_name": dataset.file_name,
        "range": view.range,
        "categories": expense_categories(&dataset.tables.expenses),
        "series": dataset.dashboard_for(&view),
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct MonthQuery {
    #[serde(default)]
    month: Option<String>,
}

async fn api_insights(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<MonthQuery>,
) -> Response {
    let month = match query.month.as_deref() {
        None | Some("") => YearMonth::of(Local::now().date_naive()),
        Some(raw) => match raw.parse::<YearMonth>() {
            Ok(month) => month,
            Err(message) => return bad_request(message),
        },
    };
    let Some(dataset) = state.datasets.get(&identity.session_id) else {
        return no_dataset();
    };

    Json(insights::calculate(&dataset.tables, month)).into_response()
}

/// Resolve `<slug>.<extension>` from a path segment
fn series_from_file(file: &str, extension: &str) -> Option<SeriesKind> {
    file.strip_suffix(extension)?.parse().ok()
}

async fn serve_chart(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(file): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Response {
    let Some(kind) = series_from_file(&file, ".png") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let view = match query.view() {
        Ok(view) => view,
        Err(message) => return bad_request(message),
    };
    let Some(dataset) = state.datasets.get(&identity.session_id) else {
        return no_dataset();
    };

    let dashboard = dataset.dashboard_for(&view);
    match graph::render(&dashboard, kind, &ChartOptions::default()) {
        Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Err(ChartError::NoData(e)) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        Err(e) => {
            log::error!("Chart {} failed: {}", kind.slug(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn export_series(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(file): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Response {
    let Some(kind) = series_from_file(&file, ".csv") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let view = match query.view() {
        Ok(view) => view,
        Err(message) => return bad_request(message),
    };
    let Some(dataset) = state.datasets.get(&identity.session_id) else {
        return no_dataset();
    };

    match downloader::series_csv(&dataset.dashboard_for(&view), kind) {
        Ok(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.csv\"", kind.slug()),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => {
            log::error!("Export of {} failed: {}", kind.slug(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn download_template() -> Response {
    match downloader::template_xlsx() {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"finance_template.xlsx\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            log::error!("Template generation failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineOptions, ingest};

    #[test]
    fn rubles_are_grouped_by_thousands() {
        assert_eq!(format_rub("1234567.8".parse().unwrap()), "1 234 567,80 ₽");
        assert_eq!(format_rub("999".parse().unwrap()), "999,00 ₽");
        assert_eq!(format_rub("-1500.255".parse().unwrap()), "-1 500,26 ₽");
        assert_eq!(format_rub(Decimal::ZERO), "0,00 ₽");
    }

    #[test]
    fn view_query_accepts_both_category_forms() {
        let query = ViewQuery {
            range: Some("1y".to_string()),
            category: vec!["Еда".to_string()],
            categories: Some("Транспорт, ".to_string()),
        };
        let view = query.view().unwrap();
        assert_eq!(view.range, TimeRange::OneYear);
        assert_eq!(
            view.categories,
            Some(vec!["Еда".to_string(), "Транспорт".to_string()])
        );
        assert_eq!(
            query_string(&view),
            "?range=1Y&category=%D0%95%D0%B4%D0%B0&category=%D0%A2%D1%80%D0%B0%D0%BD%D1%81%D0%BF%D0%BE%D1%80%D1%82"
        );
    }

    #[test]
    fn default_view_has_empty_query_string() {
        let view = ViewQuery::default().view().unwrap();
        assert_eq!(view, DashboardView::default());
        assert_eq!(query_string(&view), "");
        assert!(ViewQuery {
            range: Some("2W".to_string()),
            ..ViewQuery::default()
        }
        .view()
        .is_err());
    }

    #[test]
    fn series_file_names() {
        assert_eq!(series_from_file("net_worth.png", ".png"), Some(SeriesKind::NetWorth));
        assert_eq!(series_from_file("budget.csv", ".csv"), Some(SeriesKind::Budget));
        assert_eq!(series_from_file("budget.csv", ".png"), None);
        assert_eq!(series_from_file("pie.png", ".png"), None);
    }

    #[test]
    fn expired_sessions_release_their_datasets() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.auth.users_file = temp_dir.path().join("users.json");
        let mut state = AppState::new(settings).unwrap();
        state.sessions = SessionStore::new(Duration::from_millis(1));

        let identity = state.sessions.create(None);
        let bytes = downloader::template_xlsx().unwrap();
        let dataset = ingest("template.xlsx", &bytes, &PipelineOptions::default()).unwrap();
        state.datasets.replace(&identity.session_id, dataset);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(state.purge_expired_sessions(), 1);
        assert!(state.datasets.is_empty());
    }
}
