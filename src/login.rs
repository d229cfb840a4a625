//! User accounts and sessions.
//!
//! Users live in a JSON file next to the config; passwords are stored as
//! Argon2 hashes. Sessions are in-memory and keyed by a random UUID carried
//! in a cookie. When authentication is disabled every visitor still gets an
//! anonymous session so uploaded datasets stay private to one browser.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Form,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

use crate::app::AppState;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Registration and login failures, worded for the user
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Пожалуйста, заполните все поля")]
    EmptyFields,

    #[error("Пароли не совпадают")]
    PasswordMismatch,

    #[error("Некорректный адрес электронной почты")]
    InvalidEmail,

    #[error("Пользователь с таким именем уже существует")]
    UserExists,

    #[error("Неверное имя пользователя или пароль")]
    InvalidCredentials,

    #[error("Ошибка при обработке пароля")]
    Hash,

    #[error("Ошибка хранилища пользователей: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Файл пользователей повреждён: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl AuthError {
    /// Whether the user can fix this by correcting the form
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            AuthError::Hash | AuthError::Storage(_) | AuthError::Corrupt(_)
        )
    }
}

/// A registered user as stored in the users file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub username: String,

    /// Full name shown in the page header
    pub name: String,

    pub email: String,

    /// Argon2 PHC string
    pub password_hash: String,
}

/// Registration form
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Registration {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_repeat: String,
}

/// Login form
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Users file access, serialized by a mutex so concurrent registrations
/// cannot overwrite each other
#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All users keyed by username; a missing file means no users yet
    pub fn load(&self) -> Result<HashMap<String, User>, AuthError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(users)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Create an account from a registration form.
    ///
    /// # Errors
    /// * `EmptyFields` if any field is blank
    /// * `PasswordMismatch` if the two passwords differ
    /// * `InvalidEmail` if the address is malformed
    /// * `UserExists` if the username is taken
    pub fn register(&self, form: &Registration) -> Result<User, AuthError> {
        let username = form.username.trim();
        let name = form.name.trim();
        let email = form.email.trim();

        if form.password != form.password_repeat {
            return Err(AuthError::PasswordMismatch);
        }
        if username.is_empty() || name.is_empty() || email.is_empty() || form.password.is_empty() {
            return Err(AuthError::EmptyFields);
        }
        if !EMAIL_PATTERN.is_match(email) {
            return Err(AuthError::InvalidEmail);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut users = self.load()?;
        if users.contains_key(username) {
            return Err(AuthError::UserExists);
        }

        let user = User {
            username: username.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: hash_password(&form.password)?,
        };
        users.insert(user.username.clone(), user.clone());
        self.save(&users)?;

        log::info!("Registered user {}", user.username);
        Ok(user)
    }

    /// Check a username/password pair
    pub fn verify(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let users = self.load()?;
        match users.get(username.trim()) {
            Some(user) if verify_password(password, &user.password_hash) => Ok(user.clone()),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Hash)
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Who a session belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub session_id: String,
    /// `None` for anonymous sessions
    pub username: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
struct Session {
    username: Option<String>,
    name: Option<String>,
    expires_at: SystemTime,
}

/// Live sessions
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    lifetime: Duration,
}

impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn with_expiry_days(days: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(days) * 24 * 60 * 60))
    }

    /// Start a session for `user`, or an anonymous one
    pub fn create(&self, user: Option<&User>) -> Identity {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            username: user.map(|u| u.username.clone()),
            name: user.map(|u| u.name.clone()),
            expires_at: SystemTime::now() + self.lifetime,
        };

        let identity = Identity {
            session_id: session_id.clone(),
            username: session.username.clone(),
            name: session.name.clone(),
        };
        let mut sessions = self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.insert(session_id, session);
        identity
    }

    /// Identity behind `session_id` if it exists and hasn't expired
    pub fn get(&self, session_id: &str) -> Option<Identity> {
        let sessions = self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .get(session_id)
            .filter(|s| s.expires_at > SystemTime::now())
            .map(|s| Identity {
                session_id: session_id.to_string(),
                username: s.username.clone(),
                name: s.name.clone(),
            })
    }

    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.remove(session_id);
    }

    /// Drop expired sessions, returning their ids
    pub fn purge_expired(&self) -> Vec<String> {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }
}

fn session_cookie(name: &str, session_id: String) -> Cookie<'static> {
    Cookie::build((name.to_string(), session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

#[derive(Debug, Deserialize, Default)]
pub struct NoticeQuery {
    #[serde(default)]
    pub registered: bool,
}

#[derive(Serialize)]
struct AuthPage<'a> {
    error: Option<String>,
    notice: Option<&'a str>,
    username: &'a str,
    name: &'a str,
    email: &'a str,
    auth_required: bool,
}

fn render_auth_page(state: &AppState, template: &str, page: &AuthPage<'_>, status: StatusCode) -> Response {
    match state.templates.render(template, page) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            log::error!("Failed to render {}: {}", template, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Ошибка отображения страницы").into_response()
        }
    }
}

/// Serve the login page
pub async fn serve_login_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let notice = query
        .registered
        .then_some("Регистрация успешна! Теперь вы можете войти в систему.");
    render_auth_page(
        &state,
        "login",
        &AuthPage {
            error: None,
            notice,
            username: "",
            name: "",
            email: "",
            auth_required: state.settings.auth.required,
        },
        StatusCode::OK,
    )
}

/// Serve the registration page
pub async fn serve_register_page(State(state): State<Arc<AppState>>) -> Response {
    render_auth_page(
        &state,
        "register",
        &AuthPage {
            error: None,
            notice: None,
            username: "",
            name: "",
            email: "",
            auth_required: state.settings.auth.required,
        },
        StatusCode::OK,
    )
}

/// Handle login form submissions
///
/// On success the visitor's previous session (anonymous or not) is replaced
/// and they are sent to the dashboard.
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> Response {
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return login_failed(&state, &credentials, AuthError::EmptyFields);
    }

    match state.users.verify(&credentials.username, &credentials.password) {
        Ok(user) => {
            let cookie_name = &state.settings.auth.cookie_name;
            if let Some(old) = jar.get(cookie_name) {
                state.sessions.remove(old.value());
                state.datasets.clear(old.value());
            }
            let identity = state.sessions.create(Some(&user));
            log::info!("User {} logged in", user.username);
            (
                jar.add(session_cookie(cookie_name, identity.session_id)),
                Redirect::to("/dashboard"),
            )
                .into_response()
        }
        Err(e) => login_failed(&state, &credentials, e),
    }
}

fn login_failed(state: &AppState, credentials: &Credentials, error: AuthError) -> Response {
    let status = if error.is_user_error() {
        log::debug!("Login rejected for {}: {}", credentials.username, error);
        StatusCode::UNAUTHORIZED
    } else {
        log::error!("Login failed: {}", error);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    render_auth_page(
        state,
        "login",
        &AuthPage {
            error: Some(error.to_string()),
            notice: None,
            username: &credentials.username,
            name: "",
            email: "",
            auth_required: state.settings.auth.required,
        },
        status,
    )
}

/// Handle registration form submissions
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Form(form): Form<Registration>,
) -> Response {
    match state.users.register(&form) {
        Ok(_) => Redirect::to("/login?registered=true").into_response(),
        Err(error) => {
            let status = if error.is_user_error() {
                StatusCode::BAD_REQUEST
            } else {
                log::error!("Registration failed: {}", error);
                StatusCode::INTERNAL_SERVER_ERROR
            };
            render_auth_page(
                &state,
                "register",
                &AuthPage {
                    error: Some(error.to_string()),
                    notice: None,
                    username: &form.username,
                    name: &form.name,
                    email: &form.email,
                    auth_required: state.settings.auth.required,
                },
                status,
            )
        }
    }
}

/// Forget the session and its dataset, then go back to the login page
pub async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let cookie_name = state.settings.auth.cookie_name.clone();
    if let Some(cookie) = jar.get(&cookie_name) {
        state.sessions.remove(cookie.value());
        state.datasets.clear(cookie.value());
    }
    (
        jar.remove(Cookie::build(cookie_name).path("/")),
        Redirect::to("/login"),
    )
        .into_response()
}

/// Session middleware for every protected route.
///
/// A valid session cookie puts its [`Identity`] into the request extensions.
/// Without one, an anonymous session is issued when authentication is off;
/// otherwise API calls get 401 and pages redirect to `/login`.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_name = state.settings.auth.cookie_name.clone();
    let existing = jar
        .get(&cookie_name)
        .and_then(|cookie| state.sessions.get(cookie.value()))
        .filter(|identity| identity.username.is_some() || !state.settings.auth.required);

    if let Some(identity) = existing {
        request.extensions_mut().insert(identity);
        return next.run(request).await;
    }

    if !state.settings.auth.required {
        let identity = state.sessions.create(None);
        let cookie = session_cookie(&cookie_name, identity.session_id.clone());
        request.extensions_mut().insert(identity);
        let response = next.run(request).await;
        return (jar.add(cookie), response).into_response();
    }

    if request.uri().path().starts_with("/api/") {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "Требуется вход в систему" })),
        )
            .into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}
