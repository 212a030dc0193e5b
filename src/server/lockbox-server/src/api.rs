//! HTTP API for the keychain server.
//!
//! The server owns one explicit keychain instance behind a mutex - one
//! logical session at a time, requests serialized. The core produces and
//! consumes the opaque envelope representation; this layer persists it to
//! a single store file and maps the error taxonomy onto status codes.
//!
//! ## Endpoints
//!
//! - `POST /init` - create a new keychain and persist it
//! - `POST /load` - unlock from a given repr, or from the store file
//! - `POST /set` - store an entry
//! - `GET /get/{name}` - read an entry
//! - `POST /remove` - delete an entry
//! - `GET /dump` - export and persist the current keychain
//! - `GET /health` - readiness probe

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use lockbox_keychain::{Keychain, KeychainError};

/// Shared server state: the one active keychain and the store file the
/// exported envelope is persisted to.
pub struct AppState {
    keychain: Mutex<Option<Keychain>>,
    store_path: PathBuf,
}

impl AppState {
    /// Creates server state with no active keychain.
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            keychain: Mutex::new(None),
            store_path,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Keychain>> {
        self.keychain.lock().expect("keychain lock poisoned")
    }
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/init", post(init))
        .route("/load", post(load))
        .route("/set", post(set_entry))
        .route("/get/{name}", get(get_entry))
        .route("/remove", post(remove_entry))
        .route("/dump", get(dump))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Requests & Errors
// ============================================================================

#[derive(Deserialize)]
struct InitRequest {
    password: String,
}

#[derive(Deserialize)]
struct LoadRequest {
    password: String,
    /// Transport pair `[opaque, digest]`; read from the store file when
    /// omitted.
    repr: Option<String>,
    /// Out-of-band trusted digest for substitution detection.
    trusted_digest: Option<String>,
}

#[derive(Deserialize)]
struct SetRequest {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct RemoveRequest {
    name: String,
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
enum ApiError {
    /// Core keychain error, mapped by kind.
    #[error(transparent)]
    Keychain(#[from] KeychainError),

    /// Entry lookup miss.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Store file read/write failure.
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Keychain(KeychainError::Authentication) => StatusCode::UNAUTHORIZED,
            ApiError::Keychain(KeychainError::Integrity)
            | ApiError::Keychain(KeychainError::NotInitialized)
            | ApiError::Keychain(KeychainError::MalformedEnvelope(_)) => StatusCode::BAD_REQUEST,
            ApiError::Keychain(KeychainError::Crypto(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Runs a deliberately slow key derivation off the async workers.
async fn derive_blocking<F>(f: F) -> Result<Keychain, ApiError>
where
    F: FnOnce() -> Result<Keychain, KeychainError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Keychain(KeychainError::Crypto(e.to_string())))?
        .map_err(ApiError::from)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let unlocked = state.lock().is_some();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "unlocked": unlocked,
    }))
}

async fn init(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitRequest>,
) -> Result<Json<Value>, ApiError> {
    let keychain = derive_blocking(move || Keychain::create(&req.password)).await?;

    let envelope = keychain.export()?;
    tokio::fs::write(&state.store_path, envelope.to_repr()).await?;

    *state.lock() = Some(keychain);

    info!(store = %state.store_path.display(), "keychain initialized");

    Ok(Json(json!({
        "status": "keychain initialized",
        "digest": envelope.digest,
    })))
}

async fn load(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadRequest>,
) -> Result<Json<Value>, ApiError> {
    let repr = match req.repr {
        Some(repr) => repr,
        None => tokio::fs::read_to_string(&state.store_path).await?,
    };

    let keychain = derive_blocking(move || {
        Keychain::unlock(&req.password, &repr, req.trusted_digest.as_deref())
    })
    .await?;

    let entries = keychain.len();
    *state.lock() = Some(keychain);

    info!(entries = entries, "keychain loaded");

    Ok(Json(json!({
        "status": "keychain loaded",
        "entries": entries,
    })))
}

async fn set_entry(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut guard = state.lock();
    let keychain = guard.as_mut().ok_or(KeychainError::NotInitialized)?;

    keychain.set(&req.name, &req.value)?;

    Ok(Json(json!({ "status": "entry set" })))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let guard = state.lock();
    let keychain = guard.as_ref().ok_or(KeychainError::NotInitialized)?;

    match keychain.get(&name)? {
        Some(value) => Ok(Json(json!({ "value": value }))),
        None => Err(ApiError::NotFound(name)),
    }
}

async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut guard = state.lock();
    let keychain = guard.as_mut().ok_or(KeychainError::NotInitialized)?;

    let removed = keychain.remove(&req.name);

    Ok(Json(json!({ "removed": removed })))
}

async fn dump(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let envelope = {
        let guard = state.lock();
        let keychain = guard.as_ref().ok_or(KeychainError::NotInitialized)?;
        keychain.export()?
    };

    tokio::fs::write(&state.store_path, envelope.to_repr()).await?;

    Ok(Json(json!({
        "repr": envelope.to_repr(),
        "digest": envelope.digest,
    })))
}
