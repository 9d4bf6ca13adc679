//! HTTP sidebar and Integration REST routes (spec §6), following the
//! teacher's `AppError`/`IntoResponse` error-response pattern
//! (`api/handlers.rs`) instead of inventing a second error type.

use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::{SlackConfig, TelegramConfig};

use super::AppState;

const MAX_TRANSCRIBE_BYTES: usize = 4 * 1024 * 1024;

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ---------------------------------------------------------------- sidebar

#[derive(Deserialize)]
pub struct ReadFileRequest {
    path: String,
}

#[derive(Serialize)]
pub struct ReadFileResponse {
    path: String,
    content: String,
}

/// Reads restricted to paths under a currently-managed agent's `cwd`
/// (spec §6 "reads restricted to user-owned paths" — this daemon has no
/// separate account system, so "owned" means "inside a directory the user
/// already pointed a manager at").
pub async fn read_file(
    State(state): State<AppState>,
    Json(req): Json<ReadFileRequest>,
) -> Result<Json<ReadFileResponse>, AppError> {
    let canonical = std::path::Path::new(&req.path)
        .canonicalize()
        .map_err(|_| AppError::NotFound(format!("no such file: {}", req.path)))?;

    let agents = state.swarm.snapshot().await;
    let owned = agents.iter().any(|agent| {
        std::path::Path::new(&agent.cwd)
            .canonicalize()
            .is_ok_and(|cwd| canonical.starts_with(cwd))
    });
    if !owned {
        return Err(AppError::BadRequest("path is outside any managed working directory".into()));
    }

    let content = std::fs::read_to_string(&canonical).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(ReadFileResponse { path: req.path, content }))
}

#[derive(Serialize)]
pub struct TranscribeResponse {
    text: String,
}

/// Accepts a multipart voice clip (max 4 MB). No speech-to-text backend is
/// wired into this build; the transport/size-limit plumbing is real, the
/// recognition step is a no-op returning empty text.
pub async fn transcribe(mut multipart: Multipart) -> Result<Json<TranscribeResponse>, AppError> {
    let mut total_bytes = 0usize;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
        total_bytes += bytes.len();
        if total_bytes > MAX_TRANSCRIBE_BYTES {
            return Err(AppError::BadRequest("audio exceeds 4 MB limit".into()));
        }
    }
    Ok(Json(TranscribeResponse { text: String::new() }))
}

pub async fn get_version() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

// ------------------------------------------------------------ integrations

#[derive(Serialize)]
struct IntegrationResponse {
    config: serde_json::Value,
    status: &'static str,
}

/// Shows only the trailing 4 characters of a secret, matching the masked
/// previews spec §6 requires ("never includes secrets in clear").
fn mask_secret(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let tail: String = raw.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{tail}")
}

pub async fn get_slack_integration(
    State(state): State<AppState>,
    Path(manager_id): Path<String>,
) -> Result<Json<IntegrationResponse>, AppError> {
    let path = state.data_dirs.integration_file(&format!("slack-{manager_id}"));
    let mut config: SlackConfig = std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();
    config.app_token = mask_secret(&config.app_token);
    config.bot_token = mask_secret(&config.bot_token);
    let status = if config.enabled { "enabled" } else { "disabled" };
    Ok(Json(IntegrationResponse {
        config: serde_json::to_value(config).map_err(|e| AppError::Internal(e.to_string()))?,
        status,
    }))
}

pub async fn put_slack_integration(
    State(state): State<AppState>,
    Path(manager_id): Path<String>,
    Json(mut config): Json<SlackConfig>,
) -> Result<Json<IntegrationResponse>, AppError> {
    config.manager_id = manager_id.clone();
    let bytes = serde_json::to_vec(&config).map_err(|e| AppError::Internal(e.to_string()))?;
    let path = state.data_dirs.integration_file(&format!("slack-{manager_id}"));
    crate::persistence::write_atomic_private(&path, &bytes).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut masked = config;
    masked.app_token = mask_secret(&masked.app_token);
    masked.bot_token = mask_secret(&masked.bot_token);
    let status = if masked.enabled { "enabled" } else { "disabled" };
    Ok(Json(IntegrationResponse {
        config: serde_json::to_value(masked).map_err(|e| AppError::Internal(e.to_string()))?,
        status,
    }))
}

pub async fn get_telegram_integration(
    State(state): State<AppState>,
    Path(manager_id): Path<String>,
) -> Result<Json<IntegrationResponse>, AppError> {
    let path = state.data_dirs.integration_file(&format!("telegram-{manager_id}"));
    let mut config: TelegramConfig = std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();
    config.bot_token = mask_secret(&config.bot_token);
    let status = if config.enabled { "enabled" } else { "disabled" };
    Ok(Json(IntegrationResponse {
        config: serde_json::to_value(config).map_err(|e| AppError::Internal(e.to_string()))?,
        status,
    }))
}

pub async fn put_telegram_integration(
    State(state): State<AppState>,
    Path(manager_id): Path<String>,
    Json(mut config): Json<TelegramConfig>,
) -> Result<Json<IntegrationResponse>, AppError> {
    config.manager_id = manager_id.clone();
    let bytes = serde_json::to_vec(&config).map_err(|e| AppError::Internal(e.to_string()))?;
    let path = state.data_dirs.integration_file(&format!("telegram-{manager_id}"));
    crate::persistence::write_atomic_private(&path, &bytes).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut masked = config;
    masked.bot_token = mask_secret(&masked.bot_token);
    let status = if masked.enabled { "enabled" } else { "disabled" };
    Ok(Json(IntegrationResponse {
        config: serde_json::to_value(masked).map_err(|e| AppError::Internal(e.to_string()))?,
        status,
    }))
}

/// Google Workspace config has no per-manager scope (one OAuth client for
/// the whole daemon), unlike Slack/Telegram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GsuiteConfig {
    enabled: bool,
    client_id: String,
    client_secret: String,
}

pub async fn get_gsuite_integration(State(state): State<AppState>) -> Result<Json<IntegrationResponse>, AppError> {
    let path = state.data_dirs.integration_file("gsuite");
    let mut config: GsuiteConfig = std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();
    config.client_secret = mask_secret(&config.client_secret);
    let status = if config.enabled { "enabled" } else { "disabled" };
    Ok(Json(IntegrationResponse {
        config: serde_json::to_value(config).map_err(|e| AppError::Internal(e.to_string()))?,
        status,
    }))
}

pub async fn put_gsuite_integration(
    State(state): State<AppState>,
    Json(config): Json<GsuiteConfig>,
) -> Result<Json<IntegrationResponse>, AppError> {
    let bytes = serde_json::to_vec(&config).map_err(|e| AppError::Internal(e.to_string()))?;
    let path = state.data_dirs.integration_file("gsuite");
    crate::persistence::write_atomic_private(&path, &bytes).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut masked = config;
    masked.client_secret = mask_secret(&masked.client_secret);
    let status = if masked.enabled { "enabled" } else { "disabled" };
    Ok(Json(IntegrationResponse {
        config: serde_json::to_value(masked).map_err(|e| AppError::Internal(e.to_string()))?,
        status,
    }))
}

// ------------------------------------------------------------------ settings

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EnvSettings {
    #[serde(flatten)]
    vars: HashMap<String, String>,
}

pub async fn get_env_settings(State(state): State<AppState>) -> Result<Json<EnvSettings>, AppError> {
    let path = state.data_dirs.env_dir().join("env.json");
    let settings: EnvSettings = std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();
    let masked = EnvSettings {
        vars: settings.vars.into_iter().map(|(k, v)| (k, mask_secret(&v))).collect(),
    };
    Ok(Json(masked))
}

pub async fn put_env_settings(
    State(state): State<AppState>,
    Json(settings): Json<EnvSettings>,
) -> Result<Json<EnvSettings>, AppError> {
    let bytes = serde_json::to_vec(&settings).map_err(|e| AppError::Internal(e.to_string()))?;
    let path = state.data_dirs.env_dir().join("env.json");
    crate::persistence::write_atomic_private(&path, &bytes).map_err(|e| AppError::Internal(e.to_string()))?;
    let masked = EnvSettings {
        vars: settings.vars.into_iter().map(|(k, v)| (k, mask_secret(&v))).collect(),
    };
    Ok(Json(masked))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AuthSettings {
    api_keys: HashMap<String, String>,
}

pub async fn get_auth_settings(State(state): State<AppState>) -> Result<Json<AuthSettings>, AppError> {
    let settings: AuthSettings = std::fs::read(state.data_dirs.auth_file())
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();
    Ok(Json(AuthSettings {
        api_keys: settings.api_keys.into_iter().map(|(k, v)| (k, mask_secret(&v))).collect(),
    }))
}

pub async fn put_auth_settings(
    State(state): State<AppState>,
    Json(settings): Json<AuthSettings>,
) -> Result<Json<AuthSettings>, AppError> {
    let bytes = serde_json::to_vec(&settings).map_err(|e| AppError::Internal(e.to_string()))?;
    crate::persistence::write_atomic_private(&state.data_dirs.auth_file(), &bytes)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(AuthSettings {
        api_keys: settings.api_keys.into_iter().map(|(k, v)| (k, mask_secret(&v))).collect(),
    }))
}
