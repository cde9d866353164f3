// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use fetcharr_application::webhook::{WebhookEvent, WebhookHandler, WebhookStatus};
use fetcharr_infrastructure::repositories::MediaRepository;
use fetcharr_orchestrator::Orchestrator;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ApiState {
    pub media_repo: Arc<dyn MediaRepository>,
    pub webhook: Arc<WebhookHandler>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/webhook", post(webhook))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct StatusItem {
    trakt_id: i64,
    title: String,
    kind: String,
    status: String,
    on_disk: bool,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    counts: HashMap<String, usize>,
    tasks: HashMap<String, String>,
    items: Vec<StatusItem>,
}

async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, StatusCode> {
    let media = state.media_repo.find_all().await.map_err(|err| {
        error!(target: "api", error = %err, "status query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut items = Vec::with_capacity(media.len());
    for m in media {
        *counts.entry(m.status.to_string()).or_default() += 1;
        items.push(StatusItem {
            trakt_id: m.trakt_id,
            title: m.title,
            kind: m.kind.to_string(),
            status: m.status.to_string(),
            on_disk: m.on_disk,
        });
    }

    let tasks = state
        .orchestrator
        .task_states()
        .await
        .into_iter()
        .map(|(name, status)| (name.to_string(), status.to_string()))
        .collect();

    Ok(Json(StatusResponse { counts, tasks, items }))
}

/// Raw webhook body. Downloaders either send the normalized fields
/// directly or a notification envelope whose message carries the release
/// name or content hash.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub download_id: Option<i64>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

lazy_static! {
    static ref DOWNLOAD_NAME_REGEX: Regex =
        Regex::new(r"download (.+?) has").expect("valid download name regex");
    static ref HASH_REGEX: Regex =
        Regex::new(r"hash ([a-f0-9]{32})").expect("valid hash regex");
}

pub fn normalize_payload(payload: &WebhookPayload) -> WebhookEvent {
    if let Some(status) = payload.status.as_deref() {
        return WebhookEvent {
            handle: payload.handle.clone(),
            hash: payload.hash.clone(),
            name: payload.name.clone(),
            status: parse_status(status),
            error: payload.error.clone(),
            path: payload.path.clone(),
            download_id: payload.download_id,
        };
    }

    let Some(data) = payload.data.as_ref() else {
        return WebhookEvent {
            handle: payload.handle.clone(),
            hash: payload.hash.clone(),
            name: payload.name.clone(),
            status: WebhookStatus::Unknown,
            error: payload.error.clone(),
            path: payload.path.clone(),
            download_id: payload.download_id,
        };
    };

    let status = match data.title.as_str() {
        "Usenet Download Completed" => WebhookStatus::Completed,
        "Usenet Download Failed" => WebhookStatus::Failed,
        _ => WebhookStatus::Unknown,
    };

    let name = DOWNLOAD_NAME_REGEX
        .captures(&data.message)
        .map(|caps| caps[1].to_string());
    let hash = HASH_REGEX.captures(&data.message).map(|caps| caps[1].to_string());

    WebhookEvent {
        handle: None,
        hash,
        name,
        status,
        error: (status == WebhookStatus::Failed).then(|| data.message.clone()),
        path: None,
        download_id: None,
    }
}

fn parse_status(status: &str) -> WebhookStatus {
    match status.trim().to_lowercase().as_str() {
        "completed" | "success" => WebhookStatus::Completed,
        "failed" | "error" => WebhookStatus::Failed,
        _ => WebhookStatus::Unknown,
    }
}

async fn webhook(
    State(state): State<ApiState>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    let event = normalize_payload(&payload);

    if event.status == WebhookStatus::Unknown
        && event.handle.is_none()
        && event.hash.is_none()
        && event.name.is_none()
    {
        warn!(target: "api", "webhook without extractable key or status, acknowledged");
        return (StatusCode::OK, Json(json!({ "status": "ok" })));
    }

    info!(
        target: "api",
        status = ?event.status,
        name = event.name.as_deref().unwrap_or(""),
        "webhook received"
    );

    match state.webhook.handle(event).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => {
            error!(target: "api", error = %err, "failed to process webhook");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": err.to_string() })),
            )
        }
    }
}
