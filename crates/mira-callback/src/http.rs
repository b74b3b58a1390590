//! Route table and handlers for the callback server.
//!
//! Every handler validates its inputs, delegates to the matching service
//! trait, and wraps failures in a JSON `{error}` envelope so the sidecar can
//! surface them as tool errors. Bodies are capped at 1 MB.

use std::collections::HashMap;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::services::{CardPatch, NewCard, RecordingSearch};
use crate::CallbackState;

const MAX_BODY_BYTES: usize = 1_048_576;

pub(crate) enum CallbackError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            CallbackError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            CallbackError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            CallbackError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn failed(e: anyhow::Error) -> CallbackError {
    tracing::error!("Callback handler failed: {:#}", e);
    CallbackError::Internal(e.to_string())
}

type HandlerResult = Result<Json<Value>, CallbackError>;

pub(crate) fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/journal/entries", get(journal_entries))
        .route("/journal/entries/{id}", delete(journal_delete))
        .route("/journal/status", get(journal_status))
        .route("/journal/trigger", post(journal_trigger))
        .route("/kanban/board", get(kanban_board))
        .route("/kanban/card", post(kanban_create))
        .route("/kanban/card/{id}", put(kanban_update).delete(kanban_delete))
        .route("/kanban/move/{id}", post(kanban_move))
        .route(
            "/memory/search",
            get(memory_search_get).post(memory_search_post),
        )
        .route("/memory/write", post(memory_write))
        .route("/life/context", get(life_context).put(life_update))
        .route("/life/analysis", get(life_analysis))
        .route("/life/analysis/refresh", post(life_refresh))
        .route("/profile/board", get(profile_board))
        .route("/profile/refresh", post(profile_refresh))
        .route("/recordings", get(recordings_list))
        .route("/recordings/search", post(recordings_search))
        .route(
            "/recordings/{id}",
            put(recordings_update).delete(recordings_delete),
        )
        .route("/app/navigate", post(app_navigate))
        .route("/app/notify", post(app_notify))
        .route("/app/status", get(app_status))
        .route("/config", get(config_view))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found(method: Method, uri: Uri) -> CallbackError {
    CallbackError::NotFound(format!("Not found: {} {}", method, uri.path()))
}

fn parse_limit(params: &HashMap<String, String>, default: usize) -> usize {
    params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// --- journal ---

async fn journal_entries(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult {
    let entries = state
        .journal
        .list_entries(
            parse_limit(&params, 50),
            params.get("from").cloned(),
            params.get("to").cloned(),
        )
        .await
        .map_err(failed)?;
    Ok(Json(entries))
}

async fn journal_status(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.journal.scheduler_status().await.map_err(failed)?))
}

async fn journal_trigger(
    State(state): State<CallbackState>,
    body: Option<Json<Value>>,
) -> HandlerResult {
    let window_minutes = body
        .as_ref()
        .and_then(|Json(v)| v.get("windowMinutes"))
        .and_then(Value::as_u64);
    Ok(Json(
        state
            .journal
            .trigger_run(window_minutes)
            .await
            .map_err(failed)?,
    ))
}

async fn journal_delete(
    State(state): State<CallbackState>,
    Path(id): Path<String>,
) -> HandlerResult {
    state
        .journal
        .delete_entry(&id)
        .await
        .map_err(failed)?
        .map(Json)
        .ok_or_else(|| CallbackError::NotFound(format!("No journal entry with id {id}")))
}

// --- kanban ---

async fn kanban_board(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.kanban.board().await.map_err(failed)?))
}

async fn kanban_create(
    State(state): State<CallbackState>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let title = body
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CallbackError::BadRequest("title is required".into()))?;
    let column_id = body
        .get("columnId")
        .and_then(Value::as_str)
        .unwrap_or("pending")
        .to_string();
    let card = NewCard {
        title: title.to_string(),
        description: body
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        bullets: body.get("bullets").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        }),
    };
    Ok(Json(
        state
            .kanban
            .create_card(&column_id, card)
            .await
            .map_err(failed)?,
    ))
}

async fn kanban_update(
    State(state): State<CallbackState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let patch: CardPatch = serde_json::from_value(body)
        .map_err(|e| CallbackError::BadRequest(format!("Invalid card patch: {e}")))?;
    state
        .kanban
        .update_card(&id, patch)
        .await
        .map_err(failed)?
        .map(Json)
        .ok_or_else(|| CallbackError::NotFound(format!("No card with id {id}")))
}

async fn kanban_delete(
    State(state): State<CallbackState>,
    Path(id): Path<String>,
) -> HandlerResult {
    state
        .kanban
        .delete_card(&id)
        .await
        .map_err(failed)?
        .map(Json)
        .ok_or_else(|| CallbackError::NotFound(format!("No card with id {id}")))
}

async fn kanban_move(
    State(state): State<CallbackState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let to_column = body
        .get("toColumnId")
        .and_then(Value::as_str)
        .ok_or_else(|| CallbackError::BadRequest("toColumnId is required".into()))?;
    let position = body
        .get("position")
        .and_then(Value::as_u64)
        .map(|p| p as usize);
    state
        .kanban
        .move_card(&id, to_column, position)
        .await
        .map_err(failed)?
        .map(Json)
        .ok_or_else(|| CallbackError::NotFound(format!("No card with id {id}")))
}

// --- memory ---

async fn memory_search_get(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult {
    let query = params
        .get("q")
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| CallbackError::BadRequest("q is required".into()))?;
    Ok(Json(
        state
            .memory
            .search(query, parse_limit(&params, 6))
            .await
            .map_err(failed)?,
    ))
}

async fn memory_search_post(
    State(state): State<CallbackState>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let query = body
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| CallbackError::BadRequest("query is required".into()))?;
    let limit = body
        .get("limit")
        .and_then(Value::as_u64)
        .map(|l| l as usize)
        .unwrap_or(6);
    Ok(Json(
        state.memory.search(query, limit).await.map_err(failed)?,
    ))
}

async fn memory_write(
    State(state): State<CallbackState>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let content = body
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CallbackError::BadRequest("content is required".into()))?;
    let persistent = body
        .get("persistent")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let section = body
        .get("section")
        .and_then(Value::as_str)
        .map(String::from);
    Ok(Json(
        state
            .memory
            .write(content, persistent, section)
            .await
            .map_err(failed)?,
    ))
}

// --- life ---

async fn life_context(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.life.context().await.map_err(failed)?))
}

async fn life_update(State(state): State<CallbackState>, Json(patch): Json<Value>) -> HandlerResult {
    Ok(Json(state.life.update_context(patch).await.map_err(failed)?))
}

async fn life_analysis(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.life.analysis().await.map_err(failed)?))
}

async fn life_refresh(
    State(state): State<CallbackState>,
    body: Option<Json<Value>>,
) -> HandlerResult {
    let window_days = body
        .as_ref()
        .and_then(|Json(v)| v.get("windowDays"))
        .and_then(Value::as_u64)
        .unwrap_or(14);
    Ok(Json(
        state
            .life
            .refresh_analysis(window_days)
            .await
            .map_err(failed)?,
    ))
}

// --- profile ---

async fn profile_board(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.profile.board().await.map_err(failed)?))
}

async fn profile_refresh(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.profile.refresh().await.map_err(failed)?))
}

// --- recordings ---

async fn recordings_list(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult {
    Ok(Json(
        state
            .recordings
            .list(
                parse_limit(&params, 50),
                params.get("from").cloned(),
                params.get("to").cloned(),
            )
            .await
            .map_err(failed)?,
    ))
}

async fn recordings_search(
    State(state): State<CallbackState>,
    body: Option<Json<RecordingSearch>>,
) -> HandlerResult {
    let query = body.map(|Json(q)| q).unwrap_or_default();
    Ok(Json(state.recordings.search(query).await.map_err(failed)?))
}

async fn recordings_update(
    State(state): State<CallbackState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> HandlerResult {
    state
        .recordings
        .update(&id, patch)
        .await
        .map_err(failed)?
        .map(Json)
        .ok_or_else(|| CallbackError::NotFound(format!("No recording with id {id}")))
}

async fn recordings_delete(
    State(state): State<CallbackState>,
    Path(id): Path<String>,
) -> HandlerResult {
    state
        .recordings
        .delete(&id)
        .await
        .map_err(failed)?
        .map(Json)
        .ok_or_else(|| CallbackError::NotFound(format!("No recording with id {id}")))
}

// --- app / config ---

async fn app_navigate(State(state): State<CallbackState>, Json(body): Json<Value>) -> HandlerResult {
    let route = body
        .get("route")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| CallbackError::BadRequest("route is required".into()))?;
    Ok(Json(state.app.navigate(route).await.map_err(failed)?))
}

async fn app_notify(State(state): State<CallbackState>, body: Option<Json<Value>>) -> HandlerResult {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let title = body.get("title").and_then(Value::as_str).unwrap_or("Mira");
    let message = body.get("message").and_then(Value::as_str).unwrap_or("");
    Ok(Json(state.app.notify(title, message).await.map_err(failed)?))
}

async fn app_status(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.config.app_status().await.map_err(failed)?))
}

async fn config_view(State(state): State<CallbackState>) -> HandlerResult {
    Ok(Json(state.config.safe_config().await.map_err(failed)?))
}
