//! HTTP handlers for the recorder API.

use std::convert::Infallible;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::api::{
    CloseResponse, DamageNamesResponse, DamageQuery, EventsQuery, IngestLineRequest,
    IngestRequest, IngestResponse, ListQuery, NicknamesRequest, PageQuery, ReplayRequest,
    StatusResponse,
};
use super::error::ApiError;
use super::state::AppState;
use crate::store::{DamageBreakdown, Event, LogLine, Match, ResolutionReport, StoreStats};

/// Multipart field carrying an uploaded log.
pub const UPLOAD_FIELD: &str = "log_file";

/// Extension accepted for uploaded logs.
const UPLOAD_EXTENSION: &str = ".txt";

type JsonBody<T> = Result<Json<T>, JsonRejection>;

async fn require_match(state: &AppState, match_id: Uuid) -> Result<Match, ApiError> {
    state
        .recorder
        .store()
        .get_match(match_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("match {match_id}")))
}

/// POST /api/ingest - Ingest a multi-line log.
pub async fn post_ingest(
    State(state): State<AppState>,
    body: JsonBody<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(request) = body?;
    let report = state
        .recorder
        .ingest_bulk(&request.log, request.stream.as_deref(), request.close)
        .await?;
    Ok(Json(IngestResponse::ok(report)))
}

/// POST /api/ingest_line - Ingest one pushed line on the live stream.
pub async fn post_ingest_line(
    State(state): State<AppState>,
    body: JsonBody<IngestLineRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(request) = body?;
    if request.line.trim().is_empty() {
        return Ok(Json(IngestResponse::ignored()));
    }
    let report = state.recorder.ingest_line(&request.line).await?;
    Ok(Json(IngestResponse::ok(report)))
}

/// POST /api/upload - Ingest an uploaded `.txt` log.
pub async fn post_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if let Some(file_name) = field.file_name() {
            if !file_name.to_ascii_lowercase().ends_with(UPLOAD_EXTENSION) {
                return Err(ApiError::MalformedInput(format!(
                    "expected a {UPLOAD_EXTENSION} file, got {file_name}"
                )));
            }
        }
        let bytes = field.bytes().await?;
        let text = String::from_utf8_lossy(&bytes);
        let report = state.recorder.ingest_bulk(&text, None, true).await?;
        return Ok(Json(IngestResponse::ok(report)));
    }
    Err(ApiError::MalformedInput(format!(
        "missing multipart field `{UPLOAD_FIELD}`"
    )))
}

/// POST /api/ingest_replay - Fetch and ingest a replay.
pub async fn post_ingest_replay(
    State(state): State<AppState>,
    body: JsonBody<ReplayRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(request) = body?;
    if request.url.trim().is_empty() {
        return Err(ApiError::MalformedInput("url is empty".to_string()));
    }
    let report = state
        .recorder
        .import_replay(&state.replay, &request.url)
        .await?;
    Ok(Json(IngestResponse::ok(report)))
}

/// POST /api/matches/:id/close - Close a match.
pub async fn post_close_match(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<CloseResponse>, ApiError> {
    let Path(match_id) = path?;
    let closed = state.recorder.close_match(match_id).await?;
    Ok(Json(CloseResponse { match_id, closed }))
}

/// POST /api/matches/:id/nicknames - Replace the roster and re-derive owners.
pub async fn post_nicknames(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    body: JsonBody<NicknamesRequest>,
) -> Result<Json<ResolutionReport>, ApiError> {
    let Path(match_id) = path?;
    let Json(request) = body?;
    let report = state
        .recorder
        .update_roster(match_id, &request.mine, &request.opponent, request.my_side)
        .await?;
    Ok(Json(report))
}

/// GET /api/matches - List matches, newest first.
pub async fn get_matches(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Match>>, ApiError> {
    let Query(query) = query?;
    let matches = state
        .recorder
        .store()
        .list_matches(query.effective_limit())
        .await?;
    Ok(Json(matches))
}

/// GET /api/matches/:id - One match with its roster.
pub async fn get_match(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Match>, ApiError> {
    let Path(match_id) = path?;
    Ok(Json(require_match(&state, match_id).await?))
}

/// GET /api/matches/:id/lines - Lines of a match in sequence order.
pub async fn get_lines(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Vec<LogLine>>, ApiError> {
    let Path(match_id) = path?;
    let Query(query) = query?;
    require_match(&state, match_id).await?;
    let lines = state
        .recorder
        .store()
        .get_lines(match_id, query.effective_limit(), query.offset)
        .await?;
    Ok(Json(lines))
}

/// GET /api/matches/:id/events - Events of a match, optionally filtered.
pub async fn get_events(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let Path(match_id) = path?;
    let Query(query) = query?;
    let filter = query.to_store_query().map_err(ApiError::MalformedInput)?;
    require_match(&state, match_id).await?;
    let events = state
        .recorder
        .store()
        .get_events(match_id, filter)
        .await?;
    Ok(Json(events))
}

/// GET /api/status - Open streams, totals and watcher state.
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let stats = state.recorder.store().stats().await?;
    let open_streams = state.recorder.open_streams().await;
    Ok(Json(StatusResponse {
        open_streams,
        feed_connected: state.recorder.feed_subscribers() > 0,
        watcher: state.watcher(),
        stats,
    }))
}

/// GET /api/stats - Store-wide totals and damage figures.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.recorder.store().stats().await?))
}

/// GET /api/damage - Per-move damage between an attacker and a defender.
pub async fn get_damage(
    State(state): State<AppState>,
    query: Result<Query<DamageQuery>, QueryRejection>,
) -> Result<Json<DamageBreakdown>, ApiError> {
    let Query(query) = query?;
    let (attacker, defender) = query.participants().map_err(ApiError::MalformedInput)?;
    if let Some(match_id) = query.match_id {
        require_match(&state, match_id).await?;
    }
    let breakdown = state
        .recorder
        .store()
        .damage_breakdown(attacker, defender, query.match_id)
        .await?;
    Ok(Json(breakdown))
}

/// GET /api/damage/names - Participants seen in attributed damage.
pub async fn get_damage_names(
    State(state): State<AppState>,
    query: Result<Query<DamageQuery>, QueryRejection>,
) -> Result<Json<DamageNamesResponse>, ApiError> {
    let Query(query) = query?;
    if let Some(match_id) = query.match_id {
        require_match(&state, match_id).await?;
    }
    let names = state
        .recorder
        .store()
        .damage_participants(query.match_id)
        .await?;
    Ok(Json(DamageNamesResponse { names }))
}

/// GET /api/feed - SSE stream of ingested batches.
pub async fn get_feed(
    State(state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.recorder.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(notice) => {
                let data = serde_json::to_string(&notice).ok()?;
                Some(Ok(SseEvent::default().event("ingest").data(data)))
            }
            Err(_) => None, // lagged
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
