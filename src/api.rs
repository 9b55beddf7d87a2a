use crate::metrics::ErrorResponse;
use crate::poller::SeriesUpdate;
use crate::tracker::{HistoryQuery, Reserved, Series, TrackerHandle};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub tracker: TrackerHandle,
    pub updates: broadcast::Sender<SeriesUpdate>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/node", get(get_node))
        .route("/api/series", get(get_series))
        .route("/api/series/:name", get(get_one_series))
        .route("/api/latest", get(get_latest))
        .route("/api/stream", get(stream))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct NodeResponse {
    id: String,
    url: String,
    buffer_size: usize,
    reserved: Reserved,
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
}

async fn get_node(State(state): State<AppState>) -> impl IntoResponse {
    let body = {
        let tracker = state.tracker.read();
        NodeResponse {
            id: tracker.node().id.clone(),
            url: tracker.url(),
            buffer_size: tracker.buffer_size(),
            reserved: tracker.reserved(),
        }
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn get_series(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let snapshot = state.tracker.read().snapshot(&query);
    (StatusCode::OK, Json(snapshot)).into_response()
}

async fn get_one_series(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let series = match name.parse::<Series>() {
        Ok(series) => series,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    };
    let points = query.apply(state.tracker.read().series(series));
    (StatusCode::OK, Json(points)).into_response()
}

async fn get_latest(State(state): State<AppState>) -> impl IntoResponse {
    let latest = state.tracker.read().latest();
    if latest.cpu.is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no data yet".to_string(),
            }),
        )
            .into_response();
    }
    (StatusCode::OK, Json(latest)).into_response()
}

async fn stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.updates.subscribe();
    let shutdown = state.shutdown.clone();
    let stream = BroadcastStream::new(rx)
        .take_until(async move { shutdown.cancelled().await })
        .map(|msg| match msg {
            Ok(update) => match serde_json::to_string(&update) {
                Ok(json) => Ok(Event::default().data(json)),
                Err(e) => Ok(Event::default()
                    .event("error")
                    .data(format!("serialize_error: {e}"))),
            },
            Err(e) => Ok(Event::default()
                .event("error")
                .data(format!("stream_error: {e}"))),
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keep-alive"),
    )
}
