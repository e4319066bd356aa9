//! Live device state: on-demand snapshot and the SSE stream

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use common::{AppError, SuccessResponse};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::api::routes::AppState;
use crate::engine::BroadcastPayload;

/// Latest broadcast payload
///
/// @route GET /api/snapshot
/// @output `Json<SuccessResponse<BroadcastPayload>>`
/// @status 200 - Success
#[utoipa::path(
    get,
    path = "/api/snapshot",
    responses(
        (status = 200, description = "Latest payload", body = crate::engine::BroadcastPayload)
    ),
    tag = "coldsrv"
)]
pub async fn get_snapshot(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<BroadcastPayload>>, AppError> {
    let payload = state.engine.snapshot().await?;
    Ok(Json(SuccessResponse::new(payload.as_ref().clone())))
}

/// One `payload` event per engine tick
///
/// @route GET /api/stream
/// @output text/event-stream
#[utoipa::path(
    get,
    path = "/api/stream",
    responses(
        (status = 200, description = "Server-sent payload events", content_type = "text/event-stream")
    ),
    tag = "coldsrv"
)]
pub async fn stream_payloads(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("SSE client connected");
    Sse::new(payload_events(state.engine.subscribe())).keep_alive(KeepAlive::default())
}

fn payload_events(
    rx: broadcast::Receiver<Arc<BroadcastPayload>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(payload) => match Event::default().event("payload").json_data(&*payload) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(e) => warn!("SSE encode: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => debug!("SSE client lagged {} payloads", skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;

    fn payload() -> Arc<BroadcastPayload> {
        Arc::new(BroadcastPayload {
            ts: Utc::now(),
            structs: vec![],
            alarms: vec![],
            messages: vec![],
        })
    }

    #[tokio::test]
    async fn test_stream_skips_lag_and_ends_on_close() {
        let (tx, rx) = broadcast::channel(1);
        tx.send(payload()).unwrap();
        tx.send(payload()).unwrap();
        drop(tx);

        let events: Vec<_> = payload_events(rx).collect().await;
        assert_eq!(events.len(), 1);
    }
}
