use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use lokcet_shared::errors::{AppError, AppResult};
use lokcet_shared::state::{track_stream, OpState};
use lokcet_shared::types::ApiErrorResponse;

/// Turns a live service stream into server-sent events.
///
/// The client sees `loading` once, then one `event` frame per update carrying
/// the JSON value. A failed update is sent as an `error` frame with the usual
/// error envelope and the stream keeps going. On shutdown a final `cancelled`
/// frame closes the stream.
pub fn live<T>(
    event: &'static str,
    updates: BoxStream<'static, AppResult<T>>,
    shutdown: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let frames = track_stream(shutdown, updates).filter_map(move |state| async move {
        let frame = match state {
            OpState::Loading => Event::default().event("loading").data("{}"),
            OpState::Ready(value) => match Event::default().event(event).json_data(&value) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(event, error = %e, "failed to encode event");
                    return None;
                }
            },
            OpState::Failed(err) => error_frame(&err),
            OpState::Cancelled => Event::default().event("cancelled").data("{}"),
        };
        Some(Ok::<_, Infallible>(frame))
    });

    Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

fn error_frame(err: &AppError) -> Event {
    tracing::warn!(error = %err, "live stream update failed");
    let body = ApiErrorResponse::new(err.code().code(), "live update failed").with_notice(err.user_message());
    match Event::default().event("error").json_data(&body) {
        Ok(frame) => frame,
        Err(_) => Event::default().event("error").data("{}"),
    }
}
