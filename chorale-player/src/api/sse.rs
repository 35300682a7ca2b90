//! Server-Sent Events (SSE) broadcaster
//!
//! Streams engine events to connected clients. A client that connects while
//! a session is open first receives a `SessionState` event carrying the
//! full snapshot, then the live events.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::api::server::AppContext;

/// GET /events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected");

    // Subscribe before the snapshot so nothing between the two is lost
    let rx = ctx.state.subscribe_events();
    let snapshot = match ctx.state.active_session().await {
        Ok(driver) => Some(driver.snapshot().await),
        Err(_) => None,
    };

    let live = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged: the client missed events but stays connected
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    let stream = async_stream::stream! {
        if let Some(snapshot) = snapshot {
            match serde_json::to_string(&snapshot) {
                Ok(json) => yield Ok(Event::default().event("SessionState").data(json)),
                Err(e) => warn!("Failed to serialize session snapshot: {}", e),
            }
        }

        futures::pin_mut!(live);
        while let Some(event) = live.next().await {
            yield event;
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
