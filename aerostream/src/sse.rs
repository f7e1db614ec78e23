//! SSE Broadcaster (C7): `GET /events` serving `text/event-stream` to
//! many subscribers, each owning a bounded queue. Grounded on
//! `original_source/src/modules/sse.py::SSEPublisher` for the endpoint
//! contract and headers.
//!
//! Deliberate divergence from the literal original (see DESIGN.md Open
//! Question resolutions): a subscriber whose queue overflows is kept
//! around rather than disconnected, matching spec.md's stated behavior
//! over the Python file's incidental one.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::stream::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<String>>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    /// Enqueue `data` into every subscriber's queue. A full queue is left
    /// alone (the event is simply missed); only a closed receiver removes
    /// the subscriber.
    pub async fn publish(&self, data: String) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|tx| match tx.try_send(data.clone()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    async fn subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().await.push(tx);
        rx
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        Router::new()
            .route("/events", get(events_handler))
            .layer(cors)
            .with_state(self.clone())
    }
}

async fn events_handler(
    axum::extract::State(broadcaster): axum::extract::State<Broadcaster>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = broadcaster.subscribe().await;
    // Force headers immediately with an empty comment, per SPEC_FULL §4.7.
    let initial = tokio_stream::once(Ok(Event::default().comment("")));
    let events = ReceiverStream::new(rx).map(|data| Ok(Event::default().data(data)));
    let stream = initial.chain(events);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
