// Stream responder
//
// Turns a ChatStream into an SSE response speaking the UI message stream
// protocol: one event per chunk (`id:` = chunk offset, `data:` = chunk JSON),
// then `data: [DONE]` after the terminal chunk. The offset doubles as the
// reconnect cursor a client sends back as Last-Event-ID.
//
// Decision: Chunks are forwarded as they arrive; nothing is buffered
// Decision: A ledger read failure aborts the body instead of inventing a chunk
// Decision: Reasoning/source filtering skips chunks but keeps the offsets of the rest
// Decision: The session's run is released only after the terminal chunk and [DONE]
//           were handed to the body, so a client cut off before them can replay

use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chatrun_core::{ChatStream, SessionId, SessionRegistry, StreamError, UiMessageChunk};
use chatrun_durable::RunId;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, warn};

use crate::session::{SESSION_HEADER, WORKFLOW_RUN_HEADER};

/// Header announcing the UI message stream protocol version
pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";

/// Which optional chunk kinds reach the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub send_reasoning: bool,
    pub send_sources: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            send_reasoning: true,
            send_sources: true,
        }
    }
}

impl StreamOptions {
    fn allows(&self, chunk: &UiMessageChunk) -> bool {
        if chunk.is_reasoning() {
            return self.send_reasoning;
        }
        if chunk.is_source() {
            return self.send_sources;
        }
        true
    }
}

/// Session a stream belongs to; its run mapping is cleared on completion
pub struct SessionBinding {
    pub session: SessionId,
    pub registry: SessionRegistry,
}

struct ResponderState {
    chunks: ChatStream,
    run_id: RunId,
    options: StreamOptions,
    binding: Option<SessionBinding>,
    finished: bool,
    release_pending: bool,
}

fn chunk_event(offset: i64, chunk: &UiMessageChunk) -> Event {
    let json = serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string());
    Event::default().id(offset.to_string()).data(json)
}

/// Forget the session's run once its terminal chunk went out
async fn release(binding: &SessionBinding, run_id: RunId) {
    match binding
        .registry
        .clear_run_id_if(&binding.session, run_id)
        .await
    {
        Ok(cleared) => debug!(session_id = %binding.session, %run_id, cleared, "run consumed"),
        Err(e) => warn!(session_id = %binding.session, %run_id, error = %e, "failed to clear run id"),
    }
}

/// Build the streaming response for one run
pub fn respond(
    chunks: ChatStream,
    run_id: RunId,
    binding: Option<SessionBinding>,
    options: StreamOptions,
) -> Response {
    let session = binding.as_ref().map(|b| b.session.clone());
    let initial = ResponderState {
        chunks,
        run_id,
        options,
        binding,
        finished: false,
        release_pending: false,
    };

    let events = stream::unfold(initial, |mut state| async move {
        if state.finished {
            if state.release_pending {
                state.release_pending = false;
                if let Some(binding) = &state.binding {
                    release(binding, state.run_id).await;
                }
            }
            return None;
        }
        loop {
            match state.chunks.next().await {
                None => return None,
                Some(Err(e)) => {
                    error!(run_id = %state.run_id, error = %e, "aborting chat stream");
                    state.finished = true;
                    let item: Result<Event, StreamError> = Err(e);
                    return Some((stream::iter(vec![item]), state));
                }
                Some(Ok(item)) if item.chunk.is_terminal() => {
                    state.finished = true;
                    state.release_pending = true;
                    let events = vec![
                        Ok(chunk_event(item.offset, &item.chunk)),
                        Ok(Event::default().data("[DONE]")),
                    ];
                    return Some((stream::iter(events), state));
                }
                Some(Ok(item)) if !state.options.allows(&item.chunk) => continue,
                Some(Ok(item)) => {
                    let events = vec![Ok(chunk_event(item.offset, &item.chunk))];
                    return Some((stream::iter(events), state));
                }
            }
        }
    })
    .flatten();

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();

    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(WORKFLOW_RUN_HEADER),
        HeaderValue::from_str(&run_id.to_string()).unwrap_or(HeaderValue::from_static("")),
    );
    if let Some(value) = session.and_then(|s| HeaderValue::from_str(s.as_str()).ok()) {
        headers.insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    headers.insert(
        HeaderName::from_static(UI_MESSAGE_STREAM_HEADER),
        HeaderValue::from_static("v1"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );

    response
}

