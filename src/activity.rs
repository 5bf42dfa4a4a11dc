//! Activity Stream (C8): a long-lived, single-direction SSE channel per
//! `(project_id, session_id, last_message_id)`. One cooperative task per
//! connection, driven by a heartbeat timer and a poll timer — the same
//! `async_stream::stream!` + `axum::response::sse` shape the teacher uses
//! for its own log-tailing endpoint, generalized from a `docker logs
//! --follow` pipe to a database poll.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive};
use chrono::Utc;
use serde::Serialize;

use crate::db::{self, DbPool, Message, MessageRole, FILE_OP_MARKER};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MIN_POLL_GAP: Duration = Duration::from_secs(3);
const BATCH_LIMIT: i64 = 10;

/// The tagged union of §3 `ActivityEvent`, reified as the wire frames of
/// §6.2. `timestamp` is milliseconds since epoch on every frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ActivityEvent {
    #[serde(rename = "heartbeat")]
    Heartbeat { timestamp: i64 },
    #[serde(rename = "new_message")]
    NewMessage {
        timestamp: i64,
        id: i64,
        content: String,
        role: String,
        #[serde(rename = "tokensInput", skip_serializing_if = "Option::is_none")]
        tokens_input: Option<i64>,
        #[serde(rename = "tokensOutput", skip_serializing_if = "Option::is_none")]
        tokens_output: Option<i64>,
        #[serde(rename = "contextTokens", skip_serializing_if = "Option::is_none")]
        context_tokens: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        blocks: Option<serde_json::Value>,
    },
    #[serde(rename = "file_updated")]
    FileUpdated {
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<FileOperationFrame>,
    },
    #[serde(rename = "token_update")]
    TokenUpdate { timestamp: i64, tokens: TokenTotals },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOperationFrame {
    #[serde(rename = "type")]
    pub op_type: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenTotals {
    #[serde(rename = "tokensSent")]
    pub tokens_sent: i64,
    #[serde(rename = "tokensReceived")]
    pub tokens_received: i64,
    #[serde(rename = "contextSize")]
    pub context_size: Option<i64>,
}

impl ActivityEvent {
    pub fn heartbeat() -> Self {
        Self::Heartbeat { timestamp: now_ms() }
    }

    fn to_sse_event(&self) -> Event {
        Event::default().data(serde_json::to_string(self).unwrap_or_default())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// One poll's worth of events, ready to hand to the caller in order:
/// exactly one `TokenUpdate` (if any messages were found) followed by the
/// per-message `NewMessage`/`FileUpdated` pairs in ascending timestamp
/// (§4.8, §8 property 8).
pub fn build_batch_events(messages: &[Message], sent: i64, received: i64, context_size: Option<i64>) -> Vec<ActivityEvent> {
    if messages.is_empty() {
        return Vec::new();
    }

    let mut ascending: Vec<&Message> = messages.iter().collect();
    ascending.sort_by_key(|m| m.id);

    let mut events = Vec::with_capacity(ascending.len() * 2 + 1);
    events.push(ActivityEvent::TokenUpdate {
        timestamp: now_ms(),
        tokens: TokenTotals { tokens_sent: sent, tokens_received: received, context_size },
    });

    for message in ascending {
        events.push(ActivityEvent::NewMessage {
            timestamp: now_ms(),
            id: message.id,
            content: message.content.clone(),
            role: message.role.clone(),
            tokens_input: message.tokens_input,
            tokens_output: message.tokens_output,
            context_tokens: message.context_tokens,
            blocks: message
                .blocks
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
        });

        if message.role == MessageRole::Assistant.as_str() && message.content.starts_with(FILE_OP_MARKER) {
            events.push(file_updated_event(message));
        }
    }

    events
}

/// Parses the `"🔧 " + json` marker out of an assistant message's content.
/// Only called once the caller has confirmed the marker prefix is present;
/// parse failures past that point are recoverable: the event is still
/// emitted, with no `operation` field, and the stream is never terminated
/// (§4.8, §9).
fn file_updated_event(message: &Message) -> ActivityEvent {
    let operation = match message.file_operation() {
        Some(Ok(op)) => Some(FileOperationFrame { op_type: op.op_type, path: op.path }),
        Some(Err(err)) => {
            tracing::debug!(message_id = message.id, error = %err, "file-operation marker failed to parse");
            None
        }
        None => None,
    };

    ActivityEvent::FileUpdated { timestamp: now_ms(), operation }
}

/// Builds the per-connection SSE stream for `stream_activity` (§6.1,
/// §4.8). Ownership of the polling cadence and heartbeat cadence lives
/// here; cancellation is handled by the caller dropping the stream (axum
/// stops polling the generator once the client disconnects).
pub fn activity_stream(
    db: DbPool,
    project_id: String,
    last_message_id: i64,
) -> impl futures::Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _connection_guard = ConnectionGuard::open();
        yield Ok(ActivityEvent::heartbeat().to_sse_event());

        let mut last_polled_id = last_message_id;
        let mut heartbeat_due = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
        let mut poll_due = tokio::time::Instant::now() + MIN_POLL_GAP;

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let now = tokio::time::Instant::now();

            if now >= heartbeat_due {
                yield Ok(ActivityEvent::heartbeat().to_sse_event());
                heartbeat_due = now + HEARTBEAT_INTERVAL;
            }

            if now < poll_due {
                continue;
            }
            poll_due = now + MIN_POLL_GAP;

            let poll_started = tokio::time::Instant::now();
            let poll_result = db::poll_messages(&db, &project_id, last_polled_id, BATCH_LIMIT).await;
            crate::metrics::record_activity_poll_duration(poll_started.elapsed().as_secs_f64());

            match poll_result {
                Ok(mut messages) => {
                    if messages.is_empty() {
                        continue;
                    }
                    messages.sort_by_key(|m| m.id);
                    if let Some(max_id) = messages.iter().map(|m| m.id).max() {
                        last_polled_id = last_polled_id.max(max_id);
                    }

                    let (sent, received, context_size) =
                        match db::aggregate_tokens(&db, &project_id).await {
                            Ok(totals) => totals,
                            Err(err) => {
                                tracing::warn!(project_id = %project_id, error = %err, "token aggregation failed; continuing stream");
                                (0, 0, None)
                            }
                        };

                    for event in build_batch_events(&messages, sent, received, context_size) {
                        yield Ok(event.to_sse_event());
                    }
                }
                Err(err) => {
                    // Transient poll errors never close the connection (§4.8).
                    tracing::warn!(project_id = %project_id, error = %err, "activity poll failed; will retry");
                }
            }
        }
    }
}

pub fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")
}

/// Scoped acquisition for the `activity_stream_connections` gauge: the
/// generator holds this for its entire lifetime, so client cancellation —
/// which drops the generator without running any more of its body — still
/// decrements the count (§5 "no partial ... must be left behind", applied
/// here to the connection gauge rather than a container).
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        CONNECTION_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        crate::metrics::set_activity_stream_connections(
            CONNECTION_COUNT.load(std::sync::atomic::Ordering::SeqCst) as i64,
        );
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        CONNECTION_COUNT.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        crate::metrics::set_activity_stream_connections(
            CONNECTION_COUNT.load(std::sync::atomic::Ordering::SeqCst) as i64,
        );
    }
}

static CONNECTION_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: i64, role: &str, content: &str, ti: Option<i64>, to: Option<i64>, ctx: Option<i64>) -> Message {
        Message {
            id,
            project_id: "7".to_string(),
            session_id: "s1".to_string(),
            role: role.to_string(),
            content: content.to_string(),
            tokens_input: ti,
            tokens_output: to,
            context_tokens: ctx,
            blocks: None,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn token_update_precedes_messages_in_ascending_order() {
        let m1 = msg(1, "user", "hi", Some(10), Some(0), None);
        let m2 = msg(2, "assistant", "🔧 {\"type\":\"edit\",\"path\":\"a.ts\"}", Some(5), Some(40), Some(1000));

        let events = build_batch_events(&[m2.clone(), m1.clone()], 15, 40, Some(1000));

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ActivityEvent::TokenUpdate { .. }));
        match &events[1] {
            ActivityEvent::NewMessage { id, .. } => assert_eq!(*id, 1),
            _ => panic!("expected new_message"),
        }
        match &events[2] {
            ActivityEvent::NewMessage { id, .. } => assert_eq!(*id, 2),
            _ => panic!("expected new_message"),
        }
        match &events[3] {
            ActivityEvent::FileUpdated { operation, .. } => {
                let op = operation.as_ref().unwrap();
                assert_eq!(op.op_type, "edit");
                assert_eq!(op.path, "a.ts");
            }
            _ => panic!("expected file_updated"),
        }
    }

    #[test]
    fn malformed_file_marker_emits_file_updated_without_operation() {
        let m = msg(1, "assistant", "🔧 not json", None, None, None);
        let events = build_batch_events(&[m], 0, 0, None);
        match &events[1] {
            ActivityEvent::FileUpdated { operation, .. } => assert!(operation.is_none()),
            _ => panic!("expected file_updated"),
        }
    }

    #[test]
    fn empty_batch_produces_no_events() {
        assert!(build_batch_events(&[], 0, 0, None).is_empty());
    }

    #[test]
    fn user_messages_produce_no_file_updated_event() {
        let m = msg(1, "user", "hello", Some(1), Some(0), None);
        let events = build_batch_events(&[m], 1, 0, None);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ActivityEvent::NewMessage { .. }));
    }

    #[test]
    fn plain_assistant_message_without_marker_produces_no_file_updated_event() {
        let m = msg(1, "assistant", "here's the change", Some(1), Some(10), None);
        let events = build_batch_events(&[m], 1, 10, None);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ActivityEvent::NewMessage { .. }));
    }
}
