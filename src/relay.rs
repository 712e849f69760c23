//! # Relay Pipeline
//!
//! Forwards the provider's streamed WAV body to a downstream HTTP client.
//!
//! ## Commitment rules:
//! 1. A non-success upstream status is read in full and returned as an error
//!    response before any audio header is sent
//! 2. On success the response is only committed (200 + headers) once the first
//!    non-empty upstream chunk has arrived
//! 3. A transport failure before that chunk becomes a 502 the client can retry
//! 4. A transport failure after it ends the body early without an error frame;
//!    the client already holds a partial stream that cannot be taken back
//!
//! The relay never looks inside the WAV container; bytes go out exactly as they came in.
//!
//! ## Rust Concepts:
//! - **Generic streams**: `relay` accepts any `Stream<Item = Result<Bytes, E>>`, so tests
//!   drive it with in-memory streams while production passes `reqwest`'s body stream
//! - **async-stream**: `stream!` writes the forwarding loop as straight-line code
//! - **Drop guard**: `StreamGuard` settles the metrics even when the client disconnects
//!   and actix drops the body mid-stream

use crate::error::{AppError, UpstreamBody};
use crate::state::AppState;
use actix_web::http::header::{CACHE_CONTROL, X_CONTENT_TYPE_OPTIONS};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::fmt;
use tracing::{debug, info, warn};

/// Transport errors that can interrupt an upstream body.
///
/// `label` is a short, stable name reported to clients in 502 bodies.
pub trait TransportFailure: fmt::Display {
    fn label(&self) -> &'static str;
}

impl TransportFailure for reqwest::Error {
    fn label(&self) -> &'static str {
        if self.is_timeout() {
            "Timeout"
        } else if self.is_connect() {
            "ConnectError"
        } else if self.is_body() || self.is_decode() {
            "ReadError"
        } else {
            "StreamError"
        }
    }
}

impl TransportFailure for std::io::Error {
    fn label(&self) -> &'static str {
        match self.kind() {
            std::io::ErrorKind::UnexpectedEof => "EndOfStream",
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => "BrokenResource",
            std::io::ErrorKind::TimedOut => "Timeout",
            _ => "ReadError",
        }
    }
}

/// Status, content type, and unread body of an upstream response.
pub struct UpstreamReply<S> {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: S,
}

impl<S> UpstreamReply<S> {
    pub fn new(status: StatusCode, content_type: Option<&str>, body: S) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body,
        }
    }
}

/// Wrap a `reqwest` response without reading its body.
pub fn reply_from_response(
    response: reqwest::Response,
) -> UpstreamReply<impl Stream<Item = reqwest::Result<Bytes>> + 'static> {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    UpstreamReply {
        status,
        content_type,
        body: response.bytes_stream(),
    }
}

/// Relay an upstream reply to the downstream client.
///
/// ## Returns:
/// - **Ok(response)**: A committed `audio/wav` streaming response
/// - **Err(AppError::Upstream)**: The provider rejected the request (status preserved)
/// - **Err(AppError::UpstreamStream)**: The body failed before any byte was relayed (502)
pub async fn relay<S, E>(state: AppState, reply: UpstreamReply<S>) -> Result<HttpResponse, AppError>
where
    S: Stream<Item = Result<Bytes, E>> + 'static,
    E: TransportFailure + 'static,
{
    let UpstreamReply { status, content_type, body } = reply;
    let mut body = Box::pin(body);

    if !status.is_success() {
        state.record_upstream_rejection();
        let payload = read_error_body(&mut body).await.map_err(|e| {
            state.record_precommit_failure();
            e
        })?;
        let error = upstream_error(status, content_type.as_deref(), &payload);
        warn!(status = status.as_u16(), error = %error, "Upstream rejected TTS request");
        return Err(error);
    }

    let first = loop {
        match body.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => break Some(chunk),
            Some(Err(e)) => {
                state.record_precommit_failure();
                warn!(kind = e.label(), error = %e, "Upstream stream failed before any output");
                return Err(AppError::UpstreamStream(e.label().to_string()));
            }
            None => break None,
        }
    };

    let Some(first) = first else {
        debug!("Upstream returned an empty body");
        return Ok(audio_response().body(Bytes::new()));
    };

    state.stream_started();
    let mut guard = StreamGuard::new(state);

    let stream = async_stream::stream! {
        guard.sent(first.len());
        yield Ok::<Bytes, std::io::Error>(first);

        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    guard.sent(chunk.len());
                    yield Ok(chunk);
                }
                Err(e) => {
                    warn!(
                        kind = e.label(),
                        sent = guard.bytes_sent,
                        error = %e,
                        "Upstream stream interrupted after output started; ending response"
                    );
                    guard.finish(true);
                    break;
                }
            }
        }
        guard.finish(false);
    };

    Ok(audio_response().streaming(stream))
}

fn audio_response() -> actix_web::HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .content_type("audio/wav")
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header((X_CONTENT_TYPE_OPTIONS, "nosniff"));
    builder
}

async fn read_error_body<S, E>(body: &mut std::pin::Pin<Box<S>>) -> Result<Bytes, AppError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: TransportFailure,
{
    let mut buf = BytesMut::new();
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(e) => return Err(AppError::UpstreamStream(e.label().to_string())),
        }
    }
    Ok(buf.freeze())
}

/// Build the error forwarded for a non-success upstream status.
pub fn upstream_error(status: StatusCode, content_type: Option<&str>, payload: &[u8]) -> AppError {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);

    if is_json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) {
            return AppError::Upstream { status, body: UpstreamBody::Json(value) };
        }
    }

    let text = String::from_utf8_lossy(payload).trim().to_string();
    let text = if text.is_empty() { "Upstream error".to_string() } else { text };
    AppError::Upstream { status, body: UpstreamBody::Text(text) }
}

/// Tracks one committed stream and settles its metrics exactly once.
struct StreamGuard {
    state: AppState,
    bytes_sent: u64,
    finished: bool,
}

impl StreamGuard {
    fn new(state: AppState) -> Self {
        Self { state, bytes_sent: 0, finished: false }
    }

    fn sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
        self.state.record_bytes_relayed(len);
    }

    fn finish(&mut self, truncated: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.state.stream_finished(truncated);
        info!(bytes = self.bytes_sent, truncated, "Relay stream finished");
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            // downstream went away before the upstream body ended
            debug!(bytes = self.bytes_sent, "Relay stream dropped by client");
            self.finish(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::body::to_bytes;
    use actix_web::ResponseError;
    use futures_util::stream;
    use serde_json::json;
    use std::io;

    fn state() -> AppState {
        AppState::new(AppConfig::default()).unwrap()
    }

    type Chunk = Result<Bytes, io::Error>;

    fn ok(bytes: &'static [u8]) -> Chunk {
        Ok(Bytes::from_static(bytes))
    }

    fn fail(kind: io::ErrorKind) -> Chunk {
        Err(io::Error::new(kind, "connection dropped"))
    }

    fn chunks(items: Vec<Chunk>) -> impl Stream<Item = Chunk> {
        stream::iter(items)
    }

    #[actix_web::test]
    async fn test_success_body_is_byte_identical() {
        let state = state();
        let body = chunks(vec![ok(b"RIFF\x00\x00"), ok(b"\x00\x00WAVE"), ok(b"fmt data")]);
        let reply = UpstreamReply::new(StatusCode::OK, Some("audio/wav"), body);

        let response = relay(state.clone(), reply).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("content-type").unwrap(), "audio/wav");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");

        let bytes = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"RIFF\x00\x00\x00\x00WAVEfmt data");

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.relay.streams_completed, 1);
        assert_eq!(metrics.relay.bytes_relayed, bytes.len() as u64);
        assert_eq!(metrics.active_streams, 0);
    }

    #[actix_web::test]
    async fn test_json_rejection_is_forwarded() {
        let state = state();
        let body = chunks(vec![ok(br#"{"error":"rate limited"}"#)]);
        let reply = UpstreamReply::new(StatusCode::INTERNAL_SERVER_ERROR, Some("application/json"), body);

        let err = relay(state.clone(), reply).await.unwrap_err();
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"error": "rate limited"}));
        assert_eq!(state.get_metrics_snapshot().relay.upstream_rejections, 1);
    }

    #[actix_web::test]
    async fn test_text_rejection_is_wrapped() {
        let body = chunks(vec![ok(b"voice not found")]);
        let reply = UpstreamReply::new(StatusCode::NOT_FOUND, Some("text/plain"), body);

        let err = relay(state(), reply).await.unwrap_err();
        match err {
            AppError::Upstream { status, body: UpstreamBody::Text(text) } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(text, "voice not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_text_rejection_gets_generic_message() {
        let err = upstream_error(StatusCode::SERVICE_UNAVAILABLE, None, b"");
        assert!(matches!(
            err,
            AppError::Upstream { body: UpstreamBody::Text(ref text), .. } if text == "Upstream error"
        ));
    }

    #[actix_web::test]
    async fn test_failure_before_output_is_bad_gateway() {
        let state = state();
        let body = chunks(vec![ok(b""), fail(io::ErrorKind::ConnectionReset)]);
        let reply = UpstreamReply::new(StatusCode::OK, Some("audio/wav"), body);

        let err = relay(state.clone(), reply).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "Upstream stream error: BrokenResource");
        assert_eq!(state.get_metrics_snapshot().relay.precommit_failures, 1);
    }

    #[actix_web::test]
    async fn test_failure_after_output_ends_cleanly() {
        let state = state();
        let body = chunks(vec![
            ok(b"RIFF"),
            ok(b"1234"),
            fail(io::ErrorKind::UnexpectedEof),
            ok(b"never sent"),
        ]);
        let reply = UpstreamReply::new(StatusCode::OK, None, body);

        let response = relay(state.clone(), reply).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"RIFF1234");

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.relay.streams_truncated, 1);
        assert_eq!(metrics.relay.streams_completed, 0);
    }

    #[actix_web::test]
    async fn test_empty_success_body() {
        let body = chunks(vec![]);
        let reply = UpstreamReply::new(StatusCode::OK, None, body);
        let response = relay(state(), reply).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body()).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[actix_web::test]
    async fn test_dropped_response_counts_as_truncated() {
        let state = state();
        let body = chunks(vec![ok(b"RIFF"), ok(b"WAVE")]);
        let reply = UpstreamReply::new(StatusCode::OK, None, body);

        let response = relay(state.clone(), reply).await.unwrap();
        drop(response);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.relay.streams_started, 1);
        assert_eq!(metrics.relay.streams_truncated, 1);
        assert_eq!(metrics.active_streams, 0);
    }
}
