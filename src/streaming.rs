use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::{ChatStreamEvent, OllamaGenerateReply};
use crate::ollama::STREAM_ERROR_MESSAGE;
use crate::state::{AppState, InflightGuard};

/// Relays an upstream token stream to the client as SSE frames.
///
/// The HTTP status is committed as 200 before the first upstream byte, so
/// failures are signaled in-band: exactly one terminal frame with
/// `done=true, error=true`. Client disconnects drop the receiver, which
/// stops the relay task and closes the upstream socket.
pub async fn stream_chat(
    state: AppState,
    text: String,
    model: String,
    guard: InflightGuard,
    request_id: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(64);

    match state.ollama.generate_stream(&text, &model).await {
        Ok(upstream) => {
            tokio::spawn(async move {
                let _guard = guard;
                relay(upstream, &tx, &model, &request_id).await;
            });
        }
        Err(err) => {
            tracing::warn!(
                request_id = %request_id,
                model = %model,
                error = %err,
                "failed to open upstream stream"
            );
            let _ = tx.send(Ok(Bytes::from(error_frame(&model)))).await;
        }
    }

    let body = Body::from_stream(ReceiverStream::new(rx));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

enum LineOutcome {
    Forwarded,
    Done,
    ClientGone,
    Malformed(serde_json::Error),
}

/// Reads NDJSON chunks line-buffered and forwards each line as one SSE
/// frame, in upstream order. Returns once a terminal frame is written or
/// the client is gone.
///
/// The buffer holds raw bytes and lines are split on `b'\n'` before any
/// UTF-8 decoding, so a multibyte character straddling two network chunks
/// is reassembled intact. Each loop turn also watches for the receiver
/// closing, so a stalled upstream cannot pin the socket after the client
/// has gone away.
async fn relay<S, E>(
    mut upstream: S,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    model: &str,
    request_id: &str,
) where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = tx.closed() => {
                tracing::debug!(
                    request_id = %request_id,
                    "client disconnected, dropping upstream stream"
                );
                return;
            }
            chunk = upstream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    model = %model,
                    error = %err,
                    "upstream stream failed mid-flight"
                );
                let _ = tx.send(Ok(Bytes::from(error_frame(model)))).await;
                return;
            }
        };

        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match forward_line(line, model, tx).await {
                LineOutcome::Forwarded => {}
                LineOutcome::Done => return,
                LineOutcome::ClientGone => {
                    tracing::debug!(
                        request_id = %request_id,
                        "client disconnected, dropping upstream stream"
                    );
                    return;
                }
                LineOutcome::Malformed(err) => {
                    tracing::warn!(
                        request_id = %request_id,
                        model = %model,
                        error = %err,
                        "malformed upstream stream chunk"
                    );
                    let _ = tx.send(Ok(Bytes::from(error_frame(model)))).await;
                    return;
                }
            }
        }
    }

    // Upstream may omit the trailing newline on its final line.
    let line = String::from_utf8_lossy(&buffer);
    let line = line.trim();
    if !line.is_empty() {
        match forward_line(line, model, tx).await {
            LineOutcome::Done | LineOutcome::ClientGone => return,
            LineOutcome::Forwarded => {}
            LineOutcome::Malformed(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    model = %model,
                    error = %err,
                    "malformed upstream stream chunk"
                );
                let _ = tx.send(Ok(Bytes::from(error_frame(model)))).await;
                return;
            }
        }
    }

    // Stream ended without a done marker; close it out as an error so the
    // client always sees exactly one terminal event.
    tracing::warn!(
        request_id = %request_id,
        model = %model,
        "upstream stream ended without done marker"
    );
    let _ = tx.send(Ok(Bytes::from(error_frame(model)))).await;
}

async fn forward_line(
    line: &str,
    model: &str,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
) -> LineOutcome {
    let reply: OllamaGenerateReply = match serde_json::from_str(line) {
        Ok(reply) => reply,
        Err(err) => return LineOutcome::Malformed(err),
    };
    let done = reply.done.unwrap_or(false);
    let event = ChatStreamEvent {
        model: reply.model.unwrap_or_else(|| model.to_string()),
        response: reply.response.unwrap_or_default(),
        done,
        error: None,
    };
    if tx.send(Ok(Bytes::from(sse_frame(&event)))).await.is_err() {
        return LineOutcome::ClientGone;
    }
    if done {
        LineOutcome::Done
    } else {
        LineOutcome::Forwarded
    }
}

fn sse_frame(event: &ChatStreamEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", json)
}

fn error_frame(model: &str) -> String {
    sse_frame(&ChatStreamEvent {
        model: model.to_string(),
        response: STREAM_ERROR_MESSAGE.to_string(),
        done: true,
        error: Some(true),
    })
}
