//! SSE encoder for streaming completions.
//!
//! Exactly two logical events on success (content, then a terminal chunk),
//! or one error frame on failure, always closed by `data: [DONE]`. While the
//! task waits or runs, a heartbeat goes out on the configured interval:
//! either an SSE comment (invisible to clients) or an empty-delta content
//! chunk for clients that strip comments. The stream is the single producer,
//! so the heartbeat stops exactly when the terminal frame is emitted, and
//! nothing can write after the end.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tabgate_core_types::{GatewayError, GatewayResult, GenerateOutput};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::config::KeepaliveMode;
use crate::openai::{chunk_body, completion_id, error_body, render_content};
use crate::server::TaskGuard;

fn data_frame(body: &Value) -> Bytes {
    Bytes::from(format!("data: {body}\n\n"))
}

fn comment_heartbeat() -> Bytes {
    Bytes::from_static(b":keepalive\n\n")
}

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

pub fn sse_response(
    model: String,
    mode: KeepaliveMode,
    interval: Duration,
    reply: oneshot::Receiver<GatewayResult<GenerateOutput>>,
    guard: TaskGuard,
) -> Response {
    let stream = async_stream::stream! {
        // Dropped with the stream, so a client disconnect cancels the task.
        let _guard = guard;
        let id = completion_id();

        let mut heartbeat = tokio::time::interval(interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        tokio::pin!(reply);
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let frame = match mode {
                        KeepaliveMode::Comment => comment_heartbeat(),
                        KeepaliveMode::Content => data_frame(&chunk_body(&id, &model, None, None)),
                    };
                    yield Ok::<Bytes, Infallible>(frame);
                }
                result = &mut reply => {
                    match result {
                        Ok(Ok(output)) => {
                            let content = render_content(&output);
                            yield Ok(data_frame(&chunk_body(&id, &model, Some(&content), None)));
                            yield Ok(data_frame(&chunk_body(&id, &model, None, Some("stop"))));
                        }
                        Ok(Err(err)) => {
                            yield Ok(data_frame(&error_body(&err)));
                        }
                        Err(_) => {
                            let err = GatewayError::internal("generation channel closed");
                            yield Ok(data_frame(&error_body(&err)));
                        }
                    }
                    yield Ok(Bytes::from_static(DONE_FRAME));
                    break;
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;

    fn guard() -> TaskGuard {
        TaskGuard {
            cancel: CancellationToken::new(),
            temp_files: Vec::new(),
        }
    }

    async fn collect(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn success_emits_content_terminal_done() {
        let (tx, rx) = oneshot::channel();
        tx.send(Ok(GenerateOutput::text("hello")))
            .ok()
            .expect("send");
        let response = sse_response(
            "m-text".into(),
            KeepaliveMode::Comment,
            Duration::from_secs(60),
            rx,
            guard(),
        );
        let body = collect(response).await;

        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3, "body: {body}");
        let first: Value =
            serde_json::from_str(frames[0].strip_prefix("data: ").expect("data frame"))
                .expect("json");
        assert_eq!(first["choices"][0]["delta"]["content"], "hello");
        assert_eq!(first["choices"][0]["finish_reason"], Value::Null);
        let second: Value =
            serde_json::from_str(frames[1].strip_prefix("data: ").expect("data frame"))
                .expect("json");
        assert_eq!(second["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames[2], "data: [DONE]");
    }

    #[tokio::test]
    async fn failure_emits_single_error_frame_then_done() {
        let (tx, rx) = oneshot::channel();
        tx.send(Err(GatewayError::classified("recaptcha validation failed")))
            .ok()
            .expect("send");
        let response = sse_response(
            "m-text".into(),
            KeepaliveMode::Comment,
            Duration::from_secs(60),
            rx,
            guard(),
        );
        let body = collect(response).await;

        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2, "body: {body}");
        let error: Value =
            serde_json::from_str(frames[0].strip_prefix("data: ").expect("data frame"))
                .expect("json");
        assert_eq!(error["error"]["code"], "RECAPTCHA");
        assert_eq!(frames[1], "data: [DONE]");
    }

    #[tokio::test]
    async fn comment_heartbeats_flow_while_waiting() {
        let (tx, rx) = oneshot::channel();
        let response = sse_response(
            "m-text".into(),
            KeepaliveMode::Comment,
            Duration::from_millis(20),
            rx,
            guard(),
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let _ = tx.send(Ok(GenerateOutput::text("late")));
        });
        let body = collect(response).await;
        assert!(body.contains(":keepalive\n\n"), "body: {body}");
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn content_heartbeats_are_empty_delta_chunks() {
        let (tx, rx) = oneshot::channel();
        let response = sse_response(
            "m-text".into(),
            KeepaliveMode::Content,
            Duration::from_millis(20),
            rx,
            guard(),
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let _ = tx.send(Ok(GenerateOutput::text("late")));
        });
        let body = collect(response).await;
        assert!(!body.contains(":keepalive"));
        let heartbeat = body
            .split("\n\n")
            .filter_map(|f| f.strip_prefix("data: "))
            .filter_map(|f| serde_json::from_str::<Value>(f).ok())
            .find(|v| v["choices"][0]["delta"]["content"] == "");
        assert!(heartbeat.is_some(), "body: {body}");
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_task() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = oneshot::channel::<GatewayResult<GenerateOutput>>();
        let response = sse_response(
            "m-text".into(),
            KeepaliveMode::Comment,
            Duration::from_secs(60),
            rx,
            TaskGuard {
                cancel: cancel.clone(),
                temp_files: Vec::new(),
            },
        );
        drop(response);
        assert!(cancel.is_cancelled());
    }
}
