//! `POST /v1/chat/completions`: OpenAI request parsing and admission.

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use serde::Deserialize;
use tabgate_core_types::{
    GatewayError, GatewayResult, GenerateMeta, GenerateRequest, TaskId,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::openai::{completion_body, render_content};
use crate::server::router::error_response;
use crate::server::sse::sse_response;
use crate::server::{GatewayState, TaskGuard};

pub(crate) fn router() -> Router<GatewayState> {
    Router::new().route("/v1/chat/completions", post(chat_completions_handler))
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlRef },
}

#[derive(Debug, Deserialize)]
struct ImageUrlRef {
    url: String,
}

#[derive(Debug)]
struct ParsedPrompt {
    prompt: String,
    image_payloads: Vec<(String, Vec<u8>)>,
}

/// Last user message's text becomes the prompt; image entries across all
/// user messages concatenate in order.
fn parse_messages(messages: &Option<Vec<ChatMessage>>) -> GatewayResult<ParsedPrompt> {
    let messages = match messages {
        Some(messages) if !messages.is_empty() => messages,
        _ => {
            return Err(GatewayError::new(
                tabgate_core_types::ErrorCode::NoMessages,
                "request carries no messages",
            ))
        }
    };
    let user_messages: Vec<&ChatMessage> =
        messages.iter().filter(|m| m.role == "user").collect();
    if user_messages.is_empty() {
        return Err(GatewayError::new(
            tabgate_core_types::ErrorCode::NoUserMessages,
            "request carries no user message",
        ));
    }

    let mut image_payloads = Vec::new();
    for message in &user_messages {
        if let Some(MessageContent::Parts(parts)) = &message.content {
            for part in parts {
                if let ContentPart::ImageUrl { image_url } = part {
                    image_payloads.push(decode_image_url(&image_url.url)?);
                }
            }
        }
    }

    let prompt = match &user_messages[user_messages.len() - 1].content {
        Some(MessageContent::Text(text)) => text.clone(),
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    Ok(ParsedPrompt {
        prompt,
        image_payloads,
    })
}

fn decode_image_url(url: &str) -> GatewayResult<(String, Vec<u8>)> {
    let unsupported =
        || GatewayError::internal("image_url must be a data:<mime>;base64,<payload> URI");
    let rest = url.strip_prefix("data:").ok_or_else(unsupported)?;
    let (meta, payload) = rest.split_once(',').ok_or_else(unsupported)?;
    let mime = meta.strip_suffix(";base64").ok_or_else(unsupported)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|err| GatewayError::internal(format!("image payload decode: {err}")))?;
    Ok((mime.to_string(), bytes))
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

async fn write_temp_images(
    state: &GatewayState,
    task_id: &TaskId,
    payloads: &[(String, Vec<u8>)],
) -> GatewayResult<Vec<PathBuf>> {
    let temp = state.temp_dir();
    tokio::fs::create_dir_all(&temp)
        .await
        .map_err(|err| GatewayError::internal(format!("temp dir: {err}")))?;
    let mut paths = Vec::with_capacity(payloads.len());
    for (index, (mime, bytes)) in payloads.iter().enumerate() {
        let path = temp.join(format!("{task_id}-{index}.{}", extension_for_mime(mime)));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| GatewayError::internal(format!("image spool: {err}")))?;
        paths.push(path);
    }
    Ok(paths)
}

async fn chat_completions_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if let Err(err) = state.authorize(&headers) {
        return error_response(&err);
    }

    let parsed = match parse_messages(&request.messages) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };

    let image_limit = state.config.queue.image_limit;
    if parsed.image_payloads.len() > image_limit {
        return error_response(&GatewayError::too_many_images(image_limit));
    }

    if !state.pool.any_initialized() {
        return error_response(&GatewayError::browser_not_initialized());
    }

    let has_images = !parsed.image_payloads.is_empty();
    let candidates = match state.pool.candidates(&request.model, has_images) {
        Ok(candidates) => candidates,
        Err(err) => return error_response(&err),
    };
    if let Err(err) =
        state
            .pool
            .check_image_policy(&candidates, &request.model, parsed.image_payloads.len())
    {
        return error_response(&err);
    }

    let task_id = TaskId::new();
    let image_paths = match write_temp_images(&state, &task_id, &parsed.image_payloads).await {
        Ok(paths) => paths,
        Err(err) => return error_response(&err),
    };

    let cancel = CancellationToken::new();
    let guard = TaskGuard {
        cancel: cancel.clone(),
        temp_files: image_paths.clone(),
    };
    let generate = GenerateRequest {
        prompt: parsed.prompt,
        image_paths,
        model_key: request.model.clone(),
        meta: GenerateMeta {
            task_id: task_id.clone(),
            stream: request.stream,
        },
        cancel,
    };

    info!(
        task = %task_id,
        model = %request.model,
        stream = request.stream,
        images = parsed.image_payloads.len(),
        "admitting chat completion"
    );

    let reply = match state.queue.submit(generate) {
        Ok(reply) => reply,
        Err(err) => return error_response(&err),
    };

    if request.stream {
        let keepalive = &state.config.server.keepalive;
        return sse_response(
            request.model.clone(),
            keepalive.mode,
            Duration::from_secs(keepalive.interval_secs),
            reply,
            guard,
        );
    }

    let result = reply.await;
    // Guard lives until here; an early handler drop would have cancelled the
    // task instead.
    drop(guard);
    match result {
        Ok(Ok(output)) => {
            Json(completion_body(&request.model, &render_content(&output))).into_response()
        }
        Ok(Err(err)) => {
            warn!(task = %task_id, code = err.code.as_str(), %err, "generation failed");
            error_response(&err)
        }
        Err(_) => error_response(&GatewayError::internal("generation channel closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.to_string())),
        }
    }

    #[test]
    fn last_user_text_wins() {
        let messages = Some(vec![
            text_message("system", "be nice"),
            text_message("user", "first"),
            text_message("assistant", "reply"),
            text_message("user", "second"),
        ]);
        let parsed = parse_messages(&messages).expect("parse");
        assert_eq!(parsed.prompt, "second");
        assert!(parsed.image_payloads.is_empty());
    }

    #[test]
    fn missing_and_userless_messages_are_distinct_errors() {
        let err = parse_messages(&None).expect_err("no messages");
        assert_eq!(err.code, tabgate_core_types::ErrorCode::NoMessages);
        let err = parse_messages(&Some(vec![])).expect_err("empty messages");
        assert_eq!(err.code, tabgate_core_types::ErrorCode::NoMessages);

        let messages = Some(vec![text_message("system", "be nice")]);
        let err = parse_messages(&messages).expect_err("no user role");
        assert_eq!(err.code, tabgate_core_types::ErrorCode::NoUserMessages);
    }

    #[test]
    fn images_concatenate_across_user_messages() {
        let png = base64::engine::general_purpose::STANDARD.encode(b"png-bytes");
        let jpg = base64::engine::general_purpose::STANDARD.encode(b"jpg-bytes");
        let messages = Some(vec![
            ChatMessage {
                role: "user".into(),
                content: Some(MessageContent::Parts(vec![ContentPart::ImageUrl {
                    image_url: ImageUrlRef {
                        url: format!("data:image/png;base64,{png}"),
                    },
                }])),
            },
            ChatMessage {
                role: "user".into(),
                content: Some(MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "describe both".into(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrlRef {
                            url: format!("data:image/jpeg;base64,{jpg}"),
                        },
                    },
                ])),
            },
        ]);
        let parsed = parse_messages(&messages).expect("parse");
        assert_eq!(parsed.prompt, "describe both");
        assert_eq!(parsed.image_payloads.len(), 2);
        assert_eq!(parsed.image_payloads[0].0, "image/png");
        assert_eq!(parsed.image_payloads[0].1, b"png-bytes");
        assert_eq!(parsed.image_payloads[1].0, "image/jpeg");
    }

    #[test]
    fn non_data_image_urls_are_rejected() {
        assert!(decode_image_url("https://example.com/cat.png").is_err());
        assert!(decode_image_url("data:image/png;base64,!!!").is_err());
    }
}
