//! OpenAI-compatible body shapes: completions, stream chunks, error bodies,
//! and the models listing.

use chrono::Utc;
use serde_json::{json, Value};
use tabgate_core_types::{GatewayError, GenerateOutput};

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Utc::now().timestamp_millis())
}

/// Render adapter output as a single message content string: text first (it
/// may already carry data URIs), then each media blob as a Markdown embed.
pub fn render_content(output: &GenerateOutput) -> String {
    let mut parts = Vec::new();
    if let Some(text) = &output.text {
        if !text.is_empty() {
            parts.push(text.clone());
        }
    }
    for blob in &output.images {
        parts.push(format!("![generated]({})", blob.data_uri()));
    }
    parts.join("\n\n")
}

pub fn completion_body(model: &str, content: &str) -> Value {
    json!({
        "id": completion_id(),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
            },
            "finish_reason": "stop",
        }],
    })
}

/// One streaming chunk. `content` of `None` with no finish reason is the
/// content-mode heartbeat shape.
pub fn chunk_body(id: &str, model: &str, content: Option<&str>, finish: Option<&str>) -> Value {
    let delta = match content {
        Some(content) => json!({ "role": "assistant", "content": content }),
        None if finish.is_none() => json!({ "content": "" }),
        None => json!({}),
    };
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish,
        }],
    })
}

pub fn error_body(err: &GatewayError) -> Value {
    json!({
        "error": {
            "message": err.message,
            "type": err.code.openai_type(),
            "code": err.code.as_str(),
        }
    })
}

pub fn model_entry(id: &str, owned_by: &str) -> Value {
    json!({
        "id": id,
        "object": "model",
        "created": Utc::now().timestamp(),
        "owned_by": owned_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabgate_core_types::{ErrorCode, MediaBlob};

    #[test]
    fn content_rendering_shapes() {
        assert_eq!(render_content(&GenerateOutput::text("plain")), "plain");

        let image_only = GenerateOutput::image(MediaBlob {
            mime: "image/jpeg".into(),
            base64: "QUJD".into(),
        });
        assert_eq!(
            render_content(&image_only),
            "![generated](data:image/jpeg;base64,QUJD)"
        );

        let mixed = GenerateOutput {
            text: Some("caption".into()),
            images: vec![MediaBlob {
                mime: "image/png".into(),
                base64: "REVG".into(),
            }],
        };
        assert_eq!(
            render_content(&mixed),
            "caption\n\n![generated](data:image/png;base64,REVG)"
        );
    }

    #[test]
    fn completion_body_shape() {
        let body = completion_body("m-text", "hello");
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "m-text");
        assert_eq!(body["choices"][0]["message"]["content"], "hello");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    }

    #[test]
    fn chunk_shapes() {
        let content = chunk_body("chatcmpl-1", "m", Some("hi"), None);
        assert_eq!(content["choices"][0]["delta"]["content"], "hi");
        assert_eq!(content["choices"][0]["finish_reason"], Value::Null);

        let heartbeat = chunk_body("chatcmpl-1", "m", None, None);
        assert_eq!(heartbeat["choices"][0]["delta"]["content"], "");

        let terminal = chunk_body("chatcmpl-1", "m", None, Some("stop"));
        assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
        assert!(terminal["choices"][0]["delta"]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn error_body_shape() {
        let body = error_body(&GatewayError::new(ErrorCode::Recaptcha, "blocked"));
        assert_eq!(body["error"]["code"], "RECAPTCHA");
        assert_eq!(body["error"]["type"], "server_error");
        assert_eq!(body["error"]["message"], "blocked");
    }
}
