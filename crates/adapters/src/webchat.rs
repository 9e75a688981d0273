//! Selector-driven web-chat driver.
//!
//! One configuration section describes one upstream service: the entry URL,
//! the selectors to type and submit with, the URL substring that identifies
//! the upstream completion response, and where in that response the payload
//! lives. Text and image models share the driver; the model descriptor's
//! modality picks the extraction path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tabgate_core_types::{
    GatewayError, GatewayResult, GenerateOutput, GenerateRequest, MediaBlob, Modality,
    ModelDescriptor,
};
use tracing::{debug, info};
use url::Url;

use crate::contract::{Adapter, AdapterContext, AdapterSettings, WorkerSettings};
use crate::navigation::{NavigationContext, NavigationHandler};
use crate::registry::ModelKey;

const NAV_TIMEOUT: Duration = Duration::from_secs(30);

fn default_input_selector() -> String {
    "textarea".to_string()
}

fn default_send_selector() -> String {
    "button[type=submit]".to_string()
}

fn default_response_timeout_secs() -> u64 {
    120
}

fn default_image_mime() -> String {
    "image/jpeg".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebChatOptions {
    pub entry_url: Url,
    #[serde(default = "default_input_selector")]
    pub input_selector: String,
    #[serde(default = "default_send_selector")]
    pub send_selector: String,
    #[serde(default)]
    pub upload_selector: Option<String>,
    /// Clicked to open a clean conversation; without it the page is
    /// re-navigated to the entry URL before each task.
    #[serde(default)]
    pub new_chat_selector: Option<String>,
    /// Clicked best-effort on every navigation (cookie banners and the like).
    #[serde(default)]
    pub dismiss_selector: Option<String>,
    /// URL substring identifying the upstream completion response.
    pub response_match: String,
    /// JSON pointer to the reply text inside the response body. Absent means
    /// the raw body is the reply.
    #[serde(default)]
    pub response_pointer: Option<String>,
    /// JSON pointer to the base64 image payload (string or array of strings).
    #[serde(default)]
    pub image_pointer: Option<String>,
    /// Substring marking an upstream human-verification challenge.
    #[serde(default)]
    pub captcha_marker: Option<String>,
    #[serde(default = "default_image_mime")]
    pub image_mime: String,
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default)]
    pub display_name: Option<String>,
    pub models: Vec<ModelDescriptor>,
}

pub struct WebChatAdapter {
    kind: String,
    options: WebChatOptions,
}

impl WebChatAdapter {
    pub fn from_settings(kind: impl Into<String>, settings: &AdapterSettings) -> GatewayResult<Self> {
        let kind = kind.into();
        let options: WebChatOptions = settings.parse()?;
        if options.models.is_empty() {
            return Err(GatewayError::internal(format!(
                "adapter '{kind}' declares no models"
            )));
        }
        Ok(Self { kind, options })
    }

    fn resolve(&self, key: &str) -> Option<ModelDescriptor> {
        let parsed = ModelKey::parse(key);
        if !parsed.binds_to(&self.kind) {
            return None;
        }
        if parsed.id.is_empty() {
            return self.options.models.first().cloned();
        }
        self.options.models.iter().find(|m| m.id == parsed.id).cloned()
    }

    /// Bring the page into a clean conversation on the right origin.
    async fn ensure_fresh_conversation(&self, cx: &AdapterContext) -> GatewayResult<()> {
        let current = cx.page.current_url().await.map_err(GatewayError::from)?;
        let on_entry_host = Url::parse(&current)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .map_or(false, |host| {
                self.options.entry_url.host_str() == Some(host.as_str())
            });

        if on_entry_host {
            if let Some(selector) = &self.options.new_chat_selector {
                cx.page.click(selector).await.map_err(GatewayError::from)?;
                return Ok(());
            }
        }
        cx.page
            .navigate(self.options.entry_url.as_str(), NAV_TIMEOUT)
            .await
            .map_err(GatewayError::from)
    }

    fn extract(&self, body: &str, modality: Modality) -> GatewayResult<GenerateOutput> {
        match modality {
            Modality::Text => {
                let Some(pointer) = &self.options.response_pointer else {
                    return Ok(GenerateOutput::text(body));
                };
                let parsed: serde_json::Value = serde_json::from_str(body).map_err(|err| {
                    GatewayError::generation_failed(format!("upstream body is not JSON: {err}"))
                })?;
                let text = parsed
                    .pointer(pointer)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        GatewayError::generation_failed(format!(
                            "no text at pointer '{pointer}' in upstream response"
                        ))
                    })?;
                Ok(GenerateOutput::text(text))
            }
            Modality::Image => {
                let pointer = self.options.image_pointer.as_deref().ok_or_else(|| {
                    GatewayError::internal(format!(
                        "adapter '{}' has image models but no image_pointer",
                        self.kind
                    ))
                })?;
                let parsed: serde_json::Value = serde_json::from_str(body).map_err(|err| {
                    GatewayError::generation_failed(format!("upstream body is not JSON: {err}"))
                })?;
                let node = parsed.pointer(pointer).ok_or_else(|| {
                    GatewayError::generation_failed(format!(
                        "no payload at pointer '{pointer}' in upstream response"
                    ))
                })?;
                let blobs: Vec<MediaBlob> = match node {
                    serde_json::Value::String(one) => vec![MediaBlob {
                        mime: self.options.image_mime.clone(),
                        base64: one.clone(),
                    }],
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(|b64| MediaBlob {
                            mime: self.options.image_mime.clone(),
                            base64: b64.to_string(),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                if blobs.is_empty() {
                    return Err(GatewayError::generation_failed(
                        "upstream response carried no image payload",
                    ));
                }
                Ok(GenerateOutput {
                    text: None,
                    images: blobs,
                })
            }
        }
    }
}

#[async_trait]
impl Adapter for WebChatAdapter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn display_name(&self) -> &str {
        self.options.display_name.as_deref().unwrap_or(&self.kind)
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        self.options.models.clone()
    }

    fn target_url(&self, worker: &WorkerSettings) -> GatewayResult<Url> {
        Ok(worker
            .entry_url
            .clone()
            .unwrap_or_else(|| self.options.entry_url.clone()))
    }

    fn navigation_handlers(&self) -> Vec<Arc<dyn NavigationHandler>> {
        match &self.options.dismiss_selector {
            Some(selector) => vec![Arc::new(DismissHandler {
                selector: selector.clone(),
            })],
            None => Vec::new(),
        }
    }

    async fn generate(
        &self,
        cx: &AdapterContext,
        req: &GenerateRequest,
    ) -> GatewayResult<GenerateOutput> {
        if cx.cancel.is_cancelled() {
            return Err(GatewayError::internal("task cancelled before dispatch"));
        }
        let descriptor = self
            .resolve(&req.model_key)
            .ok_or_else(|| GatewayError::invalid_model(&req.model_key))?;

        debug!(
            adapter = %self.kind,
            task = %req.meta.task_id,
            model = %descriptor.id,
            upstream = %descriptor.upstream_id,
            "starting generation"
        );

        self.ensure_fresh_conversation(cx).await?;

        // The input sequence is the task's critical section: hold the
        // page-auth gate so navigation handlers cannot type or click
        // concurrently. Released once the submit click returns.
        {
            let _input_guard = cx.auth_gate.lock().await;

            if !req.image_paths.is_empty() {
                let selector = self.options.upload_selector.as_deref().ok_or_else(|| {
                    GatewayError::internal(format!("adapter '{}' has no upload input", self.kind))
                })?;
                let paths: Vec<&std::path::Path> =
                    req.image_paths.iter().map(|p| p.as_path()).collect();
                cx.page
                    .upload_files(selector, &paths)
                    .await
                    .map_err(GatewayError::from)?;
            }

            cx.page
                .type_text(&self.options.input_selector, &req.prompt)
                .await
                .map_err(GatewayError::from)?;
            cx.page
                .click(&self.options.send_selector)
                .await
                .map_err(GatewayError::from)?;
        }

        let timeout = Duration::from_secs(self.options.response_timeout_secs);
        let body = tokio::select! {
            _ = cx.cancel.cancelled() => {
                info!(task = %req.meta.task_id, "generation cancelled while awaiting upstream");
                return Err(GatewayError::internal("task cancelled"));
            }
            body = cx.page.wait_for_response(&self.options.response_match, timeout) => {
                body.map_err(GatewayError::from)?
            }
        };

        if let Some(marker) = &self.options.captcha_marker {
            if body.contains(marker.as_str()) {
                return Err(GatewayError::classified("recaptcha validation failed"));
            }
        }

        self.extract(&body, descriptor.modality)
    }
}

/// Best-effort banner dismissal on navigation.
struct DismissHandler {
    selector: String,
}

#[async_trait]
impl NavigationHandler for DismissHandler {
    fn name(&self) -> &str {
        "dismiss"
    }

    async fn on_navigation(&self, cx: &NavigationContext) -> GatewayResult<()> {
        let _guard = cx.auth_gate.lock().await;
        // Absent banner is the common case, not an error.
        if let Err(err) = cx.page.click(&self.selector).await {
            debug!(selector = %self.selector, %err, "nothing to dismiss");
        }
        Ok(())
    }
}
