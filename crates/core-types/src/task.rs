use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier for one admitted request, carried through logs and adapters.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request metadata visible to adapters.
#[derive(Clone, Debug)]
pub struct GenerateMeta {
    pub task_id: TaskId,
    pub stream: bool,
}

/// A binary payload produced by an image/video model.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaBlob {
    pub mime: String,
    pub base64: String,
}

impl MediaBlob {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

/// What an adapter hands back on success. `text` may itself carry data URIs
/// concatenated by the adapter; it is passed through verbatim.
#[derive(Clone, Debug, Default)]
pub struct GenerateOutput {
    pub text: Option<String>,
    pub images: Vec<MediaBlob>,
}

impl GenerateOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            images: Vec::new(),
        }
    }

    pub fn image(blob: MediaBlob) -> Self {
        Self {
            text: None,
            images: vec![blob],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty) && self.images.is_empty()
    }
}

/// The snapshot of an admitted request that travels to a worker.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub prompt: String,
    pub image_paths: Vec<PathBuf>,
    pub model_key: String,
    pub meta: GenerateMeta,
    /// Cooperative cancellation; adapters consult it between suspension
    /// points but are not required to short-circuit mid-upload.
    pub cancel: CancellationToken,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, model_key: impl Into<String>, stream: bool) -> Self {
        Self {
            prompt: prompt.into(),
            image_paths: Vec::new(),
            model_key: model_key.into(),
            meta: GenerateMeta {
                task_id: TaskId::new(),
                stream,
            },
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_images(mut self, paths: Vec<PathBuf>) -> Self {
        self.image_paths = paths;
        self
    }

    pub fn has_images(&self) -> bool {
        !self.image_paths.is_empty()
    }
}
