use serde::{Deserialize, Serialize};

/// What a model produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

/// Whether a model accepts attached images.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    Forbidden,
    Optional,
    Required,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        ImagePolicy::Forbidden
    }
}

/// A model registered by an adapter. Immutable after startup.
///
/// `id` is the stable public name; `upstream_id` is the opaque string the
/// adapter hands to the web service it drives.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub upstream_id: String,
    pub modality: Modality,
    #[serde(default)]
    pub image_policy: ImagePolicy,
}

impl ModelDescriptor {
    pub fn text(id: impl Into<String>, upstream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            upstream_id: upstream_id.into(),
            modality: Modality::Text,
            image_policy: ImagePolicy::Forbidden,
        }
    }

    pub fn image(id: impl Into<String>, upstream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            upstream_id: upstream_id.into(),
            modality: Modality::Image,
            image_policy: ImagePolicy::Forbidden,
        }
    }

    pub fn with_image_policy(mut self, policy: ImagePolicy) -> Self {
        self.image_policy = policy;
        self
    }
}
