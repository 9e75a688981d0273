use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::PageResult;

/// Main-frame navigation observed on a page. Fan-out to the worker's merged
/// navigation-handler chain.
#[derive(Clone, Debug)]
pub struct NavigationEvent {
    pub url: String,
}

/// A cookie as exposed on the administrative surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
}

/// Image formats the upload helper accepts.
pub const ACCEPTED_UPLOAD_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

pub fn upload_extension_accepted(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ACCEPTED_UPLOAD_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// The page lifecycle contract adapters drive.
///
/// One page is owned by exactly one worker; nothing else reads or writes it.
/// Every operation is a suspension point in the cooperative model.
#[async_trait]
pub trait DriverPage: Send + Sync {
    /// Navigate the main frame and wait for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> PageResult<()>;

    async fn current_url(&self) -> PageResult<String>;

    /// Type into the element matched by `selector`. The human-emulating
    /// keyboard driver sits behind this call in production.
    async fn type_text(&self, selector: &str, text: &str) -> PageResult<()>;

    async fn click(&self, selector: &str) -> PageResult<()>;

    async fn evaluate(&self, expression: &str) -> PageResult<serde_json::Value>;

    /// Attach local files to the file input matched by `selector`.
    async fn upload_files(&self, selector: &str, paths: &[&Path]) -> PageResult<()>;

    /// Wait for a network response whose URL contains `url_substring` and
    /// return its (decoded) body.
    async fn wait_for_response(&self, url_substring: &str, timeout: Duration)
        -> PageResult<String>;

    async fn cookies(&self, domain: Option<&str>) -> PageResult<Vec<Cookie>>;

    /// Subscribe to main-frame navigations.
    fn subscribe_navigations(&self) -> broadcast::Receiver<NavigationEvent>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> PageResult<()>;
}
