//! Inert page and browser used before initialization and in tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::error::{PageError, PageErrorKind, PageResult};
use crate::launch::{BrowserHandle, BrowserLauncher, LaunchSpec};
use crate::page::{upload_extension_accepted, Cookie, DriverPage, NavigationEvent};

/// A page that accepts every interaction and records it.
///
/// `wait_for_response` pops bodies scripted via [`NoopPage::push_response`];
/// without one it reports a response timeout, which is what a real page does
/// when nothing upstream answers.
#[derive(Debug)]
pub struct NoopPage {
    url: RwLock<String>,
    nav_tx: broadcast::Sender<NavigationEvent>,
    closed: AtomicBool,
    responses: Mutex<VecDeque<String>>,
    response_delay: Mutex<Option<Duration>>,
    cookies: Mutex<Vec<Cookie>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub clicked: Mutex<Vec<String>>,
    pub uploaded: Mutex<Vec<Vec<PathBuf>>>,
}

impl NoopPage {
    pub fn new() -> Arc<Self> {
        let (nav_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            url: RwLock::new("about:blank".to_string()),
            nav_tx,
            closed: AtomicBool::new(false),
            responses: Mutex::new(VecDeque::new()),
            response_delay: Mutex::new(None),
            cookies: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            clicked: Mutex::new(Vec::new()),
            uploaded: Mutex::new(Vec::new()),
        })
    }

    pub fn push_response(&self, body: impl Into<String>) {
        self.responses.lock().push_back(body.into());
    }

    /// Make every `wait_for_response` take this long, emulating a slow
    /// upstream.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock() = Some(delay);
    }

    pub fn set_cookies(&self, cookies: Vec<Cookie>) {
        *self.cookies.lock() = cookies;
    }
}

#[async_trait]
impl DriverPage for NoopPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> PageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PageError::new(PageErrorKind::Closed));
        }
        *self.url.write() = url.to_string();
        let _ = self.nav_tx.send(NavigationEvent {
            url: url.to_string(),
        });
        Ok(())
    }

    async fn current_url(&self) -> PageResult<String> {
        Ok(self.url.read().clone())
    }

    async fn type_text(&self, selector: &str, text: &str) -> PageResult<()> {
        self.typed
            .lock()
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> PageResult<()> {
        self.clicked.lock().push(selector.to_string());
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> PageResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn upload_files(&self, _selector: &str, paths: &[&Path]) -> PageResult<()> {
        for path in paths {
            if !upload_extension_accepted(path) {
                return Err(PageError::new(PageErrorKind::Internal)
                    .with_hint(format!("unsupported upload format: {}", path.display())));
            }
        }
        self.uploaded
            .lock()
            .push(paths.iter().map(|p| p.to_path_buf()).collect());
        Ok(())
    }

    async fn wait_for_response(
        &self,
        url_substring: &str,
        _timeout: Duration,
    ) -> PageResult<String> {
        let delay = *self.response_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.lock().pop_front() {
            Some(body) => Ok(body),
            None => Err(PageError::new(PageErrorKind::ResponseTimeout)
                .with_hint(url_substring.to_string())),
        }
    }

    async fn cookies(&self, domain: Option<&str>) -> PageResult<Vec<Cookie>> {
        Ok(self
            .cookies
            .lock()
            .iter()
            .filter(|c| domain.map_or(true, |d| c.domain.trim_start_matches('.') == d))
            .cloned()
            .collect())
    }

    fn subscribe_navigations(&self) -> broadcast::Receiver<NavigationEvent> {
        self.nav_tx.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> PageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A browser that hands out [`NoopPage`]s.
#[derive(Debug, Default)]
pub struct NoopBrowser {
    pub pages: Mutex<Vec<Arc<NoopPage>>>,
}

impl NoopBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BrowserHandle for NoopBrowser {
    async fn new_page(&self, url: &str) -> PageResult<Arc<dyn DriverPage>> {
        let page = NoopPage::new();
        page.navigate(url, Duration::from_secs(1)).await?;
        self.pages.lock().push(Arc::clone(&page));
        Ok(page)
    }

    async fn close(&self) -> PageResult<()> {
        for page in self.pages.lock().iter() {
            page.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for NoopBrowser {
    async fn launch(&self, _spec: &LaunchSpec) -> PageResult<Arc<dyn BrowserHandle>> {
        Ok(NoopBrowser::new())
    }
}

/// Launcher that keeps hold of every browser it hands out so tests can reach
/// the pages behind a pool.
#[derive(Debug, Default)]
pub struct NoopLauncher {
    pub browsers: Mutex<Vec<Arc<NoopBrowser>>>,
}

impl NoopLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pages(&self) -> Vec<Arc<NoopPage>> {
        self.browsers
            .lock()
            .iter()
            .flat_map(|browser| browser.pages.lock().clone())
            .collect()
    }
}

#[async_trait]
impl BrowserLauncher for NoopLauncher {
    async fn launch(&self, _spec: &LaunchSpec) -> PageResult<Arc<dyn BrowserHandle>> {
        let browser = NoopBrowser::new();
        self.browsers.lock().push(Arc::clone(&browser));
        Ok(browser)
    }
}
