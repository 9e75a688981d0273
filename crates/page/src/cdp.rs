//! chromiumoxide-backed implementation of the page contract.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PageError, PageErrorKind, PageResult};
use crate::launch::{BrowserHandle, BrowserLauncher, LaunchSpec};
use crate::page::{upload_extension_accepted, Cookie, DriverPage, NavigationEvent};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const NAV_EVENT_CAPACITY: usize = 64;

fn map_cdp(err: CdpError) -> PageError {
    let text = err.to_string();
    if text.contains("closed") || text.contains("Closed") {
        PageError::new(PageErrorKind::Closed).with_hint(text)
    } else {
        PageError::new(PageErrorKind::CdpIo).with_hint(text)
    }
}

/// Stock launcher. The production deployment swaps in the anti-fingerprint
/// launcher behind the same trait.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> PageResult<Arc<dyn BrowserHandle>> {
        tokio::fs::create_dir_all(&spec.user_data_dir)
            .await
            .map_err(|err| {
                PageError::new(PageErrorKind::Internal)
                    .with_hint(format!("user data dir: {err}"))
            })?;

        let mut builder = BrowserConfig::builder().user_data_dir(&spec.user_data_dir);
        if !spec.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &spec.executable {
            builder = builder.chrome_executable(executable.clone());
        }
        if let Some(proxy) = &spec.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.server_arg()));
        }
        let config = builder
            .build()
            .map_err(|err| PageError::new(PageErrorKind::Internal).with_hint(err))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(map_cdp)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(?err, "cdp handler event error");
                }
            }
        });

        Ok(Arc::new(CdpBrowser {
            browser: Mutex::new(Some(browser)),
            handler_task,
        }))
    }
}

/// One Chromium process. Tabs are added per worker; the process lives for the
/// owning instance's lifetime.
pub struct CdpBrowser {
    browser: Mutex<Option<Browser>>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    async fn new_page(&self, url: &str) -> PageResult<Arc<dyn DriverPage>> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| PageError::new(PageErrorKind::Closed).with_hint("browser closed"))?;
        let page = browser.new_page(url).await.map_err(map_cdp)?;
        let page = CdpPage::attach(page).await?;
        Ok(page)
    }

    async fn close(&self) -> PageResult<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(err) = browser.close().await {
                warn!(?err, "browser close reported an error");
            }
        }
        self.handler_task.abort();
        Ok(())
    }
}

/// A single tab.
pub struct CdpPage {
    page: Page,
    nav_tx: broadcast::Sender<NavigationEvent>,
    closed: Arc<AtomicBool>,
    nav_task: JoinHandle<()>,
}

impl CdpPage {
    pub async fn attach(page: Page) -> PageResult<Arc<Self>> {
        let (nav_tx, _) = broadcast::channel(NAV_EVENT_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let mut navigations = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(map_cdp)?;
        let forward_tx = nav_tx.clone();
        let forward_closed = Arc::clone(&closed);
        let nav_task = tokio::spawn(async move {
            while let Some(event) = navigations.next().await {
                if event.frame.parent_id.is_none() {
                    let _ = forward_tx.send(NavigationEvent {
                        url: event.frame.url.clone(),
                    });
                }
            }
            // Event stream ending means the target is gone.
            forward_closed.store(true, Ordering::SeqCst);
        });

        Ok(Arc::new(Self {
            page,
            nav_tx,
            closed,
            nav_task,
        }))
    }

    fn ensure_open(&self) -> PageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PageError::new(PageErrorKind::Closed))
        } else {
            Ok(())
        }
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.nav_task.abort();
    }
}

#[async_trait]
impl DriverPage for CdpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> PageResult<()> {
        self.ensure_open()?;
        let nav = async {
            self.page.goto(url).await.map_err(map_cdp)?;
            self.page.wait_for_navigation().await.map_err(map_cdp)?;
            Ok::<_, PageError>(())
        };
        tokio::time::timeout(timeout, nav)
            .await
            .map_err(|_| PageError::new(PageErrorKind::NavTimeout).with_hint(url.to_string()))?
    }

    async fn current_url(&self) -> PageResult<String> {
        self.ensure_open()?;
        self.page
            .url()
            .await
            .map_err(map_cdp)?
            .ok_or_else(|| PageError::new(PageErrorKind::Invalid).with_hint("no main frame url"))
    }

    async fn type_text(&self, selector: &str, text: &str) -> PageResult<()> {
        self.ensure_open()?;
        let element = self.page.find_element(selector).await.map_err(map_cdp)?;
        element.click().await.map_err(map_cdp)?;
        element.type_str(text).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> PageResult<()> {
        self.ensure_open()?;
        let element = self.page.find_element(selector).await.map_err(map_cdp)?;
        element.click().await.map_err(map_cdp)?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> PageResult<serde_json::Value> {
        self.ensure_open()?;
        let result = self.page.evaluate(expression).await.map_err(map_cdp)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn upload_files(&self, selector: &str, paths: &[&Path]) -> PageResult<()> {
        self.ensure_open()?;
        for path in paths {
            if !upload_extension_accepted(path) {
                return Err(PageError::new(PageErrorKind::Internal)
                    .with_hint(format!("unsupported upload format: {}", path.display())));
            }
        }
        let element = self.page.find_element(selector).await.map_err(map_cdp)?;
        let files: Vec<String> = paths
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        let params = SetFileInputFilesParams::builder()
            .files(files)
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(|err| PageError::new(PageErrorKind::Internal).with_hint(err))?;
        let upload = async {
            self.page.execute(params).await.map_err(map_cdp)?;
            Ok::<_, PageError>(())
        };
        tokio::time::timeout(UPLOAD_TIMEOUT, upload)
            .await
            .map_err(|_| PageError::new(PageErrorKind::UploadTimeout))?
    }

    async fn wait_for_response(
        &self,
        url_substring: &str,
        timeout: Duration,
    ) -> PageResult<String> {
        self.ensure_open()?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(map_cdp)?;

        let matcher = async {
            while let Some(event) = responses.next().await {
                if !event.response.url.contains(url_substring) {
                    continue;
                }
                let status = event.response.status;
                if !(200..300).contains(&status) {
                    return Err(PageError::new(PageErrorKind::CdpIo)
                        .with_hint(format!("HTTP {status} from {}", event.response.url)));
                }
                let body = self
                    .page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                    .map_err(map_cdp)?;
                let text = if body.base64_encoded {
                    let raw = base64::engine::general_purpose::STANDARD
                        .decode(body.body.as_bytes())
                        .map_err(|err| {
                            PageError::new(PageErrorKind::Internal)
                                .with_hint(format!("response decode: {err}"))
                        })?;
                    String::from_utf8_lossy(&raw).into_owned()
                } else {
                    body.body.clone()
                };
                return Ok(text);
            }
            Err(PageError::new(PageErrorKind::Closed))
        };

        tokio::time::timeout(timeout, matcher)
            .await
            .map_err(|_| {
                PageError::new(PageErrorKind::ResponseTimeout).with_hint(url_substring.to_string())
            })?
    }

    async fn cookies(&self, domain: Option<&str>) -> PageResult<Vec<Cookie>> {
        self.ensure_open()?;
        let raw = self.page.get_cookies().await.map_err(map_cdp)?;
        let cookies = raw
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: Some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .filter(|c| match domain {
                Some(filter) => {
                    let have = c.domain.trim_start_matches('.');
                    let want = filter.trim_start_matches('.');
                    have == want || have.ends_with(&format!(".{want}"))
                }
                None => true,
            })
            .collect();
        Ok(cookies)
    }

    fn subscribe_navigations(&self) -> broadcast::Receiver<NavigationEvent> {
        self.nav_tx.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> PageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.page.clone().close().await.map_err(map_cdp)?;
        Ok(())
    }
}
