use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PageResult;
use crate::page::DriverPage;

/// Proxy protocol accepted by the launcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

/// Resolved proxy for one browser process.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxySpec {
    /// Value for Chromium's `--proxy-server` switch. Credentials are not
    /// part of the switch; they are answered at the CDP auth challenge.
    pub fn server_arg(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// What the launcher needs to bring up one isolated browser process.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub user_data_dir: PathBuf,
    pub proxy: Option<ProxySpec>,
    pub headless: bool,
    pub executable: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(user_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_data_dir: user_data_dir.into(),
            proxy: None,
            headless: true,
            executable: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<ProxySpec>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// A running browser process. One handle per instance; workers borrow tabs.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a new tab on `url` and return its page.
    async fn new_page(&self, url: &str) -> PageResult<Arc<dyn DriverPage>>;

    async fn close(&self) -> PageResult<()>;
}

/// Seam for the external anti-fingerprint launcher.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> PageResult<Arc<dyn BrowserHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_server_arg() {
        let proxy = ProxySpec {
            scheme: ProxyScheme::Socks5,
            host: "127.0.0.1".into(),
            port: 1080,
            username: None,
            password: None,
        };
        assert_eq!(proxy.server_arg(), "socks5://127.0.0.1:1080");

        let proxy = ProxySpec {
            scheme: ProxyScheme::Http,
            host: "proxy.internal".into(),
            port: 8080,
            username: Some("u".into()),
            password: Some("p".into()),
        };
        assert_eq!(proxy.server_arg(), "http://proxy.internal:8080");
    }
}
