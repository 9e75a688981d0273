//! Engine configuration: YAML schema, defaults, validation, and the
//! one-time migration of a root-level `config.yaml` into `data/`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tabgate_page::{ProxyScheme, ProxySpec};
use tabgate_pool::{FailoverPolicy, Strategy};
use tracing::info;
use url::Url;

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepaliveMode {
    #[default]
    Comment,
    Content,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeepaliveConfig {
    pub mode: KeepaliveMode,
    pub interval_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            mode: KeepaliveMode::Comment,
            interval_secs: 12,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Shared bearer token. At least 10 characters.
    pub auth: String,
    pub keepalive: KeepaliveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth: String::new(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enable: bool,
    #[serde(rename = "type")]
    pub scheme: Option<ProxyScheme>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub passwd: Option<String>,
}

impl ProxyConfig {
    pub fn to_spec(&self) -> Option<ProxySpec> {
        if !self.enable {
            return None;
        }
        Some(ProxySpec {
            scheme: self.scheme.unwrap_or(ProxyScheme::Http),
            host: self.host.clone()?,
            port: self.port?,
            username: self.user.clone(),
            password: self.passwd.clone(),
        })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub proxy: ProxyConfig,
    pub headless: Option<bool>,
    pub executable: Option<PathBuf>,
}

impl BrowserConfig {
    pub fn headless(&self) -> bool {
        self.headless.unwrap_or(true)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub queue_buffer: usize,
    pub image_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_buffer: 2,
            image_limit: 5,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    pub name: String,
    /// Adapter kind for a single worker.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Non-empty makes this a merge worker; `type` is then ignored.
    pub merge_types: Vec<String>,
    pub merge_monitor: Option<String>,
    pub entry_url: Option<Url>,
}

impl WorkerConfig {
    pub fn member_kinds(&self) -> Vec<String> {
        if self.merge_types.is_empty() {
            self.kind.clone().into_iter().collect()
        } else {
            self.merge_types.clone()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceConfig {
    pub name: String,
    /// Suffix for the instance's user-data directory.
    pub user_data_mark: Option<String>,
    /// Absent inherits the global proxy; present-but-disabled forces a
    /// direct connection.
    pub proxy: Option<ProxyConfig>,
    pub workers: Vec<WorkerConfig>,
}

impl InstanceConfig {
    pub fn user_data_dir(&self, data_dir: &Path) -> PathBuf {
        match &self.user_data_mark {
            Some(mark) => data_dir.join(format!("chromeUserData_{mark}")),
            None => data_dir.join("chromeUserData"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub strategy: Strategy,
    pub failover: FailoverPolicy,
    pub instances: Vec<InstanceConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::LeastBusy,
            failover: FailoverPolicy::default(),
            instances: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub pool: PoolConfig,
    /// `backend.adapter.<kind>` sections; the optional `driver` field picks
    /// the compiled-in driver, defaulting to the kind itself.
    pub adapter: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub queue: QueueConfig,
    pub backend: BackendConfig,
}

impl Config {
    /// Load from `<data_dir>/config.yaml`, migrating a root-level
    /// `config.yaml` into place on first run. A missing file yields defaults.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let legacy = PathBuf::from(CONFIG_FILE);
        if !tokio::fs::try_exists(&path).await? && tokio::fs::try_exists(&legacy).await? {
            tokio::fs::create_dir_all(data_dir)
                .await
                .with_context(|| format!("creating {}", data_dir.display()))?;
            tokio::fs::rename(&legacy, &path)
                .await
                .with_context(|| {
                    format!("migrating {} into {}", legacy.display(), path.display())
                })?;
            info!(path = %path.display(), "migrated root-level configuration");
        }
        Self::load_file(&path).await
    }

    pub async fn load_file(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn global_proxy(&self) -> Option<ProxySpec> {
        self.browser.proxy.to_spec()
    }

    /// Startup validation. Duplicate names or user-data directories, merge
    /// workers without members, monitors outside the member list, and weak
    /// auth tokens are all configuration errors.
    pub fn validate(&self, data_dir: &Path) -> Result<()> {
        if self.server.auth.len() < 10 {
            bail!("server.auth must be at least 10 characters");
        }
        if !(10..=15).contains(&self.server.keepalive.interval_secs) {
            bail!("server.keepalive.interval_secs must be within 10..=15");
        }
        if self.backend.pool.instances.is_empty() {
            bail!("backend.pool.instances must not be empty");
        }

        let mut instance_names = HashSet::new();
        let mut data_dirs = HashSet::new();
        let mut worker_names = HashSet::new();
        for instance in &self.backend.pool.instances {
            if instance.name.is_empty() {
                bail!("instance name must not be empty");
            }
            if !instance_names.insert(instance.name.as_str()) {
                bail!("duplicate instance name '{}'", instance.name);
            }
            let dir = instance.user_data_dir(data_dir);
            if !data_dirs.insert(dir.clone()) {
                bail!(
                    "user data dir {} is claimed by more than one instance",
                    dir.display()
                );
            }
            if instance.workers.is_empty() {
                bail!("instance '{}' has no workers", instance.name);
            }
            for worker in &instance.workers {
                if worker.name.is_empty() {
                    bail!(
                        "worker name must not be empty (instance '{}')",
                        instance.name
                    );
                }
                if !worker_names.insert(worker.name.as_str()) {
                    bail!("duplicate worker name '{}'", worker.name);
                }
                let members = worker.member_kinds();
                if members.is_empty() {
                    bail!(
                        "worker '{}' names neither a type nor mergeTypes",
                        worker.name
                    );
                }
                if let Some(monitor) = &worker.merge_monitor {
                    if !worker.merge_types.iter().any(|k| k == monitor) {
                        bail!(
                            "worker '{}': mergeMonitor '{}' is not a member type",
                            worker.name,
                            monitor
                        );
                    }
                }
                for kind in &members {
                    if !self.backend.adapter.contains_key(kind) {
                        bail!(
                            "worker '{}' references adapter '{}' with no backend.adapter section",
                            worker.name,
                            kind
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
server:
  port: 9090
  auth: "0123456789abc"
  keepalive:
    mode: content
    intervalSecs: 10
queue:
  queueBuffer: 3
  imageLimit: 2
backend:
  pool:
    strategy: round_robin
    failover:
      enabled: true
      maxRetries: 1
    instances:
      - name: main
        workers:
          - name: w0
            type: webchat
      - name: spare
        userDataMark: spare
        proxy:
          enable: false
        workers:
          - name: w1
            mergeTypes: [webchat, artchat]
            mergeMonitor: artchat
  adapter:
    webchat:
      entry_url: "https://chat.example.com/"
      response_match: "/api/chat"
      models:
        - id: m-text
          upstream_id: up-text
          modality: text
    artchat:
      entry_url: "https://art.example.com/"
      response_match: "/api/art"
      models:
        - id: m-img
          upstream_id: up-img
          modality: image
          image_policy: required
"#
    }

    #[test]
    fn parses_the_documented_schema() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).expect("yaml parses");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.keepalive.mode, KeepaliveMode::Content);
        assert_eq!(config.server.keepalive.interval_secs, 10);
        assert_eq!(config.queue.queue_buffer, 3);
        assert_eq!(config.queue.image_limit, 2);
        assert_eq!(config.backend.pool.strategy, Strategy::RoundRobin);
        assert_eq!(config.backend.pool.failover.max_retries, 1);
        assert_eq!(config.backend.pool.instances.len(), 2);
        let merge = &config.backend.pool.instances[1].workers[0];
        assert_eq!(merge.member_kinds(), vec!["webchat", "artchat"]);
        assert_eq!(merge.merge_monitor.as_deref(), Some("artchat"));
        config.validate(Path::new("data")).expect("valid config");
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = serde_yaml::from_str("server:\n  port: 1234\n").expect("yaml");
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.queue.queue_buffer, 2);
        assert_eq!(config.queue.image_limit, 5);
        assert_eq!(config.server.keepalive.interval_secs, 12);
        assert!(config.backend.pool.failover.enabled);
        assert_eq!(config.backend.pool.failover.max_retries, 2);
    }

    #[test]
    fn user_data_dirs_are_per_mark() {
        let plain = InstanceConfig::default();
        assert_eq!(
            plain.user_data_dir(Path::new("data")),
            PathBuf::from("data/chromeUserData")
        );
        let marked = InstanceConfig {
            user_data_mark: Some("spare".into()),
            ..Default::default()
        };
        assert_eq!(
            marked.user_data_dir(Path::new("data")),
            PathBuf::from("data/chromeUserData_spare")
        );
    }

    #[test]
    fn validation_rejects_weak_auth_and_duplicates() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).expect("yaml");
        config.server.auth = "short".into();
        assert!(config.validate(Path::new("data")).is_err());

        let mut config: Config = serde_yaml::from_str(minimal_yaml()).expect("yaml");
        config.backend.pool.instances[1].workers[0].name = "w0".into();
        assert!(config.validate(Path::new("data")).is_err());

        let mut config: Config = serde_yaml::from_str(minimal_yaml()).expect("yaml");
        config.backend.pool.instances[1].user_data_mark = None;
        assert!(config.validate(Path::new("data")).is_err());

        let mut config: Config = serde_yaml::from_str(minimal_yaml()).expect("yaml");
        config.backend.pool.instances[1].workers[0].merge_monitor = Some("missing".into());
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn proxy_resolution_from_config() {
        let proxy = ProxyConfig {
            enable: true,
            scheme: Some(ProxyScheme::Socks5),
            host: Some("127.0.0.1".into()),
            port: Some(1080),
            user: None,
            passwd: None,
        };
        let spec = proxy.to_spec().expect("enabled proxy resolves");
        assert_eq!(spec.server_arg(), "socks5://127.0.0.1:1080");

        let disabled = ProxyConfig {
            enable: false,
            ..proxy
        };
        assert!(disabled.to_spec().is_none());
    }
}
