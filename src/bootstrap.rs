//! Wires configuration into the adapter registry and the worker pool.
//!
//! Adapters are a compiled-in set keyed by a string driver tag; each
//! `backend.adapter.<kind>` section instantiates one under that kind.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tabgate_adapters::{Adapter, AdapterRegistry, AdapterSettings, WebChatAdapter};
use tabgate_page::BrowserLauncher;
use tabgate_pool::{Instance, InstanceSpec, Pool, ProxyChoice, Worker, WorkerKind, WorkerSpec};

use crate::config::Config;

pub fn build_registry(config: &Config) -> Result<Arc<AdapterRegistry>> {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();
    for (kind, section) in &config.backend.adapter {
        let driver = section
            .get("driver")
            .and_then(|value| value.as_str())
            .unwrap_or(kind);
        let adapter: Arc<dyn Adapter> = match driver {
            "webchat" => Arc::new(
                WebChatAdapter::from_settings(kind.clone(), &AdapterSettings(section.clone()))
                    .with_context(|| format!("adapter '{kind}'"))?,
            ),
            other => bail!("adapter '{kind}' names unknown driver '{other}'"),
        };
        adapters.push(adapter);
    }
    let registry = AdapterRegistry::new(adapters).context("building adapter registry")?;
    Ok(Arc::new(registry))
}

pub fn build_pool(
    config: &Config,
    registry: &Arc<AdapterRegistry>,
    launcher: Arc<dyn BrowserLauncher>,
    data_dir: &Path,
) -> Result<Arc<Pool>> {
    let global_proxy = config.global_proxy();
    let failover = config.backend.pool.failover;

    let mut instances = Vec::new();
    for instance_cfg in &config.backend.pool.instances {
        let proxy_choice = match &instance_cfg.proxy {
            None => ProxyChoice::Inherit,
            Some(proxy) if proxy.enable => match proxy.to_spec() {
                Some(spec) => ProxyChoice::Override(spec),
                None => bail!(
                    "instance '{}': proxy enabled but host/port missing",
                    instance_cfg.name
                ),
            },
            Some(_) => ProxyChoice::Disabled,
        };
        let user_data_dir = instance_cfg.user_data_dir(data_dir);
        let worker_proxy = proxy_choice.resolve(global_proxy.as_ref());

        let workers: Vec<Arc<Worker>> = instance_cfg
            .workers
            .iter()
            .map(|worker_cfg| {
                let kind = if worker_cfg.merge_types.is_empty() {
                    WorkerKind::Single {
                        kind: worker_cfg.kind.clone().unwrap_or_default(),
                    }
                } else {
                    WorkerKind::Merge {
                        kinds: worker_cfg.merge_types.clone(),
                        monitor: worker_cfg.merge_monitor.clone(),
                    }
                };
                Worker::new(
                    WorkerSpec {
                        name: worker_cfg.name.clone(),
                        kind,
                        entry_url: worker_cfg.entry_url.clone(),
                    },
                    Arc::clone(registry),
                    failover,
                    user_data_dir.clone(),
                    worker_proxy.clone(),
                )
            })
            .collect();

        instances.push(Instance::new(
            InstanceSpec {
                name: instance_cfg.name.clone(),
                user_data_dir,
                proxy: proxy_choice,
                headless: config.browser.headless(),
                executable: config.browser.executable.clone(),
            },
            Arc::clone(&launcher),
            global_proxy.as_ref(),
            workers,
        ));
    }

    Ok(Pool::new(
        instances,
        config.backend.pool.strategy,
        failover,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabgate_page::NoopBrowser;

    fn config_yaml() -> Config {
        serde_yaml::from_str(
            r#"
server:
  auth: "0123456789abc"
backend:
  pool:
    instances:
      - name: main
        workers:
          - name: w0
            type: webchat
  adapter:
    webchat:
      entry_url: "https://chat.example.com/"
      response_match: "/api/chat"
      models:
        - id: m-text
          upstream_id: up-text
          modality: text
"#,
        )
        .expect("config yaml")
    }

    #[test]
    fn registry_and_pool_come_up_from_config() {
        let config = config_yaml();
        let registry = build_registry(&config).expect("registry");
        assert!(registry.supports_model("webchat", "m-text"));

        let dir = tempfile::tempdir().expect("scratch dir");
        let pool = build_pool(&config, &registry, NoopBrowser::new(), dir.path()).expect("pool");
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.workers()[0].name(), "w0");
        assert!(pool.workers()[0].supports("m-text"));
    }

    #[test]
    fn unknown_driver_is_a_startup_error() {
        let mut config = config_yaml();
        config
            .backend
            .adapter
            .get_mut("webchat")
            .expect("section")
            .as_object_mut()
            .expect("object")
            .insert("driver".into(), serde_json::json!("mystery"));
        assert!(build_registry(&config).is_err());
    }
}
