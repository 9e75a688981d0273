//! Dependency checks before anything launches. Failures exit with code 78 so
//! a supervising watchdog knows not to restart.
//!
//! The asset probe is config-independent and runs before the configuration
//! is even loaded; the configured-executable override is checked separately
//! once it is.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::config::Config;

/// Reserved exit code for preflight/dependency failure.
pub const EXIT_PREFLIGHT: i32 = 78;

const CHROME_CANDIDATES: [&str; 5] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Locate a Chrome/Chromium executable on PATH.
pub fn find_browser_on_path() -> Result<PathBuf> {
    for candidate in CHROME_CANDIDATES {
        if let Ok(path) = which::which(candidate) {
            return Ok(path);
        }
    }
    bail!("no Chrome/Chromium executable on PATH; set browser.executable");
}

/// Assets present and the data directory writable. Needs no configuration.
pub fn run(data_dir: &Path) -> Result<()> {
    find_browser_on_path()?;
    probe_data_dir(data_dir)
}

pub fn probe_data_dir(data_dir: &Path) -> Result<()> {
    let temp = data_dir.join("temp");
    std::fs::create_dir_all(&temp)
        .with_context(|| format!("data directory {} is not writable", temp.display()))?;
    let probe = temp.join(".write-probe");
    std::fs::write(&probe, b"ok")
        .with_context(|| format!("data directory {} is not writable", temp.display()))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

/// Validate the `browser.executable` override, once configuration is loaded.
pub fn check_configured_browser(config: &Config) -> Result<()> {
    if let Some(path) = &config.browser.executable {
        if !path.is_file() {
            bail!("configured browser executable {} not found", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_configured_executable_fails() {
        let mut config = Config::default();
        config.browser.executable = Some(PathBuf::from("/definitely/not/here/chrome"));
        assert!(check_configured_browser(&config).is_err());
    }

    #[test]
    fn absent_override_and_existing_file_pass() {
        let config = Config::default();
        check_configured_browser(&config).expect("no override is fine");

        let mut config = Config::default();
        config.browser.executable = Some(std::env::current_exe().expect("self"));
        check_configured_browser(&config).expect("existing file passes");
    }

    #[test]
    fn data_dir_probe_creates_temp() {
        let dir = tempfile::tempdir().expect("scratch dir");
        probe_data_dir(dir.path()).expect("probe");
        assert!(dir.path().join("temp").is_dir());
    }
}
