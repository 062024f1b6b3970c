//! A named host and its persisted driver configuration.

use crate::drivers::{DefaultDriver, Driver, DriverOptions, Registry};
use crate::error::{Error, Result};
use crate::state::State;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Per-host configuration file name.
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the host backed by the local daemon.
pub const DEFAULT_HOST_NAME: &str = "default";

/// On-disk form of a host: which driver, and how to rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    /// Registered driver name.
    pub driver_name: String,
    /// Options passed back to the driver on load.
    #[serde(default)]
    pub driver_options: DriverOptions,
}

/// One named machine.
pub struct Host {
    /// Host name, `[A-Za-z0-9_]+`.
    pub name: String,
    /// Driver owning the machine.
    pub driver: Box<dyn Driver>,
    store_path: PathBuf,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("driver", &self.driver.driver_name())
            .field("store_path", &self.store_path)
            .finish()
    }
}

fn host_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"))
}

impl Host {
    /// Wrap a driver that lives in `store_path`.
    pub fn new(name: impl Into<String>, driver: Box<dyn Driver>, store_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            driver,
            store_path,
        }
    }

    /// The local daemon. It has no directory and cannot be removed.
    pub fn default_host() -> Self {
        Self::new(DEFAULT_HOST_NAME, Box::new(DefaultDriver), PathBuf::new())
    }

    /// Check that `name` is a valid host name.
    pub fn validate_name(name: &str) -> Result<()> {
        if host_name_re().is_match(name) {
            Ok(())
        } else {
            Err(Error::InvalidHostName(name.to_string()))
        }
    }

    /// Load the host stored in `store_path`, rebuilding its driver through
    /// `registry`.
    pub fn load(name: &str, store_path: &Path, registry: &Registry) -> Result<Self> {
        let config_path = store_path.join(CONFIG_FILENAME);
        let data = match std::fs::read(&config_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::HostNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let config: HostConfig = serde_json::from_slice(&data)?;

        let driver = registry.new_driver(&config.driver_name, store_path, &config.driver_options)?;
        Ok(Self::new(name, driver, store_path.to_path_buf()))
    }

    /// Host directory.
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Snapshot of the driver configuration.
    pub fn config(&self) -> HostConfig {
        HostConfig {
            driver_name: self.driver.driver_name().to_string(),
            driver_options: self.driver.get_options(),
        }
    }

    /// Persist the configuration, provision the machine, then persist the
    /// configuration again.
    ///
    /// The second write happens even if the driver fails, so identifiers the
    /// driver assigned on the way (a machine name) are kept and the host can
    /// still be removed.
    pub fn create(&mut self) -> Result<()> {
        tracing::info!(host = %self.name, driver = self.driver.driver_name(), "creating host");
        self.save_config()?;
        let created = self.driver.create();
        let saved = self.save_config();
        created?;
        saved
    }

    /// Write `config.json`, readable by the owner only.
    pub fn save_config(&self) -> Result<()> {
        let data = serde_json::to_vec(&self.config())?;
        let path = self.store_path.join(CONFIG_FILENAME);

        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&path)?;
        file.write_all(&data)?;
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> Result<State> {
        self.driver.get_state()
    }

    /// Daemon URL.
    pub fn url(&self) -> Result<String> {
        self.driver.get_url()
    }

    /// Start the machine.
    pub fn start(&mut self) -> Result<()> {
        tracing::info!(host = %self.name, "starting host");
        self.driver.start()
    }

    /// Stop the machine.
    pub fn stop(&mut self) -> Result<()> {
        tracing::info!(host = %self.name, "stopping host");
        self.driver.stop()
    }

    /// Restart the machine.
    pub fn restart(&mut self) -> Result<()> {
        tracing::info!(host = %self.name, "restarting host");
        self.driver.restart()
    }

    /// Power the machine off.
    pub fn kill(&mut self) -> Result<()> {
        tracing::info!(host = %self.name, "killing host");
        self.driver.kill()
    }

    /// Destroy the machine, then delete the host directory. A machine that
    /// was never registered does not block the directory's removal.
    pub fn remove(&mut self) -> Result<()> {
        tracing::info!(host = %self.name, "removing host");
        match self.driver.remove() {
            Ok(()) => {}
            Err(Error::MachineNotExist(machine)) => {
                tracing::warn!(host = %self.name, %machine, "machine already gone");
            }
            Err(e) => return Err(e),
        }

        let meta = std::fs::metadata(&self.store_path)?;
        if !meta.is_dir() {
            return Err(Error::config(format!(
                "{} is not a directory",
                self.store_path.display()
            )));
        }
        std::fs::remove_dir_all(&self.store_path)?;
        Ok(())
    }
}
