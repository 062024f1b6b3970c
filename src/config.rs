//! Global hostkit settings.
//!
//! Settings are read from `<config_dir>/hostkit/config.toml`. A missing file
//! yields the defaults; every field may be omitted individually.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config and cache directories.
const APP_NAME: &str = "hostkit";

/// Settings file name.
const CONFIG_FILENAME: &str = "config.toml";

/// Environment variable overriding the store root.
pub const STORE_PATH_ENV: &str = "HOSTKIT_STORE_PATH";

/// Environment variable overriding the VBoxManage executable.
pub const VBOX_MANAGE_ENV: &str = "VBOX_MANAGE";

/// Default releases index for the boot image.
pub const DEFAULT_RELEASE_INDEX_URL: &str =
    "https://api.github.com/repos/boot2docker/boot2docker/releases";

/// Default download URL template for the boot image; `{tag}` is replaced by
/// the release tag.
pub const DEFAULT_ISO_URL_TEMPLATE: &str =
    "https://github.com/boot2docker/boot2docker/releases/download/{tag}/boot2docker.iso";

/// Global hostkit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory of the host store.
    pub store_path: PathBuf,

    /// Directory holding the shared boot image cache.
    pub cache_dir: PathBuf,

    /// VBoxManage executable name or path.
    pub vbox_manage: String,

    /// Releases index queried for the latest boot image tag.
    pub release_index_url: String,

    /// Boot image URL template (`{tag}` placeholder).
    pub iso_url_template: String,

    /// Interval between state polls while waiting for ACPI shutdown.
    #[serde(with = "duration_str")]
    pub stop_poll_interval: Duration,

    /// Attempts when waiting for SSH after start.
    pub ssh_wait_attempts: u32,

    /// Interval between SSH attempts.
    #[serde(with = "duration_str")]
    pub ssh_wait_interval: Duration,

    /// Attempts per round when waiting for the container daemon.
    pub docker_wait_attempts: u32,

    /// Interval between daemon attempts.
    #[serde(with = "duration_str")]
    pub docker_wait_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| home.join(".cache"))
            .join(APP_NAME);

        Self {
            store_path: home.join(".hostkit").join("hosts"),
            cache_dir,
            vbox_manage: "VBoxManage".to_string(),
            release_index_url: DEFAULT_RELEASE_INDEX_URL.to_string(),
            iso_url_template: DEFAULT_ISO_URL_TEMPLATE.to_string(),
            stop_poll_interval: Duration::from_secs(1),
            ssh_wait_attempts: 60,
            ssh_wait_interval: Duration::from_secs(2),
            docker_wait_attempts: 24,
            docker_wait_interval: Duration::from_secs(10),
        }
    }
}

impl Settings {
    /// Default location of the settings file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILENAME))
    }

    /// Load settings from the default location, then apply environment
    /// overrides.
    ///
    /// If the settings file doesn't exist, returns the defaults.
    pub fn load() -> Result<Self> {
        let mut settings = match Self::default_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        }
    }

    /// Save settings to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::ConfigSave(e.to_string()))
    }

    /// Apply `HOSTKIT_STORE_PATH` and `VBOX_MANAGE` overrides.
    pub fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os(STORE_PATH_ENV) {
            self.store_path = PathBuf::from(path);
        }
        if let Ok(tool) = std::env::var(VBOX_MANAGE_ENV) {
            if !tool.is_empty() {
                self.vbox_manage = tool;
            }
        }
    }

    /// Path of the cached boot image.
    pub fn boot_image_path(&self) -> PathBuf {
        self.cache_dir.join("boot2docker.iso")
    }
}

/// Durations stored as humantime strings ("1s", "10s", "500ms").
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_polling_policy() {
        let settings = Settings::default();
        assert_eq!(settings.stop_poll_interval, Duration::from_secs(1));
        assert_eq!(settings.docker_wait_attempts, 24);
        assert_eq!(settings.docker_wait_interval, Duration::from_secs(10));
        assert_eq!(settings.vbox_manage, "VBoxManage");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
store_path = "/srv/hosts"
stop_poll_interval = "250ms"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.store_path, PathBuf::from("/srv/hosts"));
        assert_eq!(settings.stop_poll_interval, Duration::from_millis(250));
        assert_eq!(settings.docker_wait_attempts, 24);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.ssh_wait_attempts = 5;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_duration_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "stop_poll_interval = \"soon\"\n").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(Error::ConfigLoad(_))
        ));
    }
}
