//! Filesystem store of hosts.
//!
//! Layout:
//!
//! ```text
//! <store>/
//!   .active            # name of the active host, absent if none
//!   <host>/
//!     config.json      # {"DriverName": ..., "DriverOptions": {...}}
//!     ...              # driver files (keys, disk images)
//! ```
//!
//! A host exists exactly when its directory does. The store is not safe for
//! concurrent use on the same host.

use crate::drivers::{DriverOptions, Registry};
use crate::error::{Error, Result};
use crate::host::Host;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Active-host marker file name.
const ACTIVE_FILENAME: &str = ".active";

/// One host directory as seen by [`Store::list`].
#[derive(Debug)]
pub struct HostEntry {
    /// Directory name.
    pub name: String,
    /// The loaded host, or why it could not be loaded.
    pub host: Result<Host>,
}

/// Collection of hosts under one directory.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    registry: Registry,
}

impl Store {
    /// Open the store rooted at `path`. Nothing is created until a host is.
    pub fn new(path: impl Into<PathBuf>, registry: Registry) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    /// Store root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Driver registry used to rebuild hosts.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn host_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn active_path(&self) -> PathBuf {
        self.path.join(ACTIVE_FILENAME)
    }

    /// Create and provision a host.
    ///
    /// Options are validated before anything touches the disk. The
    /// configuration is written before the driver runs, so a host whose
    /// provisioning fails stays in the store with whatever the driver had
    /// already set up. [`Store::remove`] tears it down.
    pub fn create(&self, name: &str, driver_name: &str, options: &DriverOptions) -> Result<Host> {
        Host::validate_name(name)?;
        if self.exists(name)? {
            return Err(Error::HostExists(name.to_string()));
        }

        let host_path = self.host_path(name);
        let driver = self.registry.new_driver(driver_name, &host_path, options)?;

        create_private_dir(&self.path, true)?;
        create_private_dir(&host_path, false)?;

        let mut host = Host::new(name, driver, host_path);
        if let Err(e) = host.create() {
            tracing::warn!(host = %name, error = %e, "host left partially created");
            return Err(e.context("creating host"));
        }
        Ok(host)
    }

    /// Remove a host, clearing the active marker if it pointed at it.
    ///
    /// A host directory without a configuration, such as one left by an
    /// interrupted create, has no driver to ask and is deleted as is.
    pub fn remove(&self, name: &str) -> Result<()> {
        match self.load(name) {
            Ok(mut host) => host.remove()?,
            Err(e) if e.is_not_found() && self.exists(name)? => {
                tracing::warn!(host = %name, "host has no configuration, deleting its directory");
                std::fs::remove_dir_all(self.host_path(name))?;
            }
            Err(e) => return Err(e),
        }

        if self.active_name()?.as_deref() == Some(name) {
            std::fs::remove_file(self.active_path())?;
        }
        Ok(())
    }

    /// Names of all hosts, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if Host::validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every host directory, sorted by name.
    ///
    /// A directory whose host cannot be loaded is still listed, with the
    /// load error in place of the host.
    pub fn list(&self) -> Result<Vec<HostEntry>> {
        let entries = self
            .names()?
            .into_iter()
            .map(|name| {
                let host = self.load(&name);
                if let Err(e) = &host {
                    tracing::debug!(host = %name, error = %e, "failed to load host");
                }
                HostEntry { name, host }
            })
            .collect();
        Ok(entries)
    }

    /// Whether a host named `name` exists.
    pub fn exists(&self, name: &str) -> Result<bool> {
        Host::validate_name(name)?;
        match std::fs::metadata(self.host_path(name)) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a host.
    pub fn load(&self, name: &str) -> Result<Host> {
        Host::validate_name(name)?;
        Host::load(name, &self.host_path(name), &self.registry)
    }

    /// Name stored in the active marker, if any.
    pub fn active_name(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(self.active_path()) {
            Ok(content) => {
                let name = content.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The active host, if one is set.
    pub fn get_active(&self) -> Result<Option<Host>> {
        self.active_name()?
            .map(|name| self.load(&name))
            .transpose()
    }

    /// Mark `host` as active.
    pub fn set_active(&self, host: &Host) -> Result<()> {
        create_private_dir(&self.path, true)?;

        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        opts.open(self.active_path())?
            .write_all(host.name.as_bytes())?;

        tracing::debug!(host = %host.name, "active host set");
        Ok(())
    }

    /// The active host, or the local daemon if none is set.
    pub fn active_or_default(&self) -> Result<Host> {
        Ok(self.get_active()?.unwrap_or_else(Host::default_host))
    }
}

/// Create `path` with mode 0700. With `recursive`, missing parents are
/// created and an existing directory is accepted.
fn create_private_dir(path: &Path, recursive: bool) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}
