//! Host drivers.
//!
//! A [`Driver`] implements the host lifecycle for one backend. Drivers are
//! constructed through the [`Registry`], which maps driver names to
//! constructors and to the options each driver accepts:
//! - [`virtualbox`]: provisions a local VirtualBox machine
//! - [`passthrough`]: `none` and `socket`, wrapping an existing daemon URL
//! - [`default`]: the local daemon, used when no host is active

pub mod default;
pub mod passthrough;
pub mod registry;
pub mod virtualbox;

use crate::error::{Error, Result};
use crate::state::State;
use std::collections::BTreeMap;
use std::process::Command;

pub use default::DefaultDriver;
pub use passthrough::PassThroughDriver;
pub use registry::{DriverFlag, RegisteredDriver, Registry};
pub use virtualbox::VirtualBoxDriver;

/// Raw driver options, the persisted form of a driver's identity.
pub type DriverOptions = BTreeMap<String, String>;

/// An option a driver accepts at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSpec {
    /// Option key, also the suffix of the namespaced flag.
    pub option: &'static str,
    /// Help text.
    pub help: &'static str,
}

/// Lifecycle contract of a host backend.
///
/// Query methods talk to the backend on every call; drivers hold no state
/// beyond their configuration.
pub trait Driver: Send {
    /// Registered name of this driver.
    fn driver_name(&self) -> &'static str;

    /// Options that reconstruct this driver via [`Registry::new_driver`].
    fn get_options(&self) -> DriverOptions;

    /// Parse raw options into the driver's typed configuration.
    ///
    /// Fails with [`Error::Config`] before any external effect if an option
    /// is missing, unknown or invalid.
    fn set_config_from_options(&mut self, options: &DriverOptions) -> Result<()>;

    /// Daemon endpoint, e.g. `tcp://192.168.99.100:2375`.
    fn get_url(&self) -> Result<String>;

    /// Address of the machine.
    fn get_ip(&self) -> Result<String>;

    /// Current state. A missing machine is an error, not [`State::Unknown`].
    fn get_state(&self) -> Result<State>;

    /// Provision the machine.
    fn create(&mut self) -> Result<()>;

    /// Start the machine and wait until it is usable.
    fn start(&mut self) -> Result<()>;

    /// Shut the machine down gracefully.
    fn stop(&mut self) -> Result<()>;

    /// Stop, then start.
    fn restart(&mut self) -> Result<()>;

    /// Power the machine off immediately.
    fn kill(&mut self) -> Result<()>;

    /// Destroy the machine and its backing files.
    fn remove(&mut self) -> Result<()>;

    /// Command that runs `args` on the machine over SSH, if the driver has
    /// SSH access.
    fn get_ssh_command(&self, args: &[&str]) -> Result<Option<Command>>;
}

/// Reject option keys a driver does not know.
pub(crate) fn check_known_options(
    driver: &str,
    options: &DriverOptions,
    flags: &[FlagSpec],
) -> Result<()> {
    for key in options.keys() {
        if !flags.iter().any(|f| f.option == key) {
            return Err(Error::config(format!(
                "unknown option {:?} for driver {}",
                key, driver
            )));
        }
    }
    Ok(())
}
