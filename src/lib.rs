//! hostkit - provision and manage container hosts.
//!
//! A host is a named machine running a container daemon. Every host is
//! operated through the same lifecycle ([`drivers::Driver`]) whatever backs
//! it: a local VirtualBox guest, or an existing daemon reached by URL.
//!
//! ```no_run
//! use hostkit::{DriverOptions, Registry, Settings, Store};
//!
//! let settings = Settings::load()?;
//! let store = Store::new(&settings.store_path, Registry::builtin(&settings)?);
//!
//! let options = DriverOptions::from([("memory".to_string(), "2048".to_string())]);
//! let mut host = store.create("dev", "virtualbox", &options)?;
//! host.start()?;
//! store.set_active(&host)?;
//! println!("{}", host.url()?);
//! # Ok::<(), hostkit::Error>(())
//! ```

pub mod config;
pub mod disk;
pub mod drivers;
pub mod error;
pub mod host;
pub mod probe;
pub mod ssh;
pub mod state;
pub mod store;

pub use config::Settings;
pub use drivers::{Driver, DriverOptions, Registry};
pub use error::{Error, Result};
pub use host::{Host, HostConfig};
pub use state::State;
pub use store::{HostEntry, Store};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
