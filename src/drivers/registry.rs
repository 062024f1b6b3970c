//! Driver registry.
//!
//! The registry is an explicit value assembled by the caller, usually with
//! [`Registry::builtin`]. Each entry pairs a constructor with the options the
//! driver accepts, so flag surfaces can be listed before any driver exists.

use super::{Driver, DriverOptions, FlagSpec, PassThroughDriver, VirtualBoxDriver};
use crate::config::Settings;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Constructor for a driver bound to a host directory.
pub type Constructor = Box<dyn Fn(&Path) -> Result<Box<dyn Driver>> + Send + Sync>;

/// A registered driver.
pub struct RegisteredDriver {
    constructor: Constructor,
    create_flags: &'static [FlagSpec],
}

impl RegisteredDriver {
    /// Pair a constructor with the options the driver accepts.
    pub fn new<F>(constructor: F, create_flags: &'static [FlagSpec]) -> Self
    where
        F: Fn(&Path) -> Result<Box<dyn Driver>> + Send + Sync + 'static,
    {
        Self {
            constructor: Box::new(constructor),
            create_flags,
        }
    }
}

impl std::fmt::Debug for RegisteredDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredDriver")
            .field("create_flags", &self.create_flags)
            .finish_non_exhaustive()
    }
}

/// A driver option exposed as a namespaced command-line flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverFlag {
    /// Driver the option belongs to.
    pub driver: String,
    /// Option key.
    pub option: &'static str,
    /// Flag name, `<driver>-<option>`.
    pub flag: String,
    /// Help text.
    pub help: &'static str,
}

/// Name-keyed table of drivers.
#[derive(Debug, Default)]
pub struct Registry {
    drivers: BTreeMap<String, RegisteredDriver>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in driver.
    pub fn builtin(settings: &Settings) -> Result<Self> {
        let mut registry = Self::new();

        registry.register(
            "none",
            RegisteredDriver::new(
                |_| Ok(Box::new(PassThroughDriver::new("none"))),
                PassThroughDriver::CREATE_FLAGS,
            ),
        )?;
        registry.register(
            "socket",
            RegisteredDriver::new(
                |_| Ok(Box::new(PassThroughDriver::new("socket"))),
                PassThroughDriver::CREATE_FLAGS,
            ),
        )?;

        let settings = settings.clone();
        registry.register(
            "virtualbox",
            RegisteredDriver::new(
                move |store_path| Ok(Box::new(VirtualBoxDriver::new(store_path, &settings))),
                VirtualBoxDriver::CREATE_FLAGS,
            ),
        )?;

        Ok(registry)
    }

    /// Register a driver under `name`.
    ///
    /// Registering the same name twice is a programming error and fails.
    pub fn register(&mut self, name: impl Into<String>, driver: RegisteredDriver) -> Result<()> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return Err(Error::DriverAlreadyRegistered(name));
        }
        self.drivers.insert(name, driver);
        Ok(())
    }

    /// Build the driver `name` for the host at `store_path` and apply
    /// `options`.
    pub fn new_driver(
        &self,
        name: &str,
        store_path: &Path,
        options: &DriverOptions,
    ) -> Result<Box<dyn Driver>> {
        let entry = self
            .drivers
            .get(name)
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))?;
        let mut driver = (entry.constructor)(store_path)?;
        driver.set_config_from_options(options)?;
        Ok(driver)
    }

    /// Sorted driver names.
    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Flags of every registered driver. No driver is constructed.
    pub fn create_flags(&self) -> Vec<DriverFlag> {
        self.drivers
            .iter()
            .flat_map(|(driver, entry)| {
                entry.create_flags.iter().map(move |spec| DriverFlag {
                    driver: driver.clone(),
                    option: spec.option,
                    flag: format!("{}-{}", driver, spec.option),
                    help: spec.help,
                })
            })
            .collect()
    }

    /// Collect the options of `driver` from namespaced flag values.
    ///
    /// `lookup` is asked for each of the driver's flag names; flags of other
    /// drivers are never consulted.
    pub fn options_from_flags<F>(&self, driver: &str, lookup: F) -> Result<DriverOptions>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entry = self
            .drivers
            .get(driver)
            .ok_or_else(|| Error::DriverNotFound(driver.to_string()))?;

        Ok(entry
            .create_flags
            .iter()
            .filter_map(|spec| {
                let flag = format!("{}-{}", driver, spec.option);
                lookup(&flag).map(|value| (spec.option.to_string(), value))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn registry() -> Registry {
        Registry::builtin(&Settings::default()).unwrap()
    }

    fn options(pairs: &[(&str, &str)]) -> DriverOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_driver_names() {
        assert_eq!(registry().driver_names(), vec!["none", "socket", "virtualbox"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = registry();
        let err = registry
            .register(
                "none",
                RegisteredDriver::new(
                    |_| Ok(Box::new(PassThroughDriver::new("none"))),
                    PassThroughDriver::CREATE_FLAGS,
                ),
            )
            .unwrap_err();
        assert!(matches!(err, Error::DriverAlreadyRegistered(ref n) if n == "none"));
    }

    #[test]
    fn test_unknown_driver_is_not_found() {
        let err = registry()
            .new_driver("hyperv", Path::new("/tmp/h"), &DriverOptions::new())
            .err()
            .expect("unknown driver must fail");
        assert!(matches!(err, Error::DriverNotFound(ref n) if n == "hyperv"));
    }

    #[test]
    fn test_new_driver_applies_options() {
        let driver = registry()
            .new_driver(
                "none",
                Path::new("/tmp/h"),
                &options(&[("url", "tcp://10.11.12.13:2375")]),
            )
            .unwrap();
        assert_eq!(driver.driver_name(), "none");
        assert_eq!(driver.get_url().unwrap(), "tcp://10.11.12.13:2375");
    }

    #[test]
    fn test_new_driver_fails_fast_on_missing_option() {
        let err = registry()
            .new_driver("socket", Path::new("/tmp/h"), &DriverOptions::new())
            .err()
            .expect("missing url must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_options_round_trip_is_stable() {
        let registry = registry();
        let cases = [
            ("none", options(&[("url", "unix:///var/run/docker.sock")])),
            ("socket", options(&[("url", "10.0.0.5:2376")])),
            ("virtualbox", DriverOptions::new()),
            (
                "virtualbox",
                options(&[("machine-name", "host-abc"), ("memory", "2048")]),
            ),
        ];

        for (name, opts1) in cases {
            let path = Path::new("/tmp/h");
            let opts2 = registry.new_driver(name, path, &opts1).unwrap().get_options();
            let opts3 = registry.new_driver(name, path, &opts2).unwrap().get_options();
            assert_eq!(opts2, opts3, "{} options must be stable", name);
        }
    }

    #[test]
    fn test_create_flags_are_namespaced() {
        let flags: Vec<String> = registry().create_flags().into_iter().map(|f| f.flag).collect();
        assert!(flags.contains(&"none-url".to_string()));
        assert!(flags.contains(&"socket-url".to_string()));
        assert!(flags.contains(&"virtualbox-memory".to_string()));
        assert!(flags.contains(&"virtualbox-disk-size".to_string()));
    }

    #[test]
    fn test_options_from_flags_only_reads_chosen_driver() {
        let values: HashMap<&str, &str> = [
            ("none-url", "tcp://1.2.3.4:2375"),
            ("virtualbox-memory", "4096"),
        ]
        .into_iter()
        .collect();
        let lookup = |flag: &str| values.get(flag).map(|v| v.to_string());

        let opts = registry().options_from_flags("virtualbox", lookup).unwrap();
        assert_eq!(opts, options(&[("memory", "4096")]));

        let opts = registry().options_from_flags("none", lookup).unwrap();
        assert_eq!(opts, options(&[("url", "tcp://1.2.3.4:2375")]));
    }
}
