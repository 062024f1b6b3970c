//! Create command implementation.

use clap::{Arg, Args, Command};
use hostkit::{DriverOptions, Error, Registry, Store};

/// Help heading grouping the per-driver flags.
const DRIVER_OPTIONS_HEADING: &str = "Driver options";

/// Parse a driver option specification (KEY=VALUE).
fn parse_option_spec(spec: &str) -> Option<(String, String)> {
    let (key, value) = spec.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Add every registered driver's options as `--<driver>-<option>` flags.
pub fn with_driver_flags(cmd: Command, registry: &Registry) -> Command {
    registry.create_flags().into_iter().fold(cmd, |cmd, flag| {
        cmd.arg(
            Arg::new(flag.flag.clone())
                .long(flag.flag)
                .value_name("VALUE")
                .help(flag.help)
                .help_heading(DRIVER_OPTIONS_HEADING),
        )
    })
}

/// Create a host.
#[derive(Args, Debug)]
pub struct CreateCmd {
    /// Host name.
    pub name: String,

    /// Driver to provision the host with.
    #[arg(short, long, default_value = "none")]
    pub driver: String,

    /// Driver option (KEY=VALUE), e.g. -o url=tcp://10.0.0.5:2375.
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Make the new host the active one.
    #[arg(long)]
    pub activate: bool,
}

impl CreateCmd {
    /// Execute the create command. `flag_value` returns the value of a
    /// namespaced driver flag, if given.
    pub fn run<F>(self, store: &Store, flag_value: F) -> hostkit::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = DriverOptions::new();
        for spec in &self.options {
            let (key, value) = parse_option_spec(spec).ok_or_else(|| {
                Error::config(format!("invalid option {:?}, expected KEY=VALUE", spec))
            })?;
            options.insert(key, value);
        }
        // Namespaced flags win over -o.
        options.extend(store.registry().options_from_flags(&self.driver, flag_value)?);

        tracing::debug!(
            name = %self.name,
            driver = %self.driver,
            options = ?options,
            "creating host"
        );
        let host = store.create(&self.name, &self.driver, &options)?;

        if self.activate {
            store.set_active(&host)?;
        }

        println!("Created host '{}' ({})", host.name, host.driver.driver_name());
        Ok(())
    }
}
