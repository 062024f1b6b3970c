//! Drivers command implementation.

use clap::Args;
use hostkit::Registry;

/// List available drivers and their create flags.
#[derive(Args, Debug)]
pub struct DriversCmd {}

impl DriversCmd {
    /// Execute the drivers command.
    pub fn run(&self, registry: &Registry) -> hostkit::Result<()> {
        let flags = registry.create_flags();
        for name in registry.driver_names() {
            println!("{}", name);
            for flag in flags.iter().filter(|f| f.driver == name) {
                println!("  --{:<26} {}", flag.flag, flag.help);
            }
        }
        Ok(())
    }
}
