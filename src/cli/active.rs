//! Active command implementation.

use clap::Args;
use hostkit::Store;

/// Show or set the active host.
#[derive(Args, Debug)]
pub struct ActiveCmd {
    /// Host to make active. Without it, print the active host.
    pub name: Option<String>,
}

impl ActiveCmd {
    /// Execute the active command.
    pub fn run(&self, store: &Store) -> hostkit::Result<()> {
        match &self.name {
            Some(name) => {
                let host = store.load(name)?;
                store.set_active(&host)?;
                println!("Active host is now '{}'", host.name);
            }
            None => match store.active_or_default() {
                Ok(host) => println!("{}", host.name),
                // The marker names a host that is gone; an unreadable one
                // still fails below.
                Err(e) if e.is_not_found() => {
                    tracing::warn!(error = %e, "active host no longer exists");
                    println!("{}", hostkit::host::DEFAULT_HOST_NAME);
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }
}
