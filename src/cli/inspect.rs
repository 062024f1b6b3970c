//! Query commands: ip, url, state.

use super::resolve_host;
use clap::Args;
use hostkit::Store;

/// Host property to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Ip,
    Url,
    State,
}

/// Target of a query command.
#[derive(Args, Debug)]
pub struct InspectCmd {
    /// Host name (default: the active host).
    pub name: Option<String>,
}

impl InspectCmd {
    /// Print `field` of the host.
    pub fn run(&self, store: &Store, field: Field) -> hostkit::Result<()> {
        let host = resolve_host(store, self.name.as_deref())?;
        let value = match field {
            Field::Ip => host.driver.get_ip()?,
            Field::Url => host.url()?,
            Field::State => host.state()?.to_string(),
        };
        println!("{}", value);
        Ok(())
    }
}
