//! Lifecycle commands: start, stop, restart, kill.

use super::resolve_host;
use clap::Args;
use hostkit::Store;

/// Lifecycle action to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Kill,
}

/// Target of a lifecycle command.
#[derive(Args, Debug)]
pub struct ControlCmd {
    /// Host name (default: the active host).
    pub name: Option<String>,
}

impl ControlCmd {
    /// Apply `action` to the host.
    pub fn run(&self, store: &Store, action: Action) -> hostkit::Result<()> {
        let mut host = resolve_host(store, self.name.as_deref())?;
        let (result, done) = match action {
            Action::Start => (host.start(), "Started"),
            Action::Stop => (host.stop(), "Stopped"),
            Action::Restart => (host.restart(), "Restarted"),
            Action::Kill => (host.kill(), "Killed"),
        };
        result?;
        println!("{} host '{}'", done, host.name);
        Ok(())
    }
}
