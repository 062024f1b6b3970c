//! The local daemon, used when no host is active.

use super::{Driver, DriverOptions};
use crate::error::{Error, Result};
use crate::state::State;
use std::process::Command;

/// Environment variable naming the daemon endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Endpoint used when `DOCKER_HOST` is unset.
pub const DEFAULT_DAEMON_URL: &str = "unix:///var/run/docker.sock";

/// Driver for the daemon on this machine. Never registered, so it cannot be
/// chosen at creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultDriver;

impl Driver for DefaultDriver {
    fn driver_name(&self) -> &'static str {
        "default"
    }

    fn get_options(&self) -> DriverOptions {
        DriverOptions::new()
    }

    fn set_config_from_options(&mut self, _options: &DriverOptions) -> Result<()> {
        Ok(())
    }

    fn get_url(&self) -> Result<String> {
        match std::env::var(DOCKER_HOST_ENV) {
            Ok(url) if !url.is_empty() => Ok(url),
            _ => Ok(DEFAULT_DAEMON_URL.to_string()),
        }
    }

    fn get_ip(&self) -> Result<String> {
        Ok(String::new())
    }

    fn get_state(&self) -> Result<State> {
        Ok(State::Unknown)
    }

    fn create(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        Err(Error::Unsupported(
            "the default host cannot be removed".into(),
        ))
    }

    fn get_ssh_command(&self, _args: &[&str]) -> Result<Option<Command>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_is_unsupported() {
        let mut d = DefaultDriver;
        d.stop().unwrap();
        assert!(matches!(d.remove(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_url_is_never_empty() {
        assert!(!DefaultDriver.get_url().unwrap().is_empty());
    }
}
