//! Pass-through drivers (`none`, `socket`).
//!
//! These wrap a daemon that already exists somewhere. The host record only
//! remembers its URL; there is no machine behind it to manage.

use super::{check_known_options, Driver, DriverOptions, FlagSpec};
use crate::error::{Error, Result};
use crate::state::State;
use std::process::Command;

const URL_OPTION: &str = "url";

/// Driver for a pre-existing daemon reachable at a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassThroughDriver {
    name: &'static str,
    url: String,
}

impl PassThroughDriver {
    /// Options accepted at creation time.
    pub const CREATE_FLAGS: &'static [FlagSpec] = &[FlagSpec {
        option: URL_OPTION,
        help: "URL of the host, e.g. tcp://10.0.0.5:2375 or unix:///var/run/docker.sock",
    }];

    /// Create an unconfigured driver registered as `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            url: String::new(),
        }
    }
}

/// Validate a daemon URL, defaulting a bare `host:port` to `tcp://`.
pub fn normalize_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::config("url must not be empty"));
    }

    match raw.split_once("://") {
        Some(("tcp" | "unix", "")) => Err(Error::config(format!("url {:?} has no address", raw))),
        Some(("tcp" | "unix", _)) => Ok(raw.to_string()),
        Some((scheme, _)) => Err(Error::config(format!(
            "unsupported url {:?}: scheme {:?} is not tcp or unix",
            raw, scheme
        ))),
        None => Ok(format!("tcp://{}", raw)),
    }
}

impl Driver for PassThroughDriver {
    fn driver_name(&self) -> &'static str {
        self.name
    }

    fn get_options(&self) -> DriverOptions {
        DriverOptions::from([(URL_OPTION.to_string(), self.url.clone())])
    }

    fn set_config_from_options(&mut self, options: &DriverOptions) -> Result<()> {
        check_known_options(self.name, options, Self::CREATE_FLAGS)?;
        let url = options.get(URL_OPTION).ok_or_else(|| {
            Error::config(format!("--{}-{} is required", self.name, URL_OPTION))
        })?;
        self.url = normalize_url(url)?;
        Ok(())
    }

    fn get_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    fn get_ip(&self) -> Result<String> {
        let Some(rest) = self.url.strip_prefix("tcp://") else {
            return Ok(String::new());
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => authority,
        };
        Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
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
        Ok(())
    }

    fn get_ssh_command(&self, _args: &[&str]) -> Result<Option<Command>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(url: &str) -> PassThroughDriver {
        let mut d = PassThroughDriver::new("socket");
        d.set_config_from_options(&DriverOptions::from([("url".to_string(), url.to_string())]))
            .unwrap();
        d
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("tcp://1.2.3.4:2375").unwrap(), "tcp://1.2.3.4:2375");
        assert_eq!(
            normalize_url("unix:///var/run/docker.sock").unwrap(),
            "unix:///var/run/docker.sock"
        );
        assert_eq!(normalize_url("1.2.3.4:2376").unwrap(), "tcp://1.2.3.4:2376");
        assert!(matches!(normalize_url("http://h:80"), Err(Error::Config(_))));
        assert!(matches!(normalize_url("  "), Err(Error::Config(_))));
        assert!(matches!(normalize_url("tcp://"), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let mut d = PassThroughDriver::new("none");
        let err = d.set_config_from_options(&DriverOptions::new()).unwrap_err();
        assert!(err.to_string().contains("--none-url"));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut d = PassThroughDriver::new("none");
        let opts = DriverOptions::from([
            ("url".to_string(), "tcp://h:1".to_string()),
            ("memory".to_string(), "1".to_string()),
        ]);
        assert!(matches!(d.set_config_from_options(&opts), Err(Error::Config(_))));
    }

    #[test]
    fn test_ip_from_url() {
        assert_eq!(driver("tcp://10.11.12.13:2375").get_ip().unwrap(), "10.11.12.13");
        assert_eq!(driver("tcp://[::1]:2375").get_ip().unwrap(), "::1");
        assert_eq!(driver("unix:///var/run/docker.sock").get_ip().unwrap(), "");
    }

    #[test]
    fn test_lifecycle_is_idempotent() {
        let mut d = driver("tcp://10.11.12.13:2375");
        for _ in 0..2 {
            d.create().unwrap();
            d.start().unwrap();
            d.stop().unwrap();
            d.restart().unwrap();
            d.kill().unwrap();
            d.remove().unwrap();
            assert_eq!(d.get_state().unwrap(), State::Unknown);
            assert_eq!(d.get_url().unwrap(), "tcp://10.11.12.13:2375");
        }
        assert!(d.get_ssh_command(&["true"]).unwrap().is_none());
    }
}
