//! SSH command implementation.

use clap::Args;
use hostkit::{Error, Store};

/// Log into a host, or run a command on it, over SSH.
#[derive(Args, Debug)]
pub struct SshCmd {
    /// Host name.
    pub name: String,

    /// Command to run instead of an interactive shell.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl SshCmd {
    /// Execute the ssh command.
    pub fn run(&self, store: &Store) -> hostkit::Result<()> {
        let host = store.load(&self.name)?;
        let args: Vec<&str> = self.command.iter().map(String::as_str).collect();

        let mut cmd = host.driver.get_ssh_command(&args)?.ok_or_else(|| {
            Error::Unsupported(format!(
                "driver {} does not provide ssh access",
                host.driver.driver_name()
            ))
        })?;

        let status = cmd.status().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound("ssh".into())
            } else {
                Error::command_failed("ssh", e.to_string())
            }
        })?;

        if !status.success() {
            return Err(Error::command_failed("ssh", status.to_string()));
        }
        Ok(())
    }
}
