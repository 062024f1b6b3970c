//! SSH helpers.
//!
//! Thin wrappers over the system `ssh` and `ssh-keygen` executables.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Build an `ssh` command for a non-interactive login to `user@host:port`.
///
/// Host keys are neither checked nor recorded.
pub fn ssh_command(host: &str, port: u16, user: &str, key: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("ssh");
    cmd.args([
        "-o",
        "IdentitiesOnly=yes",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "LogLevel=quiet",
        "-p",
    ]);
    cmd.arg(port.to_string());
    cmd.arg("-i");
    cmd.arg(key);
    cmd.arg(format!("{}@{}", user, host));
    cmd.args(args);

    tracing::debug!(host = %host, port, command = ?args, "built ssh command");
    cmd
}

/// Runs prepared `ssh` commands to completion.
pub trait SshRunner: Send + Sync {
    /// Run `cmd` and return its stdout; fail on nonzero exit.
    fn output(&self, cmd: Command) -> Result<String>;
}

/// [`SshRunner`] that spawns the system `ssh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSsh;

impl SshRunner for SystemSsh {
    fn output(&self, cmd: Command) -> Result<String> {
        run_output(cmd)
    }
}

/// Run a prepared SSH command and return its stdout.
pub fn run_output(mut cmd: Command) -> Result<String> {
    let output = cmd.stdin(Stdio::null()).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound("ssh".into())
        } else {
            Error::command_failed("ssh", e.to_string())
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::command_failed(
            "ssh",
            format!("{}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Generate an RSA key pair at `path` (and `path.pub`) unless it already
/// exists. A private key whose public half is missing gets it derived again.
pub fn generate_ssh_key(path: &Path) -> Result<()> {
    let public = public_key_path(path);
    if path.exists() {
        if public.exists() {
            tracing::debug!(path = %path.display(), "ssh key already present");
            return Ok(());
        }
        tracing::warn!(path = %public.display(), "public key missing, deriving it");
        let derived = ssh_keygen(Command::new("ssh-keygen").args(["-y", "-f"]).arg(path))?;
        std::fs::write(&public, derived)?;
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %path.display(), "generating ssh key");
    ssh_keygen(
        Command::new("ssh-keygen")
            .args(["-t", "rsa", "-N", "", "-q", "-f"])
            .arg(path),
    )?;
    Ok(())
}

/// Run `ssh-keygen` and return its stdout.
fn ssh_keygen(cmd: &mut Command) -> Result<Vec<u8>> {
    let output = cmd.stdin(Stdio::null()).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound("ssh-keygen".into())
        } else {
            Error::command_failed("ssh-keygen", e.to_string())
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::command_failed("ssh-keygen", stderr.trim()));
    }
    Ok(output.stdout)
}

/// Path of the public half of a key pair.
pub fn public_key_path(private_key: &Path) -> std::path::PathBuf {
    let mut name = private_key.as_os_str().to_owned();
    name.push(".pub");
    name.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_command_arguments() {
        let cmd = ssh_command(
            "localhost",
            2223,
            "docker",
            Path::new("/hosts/dev/id_rsa"),
            &["ip addr show dev eth1"],
        );
        assert_eq!(cmd.get_program(), "ssh");

        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        let port_idx = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port_idx + 1], "2223");
        let key_idx = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[key_idx + 1], "/hosts/dev/id_rsa");
        assert_eq!(args[args.len() - 2], "docker@localhost");
        assert_eq!(args[args.len() - 1], "ip addr show dev eth1");
    }

    #[test]
    fn test_existing_key_is_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "existing").unwrap();
        std::fs::write(public_key_path(&key), "ssh-rsa AAAA existing").unwrap();

        generate_ssh_key(&key).unwrap();
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "existing");
    }

    #[test]
    fn test_unreadable_key_without_public_half_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "not a key").unwrap();

        let err = generate_ssh_key(&key).unwrap_err();
        assert!(
            matches!(err, Error::CommandFailed { .. } | Error::ToolNotFound(_)),
            "{:?}",
            err
        );
        assert!(err.to_string().contains("ssh-keygen"));
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "not a key");
        assert!(!public_key_path(&key).exists());
    }

    #[test]
    fn test_missing_public_key_is_derived() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("keys").join("id_rsa");
        match generate_ssh_key(&key) {
            // ssh-keygen is not installed here.
            Err(Error::ToolNotFound(_)) => return,
            result => result.unwrap(),
        }
        let original = std::fs::read_to_string(public_key_path(&key)).unwrap();
        std::fs::remove_file(public_key_path(&key)).unwrap();

        generate_ssh_key(&key).unwrap();
        let derived = std::fs::read_to_string(public_key_path(&key)).unwrap();
        let key_fields = |s: &str| s.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        assert_eq!(key_fields(&derived), key_fields(&original));
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/hosts/dev/id_rsa")),
            Path::new("/hosts/dev/id_rsa.pub")
        );
    }
}
