//! VBoxManage invocation and output parsing.
//!
//! All calls to the VirtualBox control tool go through the [`VBoxManage`]
//! trait so the driver can be exercised against captured output. The parsing
//! helpers in this module are pure functions over that output.

use crate::error::{Error, Result};
use crate::state::State;
use regex::Regex;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

/// Attempts for a call that fails because the machine's session is locked.
const LOCK_RETRIES: u32 = 5;

/// Delay between session-lock retries.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Captured result of a VBoxManage call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code, `None` if terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    /// Output of a successful call.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Output of a failed call.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }

    /// Whether the tool exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The VirtualBox control tool.
pub trait VBoxManage: Send + Sync {
    /// Run and fail on nonzero exit, with the tool's stderr in the error.
    fn run(&self, args: &[&str]) -> Result<()>;

    /// Run and return stdout; fail on nonzero exit like [`VBoxManage::run`].
    fn output(&self, args: &[&str]) -> Result<String>;

    /// Run and capture stdout and stderr separately. A nonzero exit is
    /// reported through [`ToolOutput::exit_code`], not as an error.
    fn output_err(&self, args: &[&str]) -> Result<ToolOutput>;

    /// Run while streaming `input` to the tool's stdin.
    fn pipe_stdin(&self, args: &[&str], input: &mut dyn Read) -> Result<()>;
}

/// [`VBoxManage`] implementation that spawns the real executable.
#[derive(Debug, Clone)]
pub struct VBoxManageCommand {
    program: String,
}

impl VBoxManageCommand {
    /// Use the given executable name or path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        tracing::debug!(program = %self.program, args = ?args, "executing");
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        match args.first() {
            Some(sub) => format!("{} {}", self.program, sub),
            None => self.program.clone(),
        }
    }

    fn spawn_error(&self, args: &[&str], err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound(self.program.clone())
        } else {
            Error::command_failed(self.describe(args), err.to_string())
        }
    }

    fn failure(&self, args: &[&str], output: &ToolOutput) -> Error {
        let status = match output.exit_code {
            Some(code) => format!("exit status: {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = output.stderr.trim();
        if stderr.is_empty() {
            Error::command_failed(self.describe(args), status)
        } else {
            Error::command_failed(self.describe(args), format!("{}: {}", status, stderr))
        }
    }

    /// Run and capture both streams, retrying while the machine's session is
    /// locked by another process.
    fn capture(&self, args: &[&str]) -> Result<ToolOutput> {
        let mut attempt = 1;
        loop {
            let output = self
                .command(args)
                .stdin(Stdio::null())
                .output()
                .map_err(|e| self.spawn_error(args, e))?;

            let result = ToolOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
            };

            if !result.success() && is_session_locked(&result.stderr) && attempt < LOCK_RETRIES {
                tracing::warn!(
                    command = %self.describe(args),
                    attempt,
                    "machine session locked, retrying"
                );
                attempt += 1;
                std::thread::sleep(LOCK_RETRY_DELAY);
                continue;
            }
            return Ok(result);
        }
    }
}

impl Default for VBoxManageCommand {
    fn default() -> Self {
        Self::new("VBoxManage")
    }
}

impl VBoxManage for VBoxManageCommand {
    fn run(&self, args: &[&str]) -> Result<()> {
        let output = self.capture(args)?;
        if !output.success() {
            return Err(self.failure(args, &output));
        }
        tracing::debug!(
            command = %self.describe(args),
            stdout = %output.stdout.trim(),
            stderr = %output.stderr.trim(),
            "command finished"
        );
        Ok(())
    }

    fn output(&self, args: &[&str]) -> Result<String> {
        let output = self.capture(args)?;
        if !output.success() {
            return Err(self.failure(args, &output));
        }
        Ok(output.stdout)
    }

    fn output_err(&self, args: &[&str]) -> Result<ToolOutput> {
        self.capture(args)
    }

    fn pipe_stdin(&self, args: &[&str], input: &mut dyn Read) -> Result<()> {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(args, e))?;

        // Drain stderr concurrently so a chatty tool cannot block on a full
        // pipe while we are still writing its stdin.
        let drain = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let copied = match child.stdin.take() {
            Some(mut stdin) => std::io::copy(input, &mut stdin).map(|_| ()),
            None => Err(std::io::Error::other("stdin was not captured")),
        };
        // stdin is closed here; the tool only exits after seeing EOF.

        let status = child.wait()?;
        let stderr = drain
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(Error::command_failed(
                self.describe(args),
                format!("{}: {}", status, stderr.trim()),
            ));
        }
        copied.map_err(|e| {
            Error::command_failed(self.describe(args), format!("writing stdin: {}", e))
        })
    }
}

fn vm_state_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^VMState="(\w+)"\r?$"#).expect("valid regex"))
}

fn machine_not_found_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Could not find a registered machine named '(.+)'").expect("valid regex")
    })
}

fn ssh_forward_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^Forwarding\(\d+\)="ssh,tcp,[^,]*,(\d+),[^,]*,22"\r?$"#)
            .expect("valid regex")
    })
}

/// Map a native VirtualBox `VMState` value onto [`State`].
pub fn map_vm_state(native: &str) -> State {
    match native {
        "running" => State::Running,
        "paused" => State::Paused,
        "saved" => State::Saved,
        "poweroff" | "aborted" => State::Stopped,
        "starting" | "restoring" => State::Starting,
        _ => State::Unknown,
    }
}

/// Extract the state from `showvminfo --machinereadable` output.
pub fn parse_vm_state(info: &str) -> State {
    vm_state_re()
        .captures(info)
        .and_then(|caps| caps.get(1))
        .map(|m| map_vm_state(m.as_str()))
        .unwrap_or_default()
}

/// Extract the host port of the guest SSH forwarding rule.
pub fn parse_ssh_forward_port(info: &str) -> Option<u16> {
    ssh_forward_re()
        .captures(info)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether stderr reports an unknown machine.
pub fn is_machine_not_found(stderr: &str) -> bool {
    machine_not_found_re().is_match(stderr)
}

/// Whether stderr reports a transient session lock.
pub fn is_session_locked(stderr: &str) -> bool {
    stderr.contains("is already locked for a session")
}

/// Check the result of a captured call that targets `machine`, translating
/// an unknown-machine failure into [`Error::MachineNotExist`].
pub fn check_machine_output(machine: &str, command: &str, output: ToolOutput) -> Result<String> {
    if output.success() {
        return Ok(output.stdout);
    }
    if is_machine_not_found(&output.stderr) {
        return Err(Error::MachineNotExist(machine.to_string()));
    }
    Err(Error::command_failed(
        format!("VBoxManage {}", command),
        output.stderr.trim(),
    ))
}
