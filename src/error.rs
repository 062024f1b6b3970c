//! Error types for hostkit.

use thiserror::Error;

/// Result type alias using hostkit's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hostkit operations.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    /// A driver option is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Host name does not match `[A-Za-z0-9_]+`.
    #[error("invalid host name {0:?}, it must match ^[a-zA-Z0-9_]+$")]
    InvalidHostName(String),

    /// No driver is registered under this name.
    #[error("driver not found: {0}")]
    DriverNotFound(String),

    /// A driver was registered twice.
    #[error("driver already registered: {0}")]
    DriverAlreadyRegistered(String),

    /// The synthesized disk payload does not fit in the requested disk.
    #[error("disk payload of {payload} bytes exceeds disk size of {capacity} bytes")]
    DiskTooSmall {
        /// Size of the archive payload.
        payload: u64,
        /// Requested disk size in bytes.
        capacity: u64,
    },

    /// The driver does not support this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    // Host store errors
    /// Host directory does not exist.
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// A host with this name already exists.
    #[error("host {0:?} already exists")]
    HostExists(String),

    // Hypervisor errors
    /// The hypervisor has no machine registered under this name.
    #[error("machine does not exist: {0}")]
    MachineNotExist(String),

    /// The external tool executable could not be found.
    #[error("{0} not found")]
    ToolNotFound(String),

    /// External command failed.
    #[error("command failed: {command}: {message}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message.
        message: String,
    },

    // Availability errors
    /// A readiness probe ran out of attempts.
    #[error("{target} not ready after {attempts} attempts")]
    NotReady {
        /// What was being waited on.
        target: String,
        /// Total number of probe attempts made.
        attempts: u32,
    },

    /// No `inet` address in the guest's interface listing.
    #[error("no IP address found: {0}")]
    NoIpAddress(String),

    /// Boot image download failed.
    #[error("download failed: {0}")]
    Download(String),

    // Settings errors
    /// Failed to load settings.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Failed to save settings.
    #[error("failed to save config: {0}")]
    ConfigSave(String),

    /// An operation failed, labeled with what was being attempted.
    #[error("{op} failed: {source}")]
    Context {
        /// Operation label, e.g. "creating host".
        op: &'static str,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// JSON error wrapper.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command failed error.
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a download error with a message.
    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    /// Label this error with the operation that produced it.
    pub fn context(self, op: &'static str) -> Self {
        Self::Context {
            op,
            source: Box::new(self),
        }
    }

    /// True for the not-found kinds (missing host or unregistered machine),
    /// looking through any operation labels.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::HostNotFound(_) | Error::MachineNotExist(_) => true,
            Error::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
