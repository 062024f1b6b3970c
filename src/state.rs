//! Host lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a host as observed by its driver.
///
/// Drivers map their native status vocabulary onto this set; anything they
/// cannot classify is [`State::Unknown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// No recognized status (also the initial value).
    #[default]
    Unknown,

    /// Machine is booting.
    Starting,

    /// Machine is running.
    Running,

    /// Machine execution is paused.
    Paused,

    /// Machine state was saved to disk.
    Saved,

    /// Machine is powered off.
    Stopped,
}

impl State {
    /// Check if the machine is running or on its way there.
    pub fn is_running(&self) -> bool {
        matches!(self, State::Running | State::Starting)
    }

    /// Get the state name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            State::Unknown => "Unknown",
            State::Starting => "Starting",
            State::Running => "Running",
            State::Paused => "Paused",
            State::Saved => "Saved",
            State::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
