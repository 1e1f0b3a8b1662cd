//! Persisted plan status values.

use serde::{Deserialize, Serialize};

/// Status written to the external status store over a plan's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// A model reply is being produced.
    Replying,
    /// The run completed without error.
    Finished,
    /// The run ended with an error; the status message carries it.
    Error,
    /// The run was cancelled.
    Stopped,
}

impl PlanStatus {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replying => "replying",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    /// Whether this status ends the run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Replying)
    }
}
