//! Session lifecycle states.

use serde::{Deserialize, Serialize};

/// The state of a saga session.
///
/// State transitions:
/// ```text
/// Common ──┬──► Completed
///          ├──► IsRetrying ──► Common
///          └──► IsCompensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Moving forward, possibly waiting for a response.
    #[default]
    Common,

    /// Every step completed (terminal state).
    Completed,

    /// Compensation finished or nothing was left to compensate (terminal state).
    Failed,

    /// Walking backward and compensating earlier steps.
    IsCompensating,

    /// Re-invoking a retry-until-complete step after a failure.
    IsRetrying,
}

impl SessionState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Returns true while responses are interpreted against compensation endpoints.
    pub fn is_compensating(&self) -> bool {
        matches!(self, SessionState::IsCompensating)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Common => "Common",
            SessionState::Completed => "Completed",
            SessionState::Failed => "Failed",
            SessionState::IsCompensating => "IsCompensating",
            SessionState::IsRetrying => "IsRetrying",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Common" => Ok(SessionState::Common),
            "Completed" => Ok(SessionState::Completed),
            "Failed" => Ok(SessionState::Failed),
            "IsCompensating" => Ok(SessionState::IsCompensating),
            "IsRetrying" => Ok(SessionState::IsRetrying),
            other => Err(format!("unknown session state: {other}")),
        }
    }
}
