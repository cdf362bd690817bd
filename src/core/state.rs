//! Redirection session states and the edges allowed between them.

use std::fmt;

/// Protocol state of a redirection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not connected. Initial state, and terminal after a graceful close.
    Closed,
    /// Start-redirection request sent, waiting for the reply.
    Starting,
    /// Credentials and the SOL start request are being exchanged.
    Authenticating,
    /// Console data flows in both directions.
    Connected,
    /// End-SOL request sent, waiting for the controller to confirm.
    Closing,
    /// Fatal failure. Terminal.
    Error,
}

impl SessionState {
    #[cfg(test)]
    pub const ALL: [SessionState; 6] = [
        SessionState::Closed,
        SessionState::Starting,
        SessionState::Authenticating,
        SessionState::Connected,
        SessionState::Closing,
        SessionState::Error,
    ];

    /// Short upper-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Closed => "CLOSED",
            SessionState::Starting => "STARTING",
            SessionState::Authenticating => "AUTH",
            SessionState::Connected => "CONNECTED",
            SessionState::Closing => "CLOSING",
            SessionState::Error => "ERROR",
        }
    }

    /// Whether this state ends the session.
    ///
    /// `Closed` is only terminal once the session has been opened; a fresh
    /// session sits in `Closed` until `open` moves it to `Starting`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, Starting)
            | (Starting, Authenticating)
            | (Authenticating, Connected)
            | (Connected, Closing)
            | (Closing, Closed) => true,
            (Starting | Authenticating | Connected | Closing, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
