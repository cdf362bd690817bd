//! Error types for the redirection session.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::protocol::FrameType;
use super::state::SessionState;

/// Caller-supplied configuration that cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("session kind must be exactly 4 bytes, got {0}")]
    InvalidKind(usize),

    #[error("{field} is too long ({len} bytes, at most {max} allowed)")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("heartbeat interval must be between 1 and 65535 ms, got {0}")]
    HeartbeatInterval(u64),
}

/// The peer sent something the session cannot accept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrame(u8),

    #[error("unexpected {frame} frame in state {state}")]
    UnexpectedFrame {
        frame: FrameType,
        state: SessionState,
    },

    #[error("{frame} frame of {len} bytes exceeds the size limit")]
    FrameTooLarge { frame: FrameType, len: usize },

    #[error("{stage} failed (status 0x{status:02x})")]
    Rejected { stage: &'static str, status: u8 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no traffic from controller for {}s", silent_for.as_secs())]
    HeartbeatTimeout { silent_for: Duration },

    #[error("cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("local terminal error: {0}")]
    LocalIo(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
