//! Wire format of the AMT redirection protocol.
//!
//! Everything that knows about byte layout lives here. The session only sees
//! [`Incoming`] frames and asks for encoded outgoing frames; the driver never
//! sees either.
//!
//! All multi-byte integers are little-endian. Incoming frames are identified
//! by their first byte; the length of each frame is either fixed or derived
//! from a length field in its header.

use std::fmt;

use super::error::ProtocolError;

/// Negotiated maximum size of a single console data frame payload.
pub const MAX_TRANSMIT_BUFFER: u16 = 1000;
const TRANSMIT_BUFFER_TIMEOUT: u16 = 100;
const TRANSMIT_OVERFLOW_TIMEOUT: u16 = 0;
const HOST_SESSION_RX_TIMEOUT: u16 = 10000;
const HOST_FIFO_RX_FLUSH_TIMEOUT: u16 = 0;

/// Default keepalive interval advertised to the controller, in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u16 = 5000;

const START_SESSION_LEN: usize = 8;
const START_SESSION_REPLY_LEN: usize = 13;
const AUTH_HEADER_LEN: usize = 9;
const START_SOL_LEN: usize = 24;
const START_SOL_REPLY_LEN: usize = 23;
const END_SOL_LEN: usize = 8;
const END_SOL_REPLY_LEN: usize = 8;
const END_SESSION_LEN: usize = 4;
const HEARTBEAT_LEN: usize = 8;
const DATA_HEADER_LEN: usize = 10;

/// Largest authentication reply body accepted from the controller.
pub const MAX_AUTH_REPLY_BODY: usize = 4096;

const STATUS_SUCCESS: u8 = 0x00;
const AUTH_TYPE_USER_PASSWORD: u8 = 0x01;

/// Message type carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    StartSession = 0x10,
    StartSessionReply = 0x11,
    EndSession = 0x12,
    Authenticate = 0x13,
    AuthenticateReply = 0x14,
    StartSol = 0x20,
    StartSolReply = 0x21,
    EndSol = 0x22,
    EndSolReply = 0x23,
    KeepAlivePing = 0x24,
    KeepAlivePong = 0x25,
    DataToHost = 0x28,
    DataFromHost = 0x2A,
    Heartbeat = 0x2B,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use FrameType::*;

        Some(match byte {
            0x10 => StartSession,
            0x11 => StartSessionReply,
            0x12 => EndSession,
            0x13 => Authenticate,
            0x14 => AuthenticateReply,
            0x20 => StartSol,
            0x21 => StartSolReply,
            0x22 => EndSol,
            0x23 => EndSolReply,
            0x24 => KeepAlivePing,
            0x25 => KeepAlivePong,
            0x28 => DataToHost,
            0x2A => DataFromHost,
            0x2B => Heartbeat,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        use FrameType::*;

        match self {
            StartSession => "start-session",
            StartSessionReply => "start-session-reply",
            EndSession => "end-session",
            Authenticate => "authenticate",
            AuthenticateReply => "authenticate-reply",
            StartSol => "start-sol",
            StartSolReply => "start-sol-reply",
            EndSol => "end-sol",
            EndSolReply => "end-sol-reply",
            KeepAlivePing => "keepalive-ping",
            KeepAlivePong => "keepalive-pong",
            DataToHost => "data-to-host",
            DataFromHost => "data-from-host",
            Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A frame received from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming<'a> {
    StartSessionReply { status: u8 },
    AuthenticateReply { status: u8 },
    StartSolReply { status: u8 },
    EndSolReply,
    /// Keepalive ping or heartbeat; both are echoed back verbatim.
    Ping,
    Pong,
    Data(&'a [u8]),
    EndSession,
}

impl Incoming<'_> {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Incoming::StartSessionReply { .. } => FrameType::StartSessionReply,
            Incoming::AuthenticateReply { .. } => FrameType::AuthenticateReply,
            Incoming::StartSolReply { .. } => FrameType::StartSolReply,
            Incoming::EndSolReply => FrameType::EndSolReply,
            Incoming::Ping => FrameType::KeepAlivePing,
            Incoming::Pong => FrameType::KeepAlivePong,
            Incoming::Data(_) => FrameType::DataFromHost,
            Incoming::EndSession => FrameType::EndSession,
        }
    }
}

/// One complete frame cut from the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<'a> {
    pub frame: Incoming<'a>,
    /// The whole frame as it appeared on the wire.
    pub raw: &'a [u8],
}

/// Try to decode one frame from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a frame; the caller keeps
/// the bytes and retries once more have arrived.
pub fn decode(buf: &[u8]) -> Result<Option<Decoded<'_>>, ProtocolError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let frame_type = FrameType::from_byte(first).ok_or(ProtocolError::UnknownFrame(first))?;

    let len = match frame_type {
        FrameType::StartSessionReply => START_SESSION_REPLY_LEN,
        FrameType::StartSolReply => START_SOL_REPLY_LEN,
        FrameType::EndSolReply => END_SOL_REPLY_LEN,
        FrameType::EndSession => END_SESSION_LEN,
        FrameType::KeepAlivePing | FrameType::KeepAlivePong | FrameType::Heartbeat => {
            HEARTBEAT_LEN
        }
        FrameType::AuthenticateReply => {
            if buf.len() < AUTH_HEADER_LEN {
                return Ok(None);
            }
            let body = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
            if body > MAX_AUTH_REPLY_BODY {
                return Err(ProtocolError::FrameTooLarge { frame: frame_type, len: body });
            }
            AUTH_HEADER_LEN + body
        }
        FrameType::DataFromHost => {
            if buf.len() < DATA_HEADER_LEN {
                return Ok(None);
            }
            DATA_HEADER_LEN + usize::from(u16::from_le_bytes([buf[8], buf[9]]))
        }
        // Client-to-controller messages never come back at us.
        FrameType::StartSession
        | FrameType::Authenticate
        | FrameType::StartSol
        | FrameType::EndSol
        | FrameType::DataToHost => return Err(ProtocolError::UnknownFrame(first)),
    };

    if buf.len() < len {
        return Ok(None);
    }
    let raw = &buf[..len];

    let frame = match frame_type {
        FrameType::StartSessionReply => Incoming::StartSessionReply { status: raw[1] },
        FrameType::AuthenticateReply => Incoming::AuthenticateReply { status: raw[1] },
        FrameType::StartSolReply => Incoming::StartSolReply { status: raw[1] },
        FrameType::EndSolReply => Incoming::EndSolReply,
        FrameType::EndSession => Incoming::EndSession,
        FrameType::KeepAlivePing | FrameType::Heartbeat => Incoming::Ping,
        FrameType::KeepAlivePong => Incoming::Pong,
        FrameType::DataFromHost => Incoming::Data(&raw[DATA_HEADER_LEN..]),
        _ => unreachable!("filtered above"),
    };

    Ok(Some(Decoded { frame, raw }))
}

/// Check the status byte of a reply.
pub fn check_status(stage: &'static str, status: u8) -> Result<(), ProtocolError> {
    if status == STATUS_SUCCESS {
        Ok(())
    } else {
        Err(ProtocolError::Rejected { stage, status })
    }
}

pub fn start_session(kind: &[u8; 4]) -> [u8; START_SESSION_LEN] {
    let mut frame = [0u8; START_SESSION_LEN];
    frame[0] = FrameType::StartSession as u8;
    frame[4..8].copy_from_slice(kind);
    frame
}

/// Username/password authentication request.
///
/// Both fields are length-prefixed with a single byte; callers guarantee
/// they fit.
pub fn authenticate(username: &[u8], password: &[u8]) -> Vec<u8> {
    let body_len = username.len() + password.len() + 2;
    let mut frame = Vec::with_capacity(AUTH_HEADER_LEN + body_len);
    frame.extend_from_slice(&[FrameType::Authenticate as u8, 0, 0, 0, AUTH_TYPE_USER_PASSWORD]);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.push(username.len() as u8);
    frame.extend_from_slice(username);
    frame.push(password.len() as u8);
    frame.extend_from_slice(password);
    frame
}

pub fn start_sol(seq: u32, heartbeat_interval_ms: u16) -> [u8; START_SOL_LEN] {
    let mut frame = [0u8; START_SOL_LEN];
    frame[0] = FrameType::StartSol as u8;
    frame[4..8].copy_from_slice(&seq.to_le_bytes());
    let params = [
        MAX_TRANSMIT_BUFFER,
        TRANSMIT_BUFFER_TIMEOUT,
        TRANSMIT_OVERFLOW_TIMEOUT,
        HOST_SESSION_RX_TIMEOUT,
        HOST_FIFO_RX_FLUSH_TIMEOUT,
        heartbeat_interval_ms,
    ];
    for (i, value) in params.iter().enumerate() {
        let at = 8 + i * 2;
        frame[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }
    frame
}

/// Console data frame. `data` must not exceed [`MAX_TRANSMIT_BUFFER`].
pub fn data_to_host(seq: u32, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= usize::from(MAX_TRANSMIT_BUFFER));
    let mut frame = Vec::with_capacity(DATA_HEADER_LEN + data.len());
    frame.extend_from_slice(&[FrameType::DataToHost as u8, 0, 0, 0]);
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&(data.len() as u16).to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

pub fn keepalive_ping(seq: u32) -> [u8; HEARTBEAT_LEN] {
    let mut frame = [0u8; HEARTBEAT_LEN];
    frame[0] = FrameType::KeepAlivePing as u8;
    frame[4..8].copy_from_slice(&seq.to_le_bytes());
    frame
}

pub fn end_sol(seq: u32) -> [u8; END_SOL_LEN] {
    let mut frame = [0u8; END_SOL_LEN];
    frame[0] = FrameType::EndSol as u8;
    frame[4..8].copy_from_slice(&seq.to_le_bytes());
    frame
}

pub fn end_session() -> [u8; END_SESSION_LEN] {
    [FrameType::EndSession as u8, 0, 0, 0]
}

/// Space-separated hex rendering for trace logs.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
