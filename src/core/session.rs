//! Redirection session
//!
//! Drives one serial-over-LAN session from the start-redirection request to
//! termination. The session owns the transport and the protocol state; it
//! turns incoming bytes into frames, answers the controller where the
//! protocol requires it, and reports console data and state transitions to
//! a [`SessionHandler`].
//!
//! The session never blocks on its own: [`Session::on_transport_readable`]
//! performs a single read and is meant to be called once the transport has
//! been reported readable.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::error::{ConfigError, Error, ProtocolError, Result};
use super::heartbeat::{Heartbeat, Liveness};
use super::params::{Credentials, SessionKind};
use super::protocol::{self, Decoded, HexDump, Incoming, MAX_TRANSMIT_BUFFER};
use super::state::SessionState;

/// Bytes requested from the transport per readable event
const READ_CHUNK: usize = 4096;

/// Receives what the session produces.
pub trait SessionHandler {
    /// Console bytes from the remote serial port, in arrival order.
    ///
    /// An error here is fatal to the session.
    fn on_payload(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Called after every state change.
    fn on_state_change(&mut self, _old: SessionState, _new: SessionState) {}
}

/// Where the handshake stands while in [`SessionState::Authenticating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    AwaitAuthReply,
    AwaitSolReply,
}

/// A single serial-over-LAN redirection session.
pub struct Session<T, H> {
    state: SessionState,
    kind: SessionKind,
    credentials: Option<Credentials>,
    heartbeat_interval_ms: u16,
    heartbeat: Heartbeat,
    handshake: Handshake,
    close_deadline: Option<Instant>,
    transport: Option<T>,
    opened: bool,
    rx: Vec<u8>,
    tx_seq: u32,
    handler: H,
}

impl<T: Read + Write, H: SessionHandler> Session<T, H> {
    /// Build a session of the given kind.
    ///
    /// `kind` must be exactly four bytes and the credentials must fit their
    /// bounded buffers, otherwise this fails with [`Error::Config`].
    pub fn configure(kind: &[u8], username: &str, password: &str, handler: H) -> Result<Self> {
        let kind = SessionKind::new(kind)?;
        let credentials = Credentials::new(username, password)?;
        let interval = protocol::DEFAULT_HEARTBEAT_INTERVAL_MS;

        Ok(Self {
            state: SessionState::Closed,
            kind,
            credentials: Some(credentials),
            heartbeat_interval_ms: interval,
            heartbeat: Heartbeat::new(Duration::from_millis(u64::from(interval))),
            handshake: Handshake::AwaitAuthReply,
            close_deadline: None,
            transport: None,
            opened: false,
            rx: Vec::new(),
            tx_seq: 0,
            handler,
        })
    }

    /// Override the keepalive interval advertised to the controller.
    pub fn with_heartbeat_interval(mut self, interval_ms: u64) -> Result<Self> {
        let ms = u16::try_from(interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or(ConfigError::HeartbeatInterval(interval_ms))?;
        self.heartbeat_interval_ms = ms;
        self.heartbeat = Heartbeat::new(Duration::from_millis(interval_ms));
        Ok(self)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    #[cfg(test)]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The transport, while the session holds it.
    #[cfg(test)]
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    #[cfg(test)]
    pub fn rx_buffered(&self) -> usize {
        self.rx.len()
    }

    /// Longest silence tolerated from the controller.
    pub fn stall_window(&self) -> Duration {
        self.heartbeat.timeout()
    }

    /// Time until the next keepalive, liveness or close deadline, if any
    /// applies.
    pub fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        match self.close_deadline {
            Some(deadline) if self.state == SessionState::Closing => {
                Some(deadline.saturating_duration_since(now))
            }
            _ => self.heartbeat.until_next(now),
        }
    }

    /// Bind the connected transport and send the start-redirection request.
    pub fn open(&mut self, transport: T) -> Result<()> {
        if self.opened {
            return Err(self.invalid_state("open"));
        }
        self.opened = true;
        self.transport = Some(transport);

        info!(kind = %self.kind, "starting redirection session");
        self.transition(SessionState::Starting);
        let frame = protocol::start_session(self.kind.as_bytes());
        self.write_frame(&frame)
    }

    /// Read what the transport has and process every complete frame.
    ///
    /// Returns the number of buffered bytes consumed as complete frames.
    /// Bytes of a partial frame stay buffered for the next call.
    pub fn on_transport_readable(&mut self) -> Result<usize> {
        if !self.is_live() {
            return Err(self.invalid_state("read from transport"));
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.invalid_state("read from transport"));
        };

        let mut chunk = [0u8; READ_CHUNK];
        let n = match transport.read(&mut chunk) {
            Ok(0) if self.state == SessionState::Closing => {
                info!("controller hung up before confirming the end of redirection");
                self.transition(SessionState::Closed);
                self.teardown();
                return Ok(0);
            }
            Ok(0) => {
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by controller");
                return Err(self.fail(Error::Transport(eof)));
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                return Ok(0);
            }
            Err(e) => return Err(self.fail(Error::Transport(e))),
        };

        trace!("in  {}", HexDump(&chunk[..n]));
        self.rx.extend_from_slice(&chunk[..n]);
        self.process_buffered()
    }

    /// Send console bytes typed by the operator.
    ///
    /// Only valid while connected. Input longer than the negotiated
    /// transmit buffer is split across several data frames.
    pub fn send_local_input(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(self.invalid_state("send console data"));
        }
        for chunk in bytes.chunks(usize::from(MAX_TRANSMIT_BUFFER)) {
            let seq = self.next_seq();
            self.write_frame(&protocol::data_to_host(seq, chunk))?;
        }
        Ok(())
    }

    /// Ask the controller to end the SOL redirection.
    ///
    /// Sends the termination frame once; calling it again while closing or
    /// after the session ended does nothing. The controller gets one stall
    /// window to confirm, see [`close_expired`](Self::close_expired).
    pub fn request_stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected => {
                let seq = self.next_seq();
                self.write_frame(&protocol::end_sol(seq))?;
                info!("requested end of serial-over-lan redirection");
                self.transition(SessionState::Closing);
                self.close_deadline = Some(Instant::now() + self.stall_window());
                Ok(())
            }
            SessionState::Closing | SessionState::Closed | SessionState::Error => Ok(()),
            SessionState::Starting | SessionState::Authenticating => {
                Err(self.invalid_state("request stop"))
            }
        }
    }

    /// Whether a keepalive should go out now.
    ///
    /// Fails with [`Error::HeartbeatTimeout`] once the controller has been
    /// silent for the whole stall window; the session is then dead.
    pub fn heartbeat_due(&mut self, now: Instant) -> Result<bool> {
        match self.heartbeat.check(now) {
            Liveness::Idle => Ok(false),
            Liveness::SendDue => Ok(true),
            Liveness::Expired { silent_for } => {
                Err(self.fail(Error::HeartbeatTimeout { silent_for }))
            }
        }
    }

    /// Stop waiting for the end-SOL confirmation once the close deadline
    /// has passed. The session is then closed and `true` is returned.
    pub fn close_expired(&mut self, now: Instant) -> bool {
        match self.close_deadline {
            Some(deadline) if self.state == SessionState::Closing && now >= deadline => {
                warn!("controller did not confirm the end of redirection, closing anyway");
                self.finish();
                true
            }
            _ => false,
        }
    }

    pub fn send_heartbeat(&mut self, now: Instant) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(self.invalid_state("send heartbeat"));
        }
        let seq = self.next_seq();
        self.write_frame(&protocol::keepalive_ping(seq))?;
        self.heartbeat.record_sent(now);
        debug!(seq, "keepalive sent");
        Ok(())
    }

    /// Force the session into the error state because of a failure found
    /// outside of it, and hand the error back.
    pub fn abort(&mut self, err: Error) -> Error {
        self.fail(err)
    }

    fn is_live(&self) -> bool {
        self.opened && !self.state.is_terminal()
    }

    fn process_buffered(&mut self) -> Result<usize> {
        let buf = std::mem::take(&mut self.rx);
        let mut consumed = 0;

        let outcome = loop {
            if self.state.is_terminal() {
                break Ok(());
            }
            match protocol::decode(&buf[consumed..]) {
                Ok(None) => break Ok(()),
                Ok(Some(decoded)) => {
                    consumed += decoded.raw.len();
                    if let Err(e) = self.handle_frame(decoded) {
                        break Err(e);
                    }
                }
                Err(e) => break Err(self.fail(e.into())),
            }
        };

        if !self.state.is_terminal() {
            self.rx = buf;
            self.rx.drain(..consumed);
        }
        outcome.map(|()| consumed)
    }

    fn handle_frame(&mut self, decoded: Decoded<'_>) -> Result<()> {
        self.heartbeat.record_traffic(Instant::now());
        trace!(frame = %decoded.frame.frame_type(), len = decoded.raw.len(), "frame received");

        match (self.state, decoded.frame) {
            (SessionState::Starting, Incoming::StartSessionReply { status }) => {
                self.check_status("redirection session start", status)?;
                self.transition(SessionState::Authenticating);
                self.handshake = Handshake::AwaitAuthReply;
                self.send_credentials()
            }
            (SessionState::Authenticating, Incoming::AuthenticateReply { status })
                if self.handshake == Handshake::AwaitAuthReply =>
            {
                self.check_status("session authentication", status)?;
                info!("session authenticated");
                self.handshake = Handshake::AwaitSolReply;
                let seq = self.next_seq();
                self.write_frame(&protocol::start_sol(seq, self.heartbeat_interval_ms))
            }
            (SessionState::Authenticating, Incoming::StartSolReply { status })
                if self.handshake == Handshake::AwaitSolReply =>
            {
                self.check_status("serial-over-lan redirection", status)?;
                info!("serial-over-lan redirection established");
                self.transition(SessionState::Connected);
                Ok(())
            }
            (
                SessionState::Authenticating | SessionState::Connected | SessionState::Closing,
                Incoming::Ping,
            ) => self.write_frame(decoded.raw),
            (SessionState::Connected | SessionState::Closing, Incoming::Pong) => Ok(()),
            (SessionState::Connected, Incoming::Data(payload)) => self
                .handler
                .on_payload(payload)
                .map_err(|e| self.fail(Error::LocalIo(e))),
            (SessionState::Closing, Incoming::Data(payload)) => {
                debug!(len = payload.len(), "discarding console data while closing");
                Ok(())
            }
            (SessionState::Closing, Incoming::EndSolReply) => {
                self.finish();
                Ok(())
            }
            (SessionState::Connected, Incoming::EndSession) => {
                info!("controller ended the session");
                self.transition(SessionState::Closing);
                self.transition(SessionState::Closed);
                self.teardown();
                Ok(())
            }
            (SessionState::Closing, Incoming::EndSession) => {
                info!("controller ended the session while closing");
                self.transition(SessionState::Closed);
                self.teardown();
                Ok(())
            }
            (state, frame) => {
                let err = ProtocolError::UnexpectedFrame {
                    frame: frame.frame_type(),
                    state,
                };
                Err(self.fail(err.into()))
            }
        }
    }

    fn send_credentials(&mut self) -> Result<()> {
        let Some(credentials) = self.credentials.take() else {
            return Err(self.fail(self.invalid_state("authenticate")));
        };
        info!(user = ?String::from_utf8_lossy(credentials.username.as_bytes()), "authenticating");

        let mut frame =
            protocol::authenticate(credentials.username.as_bytes(), credentials.password.as_bytes());
        drop(credentials);
        let result = self.write_raw(&frame, false);
        frame.iter_mut().for_each(|b| *b = 0);
        result
    }

    /// Confirm the end of SOL and close the whole redirection session.
    fn finish(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let frame = protocol::end_session();
            trace!("out {}", HexDump(&frame));
            if let Err(e) = transport.write_all(&frame).and_then(|()| transport.flush()) {
                warn!("failed to send end-session: {}", e);
            }
        }
        self.transition(SessionState::Closed);
        self.teardown();
        info!("session closed");
    }

    fn check_status(&mut self, stage: &'static str, status: u8) -> Result<()> {
        protocol::check_status(stage, status).map_err(|e| self.fail(e.into()))
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.write_raw(frame, true)
    }

    fn write_raw(&mut self, frame: &[u8], loggable: bool) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.invalid_state("write to transport"));
        };
        if loggable {
            trace!("out {}", HexDump(frame));
        } else {
            trace!(len = frame.len(), "out <redacted>");
        }
        match transport.write_all(frame).and_then(|()| transport.flush()) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(Error::Transport(e))),
        }
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        seq
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Move to `Error` unless already terminal, release the transport, and
    /// pass the error through.
    fn fail(&mut self, err: Error) -> Error {
        if !self.state.is_terminal() {
            error!("session failed in state {}: {}", self.state, err);
            self.transition(SessionState::Error);
        }
        self.teardown();
        err
    }

    fn teardown(&mut self) {
        self.transport = None;
        self.rx.clear();
        self.close_deadline = None;
        self.heartbeat.disarm();
    }

    fn transition(&mut self, next: SessionState) {
        let old = self.state;
        debug_assert!(old.can_transition_to(next), "illegal transition {old} -> {next}");
        self.state = next;
        debug!(from = %old, to = %next, "session state changed");

        if next == SessionState::Connected {
            self.heartbeat.arm(Instant::now());
        } else {
            self.heartbeat.disarm();
        }
        self.handler.on_state_change(old, next);
    }
}
