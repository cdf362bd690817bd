//! In-memory stand-ins for the controller and the handler, for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use super::session::SessionHandler;
use super::state::SessionState;

/// Frames as the controller would send them.
pub mod frames {
    pub fn reply(frame_type: u8, status: u8, len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[0] = frame_type;
        frame[1] = status;
        frame
    }

    pub fn session_reply(status: u8) -> Vec<u8> {
        reply(0x11, status, 13)
    }

    pub fn auth_reply(status: u8) -> Vec<u8> {
        vec![0x14, status, 0, 0, 0x01, 0, 0, 0, 0]
    }

    pub fn sol_reply(status: u8) -> Vec<u8> {
        reply(0x21, status, 23)
    }

    pub fn end_sol_reply() -> Vec<u8> {
        reply(0x23, 0, 8)
    }

    pub fn heartbeat() -> Vec<u8> {
        reply(0x2B, 0, 8)
    }

    pub fn pong() -> Vec<u8> {
        reply(0x25, 0, 8)
    }

    pub fn end_session() -> Vec<u8> {
        vec![0x12, 0, 0, 0]
    }

    pub fn data(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x2A, 0, 0, 0, 0, 0, 0, 0];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }
}

/// Length of the client frame at the start of `buf`, if complete.
fn client_frame_len(buf: &[u8]) -> Option<usize> {
    let len = match *buf.first()? {
        0x10 | 0x22 | 0x24 | 0x25 | 0x2B => 8,
        0x12 => 4,
        0x20 => 24,
        0x13 => {
            let header = buf.get(..9)?;
            9 + u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize
        }
        0x28 => {
            let header = buf.get(..10)?;
            10 + usize::from(u16::from_le_bytes([header[8], header[9]]))
        }
        other => panic!("client sent unknown frame type 0x{other:02x}"),
    };
    (buf.len() >= len).then_some(len)
}

#[derive(Debug, Default)]
struct Inner {
    inbound: VecDeque<u8>,
    held: Vec<u8>,
    eof: bool,
    unparsed: Vec<u8>,
    frames: Vec<Vec<u8>>,
    auto_reply: bool,
    hold: bool,
    echo_data: bool,
    answer_pings: bool,
    session_status: u8,
    auth_status: u8,
    sol_status: u8,
    close_after_auth_request: bool,
    fail_writes: bool,
}

impl Inner {
    fn queue(&mut self, bytes: &[u8]) {
        if self.hold {
            self.held.extend_from_slice(bytes);
        } else {
            self.inbound.extend(bytes.iter().copied());
        }
    }

    fn respond(&mut self, frame: &[u8]) {
        match frame[0] {
            0x10 if self.auto_reply => {
                let reply = frames::session_reply(self.session_status);
                self.queue(&reply);
            }
            0x13 if self.close_after_auth_request => self.eof = true,
            0x13 if self.auto_reply => {
                let reply = frames::auth_reply(self.auth_status);
                self.queue(&reply);
            }
            0x20 if self.auto_reply => {
                let reply = frames::sol_reply(self.sol_status);
                self.queue(&reply);
            }
            0x22 if self.auto_reply => self.queue(&frames::end_sol_reply()),
            0x24 if self.answer_pings => self.queue(&frames::pong()),
            0x28 if self.echo_data => {
                let reply = frames::data(&frame[10..]);
                self.queue(&reply);
            }
            _ => {}
        }
    }
}

/// A scriptable management controller living in memory.
///
/// Clones share state, so a test can keep one handle while the session
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeController {
    inner: Rc<RefCell<Inner>>,
}

impl FakeController {
    /// Answers every handshake step with success.
    pub fn accepting() -> Self {
        let controller = Self::default();
        {
            let mut inner = controller.inner.borrow_mut();
            inner.auto_reply = true;
            inner.answer_pings = true;
        }
        controller
    }

    /// Never answers anything on its own.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn set_auth_status(&self, status: u8) {
        self.inner.borrow_mut().auth_status = status;
    }

    /// Send console data frames back with the payload the client sent.
    pub fn echo_data(&self) {
        self.inner.borrow_mut().echo_data = true;
    }

    /// Keep generated replies back until [`release_replies`](Self::release_replies).
    pub fn hold_replies(&self) {
        self.inner.borrow_mut().hold = true;
    }

    pub fn release_replies(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.hold = false;
        let held = std::mem::take(&mut inner.held);
        inner.inbound.extend(held);
    }

    pub fn close_after_auth_request(&self) {
        self.inner.borrow_mut().close_after_auth_request = true;
    }

    /// End the stream once everything pushed so far has been read.
    pub fn hang_up(&self) {
        self.inner.borrow_mut().eof = true;
    }

    pub fn fail_writes(&self) {
        self.inner.borrow_mut().fail_writes = true;
    }

    /// Make bytes available to the client.
    pub fn push(&self, bytes: &[u8]) {
        self.inner.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Whether a read would return data or end-of-stream.
    pub fn has_pending(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.inbound.is_empty() || inner.eof
    }

    /// Every complete frame the client has written, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().frames.clone()
    }

    /// Payload of every console data frame the client has written.
    pub fn sent_console_data(&self) -> Vec<u8> {
        self.sent_frames()
            .iter()
            .filter(|f| f[0] == 0x28)
            .flat_map(|f| f[10..].to_vec())
            .collect()
    }
}

impl Read for FakeController {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.inbound.is_empty() {
            return if inner.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(inner.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(inner.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeController {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        inner.unparsed.extend_from_slice(buf);

        while let Some(len) = client_frame_len(&inner.unparsed) {
            let frame: Vec<u8> = inner.unparsed.drain(..len).collect();
            inner.respond(&frame);
            inner.frames.push(frame);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What a [`Recorder`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    State(SessionState, SessionState),
    Payload(Vec<u8>),
}

/// Handler that records everything it is told.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    pub fail_payload: bool,
}

impl Recorder {
    pub fn transitions(&self) -> Vec<(SessionState, SessionState)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::State(old, new) => Some((*old, *new)),
                Event::Payload(_) => None,
            })
            .collect()
    }

    /// Initial state followed by every state entered.
    pub fn states(&self) -> Vec<SessionState> {
        let transitions = self.transitions();
        let mut states: Vec<_> = transitions.first().map(|(old, _)| *old).into_iter().collect();
        states.extend(transitions.iter().map(|(_, new)| *new));
        states
    }

    pub fn payload(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Payload(bytes) => Some(bytes.as_slice()),
                Event::State(..) => None,
            })
            .flatten()
            .copied()
            .collect()
    }
}

impl SessionHandler for Recorder {
    fn on_payload(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_payload {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.events.push(Event::Payload(bytes.to_vec()));
        Ok(())
    }

    fn on_state_change(&mut self, old: SessionState, new: SessionState) {
        self.events.push(Event::State(old, new));
    }
}
