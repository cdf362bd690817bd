//! Session driver
//!
//! A single-threaded loop that waits on the transport and the local input,
//! feeds both into a [`Session`], keeps the heartbeat going and gives up on
//! a controller that stops talking.
//!
//! The wait itself sits behind [`Multiplexer`] so the loop can be driven by
//! something other than real file descriptors.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::{Error, Result, Session, SessionHandler, SessionState};

/// Ctrl-], the local keystroke that ends the session.
pub const ESCAPE_BYTE: u8 = 0x1D;

/// Largest chunk of local input read per readable event
const INPUT_CHUNK: usize = 512;

/// Which sources became ready during a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub input: bool,
    pub transport: bool,
}

impl Readiness {
    pub fn is_idle(&self) -> bool {
        !self.input && !self.transport
    }
}

/// Waits until the transport or the local input is readable.
pub trait Multiplexer {
    /// Block for at most `timeout`. The local input is only watched when
    /// `watch_input` is set.
    fn wait(&mut self, watch_input: bool, timeout: Duration) -> io::Result<Readiness>;
}

/// How a session that ended without error came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The controller or the protocol closed the session.
    Closed,
    /// The operator pressed the escape key.
    Escaped,
}

pub struct EventLoop<I, M> {
    input: I,
    mux: M,
    shutdown: Arc<AtomicBool>,
    verbose: bool,
    escaped: bool,
}

impl<I: Read, M: Multiplexer> EventLoop<I, M> {
    /// `shutdown` is polled once per iteration; setting it from a signal
    /// handler ends the loop with an error.
    pub fn new(input: I, mux: M, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            input,
            mux,
            shutdown,
            verbose: false,
            escaped: false,
        }
    }

    /// Print operator notices (the escape acknowledgement) to stderr.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Drive an opened session until it closes or fails.
    pub fn run<T, H>(&mut self, session: &mut Session<T, H>) -> Result<SessionEnd>
    where
        T: Read + Write,
        H: SessionHandler,
    {
        let stall_window = session.stall_window();

        loop {
            match session.state() {
                SessionState::Closed => {
                    info!(escaped = self.escaped, "event loop finished");
                    return Ok(if self.escaped {
                        SessionEnd::Escaped
                    } else {
                        SessionEnd::Closed
                    });
                }
                SessionState::Error => {
                    return Err(Error::InvalidState {
                        operation: "run event loop",
                        state: SessionState::Error,
                    });
                }
                _ => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                warn!("termination signal received");
                let err = io::Error::new(io::ErrorKind::Interrupted, "terminated by signal");
                return Err(session.abort(Error::LocalIo(err)));
            }

            let connected = session.state() == SessionState::Connected;
            let now = Instant::now();
            if connected && session.heartbeat_due(now)? {
                session.send_heartbeat(now)?;
            }
            if session.close_expired(now) {
                continue;
            }
            let closing = session.state() == SessionState::Closing;

            let timeout = session
                .next_wakeup(now)
                .map_or(stall_window, |wakeup| wakeup.min(stall_window));
            let ready = match self.mux.wait(connected, timeout) {
                Ok(ready) => ready,
                // Signal flags are picked up at the top of the loop.
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(session.abort(Error::LocalIo(e))),
            };

            if ready.is_idle() {
                if connected || closing {
                    // Woken for a keepalive, the liveness check or the close
                    // deadline.
                    continue;
                }
                debug!(state = %session.state(), "no traffic within the stall window");
                return Err(session.abort(Error::HeartbeatTimeout {
                    silent_for: timeout,
                }));
            }

            if ready.transport {
                session.on_transport_readable()?;
            }
            if ready.input && session.state() == SessionState::Connected {
                self.forward_input(session)?;
            }
        }
    }

    /// Read one chunk of local input and hand it to the session, stopping
    /// at the escape byte.
    fn forward_input<T, H>(&mut self, session: &mut Session<T, H>) -> Result<()>
    where
        T: Read + Write,
        H: SessionHandler,
    {
        let mut buf = [0u8; INPUT_CHUNK];
        let n = match self.input.read(&mut buf) {
            Ok(0) => {
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "local input closed");
                return Err(session.abort(Error::LocalIo(eof)));
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return Ok(());
            }
            Err(e) => return Err(session.abort(Error::LocalIo(e))),
        };
        let chunk = &buf[..n];

        let Some(at) = chunk.iter().position(|b| *b == ESCAPE_BYTE) else {
            return session.send_local_input(chunk);
        };
        if at > 0 {
            session.send_local_input(&chunk[..at])?;
        }

        info!(dropped = n - at - 1, "escape key pressed, closing session");
        if self.verbose {
            eprint!("\r\nsolterm: saw ^], exiting\r\n");
        }
        self.escaped = true;
        session.request_stop()
    }
}

#[cfg(unix)]
pub use self::poller::FdPoller;

#[cfg(unix)]
mod poller {
    use std::io;
    use std::time::Duration;

    use rustix::event::{poll, PollFd, PollFlags, Timespec};
    use rustix::fd::AsFd;

    use super::{Multiplexer, Readiness};

    /// [`Multiplexer`] over two file descriptors with `poll(2)`.
    pub struct FdPoller<S, I> {
        transport: S,
        input: I,
    }

    impl<S: AsFd, I: AsFd> FdPoller<S, I> {
        pub fn new(transport: S, input: I) -> Self {
            Self { transport, input }
        }
    }

    impl<S: AsFd, I: AsFd> Multiplexer for FdPoller<S, I> {
        fn wait(&mut self, watch_input: bool, timeout: Duration) -> io::Result<Readiness> {
            let timeout = Timespec {
                tv_sec: timeout.as_secs() as _,
                tv_nsec: timeout.subsec_nanos() as _,
            };
            let mut fds = [
                PollFd::new(&self.transport, PollFlags::IN),
                PollFd::new(&self.input, PollFlags::IN),
            ];
            let watched = if watch_input { 2 } else { 1 };
            poll(&mut fds[..watched], Some(&timeout))?;

            // Hang-up and error count as readable so the next read reports them.
            let readable = |fd: &PollFd<'_>| {
                fd.revents()
                    .intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR)
            };
            Ok(Readiness {
                transport: readable(&fds[0]),
                input: watch_input && readable(&fds[1]),
            })
        }
    }
}
