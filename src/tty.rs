//! Local terminal adapter (Unix).
//!
//! Puts the controlling terminal into raw, non-blocking mode for the
//! lifetime of a [`TerminalGuard`], reads keystrokes straight from the
//! stdin descriptor and writes console output straight to stdout.

use std::io::{self, BufRead, Read, Write};
use std::os::fd::AsFd;
use std::time::Duration;

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use rustix::event::{poll, PollFd, PollFlags, Timespec};
use rustix::fs::{fcntl_getfl, fcntl_setfl, OFlags};
use rustix::io::Errno;
use rustix::termios::{self, LocalModes, OptionalActions, SpecialCodeIndex, Termios};
use tracing::{debug, warn};

use crate::core::{scrub, SessionHandler, SessionState};

/// Longest a blocked stdout write waits for the terminal to drain.
const WRITE_STALL: Duration = Duration::from_secs(1);

/// Raw, non-blocking mode for a terminal descriptor, restored on drop.
///
/// Does nothing when the descriptor is not a terminal.
pub struct TerminalGuard<F: AsFd> {
    fd: F,
    saved: Option<(Termios, OFlags)>,
}

impl TerminalGuard<io::Stdin> {
    pub fn stdin() -> io::Result<Self> {
        Self::enter_raw_mode(io::stdin())
    }
}

impl<F: AsFd> TerminalGuard<F> {
    pub fn enter_raw_mode(fd: F) -> io::Result<Self> {
        if !termios::isatty(&fd) {
            debug!("not a terminal, leaving its mode alone");
            return Ok(Self { fd, saved: None });
        }

        let original = termios::tcgetattr(&fd)?;
        let flags = fcntl_getfl(&fd)?;

        let mut raw = original.clone();
        raw.local_modes
            .remove(LocalModes::ISIG | LocalModes::ICANON | LocalModes::ECHO);
        raw.special_codes[SpecialCodeIndex::VMIN] = 1;
        raw.special_codes[SpecialCodeIndex::VTIME] = 0;
        termios::tcsetattr(&fd, OptionalActions::Flush, &raw)?;

        let guard = Self {
            saved: Some((original, flags)),
            fd,
        };
        fcntl_setfl(&guard.fd, flags | OFlags::NONBLOCK)?;
        debug!("terminal switched to raw mode");
        Ok(guard)
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl<F: AsFd> Drop for TerminalGuard<F> {
    fn drop(&mut self) {
        let Some((termios, flags)) = self.saved.take() else {
            return;
        };
        if let Err(e) = fcntl_setfl(&self.fd, flags) {
            warn!("failed to restore descriptor flags: {}", e);
        }
        if let Err(e) = termios::tcsetattr(&self.fd, OptionalActions::Now, &termios) {
            warn!("failed to restore terminal mode: {}", e);
        }
        debug!("terminal mode restored");
    }
}

/// Ask for the password on stderr with echo turned off.
///
/// Reads a whole line from stdin and strips the line terminator. Echo is
/// only touched when stdin is a terminal.
pub fn prompt_password(host: &str) -> io::Result<String> {
    let stdin = io::stdin();
    let saved = if stdin.is_tty() {
        let original = termios::tcgetattr(&stdin)?;
        let mut quiet = original.clone();
        quiet.local_modes.remove(LocalModes::ECHO);
        termios::tcsetattr(&stdin, OptionalActions::Flush, &quiet)?;
        Some(original)
    } else {
        None
    };

    let mut stderr = io::stderr();
    let mut line = String::new();
    let read = write!(stderr, "Password for {host}: ")
        .and_then(|()| stderr.flush())
        .and_then(|()| stdin.lock().read_line(&mut line));

    if let Some(original) = saved {
        termios::tcsetattr(&stdin, OptionalActions::Now, &original)?;
        let _ = writeln!(stderr);
    }
    if let Err(e) = read {
        scrub(&mut line);
        return Err(e);
    }

    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

/// Local keystrokes, read directly from file descriptor 0.
///
/// Bypasses the buffered `Stdin` reader so that readiness reported by
/// `poll` always matches what a read returns.
#[derive(Debug, Default)]
pub struct RawStdin;

impl Read for RawStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(rustix::io::read(io::stdin(), buf)?)
    }
}

/// Write every byte to stdout, riding out short writes, interrupts and a
/// full terminal buffer.
pub fn write_stdout(mut bytes: &[u8]) -> io::Result<()> {
    let stdout = io::stdout();
    while !bytes.is_empty() {
        match rustix::io::write(&stdout, bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(Errno::INTR) => {}
            Err(Errno::AGAIN) => wait_writable(&stdout)?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn wait_writable(stdout: &io::Stdout) -> io::Result<()> {
    let timeout = Timespec {
        tv_sec: WRITE_STALL.as_secs() as _,
        tv_nsec: 0,
    };
    let mut fds = [PollFd::new(stdout, PollFlags::OUT)];
    match poll(&mut fds, Some(&timeout)) {
        Ok(0) => Err(io::Error::new(io::ErrorKind::TimedOut, "stdout not writable")),
        Ok(_) | Err(Errno::INTR) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Shows console output on stdout and, when verbose, session progress on
/// stderr.
#[derive(Debug, Default)]
pub struct TtyHandler {
    verbose: bool,
}

impl TtyHandler {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SessionHandler for TtyHandler {
    fn on_payload(&mut self, bytes: &[u8]) -> io::Result<()> {
        write_stdout(bytes)
    }

    fn on_state_change(&mut self, old: SessionState, new: SessionState) {
        if !self.verbose {
            return;
        }
        // Output post-processing stays on in raw mode, but be explicit about
        // carriage returns anyway.
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "{}\r\n", format!("solterm state: {old} -> {new}").dark_grey());
        if new == SessionState::Connected {
            let _ = write!(
                stderr,
                "serial-over-lan redirection ok\r\n{}\r\n",
                "connected now, use ^] to escape".bold()
            );
        }
    }
}
