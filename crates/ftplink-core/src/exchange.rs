//! Deadline-bounded request/response exchanges over a blocking socket.
//!
//! Proxy negotiation, proxy login and the explicit upgrade command all
//! follow the same pattern: write a request, read a bounded reply, give up
//! when the state's deadline passes. [`Exchange`] re-arms the socket timeout
//! with the time *remaining* before every read or write, so a peer that
//! trickles bytes cannot stretch a state past its budget.

use crate::error::{ConnectError, ConnectResult, Stage};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// A byte stream whose blocking reads and writes can be bounded.
pub trait TimedIo: Read + Write {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimedIo for TcpStream {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// Upper bound for a single reply line.
pub const MAX_LINE: usize = 4096;

/// One state's worth of I/O against a shared deadline.
pub struct Exchange<'s, S: TimedIo + ?Sized> {
    stream: &'s mut S,
    stage: Stage,
    deadline: Instant,
}

impl<'s, S: TimedIo + ?Sized> Exchange<'s, S> {
    pub fn new(stream: &'s mut S, stage: Stage, timeout: Duration) -> Self {
        Self {
            stream,
            stage,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn arm(&self, what: &str) -> ConnectResult<()> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ConnectError::timeout(
                self.stage,
                format!("{}: {} deadline exceeded", what, self.stage),
            ));
        }
        self.stream
            .set_io_timeout(Some(remaining))
            .map_err(|e| ConnectError::from_io(self.stage, what, &e))
    }

    fn closed(&self, what: &str) -> ConnectError {
        ConnectError::new(
            self.stage.failure_kind(),
            format!("{}: connection closed by peer", what),
        )
    }

    pub fn send(&mut self, bytes: &[u8], what: &str) -> ConnectResult<()> {
        self.arm(what)?;
        self.stream
            .write_all(bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| ConnectError::from_io(self.stage, what, &e))
    }

    pub fn recv_exact(&mut self, buf: &mut [u8], what: &str) -> ConnectResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            self.arm(what)?;
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(self.closed(what)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectError::from_io(self.stage, what, &e)),
            }
        }
        Ok(())
    }

    pub fn recv_byte(&mut self, what: &str) -> ConnectResult<u8> {
        let mut b = [0u8; 1];
        self.recv_exact(&mut b, what)?;
        Ok(b[0])
    }

    /// Read one byte at a time until `terminator` has been consumed.
    ///
    /// Nothing past the terminator is read, so bytes that belong to the
    /// tunneled connection stay in the socket.
    pub fn recv_until(&mut self, terminator: &[u8], limit: usize, what: &str) -> ConnectResult<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        while !out.ends_with(terminator) {
            if out.len() >= limit {
                return Err(ConnectError::new(
                    self.stage.failure_kind(),
                    format!("{}: reply exceeds {} bytes", what, limit),
                ));
            }
            out.push(self.recv_byte(what)?);
        }
        Ok(out)
    }

    /// One `\n`-terminated line with the line ending stripped.
    pub fn recv_line(&mut self, what: &str) -> ConnectResult<String> {
        let raw = self.recv_until(b"\n", MAX_LINE, what)?;
        let text = String::from_utf8_lossy(&raw);
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read a complete FTP-style reply, following `ddd-` continuation lines.
    pub fn read_reply(&mut self, what: &str) -> ConnectResult<Reply> {
        let first = self.recv_line(what)?;
        let code = reply_code(&first).ok_or_else(|| {
            ConnectError::new(
                self.stage.failure_kind(),
                format!("{}: malformed reply '{}'", what, first),
            )
        })?;
        let mut lines = vec![first];
        if lines[0].as_bytes().get(3) == Some(&b'-') {
            let closing = format!("{} ", code);
            loop {
                let line = self.recv_line(what)?;
                let done = line.starts_with(&closing) || line == code.to_string();
                lines.push(line);
                if done {
                    break;
                }
            }
        }
        Ok(Reply { code, lines })
    }
}

fn reply_code(line: &str) -> Option<u16> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match line.as_bytes().get(3) {
        None | Some(b' ') | Some(b'-') => digits.parse().ok(),
        _ => None,
    }
}

/// A numeric reply as sent by FTP servers and FTP proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Reply text without the numeric prefix, lines joined by `\n`.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.get(4..).unwrap_or("").to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_positive_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}
