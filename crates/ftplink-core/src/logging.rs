//! Log-entry boundary and per-connection diagnostics.
//!
//! The connection core only *produces* [`LogEntry`] values and hands them to
//! an injected [`LogSink`]. Formatting and routing belong to the sink.
//! [`Diagnostics`] adds the two knobs a session config exposes: a verbosity
//! level and a bounded backlog of suppressed detail that is flushed when a
//! connection attempt fails.

use crate::error::ConnectError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Verbose,
    Info,
    Warn,
    Error,
}

/// One diagnostic line handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub failure: Option<ConnectError>,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: ConnectError) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Receiver of log entries.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: LogEntry);
}

impl<F> LogSink for F
where
    F: Fn(LogEntry) + Send + Sync,
{
    fn emit(&self, entry: LogEntry) {
        self(entry)
    }
}

// ─── Sinks ───────────────────────────────────────────────────────────

/// Forwards entries to the `log` facade under a fixed target.
#[derive(Debug, Clone)]
pub struct LogFacadeSink {
    target: String,
}

impl LogFacadeSink {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for LogFacadeSink {
    fn default() -> Self {
        Self::new("ftplink")
    }
}

impl LogSink for LogFacadeSink {
    fn emit(&self, entry: LogEntry) {
        let target = self.target.as_str();
        match (entry.severity, entry.failure) {
            (Severity::Verbose, _) => log::debug!(target: target, "{}", entry.message),
            (Severity::Info, _) => log::info!(target: target, "{}", entry.message),
            (Severity::Warn, _) => log::warn!(target: target, "{}", entry.message),
            (Severity::Error, Some(failure)) => {
                log::error!(target: target, "{} ({})", entry.message, failure)
            }
            (Severity::Error, None) => log::error!(target: target, "{}", entry.message),
        }
    }
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.message.contains(needle))
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn emit(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _entry: LogEntry) {}
}

// ─── Diagnostics ─────────────────────────────────────────────────────

/// Detail level for connection-layer messages (socket, proxy, upgrade).
pub const DETAIL_CONNECTION: u8 = 1;
/// Detail level for TLS engine internals (policy notes, handshake steps).
pub const DETAIL_ENGINE: u8 = 3;

/// Default verbosity: connection-layer detail only.
pub const DEFAULT_VERBOSITY: u8 = DETAIL_CONNECTION;
/// Default number of suppressed messages retained for post-mortem output.
pub const DEFAULT_BACKLOG: usize = 150;

/// Sink wrapper applying verbosity and the failure backlog.
///
/// Cheap to clone; clones share the sink and the backlog so a transport
/// handle can keep logging after the connect call returns.
#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<DiagnosticsInner>,
}

struct DiagnosticsInner {
    sink: Arc<dyn LogSink>,
    verbosity: u8,
    backlog_capacity: usize,
    log_host: bool,
    backlog: Mutex<VecDeque<String>>,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_settings(sink, DEFAULT_VERBOSITY, DEFAULT_BACKLOG, true)
    }

    /// `verbosity` 0 suppresses every verbose message; `backlog` 0 disables
    /// retention; `log_host` false masks host names and addresses.
    pub fn with_settings(
        sink: Arc<dyn LogSink>,
        verbosity: u8,
        backlog: usize,
        log_host: bool,
    ) -> Self {
        Self {
            inner: Arc::new(DiagnosticsInner {
                sink,
                verbosity,
                backlog_capacity: backlog,
                log_host,
                backlog: Mutex::new(VecDeque::with_capacity(backlog.min(1024))),
            }),
        }
    }

    /// Diagnostics that drop everything.
    pub fn silent() -> Self {
        Self::with_settings(Arc::new(NullSink), 0, 0, false)
    }

    pub fn verbosity(&self) -> u8 {
        self.inner.verbosity
    }

    pub fn logs_hosts(&self) -> bool {
        self.inner.log_host
    }

    /// Emit a verbose message at `level`, or retain it in the backlog when
    /// the level exceeds the configured verbosity.
    pub fn verbose(&self, level: u8, message: impl Into<String>) {
        let message = message.into();
        if level <= self.inner.verbosity {
            self.inner.sink.emit(LogEntry::new(Severity::Verbose, message));
        } else {
            self.retain(message);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.inner.sink.emit(LogEntry::new(Severity::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.inner.sink.emit(LogEntry::new(Severity::Warn, message));
    }

    /// Report a terminal failure.
    ///
    /// The backlog is flushed first so the sink sees the suppressed
    /// negotiation trail leading up to the error.
    pub fn error(&self, failure: &ConnectError) {
        self.flush_backlog();
        self.inner.sink.emit(
            LogEntry::new(Severity::Error, failure.message.clone()).with_failure(failure.clone()),
        );
    }

    /// Host name or address as it may appear in log output.
    pub fn host<'a>(&self, host: &'a str) -> &'a str {
        if self.inner.log_host {
            host
        } else {
            "***"
        }
    }

    /// `host:port` as it may appear in log output.
    pub fn endpoint(&self, host: &str, port: u16) -> String {
        if self.inner.log_host {
            crate::types::format_endpoint(host, port)
        } else {
            format!("***:{}", port)
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn retain(&self, message: String) {
        let capacity = self.inner.backlog_capacity;
        if capacity == 0 {
            return;
        }
        if let Ok(mut backlog) = self.inner.backlog.lock() {
            while backlog.len() >= capacity {
                backlog.pop_front();
            }
            backlog.push_back(message);
        }
    }

    fn flush_backlog(&self) {
        let drained: Vec<String> = match self.inner.backlog.lock() {
            Ok(mut backlog) => backlog.drain(..).collect(),
            Err(_) => return,
        };
        for message in drained {
            self.inner
                .sink
                .emit(LogEntry::new(Severity::Verbose, format!("backlog: {}", message)));
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("verbosity", &self.inner.verbosity)
            .field("backlog_capacity", &self.inner.backlog_capacity)
            .field("log_host", &self.inner.log_host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(verbosity: u8, backlog: usize) -> (Arc<MemorySink>, Diagnostics) {
        let sink = Arc::new(MemorySink::new());
        let d = Diagnostics::with_settings(sink.clone(), verbosity, backlog, true);
        (sink, d)
    }

    #[test]
    fn verbose_messages_above_level_are_retained_not_emitted() {
        let (sink, d) = diag(1, 10);
        d.verbose(1, "socket open");
        d.verbose(3, "engine detail");
        assert_eq!(sink.messages(), vec!["socket open".to_string()]);
        assert_eq!(d.backlog_len(), 1);
    }

    #[test]
    fn error_flushes_backlog_before_failure() {
        let (sink, d) = diag(0, 10);
        d.verbose(1, "a");
        d.verbose(3, "b");
        d.error(&ConnectError::proxy_connect("refused"));

        let entries = sink.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "backlog: a");
        assert_eq!(entries[1].message, "backlog: b");
        assert_eq!(entries[2].severity, Severity::Error);
        assert_eq!(
            entries[2].failure.as_ref().map(|f| f.kind),
            Some(crate::error::ConnectErrorKind::ProxyConnectFailure)
        );
        assert_eq!(d.backlog_len(), 0);
    }

    #[test]
    fn backlog_is_bounded() {
        let (_sink, d) = diag(0, 3);
        for i in 0..10 {
            d.verbose(5, format!("line {}", i));
        }
        assert_eq!(d.backlog_len(), 3);
    }

    #[test]
    fn zero_backlog_keeps_nothing() {
        let (sink, d) = diag(0, 0);
        d.verbose(1, "dropped");
        d.error(&ConnectError::invalid_config("bad"));
        assert_eq!(sink.entries().len(), 1);
    }

    #[test]
    fn hosts_are_masked_when_disabled() {
        let d = Diagnostics::with_settings(Arc::new(NullSink), 1, 0, false);
        assert_eq!(d.host("10.0.0.1"), "***");
        assert_eq!(d.endpoint("ftp.example.org", 21), "***:21");

        let d = Diagnostics::with_settings(Arc::new(NullSink), 1, 0, true);
        assert_eq!(d.endpoint("::1", 990), "[::1]:990");
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let d = Diagnostics::new(Arc::new(move |e: LogEntry| {
            captured.lock().unwrap().push(e.severity);
        }));
        d.info("hello");
        d.warn("careful");
        assert_eq!(*seen.lock().unwrap(), vec![Severity::Info, Severity::Warn]);
    }
}
