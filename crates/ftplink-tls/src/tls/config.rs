//! Per-call session configuration.

use ftplink_core::logging::{DEFAULT_BACKLOG, DEFAULT_VERBOSITY};
use ftplink_core::{ConnectError, ConnectResult, Diagnostics, IpVersion, LogSink, Timeouts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// 0 silences verbose output; 1 shows connection steps; 3 and above
    /// show TLS engine details.
    #[serde(default = "default_log_verbosity")]
    pub log_verbosity: u8,
    /// Suppressed verbose lines kept for the post-mortem of a failure.
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Replaces the built priority string, or extends it when the value
    /// starts with `+` or `-`.
    #[serde(default)]
    pub priority_override: Option<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub ip_version: IpVersion,
    /// Write host names and addresses into log messages.
    #[serde(default = "default_true")]
    pub log_host: bool,
    /// Advertise `ftp` / `ftp-data` via ALPN.
    #[serde(default = "default_true")]
    pub alpn: bool,
    /// Fail a linked data connection whose handshake was not resumed.
    #[serde(default)]
    pub require_resumption: bool,
    /// PEM certificates trusted in addition to the platform roots.
    #[serde(default)]
    pub extra_trust_anchors_pem: Vec<String>,
    #[serde(default = "default_true")]
    pub use_platform_roots: bool,
}

fn default_log_verbosity() -> u8 {
    DEFAULT_VERBOSITY
}
fn default_log_buffer_size() -> usize {
    DEFAULT_BACKLOG
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_verbosity: default_log_verbosity(),
            log_buffer_size: default_log_buffer_size(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            priority_override: None,
            timeouts: Timeouts::default(),
            ip_version: IpVersion::default(),
            log_host: true,
            alpn: true,
            require_resumption: false,
            extra_trust_anchors_pem: Vec::new(),
            use_platform_roots: true,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn validate(&self) -> ConnectResult<()> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConnectError::invalid_config(
                "handshake timeout must be non-zero",
            ));
        }
        self.timeouts.validate()
    }

    /// Diagnostics honouring this config's verbosity, backlog and host
    /// masking.
    pub fn diagnostics(&self, sink: Arc<dyn LogSink>) -> Diagnostics {
        Diagnostics::with_settings(sink, self.log_verbosity, self.log_buffer_size, self.log_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftplink_core::{ConnectErrorKind, MemorySink};

    #[test]
    fn defaults() {
        let c = SessionConfig::default();
        assert_eq!(c.log_verbosity, 1);
        assert_eq!(c.log_buffer_size, 150);
        assert_eq!(c.handshake_timeout(), Duration::from_secs(5));
        assert!(c.alpn && c.log_host && c.use_platform_roots);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let c = SessionConfig {
            handshake_timeout_ms: 0,
            ..SessionConfig::default()
        };
        assert_eq!(c.validate().unwrap_err().kind, ConnectErrorKind::InvalidConfig);

        let mut c = SessionConfig::default();
        c.timeouts.negotiation_ms = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let c: SessionConfig =
            serde_json::from_str(r#"{ "logVerbosity": 4, "priorityOverride": "-VERS-TLS1.2" }"#)
                .unwrap();
        assert_eq!(c.log_verbosity, 4);
        assert_eq!(c.priority_override.as_deref(), Some("-VERS-TLS1.2"));
        assert_eq!(c.handshake_timeout_ms, 5_000);
        assert!(c.alpn);
    }

    #[test]
    fn diagnostics_follow_the_config() {
        let sink = Arc::new(MemorySink::new());
        let c = SessionConfig {
            log_verbosity: 0,
            log_host: false,
            ..SessionConfig::default()
        };
        let diag = c.diagnostics(sink.clone());
        diag.verbose(1, "hidden");
        assert!(sink.entries().is_empty());
        assert_eq!(diag.backlog_len(), 1);
        assert_eq!(diag.endpoint("ftp.example.org", 21), "***:21");
    }
}
