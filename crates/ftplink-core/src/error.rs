//! Connection-establishment error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Categorised connection failure.
///
/// Every failure is terminal for the `connect` call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{kind}] {message}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectErrorKind {
    /// Socket-level failure reaching a proxy or the target, or a proxy
    /// refusing to open the tunnel.
    ProxyConnectFailure,
    /// Proxy rejected the credentials or the authentication sub-negotiation.
    ProxyAuthFailure,
    /// The cipher policy names something the TLS engine cannot honour.
    UnsupportedPolicyComponent,
    /// The secure-upgrade command was refused and the caller did not
    /// accept a plaintext fallback.
    SecurityNotAvailable,
    TlsHandshakeFailure(TlsFailureReason),
    Timeout(Stage),
    /// Descriptor, target or session configuration rejected before any I/O.
    InvalidConfig,
}

/// Sub-case of a TLS handshake failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TlsFailureReason {
    /// Local engine error while negotiating.
    Negotiation,
    /// Certificate validation failed and no trust override accepted it.
    Certificate,
    /// The peer refused the offered parameters (alert or incompatibility).
    PeerRejected,
    /// The linked control session was already released.
    ResumptionUnavailable,
    /// The server performed a full handshake although resumption was required.
    ResumptionRejected,
}

/// The blocking step that was running when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    SocketConnect,
    ProxyHandshake,
    ProxyAuthentication,
    TargetConnect,
    UpgradeCommand,
    TlsHandshake,
}

pub type ConnectResult<T> = Result<T, ConnectError>;

// ── Construction helpers ─────────────────────────────────────────────

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn proxy_connect(msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::ProxyConnectFailure, msg)
    }

    pub fn proxy_auth(msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::ProxyAuthFailure, msg)
    }

    pub fn unsupported_component(component: &str) -> Self {
        Self::new(
            ConnectErrorKind::UnsupportedPolicyComponent,
            format!("policy component '{}' is not supported by the TLS engine", component),
        )
    }

    pub fn unsupported_policy(msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::UnsupportedPolicyComponent, msg)
    }

    pub fn security_not_available(msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::SecurityNotAvailable, msg)
    }

    pub fn tls(reason: TlsFailureReason, msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::TlsHandshakeFailure(reason), msg)
    }

    pub fn timeout(stage: Stage, msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::Timeout(stage), msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ConnectErrorKind::InvalidConfig, msg)
    }

    /// Classify an I/O error raised while `stage` was running.
    ///
    /// `TimedOut` and `WouldBlock` (what a socket read timeout surfaces as
    /// on some platforms) become [`ConnectErrorKind::Timeout`]; anything
    /// else becomes the failure kind that owns the stage.
    pub fn from_io(stage: Stage, context: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Self::timeout(stage, format!("{} timed out: {}", context, err))
            }
            _ => Self::new(stage.failure_kind(), format!("{}: {}", context, err)),
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ConnectErrorKind::Timeout(_))
    }

    pub fn tls_reason(&self) -> Option<TlsFailureReason> {
        match self.kind {
            ConnectErrorKind::TlsHandshakeFailure(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Stage {
    /// Failure kind reported for non-timeout I/O errors in this stage.
    pub fn failure_kind(self) -> ConnectErrorKind {
        match self {
            Stage::SocketConnect | Stage::ProxyHandshake | Stage::TargetConnect => {
                ConnectErrorKind::ProxyConnectFailure
            }
            Stage::ProxyAuthentication => ConnectErrorKind::ProxyAuthFailure,
            Stage::UpgradeCommand => ConnectErrorKind::SecurityNotAvailable,
            Stage::TlsHandshake => {
                ConnectErrorKind::TlsHandshakeFailure(TlsFailureReason::Negotiation)
            }
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectErrorKind::ProxyConnectFailure => f.write_str("ProxyConnectFailure"),
            ConnectErrorKind::ProxyAuthFailure => f.write_str("ProxyAuthFailure"),
            ConnectErrorKind::UnsupportedPolicyComponent => {
                f.write_str("UnsupportedPolicyComponent")
            }
            ConnectErrorKind::SecurityNotAvailable => f.write_str("SecurityNotAvailable"),
            ConnectErrorKind::TlsHandshakeFailure(reason) => {
                write!(f, "TlsHandshakeFailure({})", reason)
            }
            ConnectErrorKind::Timeout(stage) => write!(f, "Timeout({})", stage),
            ConnectErrorKind::InvalidConfig => f.write_str("InvalidConfig"),
        }
    }
}

impl fmt::Display for TlsFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TlsFailureReason::Negotiation => "negotiation",
            TlsFailureReason::Certificate => "certificate",
            TlsFailureReason::PeerRejected => "peer rejected",
            TlsFailureReason::ResumptionUnavailable => "resumption unavailable",
            TlsFailureReason::ResumptionRejected => "resumption rejected",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::SocketConnect => "socket connect",
            Stage::ProxyHandshake => "proxy handshake",
            Stage::ProxyAuthentication => "proxy authentication",
            Stage::TargetConnect => "target connect",
            Stage::UpgradeCommand => "upgrade command",
            Stage::TlsHandshake => "TLS handshake",
        };
        f.write_str(s)
    }
}

impl From<ConnectError> for String {
    fn from(e: ConnectError) -> String {
        e.to_string()
    }
}
