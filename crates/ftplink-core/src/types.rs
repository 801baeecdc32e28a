//! Shared data types: proxy descriptors, targets, roles, timeouts and the
//! traversal states reported by a proxy chain.

use crate::error::{ConnectError, ConnectErrorKind, ConnectResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

// ─── Credentials ─────────────────────────────────────────────────────

/// Username/password pair. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ─── Proxy descriptor ────────────────────────────────────────────────

/// Proxy protocol spoken by one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyKind {
    /// No proxy; the socket goes straight to the next address.
    Direct,
    /// FTP proxy that forwards to the host named in `USER user@host`.
    UserAtHost,
    Socks4,
    /// SOCKS4 with proxy-side name resolution.
    Socks4a,
    Socks5,
    HttpConnect,
}

impl Default for ProxyKind {
    fn default() -> Self {
        Self::Direct
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyKind::Direct => "direct",
            ProxyKind::UserAtHost => "USER@host",
            ProxyKind::Socks4 => "SOCKS4",
            ProxyKind::Socks4a => "SOCKS4a",
            ProxyKind::Socks5 => "SOCKS5",
            ProxyKind::HttpConnect => "HTTP CONNECT",
        };
        f.write_str(s)
    }
}

/// Address, protocol and credentials of one proxy hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDescriptor {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub kind: ProxyKind,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl ProxyDescriptor {
    pub fn new(kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
            credentials: None,
        }
    }

    pub fn direct() -> Self {
        Self::new(ProxyKind::Direct, "", 0)
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn is_direct(&self) -> bool {
        self.kind == ProxyKind::Direct
    }

    pub fn endpoint(&self) -> String {
        format_endpoint(&self.host, self.port)
    }

    /// Reject descriptors that cannot possibly be dialled.
    pub fn validate(&self) -> ConnectResult<()> {
        if self.is_direct() {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(ConnectError::invalid_config(format!(
                "{} proxy has no host",
                self.kind
            )));
        }
        if self.port == 0 {
            return Err(ConnectError::invalid_config(format!(
                "{} proxy port must be 1-65535",
                self.kind
            )));
        }
        Ok(())
    }
}

// ─── Target ──────────────────────────────────────────────────────────

/// The logical server the application protocol wants to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Credentials the application protocol will log in with.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn endpoint(&self) -> String {
        format_endpoint(&self.host, self.port)
    }

    pub fn validate(&self) -> ConnectResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectError::invalid_config("target host is empty"));
        }
        if self.port == 0 {
            return Err(ConnectError::invalid_config("target port must be 1-65535"));
        }
        Ok(())
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn format_endpoint(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}

// ─── Connection role / trust ─────────────────────────────────────────

/// Whether a transport carries the FTP control channel or a data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionRole {
    Control,
    Data,
}

impl Default for ConnectionRole {
    fn default() -> Self {
        Self::Control
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Control => f.write_str("control"),
            ConnectionRole::Data => f.write_str("data"),
        }
    }
}

/// Answer returned by a trust callback while a handshake is blocked on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrustDecision {
    Accept,
    Reject,
    Ignore,
}

impl TrustDecision {
    /// Accept and Ignore both let the connection continue.
    pub fn proceeds(self) -> bool {
        !matches!(self, TrustDecision::Reject)
    }
}

// ─── Timeouts / address family ───────────────────────────────────────

/// Per-step timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Socket connect to the first hop.
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Each proxy negotiation state and the explicit upgrade command.
    #[serde(default = "default_negotiation_ms")]
    pub negotiation_ms: u64,
}

fn default_connect_ms() -> u64 {
    15_000
}
fn default_negotiation_ms() -> u64 {
    15_000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            negotiation_ms: default_negotiation_ms(),
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn negotiation(&self) -> Duration {
        Duration::from_millis(self.negotiation_ms)
    }

    /// Every blocking step must be bounded, so zero is rejected.
    pub fn validate(&self) -> ConnectResult<()> {
        if self.connect_ms == 0 {
            return Err(ConnectError::invalid_config("connect timeout must be non-zero"));
        }
        if self.negotiation_ms == 0 {
            return Err(ConnectError::invalid_config(
                "negotiation timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Address families tried when resolving the first hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IpVersion {
    Any,
    V4,
    V6,
}

impl Default for IpVersion {
    fn default() -> Self {
        Self::Any
    }
}

impl IpVersion {
    pub fn allows(self, addr: &IpAddr) -> bool {
        match self {
            IpVersion::Any => true,
            IpVersion::V4 => addr.is_ipv4(),
            IpVersion::V6 => addr.is_ipv6(),
        }
    }
}

// ─── Traversal states ────────────────────────────────────────────────

/// States a proxy traversal passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyState {
    Unconnected,
    SocketConnecting,
    ProxyHandshaking,
    ProxyAuthenticating,
    TargetEstablished,
    Ready,
    Failed(ConnectErrorKind),
}

impl ProxyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProxyState::Ready | ProxyState::Failed(_))
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyState::Unconnected => f.write_str("Unconnected"),
            ProxyState::SocketConnecting => f.write_str("SocketConnecting"),
            ProxyState::ProxyHandshaking => f.write_str("ProxyHandshaking"),
            ProxyState::ProxyAuthenticating => f.write_str("ProxyAuthenticating"),
            ProxyState::TargetEstablished => f.write_str("TargetEstablished"),
            ProxyState::Ready => f.write_str("Ready"),
            ProxyState::Failed(kind) => write!(f, "Failed({})", kind),
        }
    }
}
