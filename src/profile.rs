//! JSON connection profiles.
//!
//! A profile is a plain per-call value: load it, turn it into a
//! [`ConnectRequest`], connect. Nothing is cached or written back.
//!
//! ```json
//! {
//!   "proxies": [{ "kind": "socks5", "host": "10.0.0.1", "port": 1080 }],
//!   "target": { "host": "ftp.example.org", "port": 21,
//!               "credentials": { "username": "alice", "password": "pw" } },
//!   "tls": { "mode": "explicit",
//!            "policy": { "suite": "NORMAL",
//!                        "options": [{ "op": "exclude", "component": "VERS-TLS1.2" }] } },
//!   "session": { "handshakeTimeoutMs": 8000 }
//! }
//! ```

use crate::orchestrator::{ConnectRequest, TlsRequest};
use ftplink_core::{ConnectError, ConnectResult, ConnectionRole, ProxyDescriptor, Target};
use ftplink_tls::{CipherPolicySpec, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TlsMode {
    Implicit,
    /// `AUTH TLS` before the handshake.
    Explicit,
}

impl Default for TlsMode {
    fn default() -> Self {
        Self::Explicit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsProfile {
    #[serde(default)]
    pub mode: TlsMode,
    #[serde(default)]
    pub policy: CipherPolicySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    #[serde(default)]
    pub proxies: Vec<ProxyDescriptor>,
    pub target: Target,
    #[serde(default)]
    pub tls: Option<TlsProfile>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub role: ConnectionRole,
}

impl ConnectionProfile {
    pub fn from_json(json: &str) -> ConnectResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConnectError::invalid_config(format!("invalid connection profile: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> ConnectResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ConnectError::invalid_config(format!(
                "cannot read connection profile {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> ConnectResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConnectError::invalid_config(format!("cannot serialise profile: {}", e)))
    }

    /// Request with default trust callbacks; attach callbacks with
    /// [`TlsRequest::with_callbacks`] on `request.tls` if needed.
    pub fn into_request(self) -> ConnectRequest {
        let mut request = ConnectRequest::new(self.target)
            .with_session(self.session)
            .with_role(self.role);
        request.proxies = self.proxies;
        if let Some(tls) = self.tls {
            request = request.with_tls(match tls.mode {
                TlsMode::Implicit => TlsRequest::implicit(tls.policy),
                TlsMode::Explicit => TlsRequest::auth_tls(tls.policy),
            });
        }
        request
    }
}
