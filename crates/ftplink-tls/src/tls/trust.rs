//! Caller decisions taken while a connection is being secured.
//!
//! Both hooks are synchronous: the handshake (or the plaintext fallback)
//! waits for the returned [`TrustDecision`]. An unset hook behaves as if it
//! had returned `Reject`.

use ftplink_core::TrustDecision;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateIssueKind {
    Expired,
    NotYetValid,
    NameMismatch,
    UntrustedIssuer,
    SelfSigned,
    Revoked,
    Other,
}

impl fmt::Display for CertificateIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertificateIssueKind::Expired => "expired",
            CertificateIssueKind::NotYetValid => "not yet valid",
            CertificateIssueKind::NameMismatch => "name mismatch",
            CertificateIssueKind::UntrustedIssuer => "untrusted issuer",
            CertificateIssueKind::SelfSigned => "self-signed",
            CertificateIssueKind::Revoked => "revoked",
            CertificateIssueKind::Other => "invalid",
        };
        f.write_str(s)
    }
}

/// Why the server certificate failed validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateIssue {
    pub kind: CertificateIssueKind,
    pub server_name: String,
    /// DER of the end-entity certificate, for pinning or display.
    #[serde(skip)]
    pub end_entity_der: Vec<u8>,
    pub message: String,
}

/// The server refused (or could not perform) the secure-upgrade command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityUnavailable {
    pub host: String,
    pub port: u16,
    /// Server reply to the upgrade command, if one was read.
    pub reply: Option<String>,
}

type CertificateHook = Arc<dyn Fn(&CertificateIssue) -> TrustDecision + Send + Sync>;
type UnavailableHook = Arc<dyn Fn(&SecurityUnavailable) -> TrustDecision + Send + Sync>;

/// Optional trust hooks for one connection attempt.
#[derive(Clone, Default)]
pub struct TrustCallbacks {
    on_certificate_issue: Option<CertificateHook>,
    on_security_unavailable: Option<UnavailableHook>,
}

impl TrustCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Accept` or `Ignore` lets the handshake continue despite the issue.
    pub fn on_certificate_issue<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CertificateIssue) -> TrustDecision + Send + Sync + 'static,
    {
        self.on_certificate_issue = Some(Arc::new(hook));
        self
    }

    /// `Accept` or `Ignore` continues without encryption: credentials will
    /// then cross the network in plaintext. `Reject` cancels the attempt.
    pub fn on_security_unavailable<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SecurityUnavailable) -> TrustDecision + Send + Sync + 'static,
    {
        self.on_security_unavailable = Some(Arc::new(hook));
        self
    }

    pub fn certificate_decision(&self, issue: &CertificateIssue) -> TrustDecision {
        self.on_certificate_issue
            .as_ref()
            .map_or(TrustDecision::Reject, |hook| hook(issue))
    }

    pub fn security_unavailable_decision(&self, info: &SecurityUnavailable) -> TrustDecision {
        self.on_security_unavailable
            .as_ref()
            .map_or(TrustDecision::Reject, |hook| hook(info))
    }
}

impl fmt::Debug for TrustCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustCallbacks")
            .field("on_certificate_issue", &self.on_certificate_issue.is_some())
            .field("on_security_unavailable", &self.on_security_unavailable.is_some())
            .finish()
    }
}
