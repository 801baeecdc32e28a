//! **ftplink** — connection establishment for FTP control and data
//! channels.
//!
//! A [`ConnectRequest`] names the proxy hops, the logical target and an
//! optional TLS request. [`ConnectionOrchestrator::connect`] runs the proxy
//! chain, the explicit upgrade command if any, and the TLS handshake, and
//! hands back a [`TransportHandle`] positioned at the target's first byte.
//!
//! | Module | Purpose |
//! |---|---|
//! | [`orchestrator`] | `ConnectRequest`, `TlsRequest` and `ConnectionOrchestrator` |
//! | [`upgrade`] | `SecureUpgrade` hook and the `AUTH TLS` command |
//! | [`profile`] | JSON connection profiles |
//!
//! Building blocks are re-exported from `ftplink-core`, `ftplink-proxy`
//! and `ftplink-tls`.

pub mod orchestrator;
pub mod profile;
pub mod upgrade;

pub use orchestrator::{ConnectRequest, ConnectionOrchestrator, SecurityMode, TlsRequest};
pub use profile::{ConnectionProfile, TlsMode, TlsProfile};
pub use upgrade::{AuthTlsCommand, SecureUpgrade, UpgradeOutcome};

pub use ftplink_core::{
    format_endpoint, ConnectError, ConnectErrorKind, ConnectResult, ConnectionRole, Credentials,
    Diagnostics, IpVersion, LogEntry, LogFacadeSink, LogSink, MemorySink, NullSink, ProxyDescriptor,
    ProxyKind, ProxyState, SessionLink, Severity, Stage, Target, TimedIo, Timeouts,
    TlsFailureReason, TransportHandle, TransportStream, TrustDecision,
};
pub use ftplink_proxy::{rewrite_target_username, FtpProxyLogin, ProxyChain, ProxyLogin};
pub use ftplink_tls::{
    resolve_policy, BaseSuite, CertificateIssue, CertificateIssueKind, CipherPolicySpec,
    EnginePolicy, PolicyComponent, PolicyOp, PolicyOption, PreparedUpgrade,
    PriorityPolicyBuilder, SecureChannelFactory, SecurityDirective, SecurityProfile,
    SecurityUnavailable, SessionConfig, TrustCallbacks,
};
