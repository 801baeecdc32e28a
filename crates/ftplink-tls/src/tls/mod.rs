//! TLS upgrade of established transports.
//!
//! Architecture:
//!
//! * `priority` — `CipherPolicySpec` and the canonical priority string
//! * `policy` — priority string to `rustls` provider/version/resumption settings
//! * `config` — `SessionConfig` (verbosity, backlog, handshake timeout, overrides)
//! * `trust` — certificate-issue and security-unavailable hooks
//! * `verifier` — WebPKI verification with the certificate hook as fallback
//! * `factory` — `SecureChannelFactory`: prepare, handshake, session linkage

pub mod config;
pub mod factory;
pub mod policy;
pub mod priority;
pub mod trust;
mod verifier;

pub use config::SessionConfig;
pub use factory::{PreparedUpgrade, SecureChannelFactory};
pub use policy::EnginePolicy;
pub use priority::{
    resolve_policy, BaseSuite, CipherPolicySpec, PolicyComponent, PolicyOp, PolicyOption,
    PriorityPolicyBuilder, SecurityDirective, SecurityProfile,
};
pub use trust::{CertificateIssue, CertificateIssueKind, SecurityUnavailable, TrustCallbacks};
