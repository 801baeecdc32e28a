//! **ftplink-core** — shared building blocks for FTP connection setup.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`error`] | `ConnectError` taxonomy and io-error classification |
//! | [`logging`] | Log-entry boundary, sinks, verbosity and failure backlog |
//! | [`types`] | Proxy descriptors, targets, roles, timeouts, traversal states |
//! | [`exchange`] | Deadline-bounded request/reply I/O shared by proxies and upgrade commands |
//! | [`stream`] | `TransportStream`, `TransportHandle` and control-session links |

pub mod error;
pub mod exchange;
pub mod logging;
pub mod stream;
pub mod types;

pub use error::{ConnectError, ConnectErrorKind, ConnectResult, Stage, TlsFailureReason};
pub use exchange::{Exchange, Reply, TimedIo};
pub use logging::{
    Diagnostics, LogEntry, LogFacadeSink, LogSink, MemorySink, NullSink, Severity,
    DETAIL_CONNECTION, DETAIL_ENGINE,
};
pub use stream::{SessionLink, SessionState, TlsStream, TransportHandle, TransportStream};
pub use types::{
    format_endpoint, ConnectionRole, Credentials, IpVersion, ProxyDescriptor, ProxyKind,
    ProxyState, Target, Timeouts, TrustDecision,
};
