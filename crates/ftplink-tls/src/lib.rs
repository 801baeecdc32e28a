//! **ftplink-tls** — secures an established transport: cipher policy
//! strings, their translation to `rustls`, certificate trust decisions and
//! session-linked data connections.

pub mod tls;

pub use tls::*;
