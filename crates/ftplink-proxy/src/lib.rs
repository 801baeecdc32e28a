//! **ftplink-proxy** — turns a proxy chain and a logical target into a
//! connected socket whose next bytes belong to the target.

pub mod proxy;

pub use proxy::*;
