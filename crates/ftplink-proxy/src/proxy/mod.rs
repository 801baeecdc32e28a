//! # ftplink-proxy — proxy traversal
//!
//! Architecture:
//! - `socket` — deadline-bounded name resolution, address-family filter and connect
//! - `chain` — the traversal state machine over an ordered list of hops
//! - `socks5` — RFC 1928 / RFC 1929
//! - `socks4` — SOCKS4 and SOCKS4a
//! - `http_connect` — HTTP/1.1 `CONNECT` with Basic proxy authentication
//! - `user_at_host` — FTP proxies addressed through `USER user@host`

pub mod chain;
pub mod http_connect;
pub mod socket;
pub mod socks4;
pub mod socks5;
pub mod user_at_host;

pub use chain::{ProxyChain, Traversal};
pub use socket::{connect_socket, resolve};
pub use user_at_host::{rewrite_target_username, FtpProxyLogin, ProxyLogin};
