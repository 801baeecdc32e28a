//! HTTP/1.1 `CONNECT` tunneling.

use super::chain::Traversal;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ftplink_core::{format_endpoint, ConnectError, ConnectResult, Credentials, ProxyDescriptor, ProxyState, Stage};
use std::net::TcpStream;

const USER_AGENT: &str = concat!("ftplink/", env!("CARGO_PKG_VERSION"));
/// Upper bound on the proxy's response head.
const MAX_HEAD: usize = 8 * 1024;

pub(crate) fn negotiate(
    t: &mut Traversal<'_>,
    stream: &mut TcpStream,
    proxy: &ProxyDescriptor,
    host: &str,
    port: u16,
) -> ConnectResult<()> {
    t.enter(ProxyState::ProxyHandshaking);
    let mut x = t.exchange(stream, Stage::TargetConnect);
    x.send(
        request(host, port, proxy.credentials.as_ref()).as_bytes(),
        "HTTP CONNECT request",
    )?;

    // Read line by line up to the blank line so nothing the target sends
    // after the response head is consumed here.
    let status_line = x.recv_line("HTTP CONNECT status line")?;
    let mut head_len = status_line.len();
    loop {
        let line = x.recv_line("HTTP CONNECT response header")?;
        if line.is_empty() {
            break;
        }
        head_len += line.len();
        if head_len > MAX_HEAD {
            return Err(ConnectError::proxy_connect(format!(
                "HTTP proxy response head exceeds {} bytes",
                MAX_HEAD
            )));
        }
    }

    let (code, reason) = parse_status_line(&status_line)?;
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(ConnectError::proxy_connect(format!(
            "HTTP proxy refused CONNECT to {}: {} {}",
            t.diag().endpoint(host, port),
            code,
            reason
        )))
    }
}

fn request(host: &str, port: u16, credentials: Option<&Credentials>) -> String {
    let authority = format_endpoint(host, port);
    let mut req = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", authority);
    if let Some(c) = credentials {
        let token = STANDARD.encode(format!("{}:{}", c.username, c.password));
        req.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    req.push_str(&format!("User-Agent: {}\r\n\r\n", USER_AGENT));
    req
}

/// `HTTP/1.x <code> <reason>`.
fn parse_status_line(line: &str) -> ConnectResult<(u16, String)> {
    let malformed = || ConnectError::proxy_connect(format!("HTTP proxy sent malformed status line '{}'", line));
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    if !version.starts_with("HTTP/") {
        return Err(malformed());
    }
    let code = parts
        .next()
        .filter(|c| c.len() == 3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(malformed)?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Ok((code, reason))
}
