//! SOCKS4 and SOCKS4a negotiation.

use super::chain::Traversal;
use super::socket;
use ftplink_core::{ConnectError, ConnectResult, Diagnostics, ProxyDescriptor, ProxyState, Stage};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::time::Duration;

const VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const GRANTED: u8 = 0x5A;

pub(crate) fn negotiate(
    t: &mut Traversal<'_>,
    stream: &mut TcpStream,
    proxy: &ProxyDescriptor,
    host: &str,
    port: u16,
    remote_dns: bool,
) -> ConnectResult<()> {
    let user_id = proxy
        .credentials
        .as_ref()
        .map(|c| c.username.as_str())
        .unwrap_or("");
    let request = if remote_dns {
        request_4a(host, port, user_id)?
    } else {
        request_4(resolve_v4(host, port, t.negotiation_timeout(), t.diag())?, port, user_id)
    };

    t.enter(ProxyState::ProxyHandshaking);
    let mut x = t.exchange(stream, Stage::TargetConnect);
    x.send(&request, "SOCKS4 connect request")?;
    let mut reply = [0u8; 8];
    x.recv_exact(&mut reply, "SOCKS4 reply")?;

    match reply[1] {
        GRANTED => Ok(()),
        0x5B => Err(ConnectError::proxy_connect(format!(
            "SOCKS4 proxy rejected the request to {}",
            t.diag().endpoint(host, port)
        ))),
        0x5C => Err(ConnectError::proxy_auth(
            "SOCKS4 proxy could not reach identd on the client",
        )),
        0x5D => Err(ConnectError::proxy_auth(
            "SOCKS4 proxy and identd report different user ids",
        )),
        other => Err(ConnectError::proxy_connect(format!(
            "SOCKS4 proxy answered with unknown code {:#04x}",
            other
        ))),
    }
}

/// SOCKS4 carries only IPv4 destinations, so names are resolved locally
/// within the negotiation timeout.
fn resolve_v4(host: &str, port: u16, timeout: Duration, diag: &Diagnostics) -> ConnectResult<Ipv4Addr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(_) => Err(ConnectError::invalid_config(
                "SOCKS4 cannot reach IPv6 destinations; use SOCKS4a or SOCKS5",
            )),
        };
    }
    socket::resolve(host, port, timeout, Stage::TargetConnect, diag)?
        .into_iter()
        .find_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ConnectError::proxy_connect("SOCKS4 destination has no IPv4 address"))
}

fn request_4(ip: Ipv4Addr, port: u16, user_id: &str) -> Vec<u8> {
    let mut req = vec![VERSION, CMD_CONNECT];
    req.extend_from_slice(&port.to_be_bytes());
    req.extend_from_slice(&ip.octets());
    req.extend_from_slice(user_id.as_bytes());
    req.push(0x00);
    req
}

fn request_4a(host: &str, port: u16, user_id: &str) -> ConnectResult<Vec<u8>> {
    if let Ok(IpAddr::V4(ip)) = host.parse::<IpAddr>() {
        return Ok(request_4(ip, port, user_id));
    }
    if host.is_empty() || host.contains('\0') {
        return Err(ConnectError::invalid_config("SOCKS4a destination name is invalid"));
    }
    // 0.0.0.x with x != 0 tells the proxy to resolve the trailing name.
    let mut req = request_4(Ipv4Addr::new(0, 0, 0, 1), port, user_id);
    req.extend_from_slice(host.as_bytes());
    req.push(0x00);
    Ok(req)
}
