//! SOCKS5 negotiation (RFC 1928) with username/password sub-negotiation
//! (RFC 1929).

use super::chain::Traversal;
use ftplink_core::{ConnectError, ConnectResult, ProxyDescriptor, ProxyState, Stage};
use std::net::{IpAddr, TcpStream};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_GSSAPI: u8 = 0x01;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const AUTH_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub(crate) fn negotiate(
    t: &mut Traversal<'_>,
    stream: &mut TcpStream,
    proxy: &ProxyDescriptor,
    host: &str,
    port: u16,
) -> ConnectResult<()> {
    // Validate the request before the first byte goes out.
    let request = connect_request(host, port)?;

    t.enter(ProxyState::ProxyHandshaking);
    let method = {
        let mut x = t.exchange(stream, Stage::ProxyHandshake);
        x.send(&greeting(proxy), "SOCKS5 greeting")?;
        let mut reply = [0u8; 2];
        x.recv_exact(&mut reply, "SOCKS5 method selection")?;
        if reply[0] != VERSION {
            return Err(ConnectError::proxy_connect(format!(
                "SOCKS5 proxy answered with version {}",
                reply[0]
            )));
        }
        reply[1]
    };

    match method {
        METHOD_NO_AUTH => {}
        METHOD_USER_PASS => {
            let creds = proxy.credentials.as_ref().ok_or_else(|| {
                ConnectError::proxy_auth("SOCKS5 proxy requires username/password authentication")
            })?;
            t.enter(ProxyState::ProxyAuthenticating);
            let mut x = t.exchange(stream, Stage::ProxyAuthentication);
            x.send(&auth_request(&creds.username, &creds.password)?, "SOCKS5 authentication")?;
            let mut reply = [0u8; 2];
            x.recv_exact(&mut reply, "SOCKS5 authentication status")?;
            if reply[0] != AUTH_VERSION {
                return Err(ConnectError::proxy_connect(format!(
                    "SOCKS5 authentication reply has version {}",
                    reply[0]
                )));
            }
            if reply[1] != 0x00 {
                return Err(ConnectError::proxy_auth(format!(
                    "SOCKS5 proxy rejected credentials (status {})",
                    reply[1]
                )));
            }
        }
        METHOD_GSSAPI => {
            return Err(ConnectError::proxy_auth(
                "SOCKS5 proxy selected GSSAPI authentication, which is not supported",
            ))
        }
        METHOD_NONE_ACCEPTABLE => {
            return Err(ConnectError::proxy_auth(
                "SOCKS5 proxy accepted none of the offered authentication methods",
            ))
        }
        other => {
            return Err(ConnectError::proxy_auth(format!(
                "SOCKS5 proxy selected unsupported method {:#04x}",
                other
            )))
        }
    }

    let mut x = t.exchange(stream, Stage::TargetConnect);
    x.send(&request, "SOCKS5 connect request")?;
    let mut head = [0u8; 4];
    x.recv_exact(&mut head, "SOCKS5 connect reply")?;
    if head[0] != VERSION {
        return Err(ConnectError::proxy_connect(format!(
            "SOCKS5 connect reply has version {}",
            head[0]
        )));
    }
    if head[1] != 0x00 {
        return Err(ConnectError::proxy_connect(format!(
            "SOCKS5 proxy could not connect to {}: {}",
            t.diag().endpoint(host, port),
            reply_message(head[1])
        )));
    }

    // Consume BND.ADDR and BND.PORT so the next byte is the target's.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => x.recv_byte("SOCKS5 bound address length")? as usize,
        other => {
            return Err(ConnectError::proxy_connect(format!(
                "SOCKS5 reply has unknown address type {}",
                other
            )))
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    x.recv_exact(&mut bound, "SOCKS5 bound address")?;
    Ok(())
}

fn greeting(proxy: &ProxyDescriptor) -> Vec<u8> {
    if proxy.credentials.is_some() {
        vec![VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        vec![VERSION, 1, METHOD_NO_AUTH]
    }
}

fn auth_request(username: &str, password: &str) -> ConnectResult<Vec<u8>> {
    let (u, p) = (username.as_bytes(), password.as_bytes());
    if u.is_empty() || u.len() > 255 || p.len() > 255 {
        return Err(ConnectError::invalid_config(
            "SOCKS5 username must be 1-255 bytes and password at most 255 bytes",
        ));
    }
    let mut msg = Vec::with_capacity(3 + u.len() + p.len());
    msg.push(AUTH_VERSION);
    msg.push(u.len() as u8);
    msg.extend_from_slice(u);
    msg.push(p.len() as u8);
    msg.extend_from_slice(p);
    Ok(msg)
}

fn connect_request(host: &str, port: u16) -> ConnectResult<Vec<u8>> {
    let mut req = vec![VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            if name.is_empty() || name.len() > 255 {
                return Err(ConnectError::invalid_config(format!(
                    "SOCKS5 destination name must be 1-255 bytes, got {}",
                    name.len()
                )));
            }
            req.push(ATYP_DOMAIN);
            req.push(name.len() as u8);
            req.extend_from_slice(name);
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

fn reply_message(code: u8) -> String {
    let text = match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    };
    format!("{} ({:#04x})", text, code)
}
