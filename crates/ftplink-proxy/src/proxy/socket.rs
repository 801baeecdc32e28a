//! Blocking socket connect with address-family filtering.

use ftplink_core::{format_endpoint, ConnectError, ConnectResult, Diagnostics, IpVersion, Stage, DETAIL_CONNECTION};
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Resolve `host` within `timeout`.
///
/// Address literals are returned as is. Names are looked up on a helper
/// thread because the system resolver cannot be given a deadline; a lookup
/// that outlives `timeout` is abandoned and finishes in the background.
pub fn resolve(
    host: &str,
    port: u16,
    timeout: Duration,
    stage: Stage,
    diag: &Diagnostics,
) -> ConnectResult<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let name = host.to_string();
    resolve_with(&diag.endpoint(host, port), timeout, stage, move || {
        (name.as_str(), port).to_socket_addrs().map(Iterator::collect)
    })
}

pub(crate) fn resolve_with<F>(
    shown: &str,
    timeout: Duration,
    stage: Stage,
    lookup: F,
) -> ConnectResult<Vec<SocketAddr>>
where
    F: FnOnce() -> io::Result<Vec<SocketAddr>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("ftplink-resolve".into())
        .spawn(move || {
            let _ = tx.send(lookup());
        })
        .map_err(|e| ConnectError::proxy_connect(format!("Could not start resolver for {}: {}", shown, e)))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(addrs)) => Ok(addrs),
        Ok(Err(e)) => Err(ConnectError::proxy_connect(format!("Could not resolve {}: {}", shown, e))),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ConnectError::timeout(
            stage,
            format!("resolving {} took longer than {} ms", shown, timeout.as_millis()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ConnectError::proxy_connect(format!(
            "resolver for {} exited without an answer",
            shown
        ))),
    }
}

/// Resolve `host` and try each address that passes `ip_version` in turn.
///
/// `timeout` bounds the whole step, resolution included. Only the last
/// address's failure is reported; earlier ones are logged.
pub fn connect_socket(
    host: &str,
    port: u16,
    ip_version: IpVersion,
    timeout: Duration,
    diag: &Diagnostics,
) -> ConnectResult<TcpStream> {
    let deadline = Instant::now() + timeout;
    let shown = diag.endpoint(host, port);
    let addrs: Vec<SocketAddr> = resolve(host, port, timeout, Stage::SocketConnect, diag)?
        .into_iter()
        .filter(|a| ip_version.allows(&a.ip()))
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::proxy_connect(format!(
            "{} has no {:?} address",
            shown, ip_version
        )));
    }

    let last = addrs.len() - 1;
    for (i, addr) in addrs.iter().enumerate() {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                ConnectError::timeout(
                    Stage::SocketConnect,
                    format!("TCP connect to {} did not finish within {} ms", shown, timeout.as_millis()),
                )
            })?;
        let shown_addr = diag.endpoint(&addr.ip().to_string(), addr.port());
        diag.verbose(DETAIL_CONNECTION, format!("Connecting to {}", shown_addr));
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) if i < last => {
                diag.verbose(
                    DETAIL_CONNECTION,
                    format!("Connect to {} failed: {}; trying next address", shown_addr, e),
                );
            }
            Err(e) => {
                return Err(ConnectError::from_io(
                    Stage::SocketConnect,
                    &format!("TCP connect to {}", shown),
                    &e,
                ));
            }
        }
    }
    // `addrs` is non-empty, so the loop always returns.
    Err(ConnectError::proxy_connect(format!(
        "no address tried for {}",
        format_endpoint(host, port)
    )))
}
