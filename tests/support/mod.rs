//! Fake peers for integration tests: SOCKS4/5, HTTP CONNECT and FTP
//! proxies, plain FTP greeters and an in-process `rustls` server with
//! `rcgen` certificates.

#![allow(dead_code)]

use ftplink::{IpVersion, MemorySink, SessionConfig};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const BANNER: &str = "220 secure channel ready\r\n";

// ─── Listeners ───────────────────────────────────────────────────────

/// Accept one connection and hand it to `handler` on a background thread.
pub fn serve_once<T, F>(handler: F) -> (u16, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(TcpStream) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let join = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        handler(stream)
    });
    (port, join)
}

/// Accept `count` connections, each handled on its own thread so a control
/// connection can stay open while its data connection is served.
pub fn serve_many<F>(count: usize, handler: F) -> (u16, JoinHandle<()>)
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);
    let join = thread::spawn(move || {
        let mut workers = Vec::new();
        for _ in 0..count {
            let (stream, _) = match listener.accept() {
                Ok(s) => s,
                Err(_) => break,
            };
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let h = handler.clone();
            workers.push(thread::spawn(move || h(stream)));
        }
        for w in workers {
            let _ = w.join();
        }
    });
    (port, join)
}

/// Port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Read until the peer closes; returns how many bytes arrived.
pub fn drain(stream: &mut impl Read) -> usize {
    let mut total = 0;
    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return total,
            Ok(n) => total += n,
        }
    }
}

pub fn memory_sink() -> Arc<MemorySink> {
    Arc::new(MemorySink::new())
}

// ─── Proxies ─────────────────────────────────────────────────────────

/// Server side of a SOCKS5 negotiation. Returns the requested destination
/// as `host:port`, or `None` if authentication failed.
pub fn socks5_accept(
    stream: &mut TcpStream,
    credentials: Option<(&str, &str)>,
    reply: u8,
) -> Option<String> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(head[0], 5);
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).unwrap();

    match credentials {
        Some((user, pass)) => {
            assert!(methods.contains(&2), "client did not offer username/password");
            stream.write_all(&[5, 2]).unwrap();
            let mut ver_len = [0u8; 2];
            stream.read_exact(&mut ver_len).unwrap();
            let mut u = vec![0u8; ver_len[1] as usize];
            stream.read_exact(&mut u).unwrap();
            let mut plen = [0u8; 1];
            stream.read_exact(&mut plen).unwrap();
            let mut p = vec![0u8; plen[0] as usize];
            stream.read_exact(&mut p).unwrap();
            if u != user.as_bytes() || p != pass.as_bytes() {
                stream.write_all(&[1, 1]).unwrap();
                return None;
            }
            stream.write_all(&[1, 0]).unwrap();
        }
        None => stream.write_all(&[5, 0]).unwrap(),
    }

    let mut req = [0u8; 4];
    stream.read_exact(&mut req).unwrap();
    assert_eq!(&req[..3], &[5, 1, 0]);
    let host = match req[3] {
        1 => {
            let mut a = [0u8; 4];
            stream.read_exact(&mut a).unwrap();
            std::net::Ipv4Addr::from(a).to_string()
        }
        3 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).unwrap();
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).unwrap();
            String::from_utf8(name).unwrap()
        }
        4 => {
            let mut a = [0u8; 16];
            stream.read_exact(&mut a).unwrap();
            std::net::Ipv6Addr::from(a).to_string()
        }
        other => panic!("unexpected ATYP {}", other),
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).unwrap();
    // Domain-typed bound address exercises the variable-length branch.
    stream
        .write_all(&[5, reply, 0, 3, 4, b'b', b'n', b'd', b'x', 0x04, 0x38])
        .unwrap();
    Some(format!("{}:{}", host, u16::from_be_bytes(port)))
}

/// Server side of SOCKS4/4a. Returns (port, ip, user id, name).
pub fn socks4_accept(stream: &mut TcpStream, reply: u8) -> (u16, [u8; 4], String, Option<String>) {
    let mut head = [0u8; 8];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(&head[..2], &[4, 1]);
    let port = u16::from_be_bytes([head[2], head[3]]);
    let ip = [head[4], head[5], head[6], head[7]];
    let user = read_cstr(stream);
    let name = if ip[..3] == [0, 0, 0] && ip[3] != 0 {
        Some(read_cstr(stream))
    } else {
        None
    };
    stream.write_all(&[0, reply, 0, 0, 0, 0, 0, 0]).unwrap();
    (port, ip, user, name)
}

fn read_cstr(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut b = [0u8; 1];
    loop {
        stream.read_exact(&mut b).unwrap();
        if b[0] == 0 {
            return String::from_utf8(out).unwrap();
        }
        out.push(b[0]);
    }
}

/// Server side of HTTP CONNECT. Returns the request head.
pub fn http_accept(stream: &mut TcpStream, status_line: &str) -> String {
    let mut head = Vec::new();
    let mut b = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut b).unwrap();
        head.push(b[0]);
    }
    stream
        .write_all(format!("{}\r\nProxy-Agent: fake\r\n\r\n", status_line).as_bytes())
        .unwrap();
    String::from_utf8(head).unwrap()
}

/// FTP proxy that greets and checks `USER`/`PASS`. Returns the lines it
/// received.
pub fn ftp_proxy_accept(stream: &mut TcpStream, user: &str, pass: &str) -> Vec<String> {
    let mut w = stream.try_clone().unwrap();
    let mut r = BufReader::new(stream.try_clone().unwrap());
    w.write_all(b"220 FTP proxy ready\r\n").unwrap();
    let mut seen = Vec::new();

    let mut line = String::new();
    r.read_line(&mut line).unwrap();
    seen.push(line.trim_end().to_string());
    if line.trim_end() != format!("USER {}", user) {
        w.write_all(b"530 unknown user\r\n").unwrap();
        return seen;
    }
    w.write_all(b"331 password required\r\n").unwrap();

    line.clear();
    r.read_line(&mut line).unwrap();
    seen.push(line.trim_end().to_string());
    if line.trim_end() == format!("PASS {}", pass) {
        w.write_all(b"230 proxy login ok\r\n").unwrap();
    } else {
        w.write_all(b"530 login incorrect\r\n").unwrap();
    }
    seen
}

/// Plain FTP server front: greeting, then answers `AUTH TLS` with `reply`.
/// Returns true when the command arrived.
pub fn auth_tls_accept(stream: &mut TcpStream, reply: &str) -> bool {
    stream.write_all(b"220 ready\r\n").unwrap();
    let mut r = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    if r.read_line(&mut line).is_err() {
        return false;
    }
    let got = line.trim_end() == "AUTH TLS";
    stream.write_all(format!("{}\r\n", reply).as_bytes()).unwrap();
    got
}

// ─── TLS server ──────────────────────────────────────────────────────

/// Certificates and a `rustls` server configuration for "localhost".
pub struct TlsFixture {
    /// PEM the client has to trust; empty for self-signed fixtures.
    pub ca_pem: String,
    pub config: Arc<ServerConfig>,
}

fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: &KeyPair,
    versions: &[&'static rustls::SupportedProtocolVersion],
) -> Arc<ServerConfig> {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(versions)
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(chain, key)
    .unwrap();
    config.alpn_protocols = vec![b"ftp".to_vec(), b"ftp-data".to_vec()];
    Arc::new(config)
}

impl TlsFixture {
    /// CA-signed leaf for `localhost`.
    pub fn new() -> Self {
        Self::issued_for("localhost", None, rustls::ALL_VERSIONS)
    }

    /// CA-signed leaf for `name`, optionally with a fixed validity window.
    pub fn issued_for(
        name: &str,
        validity: Option<((i32, u8, u8), (i32, u8, u8))>,
        versions: &[&'static rustls::SupportedProtocolVersion],
    ) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "ftplink test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![name.to_string()]).unwrap();
        leaf_params.distinguished_name.push(DnType::CommonName, name);
        if let Some(((y1, m1, d1), (y2, m2, d2))) = validity {
            leaf_params.not_before = rcgen::date_time_ymd(y1, m1, d1);
            leaf_params.not_after = rcgen::date_time_ymd(y2, m2, d2);
        }
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            config: server_config(vec![leaf.der().clone()], &leaf_key, versions),
        }
    }

    /// Self-signed certificate for `localhost`; nothing to trust.
    pub fn self_signed() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, "localhost");
        let cert = params.self_signed(&key).unwrap();
        Self {
            ca_pem: String::new(),
            config: server_config(vec![cert.der().clone()], &key, rustls::ALL_VERSIONS),
        }
    }

    /// Session config trusting only this fixture's CA.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            use_platform_roots: false,
            extra_trust_anchors_pem: if self.ca_pem.is_empty() {
                Vec::new()
            } else {
                vec![self.ca_pem.clone()]
            },
            ip_version: IpVersion::V4,
            log_verbosity: 3,
            ..SessionConfig::default()
        }
    }

    /// Run the server side of one TLS connection: send [`BANNER`] (which
    /// completes the handshake), then read until the client goes away.
    pub fn serve(&self, sock: TcpStream) {
        serve_tls(self.config.clone(), sock)
    }
}

pub fn serve_tls(config: Arc<ServerConfig>, sock: TcpStream) {
    let conn = match ServerConnection::new(config) {
        Ok(c) => c,
        Err(_) => return,
    };
    let mut tls = StreamOwned::new(conn, sock);
    if tls.write_all(BANNER.as_bytes()).is_err() {
        return;
    }
    let _ = tls.flush();
    drain(&mut tls);
}

/// Read exactly the banner from a client handle.
pub fn read_banner(stream: &mut impl Read) -> String {
    let mut buf = vec![0u8; BANNER.len()];
    stream.read_exact(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}
