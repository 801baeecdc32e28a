//! Transport streams and the handle that owns them.
//!
//! A [`TransportHandle`] exclusively owns one socket, either raw or wrapped
//! in a TLS client connection. Control handles additionally own the
//! session state that data connections resume from; data handles hold only
//! a weak [`SessionLink`] to it.

use crate::error::{ConnectError, ConnectResult};
use crate::exchange::TimedIo;
use crate::logging::{Diagnostics, DETAIL_CONNECTION};
use crate::types::{format_endpoint, ConnectionRole, Credentials, ProxyState};
use rustls::client::ClientSessionStore;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Upper bound on flushing close_notify to a peer that stopped reading.
pub const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

// ─── TransportStream ─────────────────────────────────────────────────

/// Readable/writable byte channel, encrypted or not.
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl TransportStream {
    pub fn socket(&self) -> &TcpStream {
        match self {
            TransportStream::Plain(s) => s,
            TransportStream::Tls(s) => &s.sock,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, TransportStream::Tls(_))
    }

    pub fn tls(&self) -> Option<&ClientConnection> {
        match self {
            TransportStream::Tls(s) => Some(&s.conn),
            TransportStream::Plain(_) => None,
        }
    }

    /// Close the TLS layer (if any) and then the socket. Errors are
    /// swallowed: the peer may already be gone.
    fn close(self) {
        let sock = match self {
            TransportStream::Plain(sock) => sock,
            TransportStream::Tls(tls) => {
                let StreamOwned { mut conn, mut sock } = *tls;
                let _ = sock.set_write_timeout(Some(CLOSE_NOTIFY_TIMEOUT));
                conn.send_close_notify();
                while conn.wants_write() {
                    if conn.write_tls(&mut sock).is_err() {
                        break;
                    }
                }
                sock
            }
        };
        let _ = sock.shutdown(Shutdown::Both);
    }
}

impl Read for TransportStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TransportStream::Plain(s) => s.read(buf),
            TransportStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for TransportStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TransportStream::Plain(s) => s.write(buf),
            TransportStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TransportStream::Plain(s) => s.flush(),
            TransportStream::Tls(s) => s.flush(),
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStream::Plain(_) => f.write_str("TransportStream::Plain"),
            TransportStream::Tls(_) => f.write_str("TransportStream::Tls"),
        }
    }
}

// ─── Session linkage ─────────────────────────────────────────────────

/// TLS session parameters of an established control connection.
///
/// The engine only resumes a cached session under the exact certificate
/// verifier and client-certificate resolver instances that created it, so
/// the control connection's `ClientConfig` is kept here for data
/// connections to derive theirs from.
#[derive(Debug)]
pub struct SessionState {
    server_name: String,
    store: Arc<dyn ClientSessionStore>,
    config: Arc<ClientConfig>,
    resumable: bool,
}

impl SessionState {
    pub fn new(
        server_name: impl Into<String>,
        store: Arc<dyn ClientSessionStore>,
        config: Arc<ClientConfig>,
        resumable: bool,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            store,
            config,
            resumable,
        }
    }

    /// Name the control connection was verified against. Data connections
    /// reuse it so the cached session is found.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn store(&self) -> Arc<dyn ClientSessionStore> {
        self.store.clone()
    }

    /// Client configuration the control handshake ran with.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    /// False when the cipher policy disabled session caching.
    pub fn is_resumable(&self) -> bool {
        self.resumable
    }
}

/// Weak, lookup-only reference from a data connection to its control
/// connection's TLS session.
///
/// The control handle must outlive every data handle linked to it.
/// Releasing the control handle first is a programming error; the next
/// upgrade through a dangling link fails with
/// `TlsHandshakeFailure(ResumptionUnavailable)`.
#[derive(Debug, Clone)]
pub struct SessionLink(Weak<SessionState>);

impl SessionLink {
    pub fn upgrade(&self) -> Option<Arc<SessionState>> {
        self.0.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

// ─── TransportHandle ─────────────────────────────────────────────────

/// An established (or released) connection ready for the application
/// protocol.
pub struct TransportHandle {
    id: String,
    role: ConnectionRole,
    host: String,
    port: u16,
    stream: Option<TransportStream>,
    session: Option<Arc<SessionState>>,
    linked_control: Option<SessionLink>,
    target_credentials: Option<Credentials>,
    proxy_banner: Option<String>,
    greeting: Option<String>,
    trail: Vec<ProxyState>,
    resumed: bool,
    released: bool,
    diagnostics: Diagnostics,
}

impl TransportHandle {
    /// Wrap a connected socket. `host`/`port` name the logical target, not
    /// the proxy the socket may actually be connected to.
    pub fn new(
        role: ConnectionRole,
        host: impl Into<String>,
        port: u16,
        socket: TcpStream,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            host: host.into(),
            port,
            stream: Some(TransportStream::Plain(socket)),
            session: None,
            linked_control: None,
            target_credentials: None,
            proxy_banner: None,
            greeting: None,
            trail: Vec::new(),
            resumed: false,
            released: false,
            diagnostics,
        }
    }

    // ── Identity ─────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> String {
        format_endpoint(&self.host, self.port)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // ── Capabilities ─────────────────────────────────────────────

    pub fn can_read(&self) -> bool {
        !self.released && self.stream.is_some()
    }

    pub fn can_write(&self) -> bool {
        !self.released && self.stream.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.stream.as_ref().map_or(false, TransportStream::is_encrypted)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Negotiated protocol version, e.g. `TLSv1_3`.
    pub fn protocol_version(&self) -> Option<String> {
        self.tls()
            .and_then(|c| c.protocol_version())
            .map(|v| format!("{:?}", v))
    }

    /// Negotiated cipher suite, e.g. `TLS13_AES_256_GCM_SHA384`.
    pub fn cipher_suite(&self) -> Option<String> {
        self.tls()
            .and_then(|c| c.negotiated_cipher_suite())
            .map(|s| format!("{:?}", s.suite()))
    }

    pub fn alpn_protocol(&self) -> Option<String> {
        self.tls()
            .and_then(|c| c.alpn_protocol())
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }

    /// True when the TLS handshake resumed a cached session.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    fn tls(&self) -> Option<&ClientConnection> {
        self.stream.as_ref().and_then(TransportStream::tls)
    }

    // ── Negotiation results ──────────────────────────────────────

    /// Credentials the application protocol should log in with. For
    /// `USER@host` proxies this is the rewritten username.
    pub fn target_credentials(&self) -> Option<&Credentials> {
        self.target_credentials.as_ref()
    }

    pub fn set_target_credentials(&mut self, credentials: Option<Credentials>) {
        self.target_credentials = credentials;
    }

    /// Greeting consumed from a `USER@host` proxy during its login.
    pub fn proxy_banner(&self) -> Option<&str> {
        self.proxy_banner.as_deref()
    }

    pub fn set_proxy_banner(&mut self, banner: Option<String>) {
        self.proxy_banner = banner;
    }

    /// Target greeting read while the connection was being secured, so the
    /// application protocol must not wait for it again.
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    pub fn set_greeting(&mut self, greeting: Option<String>) {
        self.greeting = greeting;
    }

    /// States the proxy traversal passed through.
    pub fn state_trail(&self) -> &[ProxyState] {
        &self.trail
    }

    pub fn set_state_trail(&mut self, trail: Vec<ProxyState>) {
        self.trail = trail;
    }

    // ── Session linkage ──────────────────────────────────────────

    /// Link data connections can resume from. Only control handles that
    /// completed a TLS handshake have one.
    ///
    /// With TLS 1.3 the server delivers resumption tickets after the
    /// handshake, so read at least the server greeting on the control
    /// connection before opening linked data connections.
    pub fn session_link(&self) -> Option<SessionLink> {
        match (self.role, &self.session) {
            (ConnectionRole::Control, Some(session)) => Some(SessionLink(Arc::downgrade(session))),
            _ => None,
        }
    }

    pub fn linked_control(&self) -> Option<&SessionLink> {
        self.linked_control.as_ref()
    }

    // ── TLS installation ─────────────────────────────────────────

    /// Hand the raw socket to a TLS engine.
    ///
    /// Fails if the handle is released or already encrypted; in the latter
    /// case the stream stays in place.
    pub fn take_plain_socket(&mut self) -> ConnectResult<TcpStream> {
        if self.released {
            return Err(ConnectError::invalid_config("transport handle already released"));
        }
        match self.stream.take() {
            Some(TransportStream::Plain(sock)) => Ok(sock),
            Some(tls) => {
                self.stream = Some(tls);
                Err(ConnectError::invalid_config("transport is already encrypted"))
            }
            None => Err(ConnectError::invalid_config("transport has no socket")),
        }
    }

    /// Install an established TLS stream.
    pub fn attach_tls(
        &mut self,
        stream: TlsStream,
        session: Option<Arc<SessionState>>,
        linked_control: Option<SessionLink>,
        resumed: bool,
    ) {
        self.stream = Some(TransportStream::Tls(Box::new(stream)));
        self.session = session;
        self.linked_control = linked_control;
        self.resumed = resumed;
    }

    // ── Disposal ─────────────────────────────────────────────────

    /// Close the stream, then the socket. Safe to call any number of times;
    /// only the first call does anything.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        self.session = None;
        self.diagnostics.verbose(
            DETAIL_CONNECTION,
            format!("Released {} connection {}", self.role, self.id),
        );
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport handle released")
}

impl Read for TransportHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(s) => s.read(buf),
            None => Err(not_connected()),
        }
    }
}

impl Write for TransportHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(s) => s.write(buf),
            None => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(s) => s.flush(),
            None => Err(not_connected()),
        }
    }
}

impl TimedIo for TransportHandle {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self.stream.as_ref() {
            Some(s) => s.socket().set_io_timeout(timeout),
            None => Err(not_connected()),
        }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("encrypted", &self.is_encrypted())
            .field("resumed", &self.resumed)
            .field("released", &self.released)
            .finish()
    }
}
