//! Proxy traversal state machine.
//!
//! `Unconnected → SocketConnecting → ProxyHandshaking → ProxyAuthenticating
//! → TargetEstablished → Ready`, with `Failed(kind)` reachable from every
//! non-terminal state. Each state gets its own deadline.

use super::user_at_host::{FtpProxyLogin, ProxyLogin};
use super::{http_connect, socket, socks4, socks5, user_at_host};
use ftplink_core::{
    ConnectError, ConnectResult, ConnectionRole, Diagnostics, Exchange, IpVersion,
    ProxyDescriptor, ProxyKind, ProxyState, Stage, Target, TimedIo, Timeouts, TransportHandle,
    DETAIL_CONNECTION,
};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

// ─── Traversal bookkeeping ───────────────────────────────────────────

/// State trail and per-state deadlines of one traversal.
pub struct Traversal<'d> {
    diag: &'d Diagnostics,
    timeouts: Timeouts,
    trail: Vec<ProxyState>,
}

impl<'d> Traversal<'d> {
    pub(crate) fn new(diag: &'d Diagnostics, timeouts: Timeouts) -> Self {
        Self {
            diag,
            timeouts,
            trail: vec![ProxyState::Unconnected],
        }
    }

    pub fn diag(&self) -> &Diagnostics {
        self.diag
    }

    pub fn state(&self) -> ProxyState {
        self.trail.last().copied().unwrap_or(ProxyState::Unconnected)
    }

    pub(crate) fn enter(&mut self, state: ProxyState) {
        self.diag
            .verbose(DETAIL_CONNECTION, format!("Proxy state {} -> {}", self.state(), state));
        self.trail.push(state);
    }

    pub(crate) fn negotiation_timeout(&self) -> Duration {
        self.timeouts.negotiation()
    }

    /// Start a new deadline for one negotiation state.
    pub(crate) fn exchange<'s>(&self, stream: &'s mut TcpStream, stage: Stage) -> Exchange<'s, TcpStream> {
        Exchange::new(stream, stage, self.timeouts.negotiation())
    }

    fn fail(&mut self, err: ConnectError) -> ConnectError {
        self.trail.push(ProxyState::Failed(err.kind));
        let path = self
            .trail
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        self.diag
            .verbose(DETAIL_CONNECTION, format!("Proxy traversal: {}", path));
        err
    }
}

// ─── ProxyChain ──────────────────────────────────────────────────────

/// Ordered proxy hops between the client and the logical target.
///
/// `Direct` hops are skipped. Every tunneling hop opens a tunnel to the
/// next hop (the last one to the target). `UserAtHost` forwards bytes
/// transparently, so it may only be the final hop.
#[derive(Clone)]
pub struct ProxyChain {
    hops: Vec<ProxyDescriptor>,
    timeouts: Timeouts,
    ip_version: IpVersion,
    login: Arc<dyn ProxyLogin>,
}

impl Default for ProxyChain {
    fn default() -> Self {
        Self::direct()
    }
}

impl ProxyChain {
    pub fn new(hops: Vec<ProxyDescriptor>) -> Self {
        Self {
            hops,
            timeouts: Timeouts::default(),
            ip_version: IpVersion::Any,
            login: Arc::new(FtpProxyLogin),
        }
    }

    pub fn direct() -> Self {
        Self::new(Vec::new())
    }

    pub fn single(descriptor: ProxyDescriptor) -> Self {
        Self::new(vec![descriptor])
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = ip_version;
        self
    }

    /// Replace the login dialogue used for `UserAtHost` proxies.
    pub fn with_login(mut self, login: Arc<dyn ProxyLogin>) -> Self {
        self.login = login;
        self
    }

    /// Hops that actually do something.
    pub fn hops(&self) -> impl Iterator<Item = &ProxyDescriptor> {
        self.hops.iter().filter(|h| !h.is_direct())
    }

    pub fn is_direct(&self) -> bool {
        self.hops().next().is_none()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn validate(&self) -> ConnectResult<()> {
        self.timeouts.validate()?;
        let hops: Vec<&ProxyDescriptor> = self.hops().collect();
        for (i, hop) in hops.iter().enumerate() {
            hop.validate()?;
            if hop.kind == ProxyKind::UserAtHost && i + 1 != hops.len() {
                return Err(ConnectError::invalid_config(
                    "USER@host proxy must be the last hop of a chain",
                ));
            }
        }
        Ok(())
    }

    /// Connect to `target` through every hop.
    ///
    /// On success the returned handle's socket carries bytes straight to
    /// and from the target. On failure the socket is closed and the error
    /// has been reported to `diag`.
    pub fn establish(
        &self,
        target: &Target,
        role: ConnectionRole,
        diag: &Diagnostics,
    ) -> ConnectResult<TransportHandle> {
        let result = self
            .validate()
            .and_then(|_| target.validate())
            .and_then(|_| self.traverse(target, role, diag));
        if let Err(e) = &result {
            diag.error(e);
        }
        result
    }

    fn traverse(
        &self,
        target: &Target,
        role: ConnectionRole,
        diag: &Diagnostics,
    ) -> ConnectResult<TransportHandle> {
        let hops: Vec<&ProxyDescriptor> = self.hops().collect();
        let mut t = Traversal::new(diag, self.timeouts);

        let (first_host, first_port) = match hops.first() {
            Some(hop) => (hop.host.as_str(), hop.port),
            None => (target.host.as_str(), target.port),
        };

        t.enter(ProxyState::SocketConnecting);
        let mut stream = socket::connect_socket(
            first_host,
            first_port,
            self.ip_version,
            self.timeouts.connect(),
            diag,
        )
        .map_err(|e| t.fail(e))?;

        let mut credentials = target.credentials.clone();
        let mut banner = None;

        for (i, hop) in hops.iter().enumerate() {
            let (next_host, next_port) = match hops.get(i + 1) {
                Some(next) => (next.host.as_str(), next.port),
                None => (target.host.as_str(), target.port),
            };
            diag.verbose(
                DETAIL_CONNECTION,
                format!(
                    "{} hop {} -> {}",
                    hop.kind,
                    diag.endpoint(&hop.host, hop.port),
                    diag.endpoint(next_host, next_port)
                ),
            );

            let step = match hop.kind {
                ProxyKind::Direct => Ok(()),
                ProxyKind::Socks5 => socks5::negotiate(&mut t, &mut stream, hop, next_host, next_port),
                ProxyKind::Socks4 => {
                    socks4::negotiate(&mut t, &mut stream, hop, next_host, next_port, false)
                }
                ProxyKind::Socks4a => {
                    socks4::negotiate(&mut t, &mut stream, hop, next_host, next_port, true)
                }
                ProxyKind::HttpConnect => {
                    http_connect::negotiate(&mut t, &mut stream, hop, next_host, next_port)
                }
                ProxyKind::UserAtHost => {
                    user_at_host::negotiate(&mut t, &mut stream, hop, target, self.login.as_ref())
                        .map(|outcome| {
                            credentials = outcome.credentials;
                            banner = outcome.banner;
                        })
                }
            };
            if let Err(e) = step {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(t.fail(e));
            }
        }

        t.enter(ProxyState::TargetEstablished);
        if let Err(e) = stream.set_io_timeout(None) {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(t.fail(ConnectError::from_io(Stage::TargetConnect, "clearing socket timeouts", &e)));
        }
        t.enter(ProxyState::Ready);

        diag.verbose(
            DETAIL_CONNECTION,
            format!(
                "Connected to {} ({} proxy hop{})",
                diag.endpoint(&target.host, target.port),
                hops.len(),
                if hops.len() == 1 { "" } else { "s" }
            ),
        );

        let mut handle = TransportHandle::new(role, target.host.clone(), target.port, stream, diag.clone());
        handle.set_target_credentials(credentials);
        handle.set_proxy_banner(banner);
        handle.set_state_trail(t.trail);
        Ok(handle)
    }
}

impl std::fmt::Debug for ProxyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyChain")
            .field("hops", &self.hops)
            .field("timeouts", &self.timeouts)
            .field("ip_version", &self.ip_version)
            .finish()
    }
}
