//! `ConnectionOrchestrator` — proxy traversal, optional explicit upgrade
//! command, then TLS, in that fixed order.
//!
//! Everything that can be rejected without the network (descriptors,
//! target, timeouts, the cipher policy and trust anchors) is checked before
//! the first socket is opened. A handle that fails part-way is released
//! before the error is returned.

use crate::upgrade::{AuthTlsCommand, SecureUpgrade, UpgradeOutcome};
use ftplink_core::{
    ConnectError, ConnectResult, ConnectionRole, Diagnostics, LogFacadeSink, LogSink,
    ProxyDescriptor, SessionLink, Target, TransportHandle,
};
use ftplink_proxy::{ProxyChain, ProxyLogin};
use ftplink_tls::{
    CipherPolicySpec, PreparedUpgrade, SecureChannelFactory, SecurityUnavailable, SessionConfig,
    TrustCallbacks,
};
use std::sync::Arc;

// ─── Request ─────────────────────────────────────────────────────────

/// When the TLS handshake starts.
pub enum SecurityMode {
    /// Straight after the transport is established (FTPS on port 990).
    Implicit,
    /// After the given command has been accepted by the server.
    Explicit(Box<dyn SecureUpgrade>),
}

impl std::fmt::Debug for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityMode::Implicit => f.write_str("Implicit"),
            SecurityMode::Explicit(_) => f.write_str("Explicit"),
        }
    }
}

#[derive(Debug)]
pub struct TlsRequest {
    pub policy: CipherPolicySpec,
    pub mode: SecurityMode,
    pub callbacks: TrustCallbacks,
}

impl TlsRequest {
    pub fn implicit(policy: CipherPolicySpec) -> Self {
        Self {
            policy,
            mode: SecurityMode::Implicit,
            callbacks: TrustCallbacks::default(),
        }
    }

    pub fn explicit(policy: CipherPolicySpec, upgrade: impl SecureUpgrade + 'static) -> Self {
        Self {
            policy,
            mode: SecurityMode::Explicit(Box::new(upgrade)),
            callbacks: TrustCallbacks::default(),
        }
    }

    /// Explicit FTPS via `AUTH TLS`.
    pub fn auth_tls(policy: CipherPolicySpec) -> Self {
        Self::explicit(policy, AuthTlsCommand::new())
    }

    pub fn with_callbacks(mut self, callbacks: TrustCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Everything one `connect` call needs.
pub struct ConnectRequest {
    pub proxies: Vec<ProxyDescriptor>,
    pub target: Target,
    pub tls: Option<TlsRequest>,
    pub session: SessionConfig,
    pub role: ConnectionRole,
    /// Control session a data connection resumes. The control handle must
    /// stay open until this data connection has been released.
    pub linked_control: Option<SessionLink>,
    pub proxy_login: Option<Arc<dyn ProxyLogin>>,
}

impl ConnectRequest {
    pub fn new(target: Target) -> Self {
        Self {
            proxies: Vec::new(),
            target,
            tls: None,
            session: SessionConfig::default(),
            role: ConnectionRole::Control,
            linked_control: None,
            proxy_login: None,
        }
    }

    /// Append a proxy hop.
    pub fn via(mut self, proxy: ProxyDescriptor) -> Self {
        self.proxies.push(proxy);
        self
    }

    pub fn with_tls(mut self, tls: TlsRequest) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_role(mut self, role: ConnectionRole) -> Self {
        self.role = role;
        self
    }

    /// Data connection resuming the TLS session of `control`.
    pub fn linked_to(mut self, control: SessionLink) -> Self {
        self.role = ConnectionRole::Data;
        self.linked_control = Some(control);
        self
    }

    pub fn with_proxy_login(mut self, login: Arc<dyn ProxyLogin>) -> Self {
        self.proxy_login = Some(login);
        self
    }
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("proxies", &self.proxies)
            .field("target", &self.target)
            .field("tls", &self.tls)
            .field("role", &self.role)
            .field("linked", &self.linked_control.is_some())
            .finish()
    }
}

// ─── Orchestrator ────────────────────────────────────────────────────

/// Opens control and data connections. Holds only the log sink, so one
/// orchestrator can serve concurrent `connect` calls.
#[derive(Clone)]
pub struct ConnectionOrchestrator {
    sink: Arc<dyn LogSink>,
}

impl Default for ConnectionOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(LogFacadeSink::default()))
    }
}

enum Upgrade {
    Secure(TransportHandle),
    Plaintext(TransportHandle),
}

impl ConnectionOrchestrator {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Establish the transport described by `request`.
    ///
    /// Without a TLS request the plaintext handle from the proxy chain is
    /// returned as is. Every failure has been logged by the time it is
    /// returned.
    pub fn connect(&self, request: ConnectRequest) -> ConnectResult<TransportHandle> {
        let ConnectRequest {
            proxies,
            target,
            tls,
            session,
            role,
            linked_control,
            proxy_login,
        } = request;
        let diag = session.diagnostics(self.sink.clone());

        let pre_io = target
            .validate()
            .and_then(|_| session.timeouts.validate())
            .and_then(|_| Self::check_link(role, linked_control.as_ref(), tls.is_some()));
        if let Err(e) = pre_io {
            diag.error(&e);
            return Err(e);
        }

        let factory = SecureChannelFactory::new(session.clone(), diag.clone());
        let prepared = match &tls {
            Some(t) => match factory.prepare(&t.policy) {
                Ok(p) => Some(p),
                Err(e) => {
                    diag.error(&e);
                    return Err(e);
                }
            },
            None => None,
        };

        let mut chain = ProxyChain::new(proxies)
            .with_timeouts(session.timeouts)
            .with_ip_version(session.ip_version);
        if let Some(login) = proxy_login {
            chain = chain.with_login(login);
        }
        let handle = chain.establish(&target, role, &diag)?;

        let (tls, prepared) = match (tls, prepared) {
            (Some(t), Some(p)) => (t, p),
            _ => return Ok(handle),
        };
        self.secure(handle, tls, &prepared, linked_control.as_ref(), &factory, &session, &diag)
    }

    fn check_link(
        role: ConnectionRole,
        linked: Option<&SessionLink>,
        has_tls: bool,
    ) -> ConnectResult<()> {
        match linked {
            Some(_) if role != ConnectionRole::Data => Err(ConnectError::invalid_config(
                "only data connections can link to a control session",
            )),
            Some(_) if !has_tls => Err(ConnectError::invalid_config(
                "a linked data connection needs a TLS policy",
            )),
            _ => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn secure(
        &self,
        handle: TransportHandle,
        tls: TlsRequest,
        prepared: &PreparedUpgrade,
        linked: Option<&SessionLink>,
        factory: &SecureChannelFactory,
        session: &SessionConfig,
        diag: &Diagnostics,
    ) -> ConnectResult<TransportHandle> {
        let TlsRequest { mode, callbacks, .. } = tls;
        let handle = match mode {
            SecurityMode::Implicit => handle,
            SecurityMode::Explicit(mut upgrade) => {
                match Self::explicit_upgrade(handle, upgrade.as_mut(), &callbacks, session, diag)? {
                    Upgrade::Secure(h) => h,
                    Upgrade::Plaintext(h) => return Ok(h),
                }
            }
        };
        factory.upgrade_prepared(handle, prepared, linked, &callbacks)
    }

    fn explicit_upgrade(
        mut handle: TransportHandle,
        upgrade: &mut dyn SecureUpgrade,
        callbacks: &TrustCallbacks,
        session: &SessionConfig,
        diag: &Diagnostics,
    ) -> ConnectResult<Upgrade> {
        let outcome = upgrade.negotiate(&mut handle, session.timeouts.negotiation());
        let failure = match outcome {
            Ok(UpgradeOutcome::Accepted) => return Ok(Upgrade::Secure(handle)),
            Ok(UpgradeOutcome::Declined(reply)) => {
                let info = SecurityUnavailable {
                    host: handle.host().to_string(),
                    port: handle.port(),
                    reply,
                };
                if callbacks.security_unavailable_decision(&info).proceeds() {
                    // Caller chose plaintext: everything from here on,
                    // credentials included, crosses the network unencrypted.
                    diag.warn(format!(
                        "Secure upgrade refused by {}; continuing WITHOUT encryption, credentials will cross the network unencrypted",
                        diag.endpoint(handle.host(), handle.port())
                    ));
                    return Ok(Upgrade::Plaintext(handle));
                }
                ConnectError::security_not_available(format!(
                    "server refused the secure upgrade{}",
                    info.reply
                        .map(|r| format!(": {}", r))
                        .unwrap_or_default()
                ))
            }
            Err(e) => e,
        };
        handle.release();
        diag.error(&failure);
        Err(failure)
    }
}

impl std::fmt::Debug for ConnectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOrchestrator").finish_non_exhaustive()
    }
}
