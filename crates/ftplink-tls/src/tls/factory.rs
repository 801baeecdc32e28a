//! `SecureChannelFactory` — turns a connected plaintext handle into a TLS
//! handle.
//!
//! Everything that can fail without the network (policy string, engine
//! translation, trust anchors) happens in [`SecureChannelFactory::prepare`].
//! [`SecureChannelFactory::upgrade_prepared`] then runs the handshake under
//! the configured deadline. Data connections pass the control handle's
//! [`SessionLink`] so their handshake resumes the control session.

use super::config::SessionConfig;
use super::policy::EnginePolicy;
use super::priority::{resolve_policy, CipherPolicySpec};
use super::trust::TrustCallbacks;
use super::verifier::TrustVerifier;
use ftplink_core::{
    ConnectError, ConnectResult, ConnectionRole, Diagnostics, SessionLink, SessionState, Stage,
    TimedIo, TlsFailureReason, TlsStream, TransportHandle, DETAIL_CONNECTION, DETAIL_ENGINE,
};
use rustls::client::{ClientSessionMemoryCache, ClientSessionStore, Resumption, Tls12Resumption};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, HandshakeKind, RootCertStore, StreamOwned};
use std::io::{self, BufReader};
use std::net::Shutdown;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Sessions cached per control connection.
const SESSION_CACHE_SIZE: usize = 32;
const ALPN_CONTROL: &[u8] = b"ftp";
const ALPN_DATA: &[u8] = b"ftp-data";

// ─── Prepared upgrade ────────────────────────────────────────────────

/// Validated, network-free part of an upgrade.
#[derive(Debug, Clone)]
pub struct PreparedUpgrade {
    policy: String,
    engine: EnginePolicy,
    roots: Arc<RootCertStore>,
}

impl PreparedUpgrade {
    /// The priority string after the override was applied.
    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn engine(&self) -> &EnginePolicy {
        &self.engine
    }

    pub fn trust_anchor_count(&self) -> usize {
        self.roots.len()
    }
}

// ─── Factory ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SecureChannelFactory {
    config: SessionConfig,
    diag: Diagnostics,
}

impl SecureChannelFactory {
    pub fn new(config: SessionConfig, diag: Diagnostics) -> Self {
        Self { config, diag }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build and validate the policy and trust anchors. No I/O.
    pub fn prepare(&self, spec: &CipherPolicySpec) -> ConnectResult<PreparedUpgrade> {
        self.config.validate()?;
        let policy = resolve_policy(spec, self.config.priority_override.as_deref());
        self.diag
            .verbose(DETAIL_CONNECTION, format!("TLS priority: {}", policy));
        let engine = EnginePolicy::parse(&policy)?;
        for note in engine.notes() {
            self.diag.verbose(DETAIL_ENGINE, note.clone());
        }
        let roots = self.trust_anchors()?;
        self.diag.verbose(
            DETAIL_ENGINE,
            format!("{} trust anchors loaded", roots.len()),
        );
        Ok(PreparedUpgrade {
            policy,
            engine,
            roots: Arc::new(roots),
        })
    }

    /// [`prepare`](Self::prepare) followed by
    /// [`upgrade_prepared`](Self::upgrade_prepared).
    pub fn upgrade(
        &self,
        mut handle: TransportHandle,
        spec: &CipherPolicySpec,
        linked: Option<&SessionLink>,
        callbacks: &TrustCallbacks,
    ) -> ConnectResult<TransportHandle> {
        match self.prepare(spec) {
            Ok(prepared) => self.upgrade_prepared(handle, &prepared, linked, callbacks),
            Err(e) => {
                handle.release();
                self.diag.error(&e);
                Err(e)
            }
        }
    }

    /// Run the TLS handshake on `handle`.
    ///
    /// On failure the handle is released before the error is returned.
    /// A `linked` session that has already been released fails with
    /// `TlsHandshakeFailure(ResumptionUnavailable)` without touching the
    /// network.
    ///
    /// A resumable link runs the data handshake under the control
    /// connection's TLS configuration with only ALPN changed; `prepared` then
    /// decides whether resumption is allowed at all.
    pub fn upgrade_prepared(
        &self,
        mut handle: TransportHandle,
        prepared: &PreparedUpgrade,
        linked: Option<&SessionLink>,
        callbacks: &TrustCallbacks,
    ) -> ConnectResult<TransportHandle> {
        match self.secure(&mut handle, prepared, linked, callbacks) {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.release();
                self.diag.error(&e);
                Err(e)
            }
        }
    }

    fn secure(
        &self,
        handle: &mut TransportHandle,
        prepared: &PreparedUpgrade,
        linked: Option<&SessionLink>,
        callbacks: &TrustCallbacks,
    ) -> ConnectResult<()> {
        let role = handle.role();
        let (server_name, store, resumable, inherited) = match linked {
            Some(link) => {
                let control = link.upgrade().ok_or_else(|| {
                    ConnectError::tls(
                        TlsFailureReason::ResumptionUnavailable,
                        "control connection was released before its data connection was secured",
                    )
                })?;
                let resumable = control.is_resumable() && prepared.engine.session_cache();
                if !resumable && self.config.require_resumption {
                    return Err(ConnectError::tls(
                        TlsFailureReason::ResumptionUnavailable,
                        "session caching is disabled by the TLS policy",
                    ));
                }
                let inherited = resumable.then(|| control.client_config());
                (control.server_name().to_string(), control.store(), resumable, inherited)
            }
            None => {
                let store: Arc<dyn ClientSessionStore> =
                    Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE));
                (handle.host().to_string(), store, prepared.engine.session_cache(), None)
            }
        };

        let config = match inherited {
            Some(control_config) => {
                self.diag.verbose(
                    DETAIL_ENGINE,
                    "Data connection reuses the control connection's TLS configuration",
                );
                self.linked_config(&control_config, role)
            }
            None => Arc::new(self.client_config(
                prepared,
                store.clone(),
                resumable,
                role,
                callbacks,
                &server_name,
            )?),
        };
        let name = ServerName::try_from(server_name.clone()).map_err(|_| {
            ConnectError::invalid_config(format!("'{}' is not a valid TLS server name", server_name))
        })?;
        let conn = ClientConnection::new(config.clone(), name).map_err(|e| {
            ConnectError::tls(
                TlsFailureReason::Negotiation,
                format!("TLS engine refused to start: {}", e),
            )
        })?;

        self.diag.verbose(
            DETAIL_CONNECTION,
            format!(
                "Starting TLS handshake with {} ({} connection)",
                self.diag.endpoint(handle.host(), handle.port()),
                role
            ),
        );
        let sock = handle.take_plain_socket()?;
        let mut tls = StreamOwned::new(conn, sock);
        if let Err(e) = drive_handshake(&mut tls, self.config.handshake_timeout()) {
            let _ = tls.sock.shutdown(Shutdown::Both);
            return Err(e);
        }
        let _ = tls.sock.set_io_timeout(None);

        let resumed = tls.conn.handshake_kind() == Some(HandshakeKind::Resumed);
        if linked.is_some() && !resumed {
            if self.config.require_resumption {
                let _ = tls.sock.shutdown(Shutdown::Both);
                return Err(ConnectError::tls(
                    TlsFailureReason::ResumptionRejected,
                    "server completed a full handshake instead of resuming the control session",
                ));
            }
            self.diag.warn(
                "Data connection did not resume the control session; servers that enforce session reuse will refuse transfers",
            );
        }

        let session = match role {
            ConnectionRole::Control => Some(Arc::new(SessionState::new(
                server_name,
                store,
                config,
                resumable,
            ))),
            ConnectionRole::Data => None,
        };
        handle.attach_tls(tls, session, linked.cloned(), resumed);

        self.diag.info(format!(
            "TLS established with {}: {} {}{}{}",
            self.diag.endpoint(handle.host(), handle.port()),
            handle.protocol_version().unwrap_or_default(),
            handle.cipher_suite().unwrap_or_default(),
            handle
                .alpn_protocol()
                .map(|p| format!(", ALPN {}", p))
                .unwrap_or_default(),
            if resumed { ", resumed" } else { "" }
        ));
        Ok(())
    }

    fn client_config(
        &self,
        prepared: &PreparedUpgrade,
        store: Arc<dyn ClientSessionStore>,
        resumable: bool,
        role: ConnectionRole,
        callbacks: &TrustCallbacks,
        server_name: &str,
    ) -> ConnectResult<ClientConfig> {
        let provider = Arc::new(prepared.engine.crypto_provider());
        let verifier = Arc::new(TrustVerifier::new(
            prepared.roots.clone(),
            provider.clone(),
            callbacks.clone(),
            server_name,
            self.diag.clone(),
        ));
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(prepared.engine.protocol_versions())
            .map_err(|e| {
                ConnectError::unsupported_policy(format!(
                    "TLS engine rejected policy '{}': {}",
                    prepared.policy, e
                ))
            })?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        config.resumption = if resumable {
            let resumption = Resumption::store(store);
            if prepared.engine.tls12_tickets() {
                resumption
            } else {
                resumption.tls12_resumption(Tls12Resumption::SessionIdOnly)
            }
        } else {
            Resumption::disabled()
        };
        self.set_alpn(&mut config, role);
        Ok(config)
    }

    /// Copy of the control configuration. The copy shares the certificate
    /// verifier, client-certificate resolver and session store, which the
    /// engine requires before it offers a cached session.
    fn linked_config(&self, control: &ClientConfig, role: ConnectionRole) -> Arc<ClientConfig> {
        let mut config = control.clone();
        self.set_alpn(&mut config, role);
        Arc::new(config)
    }

    fn set_alpn(&self, config: &mut ClientConfig, role: ConnectionRole) {
        config.alpn_protocols = if self.config.alpn {
            vec![match role {
                ConnectionRole::Control => ALPN_CONTROL.to_vec(),
                ConnectionRole::Data => ALPN_DATA.to_vec(),
            }]
        } else {
            Vec::new()
        };
    }

    fn trust_anchors(&self) -> ConnectResult<RootCertStore> {
        let mut roots = RootCertStore::empty();
        if self.config.use_platform_roots {
            let (native, errors) = platform_roots();
            if errors > 0 {
                self.diag.verbose(
                    DETAIL_ENGINE,
                    format!("{} platform certificate stores could not be read", errors),
                );
            }
            let (added, _ignored) = roots.add_parsable_certificates(native.iter().cloned());
            if added == 0 {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }
        for (i, pem) in self.config.extra_trust_anchors_pem.iter().enumerate() {
            let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_bytes()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    ConnectError::invalid_config(format!("trust anchor #{} is not valid PEM: {}", i, e))
                })?;
            if certs.is_empty() {
                return Err(ConnectError::invalid_config(format!(
                    "trust anchor #{} contains no certificate",
                    i
                )));
            }
            for cert in certs {
                roots.add(cert).map_err(|e| {
                    ConnectError::invalid_config(format!("trust anchor #{} rejected: {}", i, e))
                })?;
            }
        }
        Ok(roots)
    }
}

/// Platform certificates, loaded once per process.
fn platform_roots() -> (&'static [CertificateDer<'static>], usize) {
    static ROOTS: OnceLock<(Vec<CertificateDer<'static>>, usize)> = OnceLock::new();
    let (certs, errors) = ROOTS.get_or_init(|| {
        let loaded = rustls_native_certs::load_native_certs();
        (loaded.certs, loaded.errors.len())
    });
    (certs.as_slice(), *errors)
}

// ─── Handshake ───────────────────────────────────────────────────────

fn drive_handshake(tls: &mut TlsStream, timeout: Duration) -> ConnectResult<()> {
    let deadline = Instant::now() + timeout;
    while tls.conn.is_handshaking() {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                ConnectError::timeout(
                    Stage::TlsHandshake,
                    format!("TLS handshake did not finish within {} ms", timeout.as_millis()),
                )
            })?;
        tls.sock
            .set_io_timeout(Some(remaining))
            .map_err(|e| ConnectError::from_io(Stage::TlsHandshake, "arming handshake timeout", &e))?;
        tls.conn
            .complete_io(&mut tls.sock)
            .map_err(|e| classify_handshake_error(&e))?;
    }
    while tls.conn.wants_write() {
        tls.conn
            .write_tls(&mut tls.sock)
            .map_err(|e| classify_handshake_error(&e))?;
    }
    Ok(())
}

fn classify_handshake_error(err: &io::Error) -> ConnectError {
    if let Some(tls_err) = err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) {
        let reason = match tls_err {
            rustls::Error::InvalidCertificate(_) => TlsFailureReason::Certificate,
            rustls::Error::AlertReceived(_) | rustls::Error::PeerIncompatible(_) => {
                TlsFailureReason::PeerRejected
            }
            _ => TlsFailureReason::Negotiation,
        };
        return ConnectError::tls(reason, format!("TLS handshake failed: {}", tls_err));
    }
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ConnectError::tls(
            TlsFailureReason::PeerRejected,
            format!("peer closed the connection during the TLS handshake: {}", err),
        ),
        _ => ConnectError::from_io(Stage::TlsHandshake, "TLS handshake", err),
    }
}
