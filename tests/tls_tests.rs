mod support;

use ftplink::*;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use support::*;

fn implicit(port: u16, session: SessionConfig, policy: CipherPolicySpec) -> ConnectRequest {
    ConnectRequest::new(Target::new("localhost", port))
        .with_session(session)
        .with_tls(TlsRequest::implicit(policy))
}

fn serve_fixture(fixture: &Arc<TlsFixture>, connections: usize) -> (u16, std::thread::JoinHandle<()>) {
    let f = fixture.clone();
    serve_many(connections, move |s| f.serve(s))
}

fn recording_callbacks(decision: TrustDecision) -> (TrustCallbacks, Arc<Mutex<Vec<CertificateIssueKind>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let callbacks = TrustCallbacks::new().on_certificate_issue(move |issue| {
        log.lock().unwrap().push(issue.kind);
        decision
    });
    (callbacks, seen)
}

// ─── Control connections ─────────────────────────────────────────────

#[test]
fn test_implicit_tls_control_connection() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 1);
    let sink = memory_sink();
    let orchestrator = ConnectionOrchestrator::new(sink.clone());

    let mut control = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()))
        .unwrap();

    assert_eq!(read_banner(&mut control), BANNER);
    assert!(control.is_encrypted());
    assert!(!control.is_resumed());
    assert_eq!(control.role(), ConnectionRole::Control);
    assert_eq!(control.protocol_version().as_deref(), Some("TLSv1_3"));
    assert!(control.cipher_suite().unwrap().starts_with("TLS13_"));
    assert_eq!(control.alpn_protocol().as_deref(), Some("ftp"));
    assert!(control.session_link().is_some());
    assert!(sink.contains("TLS priority: NORMAL"));
    assert!(sink.contains("TLS established with localhost"));

    control.release();
    server.join().unwrap();
}

#[test]
fn test_policy_can_pin_tls12() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 1);
    let policy = CipherPolicySpec::new(BaseSuite::Normal).exclude(PolicyComponent::VersTls13);

    let mut control = ConnectionOrchestrator::new(memory_sink())
        .connect(implicit(port, fixture.session_config(), policy))
        .unwrap();

    assert_eq!(read_banner(&mut control), BANNER);
    assert_eq!(control.protocol_version().as_deref(), Some("TLSv1_2"));
    assert!(control.cipher_suite().unwrap().starts_with("TLS_ECDHE_"));
    drop(control);
    server.join().unwrap();
}

#[test]
fn test_priority_override_replaces_the_built_policy() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 1);
    let sink = memory_sink();
    let session = SessionConfig {
        priority_override: Some("SECURE256:-VERS-TLS1.3".into()),
        ..fixture.session_config()
    };

    let mut control = ConnectionOrchestrator::new(sink.clone())
        .connect(implicit(port, session, CipherPolicySpec::default()))
        .unwrap();

    assert_eq!(read_banner(&mut control), BANNER);
    assert_eq!(control.protocol_version().as_deref(), Some("TLSv1_2"));
    assert!(sink.contains("TLS priority: SECURE256:-VERS-TLS1.3"));
    drop(control);
    server.join().unwrap();
}

#[test]
fn test_server_refusing_our_versions_is_peer_rejected() {
    let fixture = Arc::new(TlsFixture::issued_for("localhost", None, &[&rustls::version::TLS13]));
    let (port, server) = serve_fixture(&fixture, 1);
    let policy = CipherPolicySpec::new(BaseSuite::Normal).exclude(PolicyComponent::VersTls13);

    let err = ConnectionOrchestrator::new(memory_sink())
        .connect(implicit(port, fixture.session_config(), policy))
        .unwrap_err();

    assert_eq!(
        err.kind,
        ConnectErrorKind::TlsHandshakeFailure(TlsFailureReason::PeerRejected)
    );
    server.join().unwrap();
}

// ─── Certificate trust ───────────────────────────────────────────────

#[test]
fn test_untrusted_certificate_without_callback_fails() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 1);
    let sink = memory_sink();
    let session = SessionConfig {
        extra_trust_anchors_pem: Vec::new(),
        ..fixture.session_config()
    };

    let err = ConnectionOrchestrator::new(sink.clone())
        .connect(implicit(port, session, CipherPolicySpec::default()))
        .unwrap_err();

    assert_eq!(
        err.kind,
        ConnectErrorKind::TlsHandshakeFailure(TlsFailureReason::Certificate)
    );
    let last = sink.entries().pop().unwrap();
    assert_eq!(last.severity, Severity::Error);
    assert!(sink.contains("Certificate rejected: untrusted issuer"));
    server.join().unwrap();
}

#[test]
fn test_ignored_certificate_issue_lets_the_handshake_finish() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 1);
    let sink = memory_sink();
    let session = SessionConfig {
        extra_trust_anchors_pem: Vec::new(),
        ..fixture.session_config()
    };
    let (callbacks, seen) = recording_callbacks(TrustDecision::Ignore);
    let request = ConnectRequest::new(Target::new("localhost", port))
        .with_session(session)
        .with_tls(TlsRequest::implicit(CipherPolicySpec::default()).with_callbacks(callbacks));

    let mut control = ConnectionOrchestrator::new(sink.clone()).connect(request).unwrap();

    assert_eq!(read_banner(&mut control), BANNER);
    assert_eq!(*seen.lock().unwrap(), vec![CertificateIssueKind::UntrustedIssuer]);
    assert!(sink
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warn && e.message.contains("continuing on caller decision Ignore")));
    drop(control);
    server.join().unwrap();
}

#[test]
fn test_self_signed_certificate_is_reported_as_such() {
    let fixture = Arc::new(TlsFixture::self_signed());
    let (port, server) = serve_fixture(&fixture, 1);
    let (callbacks, seen) = recording_callbacks(TrustDecision::Reject);
    let request = ConnectRequest::new(Target::new("localhost", port))
        .with_session(fixture.session_config())
        .with_tls(TlsRequest::implicit(CipherPolicySpec::default()).with_callbacks(callbacks));

    let err = ConnectionOrchestrator::new(memory_sink()).connect(request).unwrap_err();

    assert_eq!(err.tls_reason(), Some(TlsFailureReason::Certificate));
    assert_eq!(*seen.lock().unwrap(), vec![CertificateIssueKind::SelfSigned]);
    server.join().unwrap();
}

#[test]
fn test_certificate_for_another_name() {
    let fixture = Arc::new(TlsFixture::issued_for("ftp.other.test", None, rustls::ALL_VERSIONS));
    let (port, server) = serve_fixture(&fixture, 1);
    let (callbacks, seen) = recording_callbacks(TrustDecision::Reject);
    let request = ConnectRequest::new(Target::new("localhost", port))
        .with_session(fixture.session_config())
        .with_tls(TlsRequest::implicit(CipherPolicySpec::default()).with_callbacks(callbacks));

    let err = ConnectionOrchestrator::new(memory_sink()).connect(request).unwrap_err();

    assert_eq!(err.tls_reason(), Some(TlsFailureReason::Certificate));
    assert_eq!(*seen.lock().unwrap(), vec![CertificateIssueKind::NameMismatch]);
    server.join().unwrap();
}

#[test]
fn test_expired_certificate_accepted_by_caller() {
    let fixture = Arc::new(TlsFixture::issued_for(
        "localhost",
        Some(((2000, 1, 1), (2001, 1, 1))),
        rustls::ALL_VERSIONS,
    ));
    let (port, server) = serve_fixture(&fixture, 1);
    let (callbacks, seen) = recording_callbacks(TrustDecision::Accept);
    let request = ConnectRequest::new(Target::new("localhost", port))
        .with_session(fixture.session_config())
        .with_tls(TlsRequest::implicit(CipherPolicySpec::default()).with_callbacks(callbacks));

    let mut control = ConnectionOrchestrator::new(memory_sink()).connect(request).unwrap();

    assert_eq!(read_banner(&mut control), BANNER);
    assert_eq!(*seen.lock().unwrap(), vec![CertificateIssueKind::Expired]);
    drop(control);
    server.join().unwrap();
}

// ─── Data connections ────────────────────────────────────────────────

#[test]
fn test_data_connection_resumes_control_session() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 2);
    let sink = memory_sink();
    let orchestrator = ConnectionOrchestrator::new(sink.clone());

    let mut control = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()))
        .unwrap();
    // Tickets arrive ahead of the first application data.
    assert_eq!(read_banner(&mut control), BANNER);

    let link = control.session_link().unwrap();
    let mut data = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()).linked_to(link))
        .unwrap();

    assert_eq!(read_banner(&mut data), BANNER);
    assert_eq!(data.role(), ConnectionRole::Data);
    assert!(data.is_resumed());
    assert_eq!(data.alpn_protocol().as_deref(), Some("ftp-data"));
    assert!(data.linked_control().unwrap().is_alive());
    // Data handles never act as a resumption source.
    assert!(data.session_link().is_none());
    assert!(sink.contains(", resumed"));

    data.release();
    control.release();
    server.join().unwrap();
}

#[test]
fn test_data_connection_resumes_a_tls12_session() {
    let fixture = Arc::new(TlsFixture::issued_for(
        "localhost",
        None,
        &[&rustls::version::TLS12],
    ));
    let (port, server) = serve_fixture(&fixture, 2);
    let sink = memory_sink();
    let orchestrator = ConnectionOrchestrator::new(sink.clone());

    let mut control = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()))
        .unwrap();
    assert_eq!(read_banner(&mut control), BANNER);
    assert_eq!(control.protocol_version().as_deref(), Some("TLSv1_2"));

    let link = control.session_link().unwrap();
    let mut data = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()).linked_to(link))
        .unwrap();

    assert_eq!(read_banner(&mut data), BANNER);
    assert_eq!(data.protocol_version().as_deref(), Some("TLSv1_2"));
    assert!(data.is_resumed());
    assert!(!sink.contains("did not resume"));

    data.release();
    control.release();
    server.join().unwrap();
}

#[test]
fn test_every_data_connection_resumes() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 3);
    let session = SessionConfig {
        require_resumption: true,
        ..fixture.session_config()
    };
    let orchestrator = ConnectionOrchestrator::new(memory_sink());

    let mut control = orchestrator
        .connect(implicit(port, session.clone(), CipherPolicySpec::default()))
        .unwrap();
    assert_eq!(read_banner(&mut control), BANNER);
    let link = control.session_link().unwrap();

    // The server issues two tickets with the control handshake and a fresh
    // one with each resumption.
    for _ in 0..2 {
        let mut data = orchestrator
            .connect(implicit(port, session.clone(), CipherPolicySpec::default()).linked_to(link.clone()))
            .unwrap();
        assert_eq!(read_banner(&mut data), BANNER);
        assert!(data.is_resumed());
        data.release();
    }

    control.release();
    server.join().unwrap();
}

#[test]
fn test_released_control_leaves_data_without_a_session() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 2);
    let orchestrator = ConnectionOrchestrator::new(memory_sink());

    let mut control = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()))
        .unwrap();
    assert_eq!(read_banner(&mut control), BANNER);
    let link = control.session_link().unwrap();
    control.release();
    control.release();
    assert!(!link.is_alive());

    let err = orchestrator
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()).linked_to(link))
        .unwrap_err();

    assert_eq!(
        err.kind,
        ConnectErrorKind::TlsHandshakeFailure(TlsFailureReason::ResumptionUnavailable)
    );
    drop(control);
    server.join().unwrap();
}

#[test]
fn test_no_tickets_policy_falls_back_to_full_handshake() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 2);
    let sink = memory_sink();
    let orchestrator = ConnectionOrchestrator::new(sink.clone());
    let policy = CipherPolicySpec::default().directive(SecurityDirective::NoTickets);

    let mut control = orchestrator
        .connect(implicit(port, fixture.session_config(), policy.clone()))
        .unwrap();
    assert_eq!(read_banner(&mut control), BANNER);

    let link = control.session_link().unwrap();
    let mut data = orchestrator
        .connect(implicit(port, fixture.session_config(), policy).linked_to(link))
        .unwrap();

    assert_eq!(read_banner(&mut data), BANNER);
    assert!(!data.is_resumed());
    assert!(sink
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warn && e.message.contains("did not resume")));
    drop(data);
    drop(control);
    server.join().unwrap();
}

#[test]
fn test_required_resumption_with_tickets_disabled() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 2);
    let orchestrator = ConnectionOrchestrator::new(memory_sink());
    let policy = CipherPolicySpec::default().directive(SecurityDirective::NoTickets);
    let session = SessionConfig {
        require_resumption: true,
        ..fixture.session_config()
    };

    let mut control = orchestrator
        .connect(implicit(port, session.clone(), policy.clone()))
        .unwrap();
    assert_eq!(read_banner(&mut control), BANNER);

    let err = orchestrator
        .connect(implicit(port, session, policy).linked_to(control.session_link().unwrap()))
        .unwrap_err();

    assert_eq!(err.tls_reason(), Some(TlsFailureReason::ResumptionUnavailable));
    drop(control);
    server.join().unwrap();
}

// ─── Factory ─────────────────────────────────────────────────────────

#[test]
fn test_factory_upgrades_a_plain_handle() {
    let fixture = Arc::new(TlsFixture::new());
    let (port, server) = serve_fixture(&fixture, 1);
    let sink = memory_sink();
    let session = fixture.session_config();
    let diag = session.diagnostics(sink.clone());

    let handle = ProxyChain::direct()
        .with_ip_version(IpVersion::V4)
        .establish(&Target::new("localhost", port), ConnectionRole::Control, &diag)
        .unwrap();
    let factory = SecureChannelFactory::new(session, diag);
    let prepared = factory.prepare(&CipherPolicySpec::default()).unwrap();
    assert_eq!(prepared.policy(), "NORMAL");
    assert_eq!(prepared.trust_anchor_count(), 1);

    let mut handle = factory
        .upgrade_prepared(handle, &prepared, None, &TrustCallbacks::default())
        .unwrap();
    assert_eq!(read_banner(&mut handle), BANNER);
    assert!(handle.is_encrypted());

    handle.release();
    handle.release();
    assert!(!handle.can_read());
    server.join().unwrap();
}

// ─── Release ─────────────────────────────────────────────────────────

#[test]
fn test_release_does_not_hang_on_a_stalled_peer() {
    let fixture = TlsFixture::new();
    let config = fixture.config.clone();
    let (resume_tx, resume_rx) = std::sync::mpsc::channel::<()>();
    let (port, server) = serve_once(move |sock| {
        let mut tls = rustls::StreamOwned::new(rustls::ServerConnection::new(config).unwrap(), sock);
        tls.write_all(BANNER.as_bytes()).unwrap();
        tls.flush().unwrap();
        // Stop reading until the client has released.
        let _ = resume_rx.recv();
    });

    let mut control = ConnectionOrchestrator::new(memory_sink())
        .connect(implicit(port, fixture.session_config(), CipherPolicySpec::default()))
        .unwrap();
    assert_eq!(read_banner(&mut control), BANNER);

    // Fill the socket buffers so nothing more can be written.
    control
        .set_io_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let chunk = vec![0u8; 64 * 1024];
    for _ in 0..4096 {
        if control.write_all(&chunk).is_err() {
            break;
        }
    }
    control.set_io_timeout(None).unwrap();

    let started = Instant::now();
    control.release();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(control.is_released());

    resume_tx.send(()).unwrap();
    server.join().unwrap();
}
