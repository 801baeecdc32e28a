//! Server certificate verification with a caller override.

use super::trust::{CertificateIssue, CertificateIssueKind, TrustCallbacks};
use ftplink_core::Diagnostics;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use std::sync::Arc;

/// WebPKI verification; failures are offered to the certificate hook
/// before they abort the handshake.
pub(crate) struct TrustVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    callbacks: TrustCallbacks,
    server_name: String,
    diag: Diagnostics,
}

impl TrustVerifier {
    /// `roots` may be empty, in which case every certificate is an
    /// untrusted-issuer issue.
    pub(crate) fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
        callbacks: TrustCallbacks,
        server_name: impl Into<String>,
        diag: Diagnostics,
    ) -> Self {
        let webpki = if roots.is_empty() {
            None
        } else {
            WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
                .build()
                .ok()
        };
        Self {
            webpki,
            provider,
            callbacks,
            server_name: server_name.into(),
            diag,
        }
    }

    fn classify(
        &self,
        err: &CertificateError,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> CertificateIssueKind {
        match err {
            CertificateError::Expired | CertificateError::ExpiredContext { .. } => {
                CertificateIssueKind::Expired
            }
            CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
                CertificateIssueKind::NotYetValid
            }
            CertificateError::NotValidForName
            | CertificateError::NotValidForNameContext { .. } => CertificateIssueKind::NameMismatch,
            CertificateError::Revoked => CertificateIssueKind::Revoked,
            CertificateError::UnknownIssuer => {
                if intermediates.is_empty() && self.is_self_signed(end_entity, server_name, now) {
                    CertificateIssueKind::SelfSigned
                } else {
                    CertificateIssueKind::UntrustedIssuer
                }
            }
            _ => CertificateIssueKind::Other,
        }
    }

    /// Verify the certificate against itself as the only anchor.
    fn is_self_signed(
        &self,
        end_entity: &CertificateDer<'_>,
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> bool {
        let mut roots = RootCertStore::empty();
        if roots.add(end_entity.clone().into_owned()).is_err() {
            return false;
        }
        let verifier =
            match WebPkiServerVerifier::builder_with_provider(Arc::new(roots), self.provider.clone())
                .build()
            {
                Ok(v) => v,
                Err(_) => return false,
            };
        match verifier.verify_server_cert(end_entity, &[], server_name, &[], now) {
            Ok(_) => true,
            Err(Error::InvalidCertificate(
                CertificateError::UnknownIssuer | CertificateError::BadSignature,
            )) => false,
            // The anchor matched; whatever failed next is a separate defect.
            Err(Error::InvalidCertificate(_)) => true,
            Err(_) => false,
        }
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let err = match &self.webpki {
            Some(v) => match v.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ) {
                Ok(ok) => return Ok(ok),
                Err(e) => e,
            },
            None => Error::InvalidCertificate(CertificateError::UnknownIssuer),
        };
        let kind = match &err {
            Error::InvalidCertificate(cert_err) => {
                self.classify(cert_err, end_entity, intermediates, server_name, now)
            }
            _ => return Err(err),
        };

        let issue = CertificateIssue {
            kind,
            server_name: self.server_name.clone(),
            end_entity_der: end_entity.as_ref().to_vec(),
            message: err.to_string(),
        };
        let decision = self.callbacks.certificate_decision(&issue);
        if decision.proceeds() {
            self.diag.warn(format!(
                "Certificate for {} is {} ({}); continuing on caller decision {:?}",
                self.diag.host(&self.server_name),
                kind,
                issue.message,
                decision
            ));
            Ok(ServerCertVerified::assertion())
        } else {
            self.diag.verbose(
                ftplink_core::DETAIL_CONNECTION,
                format!("Certificate rejected: {}", kind),
            );
            Err(err)
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl std::fmt::Debug for TrustVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustVerifier")
            .field("server_name", &self.server_name)
            .field("has_roots", &self.webpki.is_some())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
