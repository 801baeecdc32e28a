//! Translation of a priority string into `rustls` settings.
//!
//! The first token must be a base suite keyword. Every following token is
//! either applied (protocol versions, AEAD ciphers, ECDHE key exchange,
//! groups, ticket directives), accepted as a no-op with a note, or refused
//! with `UnsupportedPolicyComponent`. Everything here runs before a socket
//! is touched.

use super::priority::{BaseSuite, PolicyComponent, SecurityDirective, SecurityProfile};
use ftplink_core::{ConnectError, ConnectResult};
use rustls::crypto::ring::{cipher_suite, kx_group};
use rustls::crypto::{CryptoProvider, SupportedKxGroup};
use rustls::{SupportedCipherSuite, SupportedProtocolVersion};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Version {
    Tls12,
    Tls13,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Cipher {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Kx {
    EcdheEcdsa,
    EcdheRsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Group {
    X25519,
    Secp256r1,
    Secp384r1,
}

const ALL_VERSIONS: &[Version] = &[Version::Tls12, Version::Tls13];
const ALL_CIPHERS: &[Cipher] = &[Cipher::Aes128Gcm, Cipher::Aes256Gcm, Cipher::Chacha20];
const ALL_KX: &[Kx] = &[Kx::EcdheEcdsa, Kx::EcdheRsa];
const ALL_GROUPS: &[Group] = &[Group::X25519, Group::Secp256r1, Group::Secp384r1];

/// Engine suites in preference order.
fn suite_table() -> [(SupportedCipherSuite, Version, Cipher, Option<Kx>); 9] {
    use Cipher::*;
    use Version::*;
    [
        (cipher_suite::TLS13_AES_256_GCM_SHA384, Tls13, Aes256Gcm, None),
        (cipher_suite::TLS13_AES_128_GCM_SHA256, Tls13, Aes128Gcm, None),
        (cipher_suite::TLS13_CHACHA20_POLY1305_SHA256, Tls13, Chacha20, None),
        (cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, Tls12, Aes256Gcm, Some(Kx::EcdheEcdsa)),
        (cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, Tls12, Aes128Gcm, Some(Kx::EcdheEcdsa)),
        (cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256, Tls12, Chacha20, Some(Kx::EcdheEcdsa)),
        (cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, Tls12, Aes256Gcm, Some(Kx::EcdheRsa)),
        (cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, Tls12, Aes128Gcm, Some(Kx::EcdheRsa)),
        (cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256, Tls12, Chacha20, Some(Kx::EcdheRsa)),
    ]
}

fn group_impl(group: Group) -> &'static dyn SupportedKxGroup {
    match group {
        Group::X25519 => kx_group::X25519,
        Group::Secp256r1 => kx_group::SECP256R1,
        Group::Secp384r1 => kx_group::SECP384R1,
    }
}

// ─── Selection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Selection {
    versions: BTreeSet<Version>,
    ciphers: BTreeSet<Cipher>,
    kx: BTreeSet<Kx>,
    groups: BTreeSet<Group>,
}

impl Selection {
    fn of(versions: &[Version], ciphers: &[Cipher], kx: &[Kx], groups: &[Group]) -> Self {
        Self {
            versions: versions.iter().copied().collect(),
            ciphers: ciphers.iter().copied().collect(),
            kx: kx.iter().copied().collect(),
            groups: groups.iter().copied().collect(),
        }
    }

    fn for_suite(suite: BaseSuite) -> Self {
        use Cipher::*;
        use Group::*;
        match suite {
            BaseSuite::Performance
            | BaseSuite::Normal
            | BaseSuite::Legacy
            | BaseSuite::PerfectForwardSecrecy
            | BaseSuite::Secure128 => Self::of(ALL_VERSIONS, ALL_CIPHERS, ALL_KX, ALL_GROUPS),
            BaseSuite::Secure192 | BaseSuite::Secure256 => {
                Self::of(ALL_VERSIONS, &[Aes256Gcm, Chacha20], ALL_KX, &[Secp384r1])
            }
            BaseSuite::SuiteB128 => Self::of(
                ALL_VERSIONS,
                &[Aes128Gcm, Aes256Gcm],
                &[Kx::EcdheEcdsa],
                &[Secp256r1, Secp384r1],
            ),
            BaseSuite::SuiteB192 => {
                Self::of(ALL_VERSIONS, &[Aes256Gcm], &[Kx::EcdheEcdsa], &[Secp384r1])
            }
            BaseSuite::None => Self::default(),
        }
    }

    fn merge(&mut self, other: &Selection, include: bool) {
        fn apply<T: Ord + Copy>(set: &mut BTreeSet<T>, items: &BTreeSet<T>, include: bool) {
            for item in items {
                if include {
                    set.insert(*item);
                } else {
                    set.remove(item);
                }
            }
        }
        apply(&mut self.versions, &other.versions, include);
        apply(&mut self.ciphers, &other.ciphers, include);
        apply(&mut self.kx, &other.kx, include);
        apply(&mut self.groups, &other.groups, include);
    }
}

/// What a single component token does to the selection.
enum Effect {
    Adjust(Selection),
    NoOp,
    Unsupported,
}

fn component_effect(component: PolicyComponent) -> Effect {
    use PolicyComponent as C;
    let only = |s: Selection| Effect::Adjust(s);
    match component {
        C::VersAll | C::VersTlsAll => only(Selection::of(ALL_VERSIONS, &[], &[], &[])),
        C::VersTls12 => only(Selection::of(&[Version::Tls12], &[], &[], &[])),
        C::VersTls13 => only(Selection::of(&[Version::Tls13], &[], &[], &[])),
        C::CipherAll => only(Selection::of(&[], ALL_CIPHERS, &[], &[])),
        C::Aes128Gcm => only(Selection::of(&[], &[Cipher::Aes128Gcm], &[], &[])),
        C::Aes256Gcm => only(Selection::of(&[], &[Cipher::Aes256Gcm], &[], &[])),
        C::Chacha20Poly1305 => only(Selection::of(&[], &[Cipher::Chacha20], &[], &[])),
        C::KxAll => only(Selection::of(&[], &[], ALL_KX, &[])),
        C::EcdheRsa => only(Selection::of(&[], &[], &[Kx::EcdheRsa], &[])),
        C::EcdheEcdsa => only(Selection::of(&[], &[], &[Kx::EcdheEcdsa], &[])),
        C::GroupAll => only(Selection::of(&[], &[], &[], ALL_GROUPS)),
        C::GroupX25519 => only(Selection::of(&[], &[], &[], &[Group::X25519])),
        C::GroupSecp256r1 => only(Selection::of(&[], &[], &[], &[Group::Secp256r1])),
        C::GroupSecp384r1 => only(Selection::of(&[], &[], &[], &[Group::Secp384r1])),
        // Every offered suite is AEAD with SHA-2 and every certificate is X.509.
        C::MacAll
        | C::Aead
        | C::Sha256
        | C::Sha384
        | C::SignAll
        | C::SignRsaSha256
        | C::SignRsaSha384
        | C::SignEcdsaSha256
        | C::SignEcdsaSha384
        | C::SignEd25519
        | C::CtypeAll
        | C::CtypeX509
        | C::CompNull => Effect::NoOp,
        C::VersSsl3
        | C::VersTls10
        | C::VersTls11
        | C::Aes128Ccm
        | C::Aes256Ccm
        | C::Aes128Cbc
        | C::Aes256Cbc
        | C::Camellia128Gcm
        | C::Camellia256Gcm
        | C::TripleDesCbc
        | C::Arcfour128
        | C::NullCipher
        | C::Sha1
        | C::Md5
        | C::Rsa
        | C::DheRsa
        | C::GroupSecp521r1
        | C::GroupX448
        | C::GroupFfdhe2048
        | C::SignRsaMd5 => Effect::Unsupported,
    }
}

// ─── EnginePolicy ────────────────────────────────────────────────────

/// Engine settings derived from a priority string.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    source: String,
    versions: Vec<&'static SupportedProtocolVersion>,
    suites: Vec<SupportedCipherSuite>,
    groups: Vec<&'static dyn SupportedKxGroup>,
    session_cache: bool,
    tls12_tickets: bool,
    notes: Vec<String>,
}

impl EnginePolicy {
    /// Parse and validate `policy`.
    pub fn parse(policy: &str) -> ConnectResult<Self> {
        let mut tokens = policy.split(':').map(str::trim);
        let first = tokens.next().unwrap_or_default();
        if first.is_empty() {
            return Err(ConnectError::unsupported_policy("priority string is empty"));
        }
        let base = BaseSuite::from_token(first).ok_or_else(|| {
            ConnectError::unsupported_policy(format!(
                "priority string must start with a base suite keyword, found '{}'",
                first
            ))
        })?;

        let mut sel = Selection::for_suite(base);
        let mut session_cache = true;
        let mut tls12_tickets = true;
        let mut notes = Vec::new();

        for token in tokens {
            if token.is_empty() {
                return Err(ConnectError::unsupported_policy(format!(
                    "priority string '{}' contains an empty entry",
                    policy
                )));
            }
            if token.starts_with('%') {
                if let Some(directive) = SecurityDirective::from_token(token) {
                    match directive {
                        SecurityDirective::NoTickets => session_cache = false,
                        SecurityDirective::NoTicketsTls12 => tls12_tickets = false,
                        d if directive_unsupported(d) => {
                            return Err(ConnectError::unsupported_component(token))
                        }
                        _ => notes.push(format!("{} has no effect on this engine", token)),
                    }
                    continue;
                }
                match SecurityProfile::from_token(token) {
                    Some(p) if p != SecurityProfile::None => {
                        notes.push(format!(
                            "{} accepted; certificate checks follow the WebPKI rules",
                            token
                        ));
                        continue;
                    }
                    _ => return Err(ConnectError::unsupported_component(token)),
                }
            }

            let include = match token.as_bytes()[0] {
                b'+' => true,
                b'-' => false,
                _ => return Err(ConnectError::unsupported_component(token)),
            };
            let name = &token[1..];
            if let Some(component) = PolicyComponent::from_token(name) {
                match component_effect(component) {
                    Effect::Adjust(s) => sel.merge(&s, include),
                    Effect::NoOp => notes.push(format!("{} has no effect on this engine", token)),
                    Effect::Unsupported if include => {
                        return Err(ConnectError::unsupported_component(token))
                    }
                    Effect::Unsupported => {
                        notes.push(format!("{} is never offered by this engine", name))
                    }
                }
            } else if let Some(suite) = BaseSuite::from_token(name) {
                sel.merge(&Selection::for_suite(suite), include);
            } else {
                return Err(ConnectError::unsupported_component(token));
            }
        }

        Self::finish(policy, sel, session_cache, tls12_tickets, notes)
    }

    fn finish(
        policy: &str,
        sel: Selection,
        session_cache: bool,
        tls12_tickets: bool,
        notes: Vec<String>,
    ) -> ConnectResult<Self> {
        // Newest first.
        let versions: Vec<&'static SupportedProtocolVersion> = sel
            .versions
            .iter()
            .rev()
            .map(|v| match v {
                Version::Tls13 => &rustls::version::TLS13,
                Version::Tls12 => &rustls::version::TLS12,
            })
            .collect();
        if versions.is_empty() {
            return Err(ConnectError::unsupported_policy(format!(
                "priority string '{}' enables no protocol version",
                policy
            )));
        }

        let suites: Vec<SupportedCipherSuite> = suite_table()
            .into_iter()
            .filter(|(_, version, cipher, kx)| {
                sel.versions.contains(version)
                    && sel.ciphers.contains(cipher)
                    && kx.map_or(true, |k| sel.kx.contains(&k))
            })
            .map(|(suite, ..)| suite)
            .collect();
        if suites.is_empty() {
            return Err(ConnectError::unsupported_policy(format!(
                "priority string '{}' leaves no cipher suite for the enabled versions",
                policy
            )));
        }

        let groups: Vec<&'static dyn SupportedKxGroup> =
            sel.groups.iter().map(|g| group_impl(*g)).collect();
        if groups.is_empty() {
            return Err(ConnectError::unsupported_policy(format!(
                "priority string '{}' enables no key exchange group",
                policy
            )));
        }

        Ok(Self {
            source: policy.to_string(),
            versions,
            suites,
            groups,
            session_cache,
            tls12_tickets,
            notes,
        })
    }

    /// The priority string this policy was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn protocol_versions(&self) -> &[&'static SupportedProtocolVersion] {
        &self.versions
    }

    pub fn cipher_suites(&self) -> &[SupportedCipherSuite] {
        &self.suites
    }

    pub fn kx_group_count(&self) -> usize {
        self.groups.len()
    }

    /// False after `%NO_TICKETS`: nothing is cached, so data connections
    /// cannot resume the control session.
    pub fn session_cache(&self) -> bool {
        self.session_cache
    }

    /// False after `%NO_TICKETS_TLS12`: TLS 1.2 resumes by session id only.
    pub fn tls12_tickets(&self) -> bool {
        self.tls12_tickets
    }

    /// Tokens that were accepted without changing anything.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// `ring` provider restricted to this policy's suites and groups.
    pub fn crypto_provider(&self) -> CryptoProvider {
        CryptoProvider {
            cipher_suites: self.suites.clone(),
            kx_groups: self.groups.clone(),
            ..rustls::crypto::ring::default_provider()
        }
    }
}

fn directive_unsupported(d: SecurityDirective) -> bool {
    matches!(
        d,
        SecurityDirective::NoExtensions
            | SecurityDirective::NoSessionHash
            | SecurityDirective::UnsafeRenegotiation
            | SecurityDirective::DisableWildcards
            | SecurityDirective::VerifyAllowBroken
            | SecurityDirective::VerifyAllowSignRsaMd5
            | SecurityDirective::VerifyAllowSignWithSha1
            | SecurityDirective::VerifyAllowX509V1CaCrt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftplink_core::ConnectErrorKind;

    fn suite_names(p: &EnginePolicy) -> Vec<String> {
        p.cipher_suites()
            .iter()
            .map(|s| format!("{:?}", s.suite()))
            .collect()
    }

    #[test]
    fn normal_enables_everything_the_engine_has() {
        let p = EnginePolicy::parse("NORMAL").unwrap();
        assert_eq!(p.protocol_versions().len(), 2);
        assert_eq!(p.cipher_suites().len(), 9);
        assert_eq!(p.kx_group_count(), 3);
        assert!(p.session_cache());
        assert!(p.notes().is_empty());
    }

    #[test]
    fn excluding_tls12_leaves_only_tls13_suites() {
        let p = EnginePolicy::parse("NORMAL:-VERS-TLS1.2").unwrap();
        assert_eq!(p.protocol_versions().len(), 1);
        assert!(suite_names(&p).iter().all(|n| n.starts_with("TLS13_")));
    }

    #[test]
    fn removing_an_unsupported_version_is_harmless() {
        let p = EnginePolicy::parse("NORMAL:+VERS-TLS1.3:-VERS-TLS1.0:%PROFILE_HIGH").unwrap();
        assert_eq!(p.protocol_versions().len(), 2);
        assert_eq!(p.notes().len(), 2);
    }

    #[test]
    fn adding_legacy_components_is_refused() {
        for policy in ["NORMAL:+VERS-TLS1.0", "NORMAL:+3DES-CBC", "NORMAL:+RSA", "NORMAL:+GROUP-X448"] {
            let err = EnginePolicy::parse(policy).unwrap_err();
            assert_eq!(err.kind, ConnectErrorKind::UnsupportedPolicyComponent, "{}", policy);
        }
    }

    #[test]
    fn unsupported_directives_are_refused() {
        let err = EnginePolicy::parse("NORMAL:%NO_EXTENSIONS").unwrap_err();
        assert_eq!(err.kind, ConnectErrorKind::UnsupportedPolicyComponent);
        assert!(err.message.contains("%NO_EXTENSIONS"));
        assert!(EnginePolicy::parse("NORMAL:%VERIFY_ALLOW_BROKEN").is_err());
    }

    #[test]
    fn unknown_and_malformed_tokens_are_refused() {
        assert!(EnginePolicy::parse("").is_err());
        assert!(EnginePolicy::parse("+VERS-TLS1.3").is_err());
        assert!(EnginePolicy::parse("NORMAL:+WHATEVER").is_err());
        assert!(EnginePolicy::parse("NORMAL:VERS-TLS1.3").is_err());
        assert!(EnginePolicy::parse("NORMAL::+AES-128-GCM").is_err());
        assert!(EnginePolicy::parse("NORMAL:%PROFILE_NOPE").is_err());
    }

    #[test]
    fn none_base_requires_explicit_components() {
        assert!(EnginePolicy::parse("NONE").is_err());
        let p = EnginePolicy::parse(
            "NONE:+VERS-TLS1.3:+AES-256-GCM:+GROUP-X25519:+AEAD:+SIGN-ALL",
        )
        .unwrap();
        assert_eq!(suite_names(&p), vec!["TLS13_AES_256_GCM_SHA384".to_string()]);
    }

    #[test]
    fn tls12_only_needs_a_key_exchange() {
        let err = EnginePolicy::parse("NORMAL:-VERS-TLS1.3:-KX-ALL").unwrap_err();
        assert!(err.message.contains("no cipher suite"));
    }

    #[test]
    fn secure256_narrows_ciphers_and_groups() {
        let p = EnginePolicy::parse("SECURE256").unwrap();
        assert!(!suite_names(&p).iter().any(|n| n.contains("AES_128")));
        assert_eq!(p.kx_group_count(), 1);
    }

    #[test]
    fn suite_keywords_can_be_added() {
        let p = EnginePolicy::parse("SUITEB192:+SECURE128").unwrap();
        assert_eq!(p.cipher_suites().len(), 9);
    }

    #[test]
    fn ticket_directives() {
        let p = EnginePolicy::parse("NORMAL:%NO_TICKETS").unwrap();
        assert!(!p.session_cache());
        let p = EnginePolicy::parse("NORMAL:%NO_TICKETS_TLS12").unwrap();
        assert!(p.session_cache());
        assert!(!p.tls12_tickets());
    }

    #[test]
    fn provider_carries_the_selection() {
        let p = EnginePolicy::parse("NORMAL:-GROUP-ALL:+GROUP-X25519").unwrap();
        let provider = p.crypto_provider();
        assert_eq!(provider.kx_groups.len(), 1);
        assert_eq!(provider.cipher_suites.len(), p.cipher_suites().len());
    }
}
