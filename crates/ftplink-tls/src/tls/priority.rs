//! Cipher policy description and its canonical priority string.
//!
//! A [`CipherPolicySpec`] names a base suite, ordered `+`/`-` adjustments,
//! ordered directives and an optional verification profile. The
//! [`PriorityPolicyBuilder`] joins their canonical tokens with `:`, e.g.
//! `NORMAL:+VERS-TLS1.3:-VERS-TLS1.0:%PROFILE_HIGH`. Order is preserved and
//! duplicates are kept; resolving conflicts is the engine's business.

use ftplink_core::ConnectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a closed set of policy tokens with lookups in both directions.
macro_rules! policy_tokens {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $token:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Canonical token as it appears in a priority string.
            pub fn token(self) -> &'static str {
                match self {
                    $( $name::$variant => $token, )+
                }
            }

            /// Case-insensitive reverse lookup.
            pub fn from_token(token: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.token().eq_ignore_ascii_case(token))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }

        impl FromStr for $name {
            type Err = ConnectError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_token(s.trim()).ok_or_else(|| ConnectError::unsupported_component(s))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::from_token(s.trim())
                    .ok_or_else(|| format!("unknown {} '{}'", stringify!($name), s))
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.token().to_string()
            }
        }
    };
}

policy_tokens! {
    /// Predefined starting point of a policy.
    BaseSuite {
        Performance => "PERFORMANCE",
        Normal => "NORMAL",
        Legacy => "LEGACY",
        PerfectForwardSecrecy => "PFS",
        Secure128 => "SECURE128",
        Secure192 => "SECURE192",
        Secure256 => "SECURE256",
        SuiteB128 => "SUITEB128",
        SuiteB192 => "SUITEB192",
        /// Nothing enabled; every algorithm must be added explicitly.
        None => "NONE",
    }
}

policy_tokens! {
    /// Algorithm or protocol component that can be added or removed.
    PolicyComponent {
        // protocol versions
        VersAll => "VERS-ALL",
        VersTlsAll => "VERS-TLS-ALL",
        VersSsl3 => "VERS-SSL3.0",
        VersTls10 => "VERS-TLS1.0",
        VersTls11 => "VERS-TLS1.1",
        VersTls12 => "VERS-TLS1.2",
        VersTls13 => "VERS-TLS1.3",
        // bulk ciphers
        CipherAll => "CIPHER-ALL",
        Aes128Gcm => "AES-128-GCM",
        Aes256Gcm => "AES-256-GCM",
        Chacha20Poly1305 => "CHACHA20-POLY1305",
        Aes128Ccm => "AES-128-CCM",
        Aes256Ccm => "AES-256-CCM",
        Aes128Cbc => "AES-128-CBC",
        Aes256Cbc => "AES-256-CBC",
        Camellia128Gcm => "CAMELLIA-128-GCM",
        Camellia256Gcm => "CAMELLIA-256-GCM",
        TripleDesCbc => "3DES-CBC",
        Arcfour128 => "ARCFOUR-128",
        NullCipher => "NULL",
        // MACs
        MacAll => "MAC-ALL",
        Aead => "AEAD",
        Sha1 => "SHA1",
        Sha256 => "SHA256",
        Sha384 => "SHA384",
        Md5 => "MD5",
        // key exchange
        KxAll => "KX-ALL",
        Rsa => "RSA",
        DheRsa => "DHE-RSA",
        EcdheRsa => "ECDHE-RSA",
        EcdheEcdsa => "ECDHE-ECDSA",
        // groups
        GroupAll => "GROUP-ALL",
        GroupX25519 => "GROUP-X25519",
        GroupSecp256r1 => "GROUP-SECP256R1",
        GroupSecp384r1 => "GROUP-SECP384R1",
        GroupSecp521r1 => "GROUP-SECP521R1",
        GroupX448 => "GROUP-X448",
        GroupFfdhe2048 => "GROUP-FFDHE2048",
        // signatures, certificate types, compression
        SignAll => "SIGN-ALL",
        SignRsaSha256 => "SIGN-RSA-SHA256",
        SignRsaSha384 => "SIGN-RSA-SHA384",
        SignEcdsaSha256 => "SIGN-ECDSA-SHA256",
        SignEcdsaSha384 => "SIGN-ECDSA-SHA384",
        SignEd25519 => "SIGN-EDDSA-ED25519",
        SignRsaMd5 => "SIGN-RSA-MD5",
        CtypeAll => "CTYPE-ALL",
        CtypeX509 => "CTYPE-X509",
        CompNull => "COMP-NULL",
    }
}

policy_tokens! {
    /// `%`-prefixed behaviour directive.
    SecurityDirective {
        CompatibilityMode => "%COMPAT",
        DumbFirewall => "%DUMBFW",
        NoExtensions => "%NO_EXTENSIONS",
        NoStatusRequest => "%NO_STATUS_REQUEST",
        NoTickets => "%NO_TICKETS",
        NoTicketsTls12 => "%NO_TICKETS_TLS12",
        NoSessionHash => "%NO_SESSION_HASH",
        ServerPrecedence => "%SERVER_PRECEDENCE",
        Ssl3RecordVersion => "%SSL3_RECORD_VERSION",
        LatestRecordVersion => "%LATEST_RECORD_VERSION",
        DisableWildcards => "%DISABLE_WILDCARDS",
        NoEncryptThenMac => "%NO_ETM",
        ForceEncryptThenMac => "%FORCE_ETM",
        DisableSafeRenegotiation => "%DISABLE_SAFE_RENEGOTIATION",
        UnsafeRenegotiation => "%UNSAFE_RENEGOTIATION",
        PartialRenegotiation => "%PARTIAL_RENEGOTIATION",
        SafeRenegotiation => "%SAFE_RENEGOTIATION",
        FallbackScsv => "%FALLBACK_SCSV",
        DisableTls13CompatMode => "%DISABLE_TLS13_COMPAT_MODE",
        VerifyAllowBroken => "%VERIFY_ALLOW_BROKEN",
        VerifyAllowSignRsaMd5 => "%VERIFY_ALLOW_SIGN_RSA_MD5",
        VerifyAllowSignWithSha1 => "%VERIFY_ALLOW_SIGN_WITH_SHA1",
        VerifyDisableCrlChecks => "%VERIFY_DISABLE_CRL_CHECKS",
        VerifyAllowX509V1CaCrt => "%VERIFY_ALLOW_X509_V1_CA_CRT",
    }
}

policy_tokens! {
    /// Certificate verification profile. `None` adds nothing to the string.
    SecurityProfile {
        None => "",
        VeryWeak => "%PROFILE_VERY_WEAK",
        Low => "%PROFILE_LOW",
        Legacy => "%PROFILE_LEGACY",
        Medium => "%PROFILE_MEDIUM",
        High => "%PROFILE_HIGH",
        Ultra => "%PROFILE_ULTRA",
        Future => "%PROFILE_FUTURE",
        SuiteB128 => "%PROFILE_SUITEB128",
        SuiteB192 => "%PROFILE_SUITEB192",
    }
}

impl Default for BaseSuite {
    fn default() -> Self {
        Self::Normal
    }
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self::None
    }
}

// ─── Spec ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyOp {
    Include,
    Exclude,
}

impl PolicyOp {
    pub fn sign(self) -> char {
        match self {
            PolicyOp::Include => '+',
            PolicyOp::Exclude => '-',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOption {
    pub op: PolicyOp,
    pub component: PolicyComponent,
}

/// Cipher-suite selection for one TLS upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherPolicySpec {
    #[serde(default)]
    pub suite: BaseSuite,
    #[serde(default)]
    pub options: Vec<PolicyOption>,
    #[serde(default)]
    pub specials: Vec<SecurityDirective>,
    #[serde(default)]
    pub profile: SecurityProfile,
}

impl CipherPolicySpec {
    pub fn new(suite: BaseSuite) -> Self {
        Self {
            suite,
            ..Self::default()
        }
    }

    pub fn include(mut self, component: PolicyComponent) -> Self {
        self.options.push(PolicyOption {
            op: PolicyOp::Include,
            component,
        });
        self
    }

    pub fn exclude(mut self, component: PolicyComponent) -> Self {
        self.options.push(PolicyOption {
            op: PolicyOp::Exclude,
            component,
        });
        self
    }

    pub fn directive(mut self, directive: SecurityDirective) -> Self {
        self.specials.push(directive);
        self
    }

    pub fn profile(mut self, profile: SecurityProfile) -> Self {
        self.profile = profile;
        self
    }
}

// ─── Builder ─────────────────────────────────────────────────────────

/// Turns a [`CipherPolicySpec`] into its priority string.
pub struct PriorityPolicyBuilder;

impl PriorityPolicyBuilder {
    /// Pure and deterministic: equal specs give byte-identical strings.
    pub fn build(spec: &CipherPolicySpec) -> String {
        let mut out = String::from(spec.suite.token());
        for option in &spec.options {
            out.push(':');
            out.push(option.op.sign());
            out.push_str(option.component.token());
        }
        for directive in &spec.specials {
            out.push(':');
            out.push_str(directive.token());
        }
        if spec.profile != SecurityProfile::None {
            out.push(':');
            out.push_str(spec.profile.token());
        }
        out
    }
}

/// Apply a caller override to the built string.
///
/// Empty or absent keeps the built string; a leading `+` or `-` appends the
/// override to it; anything else replaces it verbatim.
pub fn resolve_policy(spec: &CipherPolicySpec, override_str: Option<&str>) -> String {
    match override_str.map(str::trim).filter(|s| !s.is_empty()) {
        None => PriorityPolicyBuilder::build(spec),
        Some(o) if o.starts_with('+') || o.starts_with('-') => {
            format!("{}:{}", PriorityPolicyBuilder::build(spec), o)
        }
        Some(o) => o.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> CipherPolicySpec {
        CipherPolicySpec::new(BaseSuite::Normal)
            .include(PolicyComponent::VersTls13)
            .exclude(PolicyComponent::VersTls10)
            .profile(SecurityProfile::High)
    }

    #[test]
    fn builds_canonical_string() {
        assert_eq!(
            PriorityPolicyBuilder::build(&example()),
            "NORMAL:+VERS-TLS1.3:-VERS-TLS1.0:%PROFILE_HIGH"
        );
    }

    #[test]
    fn build_is_deterministic() {
        let spec = example()
            .directive(SecurityDirective::NoTicketsTls12)
            .include(PolicyComponent::GroupX25519);
        let first = PriorityPolicyBuilder::build(&spec);
        for _ in 0..16 {
            assert_eq!(PriorityPolicyBuilder::build(&spec.clone()), first);
        }
    }

    #[test]
    fn options_come_before_directives_and_keep_order_and_duplicates() {
        let spec = CipherPolicySpec::new(BaseSuite::Secure256)
            .directive(SecurityDirective::NoTickets)
            .include(PolicyComponent::Aes256Gcm)
            .exclude(PolicyComponent::Aes256Gcm)
            .include(PolicyComponent::Aes256Gcm)
            .directive(SecurityDirective::NoTickets);
        assert_eq!(
            PriorityPolicyBuilder::build(&spec),
            "SECURE256:+AES-256-GCM:-AES-256-GCM:+AES-256-GCM:%NO_TICKETS:%NO_TICKETS"
        );
    }

    #[test]
    fn bare_suite() {
        assert_eq!(PriorityPolicyBuilder::build(&CipherPolicySpec::default()), "NORMAL");
        assert_eq!(
            PriorityPolicyBuilder::build(&CipherPolicySpec::new(BaseSuite::PerfectForwardSecrecy)),
            "PFS"
        );
    }

    #[test]
    fn override_rules() {
        let spec = example();
        let built = PriorityPolicyBuilder::build(&spec);
        assert_eq!(resolve_policy(&spec, None), built);
        assert_eq!(resolve_policy(&spec, Some("  ")), built);
        assert_eq!(
            resolve_policy(&spec, Some("-VERS-TLS1.2")),
            format!("{}:-VERS-TLS1.2", built)
        );
        assert_eq!(
            resolve_policy(&spec, Some("SECURE128:%NO_TICKETS")),
            "SECURE128:%NO_TICKETS"
        );
    }

    #[test]
    fn tokens_round_trip_through_lookup() {
        for c in PolicyComponent::ALL {
            assert_eq!(PolicyComponent::from_token(c.token()), Some(*c));
        }
        assert_eq!(BaseSuite::from_token("secure192"), Some(BaseSuite::Secure192));
        assert!("GROUP-NOPE".parse::<PolicyComponent>().is_err());
    }

    #[test]
    fn spec_serializes_with_tokens() {
        let json = serde_json::to_value(example()).unwrap();
        assert_eq!(json["suite"], "NORMAL");
        assert_eq!(json["options"][0]["op"], "include");
        assert_eq!(json["options"][0]["component"], "VERS-TLS1.3");
        assert_eq!(json["profile"], "%PROFILE_HIGH");

        let parsed: CipherPolicySpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, example());

        let minimal: CipherPolicySpec = serde_json::from_str("{}").unwrap();
        assert_eq!(minimal, CipherPolicySpec::default());
    }
}
