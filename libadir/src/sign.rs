// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Cosign signature verification.
//!
//! Signing itself is a client capability; the node only verifies. Each
//! signature referrer of a record is checked against the canonical cosign
//! payload derived from the record's manifest digest, either through its
//! attached Sigstore bundle (keyless path) or against the record's
//! public-key referrers (key path). Verified signer identities are
//! persisted, one row per signer.

use thiserror::Error as ThisError;

use crate::error::{Code, Coded};

pub mod payload;
pub mod store;
pub mod task;
pub mod verifier;

pub use store::Signers;
pub use task::VerifySignatures;
pub use verifier::{Cosign, Verifier};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignerKind {
    Key,
    Oidc,
}

impl SignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Oidc => "oidc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "key" => Some(Self::Key),
            "oidc" => Some(Self::Oidc),
            _ => None,
        }
    }
}

/// A verified signer identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signer {
    pub kind: SignerKind,
    /// OIDC path: token issuer.
    pub issuer: Option<String>,
    /// OIDC path: signing identity.
    pub subject: Option<String>,
    /// Key path: the PEM the signature verified against.
    pub public_key: Option<String>,
    /// Key path: the scheme that verified.
    pub algorithm: Option<String>,
}

impl Signer {
    pub fn key(public_key: String, algorithm: String) -> Self {
        Self {
            kind: SignerKind::Key,
            issuer: None,
            subject: None,
            public_key: Some(public_key),
            algorithm: Some(algorithm),
        }
    }

    pub fn oidc(issuer: String, subject: String) -> Self {
        Self {
            kind: SignerKind::Oidc,
            issuer: Some(issuer),
            subject: Some(subject),
            public_key: None,
            algorithm: None,
        }
    }

    /// Natural key of the row: collapses the identity columns, which are
    /// nullable, into one non-null value.
    pub fn natural_key(&self) -> String {
        match self.kind {
            SignerKind::Oidc => format!(
                "oidc:{}:{}",
                self.issuer.as_deref().unwrap_or_default(),
                self.subject.as_deref().unwrap_or_default()
            ),
            SignerKind::Key => format!(
                "key:{}",
                crate::store::sha256_digest(
                    self.public_key.as_deref().unwrap_or_default().trim().as_bytes()
                )
            ),
        }
    }
}

/// Trust material the keyless path verifies against.
#[derive(Clone, Debug, Default)]
pub struct TrustRoot {
    pub fulcio_pem: Vec<String>,
    pub rekor_key_pem: Option<String>,
    pub tsa_pem: Vec<String>,
    pub ct_log_keys_pem: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub enabled: bool,
    /// Use the Sigstore staging trust root instead of public-good.
    pub staging: bool,
    /// Offline trust root; when absent the embedded root for the selected
    /// environment applies.
    pub trust_root: Option<TrustRoot>,
    pub ignore_tlog: bool,
    pub ignore_tsa: bool,
    pub ignore_sct: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            staging: false,
            trust_root: None,
            ignore_tlog: false,
            ignore_tsa: false,
            ignore_sct: false,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("signature does not verify: {0}")]
    Rejected(String),

    #[error("malformed bundle: {0}")]
    Bundle(String),

    #[error("malformed signature payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] adir_canonical::cid::ParseError),

    #[error(transparent)]
    Store(#[from] crate::store::Error),

    #[error(transparent)]
    Canonical(#[from] adir_canonical::CjsonError),
}

impl Coded for Error {
    fn code(&self) -> Code {
        match self {
            Self::Rejected(_) | Self::Bundle(_) | Self::Encoding(_) => Code::Invalid,
            Self::Db(_) => Code::Unavailable,
            Self::Corrupt(_) | Self::Canonical(_) => Code::Internal,
            Self::Store(e) => e.code(),
        }
    }
}
