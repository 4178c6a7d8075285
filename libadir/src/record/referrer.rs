// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Layer media type of public-key referrer artifacts.
pub const PUBLIC_KEY_MEDIA_TYPE: &str = "application/vnd.agntcy.dir.publickey.v1+pem";

/// Layer media type of cosign signature referrer artifacts.
pub const SIGNATURE_MEDIA_TYPE: &str = "application/vnd.dev.cosign.simplesigning.v1+json";

/// A typed sidecar artifact attached to a record.
///
/// Referrers are immutable, and several referrers of the same kind may
/// attach to one record. The payload is a tagged variant on the wire; it is
/// modelled as a sum type so every consumer has to match exhaustively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Referrer {
    PublicKey(PublicKey),
    Signature(Signature),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// PEM-encoded public key.
    pub pem: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Base64-encoded detached signature over the canonical cosign payload.
    pub signature: String,

    /// Sigstore bundle (protobuf JSON), present on keyless signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<serde_json::Value>,

    /// Signing certificate, present on keyless signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// RFC 3339 timestamp of when the signature was produced.
    pub signed_at: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown referrer media type {0}")]
    UnknownMediaType(String),

    #[error("referrer payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Referrer {
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => PUBLIC_KEY_MEDIA_TYPE,
            Self::Signature(_) => SIGNATURE_MEDIA_TYPE,
        }
    }

    /// The blob bytes this referrer is persisted as.
    ///
    /// Public keys are stored as the raw PEM document, signatures as a JSON
    /// envelope.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::PublicKey(key) => Ok(key.pem.clone().into_bytes()),
            Self::Signature(sig) => serde_json::to_vec(sig),
        }
    }

    pub fn decode(media_type: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        match media_type {
            PUBLIC_KEY_MEDIA_TYPE => Ok(Self::PublicKey(PublicKey {
                pem: std::str::from_utf8(payload)?.to_owned(),
            })),
            SIGNATURE_MEDIA_TYPE => Ok(Self::Signature(serde_json::from_slice(payload)?)),
            other => Err(DecodeError::UnknownMediaType(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum PemError {
    #[error("missing PEM armour")]
    MissingArmour,

    #[error("invalid base64 in PEM body")]
    Base64(#[from] base64::DecodeError),
}

impl PublicKey {
    /// Stable identifier of a key: the hex sha2-256 of the DER content of
    /// the PEM body.
    pub fn key_id(&self) -> Result<String, PemError> {
        let der = pem_body(&self.pem)?;
        let digest = multihash::Sha2_256::digest(&der);
        Ok(digest.digest().iter().map(|b| format!("{:02x}", b)).collect())
    }
}

fn pem_body(pem: &str) -> Result<Vec<u8>, PemError> {
    let mut body = String::new();
    let mut inside = false;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN") {
            inside = true;
        } else if line.starts_with("-----END") {
            if body.is_empty() {
                break;
            }
            return Ok(base64::decode(&body)?);
        } else if inside {
            body.push_str(line);
        }
    }
    Err(PemError::MissingArmour)
}


#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn payload_roundtrip() {
        for referrer in [
            Referrer::PublicKey(gen::public_key()),
            Referrer::Signature(gen::signature()),
        ] {
            let payload = referrer.payload().unwrap();
            let decoded = Referrer::decode(referrer.media_type(), &payload).unwrap();
            assert_eq!(referrer, decoded)
        }
    }

    #[test]
    fn unknown_media_type_is_rejected() {
        assert_matches!(
            Referrer::decode("application/octet-stream", b"x"),
            Err(DecodeError::UnknownMediaType(_))
        )
    }

    #[test]
    fn key_id_is_stable_hex() {
        let a = gen::public_key().key_id().unwrap();
        let b = gen::public_key().key_id().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()))
    }

    #[test]
    fn unarmoured_key_is_rejected() {
        let key = PublicKey {
            pem: "not a pem".to_owned(),
        };
        assert_matches!(key.key_id(), Err(PemError::MissingArmour))
    }
}
