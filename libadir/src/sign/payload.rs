// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_canonical::{canonical_json, CjsonError};
use serde::{Deserialize, Serialize};

/// The cosign "simple signing" envelope a record signature covers.
///
/// Derived from the record's manifest digest, never from the record bytes
/// directly: the signature binds to exactly what the registry addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleSigning {
    pub critical: Critical,
    pub optional: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critical {
    pub identity: Identity,
    pub image: Image,

    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "docker-reference")]
    pub docker_reference: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "docker-manifest-digest")]
    pub docker_manifest_digest: String,
}

pub const PAYLOAD_TYPE: &str = "cosign container image signature";

impl SimpleSigning {
    pub fn for_manifest_digest(digest: &str) -> Self {
        Self {
            critical: Critical {
                identity: Identity {
                    docker_reference: String::new(),
                },
                image: Image {
                    docker_manifest_digest: digest.to_owned(),
                },
                ty: PAYLOAD_TYPE.to_owned(),
            },
            optional: None,
        }
    }

    /// The byte string signatures are computed over. Canonical so that any
    /// two producers of the same digest sign the same bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CjsonError> {
        canonical_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn payload_is_deterministic() {
        let digest = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
        let a = SimpleSigning::for_manifest_digest(digest);
        let b = SimpleSigning::for_manifest_digest(digest);
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn payload_binds_the_digest() {
        let a = SimpleSigning::for_manifest_digest("sha256:aa");
        let b = SimpleSigning::for_manifest_digest("sha256:bb");
        assert_ne!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn envelope_shape() {
        let payload = SimpleSigning::for_manifest_digest("sha256:aa");
        let json: serde_json::Value =
            serde_json::from_slice(&payload.canonical_bytes().unwrap()).unwrap();
        assert_eq!(
            json["critical"]["image"]["docker-manifest-digest"],
            "sha256:aa"
        );
        assert_eq!(json["critical"]["type"], PAYLOAD_TYPE);
    }
}
