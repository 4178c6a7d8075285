// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{referrer::Referrer, Record};

use super::annotations;

pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Artifact type of record manifests.
pub const ARTIFACT_TYPE_RECORD: &str = "application/vnd.org.agntcy.dir.Object";

/// Media type of the record config blob (the canonical record encoding).
pub const MEDIA_TYPE_RECORD: &str = "application/vnd.org.agntcy.dir.object.v1+json";

/// Config blob of referrer manifests, per the OCI artifact guidance.
pub const MEDIA_TYPE_EMPTY: &str = "application/vnd.oci.empty.v1+json";
pub const EMPTY_CONFIG: &[u8] = b"{}";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

/// An OCI image manifest, reduced to the fields the directory reads and
/// writes. Serialisation is by raw bytes throughout the store, so the digest
/// a registry computes is the digest of exactly what was serialised here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u64,
    pub media_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    pub config: Descriptor,

    #[serde(default)]
    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// The manifest of a record: config blob carries the canonical record
    /// bytes, annotations the search-free projections.
    pub fn record(record: &Record, blob_digest: &str, blob_size: u64) -> Self {
        let mut ann = BTreeMap::new();
        ann.insert(annotations::NAME.to_owned(), record.name.clone());
        ann.insert(annotations::CREATED_AT.to_owned(), record.created_at.clone());
        ann.insert(annotations::SCHEMA_TYPE.to_owned(), "oasf.record".to_owned());
        ann.insert(
            annotations::SCHEMA_VERSION.to_owned(),
            record.schema_version.clone(),
        );
        ann.insert(annotations::SCHEMA_FORMAT.to_owned(), "json".to_owned());

        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST.to_owned(),
            artifact_type: Some(ARTIFACT_TYPE_RECORD.to_owned()),
            config: Descriptor {
                media_type: MEDIA_TYPE_RECORD.to_owned(),
                digest: blob_digest.to_owned(),
                size: blob_size,
                artifact_type: None,
            },
            layers: vec![],
            subject: None,
            annotations: ann,
        }
    }

    /// The manifest of a referrer: one payload layer, `subject` pointing at
    /// the record manifest.
    pub fn referrer(
        referrer: &Referrer,
        subject: Descriptor,
        payload_digest: &str,
        payload_size: u64,
        empty_digest: &str,
    ) -> Self {
        let mut ann = BTreeMap::new();
        if let Referrer::Signature(sig) = referrer {
            ann.insert(annotations::SIGNED_AT.to_owned(), sig.signed_at.clone());
        }

        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST.to_owned(),
            artifact_type: Some(referrer.media_type().to_owned()),
            config: Descriptor {
                media_type: MEDIA_TYPE_EMPTY.to_owned(),
                digest: empty_digest.to_owned(),
                size: EMPTY_CONFIG.len() as u64,
                artifact_type: None,
            },
            layers: vec![Descriptor {
                media_type: referrer.media_type().to_owned(),
                digest: payload_digest.to_owned(),
                size: payload_size,
                artifact_type: None,
            }],
            subject: Some(subject),
            annotations: ann,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// The `sha256:<hex>` digest of a byte string, as OCI descriptors carry it.
pub fn sha256_digest(bytes: &[u8]) -> String {
    let digest = multihash::Sha2_256::digest(bytes);
    let hex: String = digest.digest().iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::record::gen;

    #[test]
    fn manifest_bytes_roundtrip() {
        let record = gen::record("https://cisco.com/agent", "v1.0.0");
        let bytes = record.canonical_bytes().unwrap();
        let manifest = Manifest::record(&record, &sha256_digest(&bytes), bytes.len() as u64);

        let encoded = manifest.to_bytes().unwrap();
        assert_eq!(manifest, Manifest::from_slice(&encoded).unwrap());
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(sha256_digest(b"x"), sha256_digest(b"x"));
        assert!(sha256_digest(b"x").starts_with("sha256:"));
        assert_eq!(sha256_digest(b"x").len(), 7 + 64);
    }
}
