// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Content store over an OCI registry.
//!
//! Records are stored as OCI manifests whose config blob is the canonical
//! record encoding, tagged by CID. Signatures and public keys attach as
//! referrer manifests whose `subject` points at the record manifest. The
//! registry itself is behind the [`Registry`] trait; [`registry::Mem`]
//! serves tests, [`registry::Fs`] a registry-less local node, and
//! [`registry::Remote`] a real registry.

use std::{collections::BTreeMap, ops::ControlFlow};

use thiserror::Error as ThisError;

use adir_canonical::{Cid, CjsonError};

use crate::{
    error::{Code, Coded},
    record::{
        referrer::{self, Referrer},
        validation::{self, Limits},
        Record,
    },
};

pub mod config;
pub mod events;
pub mod manifest;
pub mod registry;
pub mod verified;

pub use config::Config;
pub use events::{Event, WithEvents};
pub use manifest::{sha256_digest, Descriptor, Manifest};
pub use registry::Registry;
pub use verified::WithVerification;

/// Annotation keys carried on record manifests.
pub mod annotations {
    pub const NAME: &str = "org.agntcy.dir/name";
    pub const CREATED_AT: &str = "org.agntcy.dir/created_at";
    pub const SCHEMA_TYPE: &str = "org.agntcy.dir/schema.type";
    pub const SCHEMA_VERSION: &str = "org.agntcy.dir/schema.version";
    pub const SCHEMA_FORMAT: &str = "org.agntcy.dir/schema.format";
    pub const SIGNED_AT: &str = "org.agntcy.dir/signed_at";

    pub const VERIFIED: &str = "org.agntcy.dir/verified";
    pub const VERIFIED_DOMAIN: &str = "org.agntcy.dir/verified.domain";
    pub const VERIFIED_METHOD: &str = "org.agntcy.dir/verified.method";
    pub const VERIFIED_KEY_ID: &str = "org.agntcy.dir/verified.key_id";
    pub const VERIFIED_AT: &str = "org.agntcy.dir/verified.at";
    pub const VERIFIED_ERROR: &str = "org.agntcy.dir/verified.error";
}

/// Lookup-time metadata of a stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordMeta {
    pub cid: Cid,
    pub size: u64,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("no record found for {0}")]
    NotFound(Cid),

    #[error("no manifest for reference {0}")]
    ManifestNotFound(String),

    #[error("no blob for digest {0}")]
    BlobNotFound(String),

    #[error(transparent)]
    Validation(#[from] validation::Error),

    #[error(transparent)]
    Referrer(#[from] referrer::DecodeError),

    #[error(transparent)]
    Canonical(#[from] CjsonError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("registry: {0}")]
    Registry(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    pub fn registry<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Registry(Box::new(e))
    }
}

impl Coded for Error {
    fn code(&self) -> Code {
        match self {
            Self::NotFound(_) | Self::ManifestNotFound(_) | Self::BlobNotFound(_) => Code::NotFound,
            Self::Validation(e) => e.code(),
            Self::Referrer(_) => Code::Invalid,
            Self::Canonical(_) | Self::Json(_) => Code::Internal,
            Self::Registry(_) => Code::Unavailable,
        }
    }
}

/// The OCI adapter.
///
/// All operations are idempotent where the contract asks for it: re-pushing
/// byte-identical content is a no-op, deleting an absent record succeeds.
#[derive(Clone)]
pub struct Store<R> {
    registry: R,
    limits: Limits,
}

impl<R> Store<R> {
    pub fn new(registry: R, limits: Limits) -> Self {
        Self { registry, limits }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

impl<R: Registry> Store<R> {
    /// Push a record, returning its CID.
    #[tracing::instrument(level = "debug", skip_all, fields(name = %record.name))]
    pub async fn push(&self, record: &Record) -> Result<Cid, Error> {
        validation::validate(record, &self.limits)?;

        let bytes = record.canonical_bytes()?;
        let cid = Cid::digest(&bytes);

        match self.registry.pull_manifest(&cid.to_string()).await {
            Ok(_) => return Ok(cid),
            Err(Error::ManifestNotFound(_)) => (),
            Err(e) => return Err(e),
        }

        let blob_digest = self.registry.push_blob(&bytes).await?;
        let manifest = Manifest::record(record, &blob_digest, bytes.len() as u64);
        self.registry
            .push_manifest(&cid.to_string(), manifest.to_bytes()?)
            .await?;

        tracing::debug!(%cid, "record pushed");
        Ok(cid)
    }

    /// Pull the record addressed by `cid`.
    pub async fn pull(&self, cid: &Cid) -> Result<Record, Error> {
        let (manifest, _digest) = self.record_manifest(cid).await?;
        let blob = self.registry.pull_blob(&manifest.config.digest).await?;
        Ok(Record::from_slice(&blob)?)
    }

    /// Resolve the manifest of `cid` and report its size and annotations.
    pub async fn lookup(&self, cid: &Cid) -> Result<RecordMeta, Error> {
        let (manifest, _digest) = self.record_manifest(cid).await?;
        Ok(RecordMeta {
            cid: cid.clone(),
            size: manifest.config.size,
            annotations: manifest.annotations,
        })
    }

    /// Untag and delete the record manifest.
    ///
    /// Referrer cleanup is left to the registry's garbage collection, which
    /// follows the `subject` links.
    pub async fn delete(&self, cid: &Cid) -> Result<(), Error> {
        match self.registry.delete_manifest(&cid.to_string()).await {
            Ok(()) | Err(Error::ManifestNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Attach a referrer artifact to the record addressed by `cid`.
    #[tracing::instrument(level = "debug", skip_all, fields(%cid, kind = referrer.media_type()))]
    pub async fn push_referrer(&self, cid: &Cid, referrer: &Referrer) -> Result<(), Error> {
        let (subject_manifest, subject_digest) = self.record_manifest(cid).await?;
        let subject = Descriptor {
            media_type: manifest::MEDIA_TYPE_MANIFEST.to_owned(),
            digest: subject_digest.clone(),
            size: subject_manifest.to_bytes()?.len() as u64,
            artifact_type: None,
        };

        let payload = referrer.payload()?;
        let payload_digest = self.registry.push_blob(&payload).await?;
        let empty = self.registry.push_blob(manifest::EMPTY_CONFIG).await?;

        let manifest = Manifest::referrer(referrer, subject, &payload_digest, payload.len() as u64, &empty);
        let tag = referrer_tag(&subject_digest, referrer.media_type(), &payload_digest);
        self.registry.push_manifest(&tag, manifest.to_bytes()?).await?;

        Ok(())
    }

    /// Enumerate referrers of `cid`, optionally filtered to one layer media
    /// type, invoking `f` per decoded referrer until it breaks or the set is
    /// exhausted. Order is registry-defined; concurrent pushes may or may
    /// not be observed.
    pub async fn walk_referrers<F>(
        &self,
        cid: &Cid,
        media_type: Option<&str>,
        mut f: F,
    ) -> Result<(), Error>
    where
        F: FnMut(Referrer) -> ControlFlow<()>,
    {
        let (_, subject_digest) = self.record_manifest(cid).await?;
        let prefix = tag_prefix(&subject_digest);

        for tag in self.registry.list_tags().await? {
            let kind = match tag.strip_prefix(&prefix).and_then(|rest| rest.split('.').next()) {
                Some(kind) => kind,
                None => continue,
            };
            if let Some(filter) = media_type {
                if referrer_kind(filter) != kind {
                    continue;
                }
            }

            let (bytes, _digest) = match self.registry.pull_manifest(&tag).await {
                Ok(found) => found,
                // raced with a delete; partial views are allowed
                Err(Error::ManifestNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let manifest = Manifest::from_slice(&bytes)?;
            let layer = match manifest.layers.first() {
                Some(layer) => layer,
                None => continue,
            };
            let payload = self.registry.pull_blob(&layer.digest).await?;
            let referrer = Referrer::decode(&layer.media_type, &payload)?;

            if let ControlFlow::Break(()) = f(referrer) {
                break;
            }
        }

        Ok(())
    }

    /// Convenience over [`Store::walk_referrers`] collecting the full set.
    pub async fn referrers(
        &self,
        cid: &Cid,
        media_type: Option<&str>,
    ) -> Result<Vec<Referrer>, Error> {
        let mut out = Vec::new();
        self.walk_referrers(cid, media_type, |referrer| {
            out.push(referrer);
            ControlFlow::Continue(())
        })
        .await?;
        Ok(out)
    }

    /// The digest of the record manifest, as referrer subjects see it.
    pub async fn manifest_digest(&self, cid: &Cid) -> Result<String, Error> {
        self.record_manifest(cid).await.map(|(_, digest)| digest)
    }

    async fn record_manifest(&self, cid: &Cid) -> Result<(Manifest, String), Error> {
        match self.registry.pull_manifest(&cid.to_string()).await {
            Ok((bytes, digest)) => Ok((Manifest::from_slice(&bytes)?, digest)),
            Err(Error::ManifestNotFound(_)) => Err(Error::NotFound(cid.clone())),
            Err(e) => Err(e),
        }
    }
}

/// Fallback tag under which a referrer manifest is also addressable, in the
/// cosign triangle style: `sha256-<subject>.<kind>.<payload-prefix>`.
fn referrer_tag(subject_digest: &str, media_type: &str, payload_digest: &str) -> String {
    let payload_hex = payload_digest.trim_start_matches("sha256:");
    format!(
        "{}{}.{}",
        tag_prefix(subject_digest),
        referrer_kind(media_type),
        &payload_hex[..payload_hex.len().min(16)]
    )
}

fn tag_prefix(subject_digest: &str) -> String {
    format!("sha256-{}.", subject_digest.trim_start_matches("sha256:"))
}

fn referrer_kind(media_type: &str) -> &'static str {
    match media_type {
        referrer::PUBLIC_KEY_MEDIA_TYPE => "key",
        _ => "sig",
    }
}
