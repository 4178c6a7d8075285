// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Wire ⇄ model conversions.

use adir_proto::v1;
use libadir::{
    record::{
        referrer::{PublicKey, Referrer, Signature},
        Domain, Locator, Module, Skill,
    },
    sign::{Signer, SignerKind},
    sync,
    Record,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("referrer payload missing")]
    MissingReferrer,

    #[error("bundle is not valid JSON: {0}")]
    Bundle(#[from] serde_json::Error),
}

impl From<v1::Record> for Record {
    fn from(wire: v1::Record) -> Self {
        Self {
            name: wire.name,
            version: wire.version,
            schema_version: wire.schema_version,
            created_at: wire.created_at,
            authors: wire.authors,
            skills: wire
                .skills
                .into_iter()
                .map(|s| Skill {
                    id: s.id,
                    name: s.name,
                })
                .collect(),
            locators: wire
                .locators
                .into_iter()
                .map(|l| Locator {
                    ty: l.r#type,
                    url: l.url,
                    size: l.size,
                    digest: l.digest,
                })
                .collect(),
            modules: wire
                .modules
                .into_iter()
                .map(|m| Module {
                    id: m.id,
                    name: m.name,
                    version: m.version,
                })
                .collect(),
            domains: wire
                .domains
                .into_iter()
                .map(|d| Domain {
                    id: d.id,
                    name: d.name,
                })
                .collect(),
        }
    }
}

impl From<Record> for v1::Record {
    fn from(record: Record) -> Self {
        Self {
            name: record.name,
            version: record.version,
            schema_version: record.schema_version,
            created_at: record.created_at,
            authors: record.authors,
            skills: record
                .skills
                .into_iter()
                .map(|s| v1::Skill {
                    id: s.id,
                    name: s.name,
                })
                .collect(),
            locators: record
                .locators
                .into_iter()
                .map(|l| v1::Locator {
                    r#type: l.ty,
                    url: l.url,
                    size: l.size,
                    digest: l.digest,
                })
                .collect(),
            modules: record
                .modules
                .into_iter()
                .map(|m| v1::Module {
                    id: m.id,
                    name: m.name,
                    version: m.version,
                })
                .collect(),
            domains: record
                .domains
                .into_iter()
                .map(|d| v1::Domain {
                    id: d.id,
                    name: d.name,
                })
                .collect(),
        }
    }
}

impl TryFrom<v1::push_referrer_request::Referrer> for Referrer {
    type Error = DecodeError;

    fn try_from(wire: v1::push_referrer_request::Referrer) -> Result<Self, Self::Error> {
        match wire {
            v1::push_referrer_request::Referrer::PublicKey(key) => {
                Ok(Self::PublicKey(PublicKey { pem: key.pem }))
            },
            v1::push_referrer_request::Referrer::Signature(sig) => {
                Ok(Self::Signature(Signature {
                    signature: sig.signature,
                    bundle: sig
                        .bundle
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()?,
                    certificate: sig.certificate,
                    content_type: sig.content_type,
                    signed_at: sig.signed_at,
                }))
            },
        }
    }
}

impl From<Referrer> for v1::pull_referrer_response::Referrer {
    fn from(referrer: Referrer) -> Self {
        match referrer {
            Referrer::PublicKey(key) => Self::PublicKey(v1::PublicKey { pem: key.pem }),
            Referrer::Signature(sig) => Self::Signature(v1::Signature {
                signature: sig.signature,
                bundle: sig.bundle.as_ref().map(|b| b.to_string()),
                certificate: sig.certificate,
                content_type: sig.content_type,
                signed_at: sig.signed_at,
            }),
        }
    }
}

pub fn sync_status(status: sync::Status) -> v1::SyncStatus {
    match status {
        sync::Status::Pending => v1::SyncStatus::Pending,
        sync::Status::InProgress => v1::SyncStatus::InProgress,
        sync::Status::Completed => v1::SyncStatus::Completed,
        sync::Status::Failed => v1::SyncStatus::Failed,
        sync::Status::DeletePending => v1::SyncStatus::DeletePending,
        sync::Status::Deleted => v1::SyncStatus::Deleted,
    }
}

impl From<sync::Sync> for v1::Sync {
    fn from(row: sync::Sync) -> Self {
        Self {
            id: row.id,
            remote_directory_url: row.remote_directory_url,
            cids: row.cids.unwrap_or_default(),
            status: sync_status(row.status) as i32,
            remote_registry_url: row.remote_registry_url,
            created_at: row.created_at,
            last_update_at: row.last_update_at,
        }
    }
}

impl From<Signer> for v1::Signer {
    fn from(signer: Signer) -> Self {
        let inner = match signer.kind {
            SignerKind::Key => v1::signer::Signer::Key(v1::KeySigner {
                public_key: signer.public_key.unwrap_or_default(),
                algorithm: signer.algorithm.unwrap_or_default(),
            }),
            SignerKind::Oidc => v1::signer::Signer::Oidc(v1::OidcSigner {
                issuer: signer.issuer.unwrap_or_default(),
                subject: signer.subject.unwrap_or_default(),
            }),
        };
        Self {
            signer: Some(inner),
        }
    }
}
