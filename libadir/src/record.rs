// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_canonical::{canonical_json, Cid, CjsonError};
use serde::{Deserialize, Serialize};

pub mod referrer;
pub mod validation;

pub use referrer::Referrer;

/// A structured, immutable metadata document describing an agent.
///
/// Records are content-addressed: the [`Cid`] is derived from the canonical
/// serialisation, so pushing an equivalent serialisation always yields the
/// same identifier, and any byte difference yields a different one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub version: String,
    pub schema_version: String,

    /// RFC 3339 timestamp. Kept verbatim as supplied: re-rendering a parsed
    /// timestamp could alter the canonical bytes, and with them the CID.
    pub created_at: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<Skill>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locators: Vec<Locator>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<Module>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<Domain>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(rename = "type")]
    pub ty: String,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: u64,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: u64,
    pub name: String,
}

impl Record {
    /// The canonical byte encoding this record is addressed by.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CjsonError> {
        canonical_json(self)
    }

    pub fn cid(&self) -> Result<Cid, CjsonError> {
        self.canonical_bytes().map(|bytes| Cid::digest(&bytes))
    }

    /// Decode a record from its canonical (or any JSON) encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The domain component of the record name, if the name carries one.
    ///
    /// `https://cisco.com/agent` and `cisco.com/agent` both yield
    /// `cisco.com`; a name without a host-shaped leading segment yields
    /// `None`.
    pub fn domain(&self) -> Option<String> {
        domain_of(&self.name)
    }
}

/// See [`Record::domain`].
pub fn domain_of(name: &str) -> Option<String> {
    let rest = name
        .strip_prefix("https://")
        .or_else(|| name.strip_prefix("http://"))
        .unwrap_or(name);
    let host = rest.split('/').next()?;
    if host.is_empty() || !host.contains('.') || host.contains(':') {
        return None;
    }
    Some(host.to_owned())
}

#[cfg(test)]
pub(crate) mod gen {
    use super::*;

    /// A record shaped like the ones the conformance suite pushes around.
    pub fn record(name: &str, version: &str) -> Record {
        Record {
            name: name.to_owned(),
            version: version.to_owned(),
            schema_version: "v0.3.1".to_owned(),
            created_at: "2024-03-05T10:00:00Z".to_owned(),
            authors: vec!["Cisco Systems".to_owned()],
            skills: vec![
                Skill {
                    id: 101,
                    name: "nlp/summarization".to_owned(),
                },
                Skill {
                    id: 102,
                    name: "nlp/translation".to_owned(),
                },
            ],
            locators: vec![Locator {
                ty: "docker-image".to_owned(),
                url: "https://ghcr.io/example/agent:latest".to_owned(),
                size: None,
                digest: None,
            }],
            modules: vec![Module {
                id: 7,
                name: "runtime/language".to_owned(),
                version: Some("v1".to_owned()),
            }],
            domains: vec![],
        }
    }
}
