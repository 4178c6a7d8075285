// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Name resolution and domain-ownership verification.
//!
//! Resolution maps a user-supplied reference (CID, name, `name:version`) to
//! a unique record CID. Verification checks, in the background, that the
//! domain component of a record name authorises one of the public keys
//! attached to the record, and persists the outcome with a TTL.

use std::time::Duration;

use adir_canonical::Cid;
use thiserror::Error as ThisError;

use crate::error::{Code, Coded};

pub mod provider;
pub mod resolver;
pub mod store;
pub mod task;
pub mod version;

pub use provider::{Dns, Provider, WellKnown};
pub use resolver::Resolver;
pub use store::Verifications;
pub use task::VerifyNames;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationStatus {
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verified" => Some(Self::Verified),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One name-verification row per record CID, updated in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub cid: Cid,
    pub method: Option<String>,
    pub key_id: Option<String>,
    pub status: VerificationStatus,
    pub error: Option<String>,
    pub updated_at: String,
}

/// Knobs of the verification side of naming.
#[derive(Clone, Debug)]
pub struct Config {
    pub enabled: bool,
    /// A verified row younger than this is authoritative; past it, the row
    /// is re-verified.
    pub cache_ttl: Duration,
    /// Permit plain-http well-known probes.
    pub allow_insecure_well_known: bool,
    /// Per-record bound inside one task tick.
    pub record_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            allow_insecure_well_known: false,
            record_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("no record found for {0}")]
    NotFound(String),

    #[error("{name}:{version} is ambiguous ({matches} records match)")]
    Ambiguous {
        name: String,
        version: String,
        matches: usize,
    },

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] adir_canonical::cid::ParseError),

    #[error(transparent)]
    Store(#[from] crate::store::Error),
}

impl Coded for Error {
    fn code(&self) -> Code {
        match self {
            Self::NotFound(_) => Code::NotFound,
            Self::Ambiguous { .. } => Code::FailedPrecondition,
            Self::Db(_) => Code::Unavailable,
            Self::Corrupt(_) => Code::Internal,
            Self::Store(e) => e.code(),
        }
    }
}
