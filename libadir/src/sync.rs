// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Replication contracts between directory nodes.
//!
//! A sync job is a one-shot replication of selected CIDs (or everything)
//! from a remote directory's registry into this node's registry. The
//! controller owns job creation and deletion, the regsync task owns the
//! PENDING → IN_PROGRESS → COMPLETED/FAILED and DELETE_PENDING → DELETED
//! legs, and every transition is conditional on the row's current status.

use std::time::Duration;

use thiserror::Error as ThisError;

use crate::{
    error::{Code, Coded},
    store::config::BasicAuth,
};

pub mod regsync;
pub mod remote;
pub mod service;
pub mod store;

pub use regsync::Regsync;
pub use remote::{Credentials, RemoteDirectory};
pub use service::Service;
pub use store::Syncs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
    DeletePending,
    Deleted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::DeletePending => "DELETE_PENDING",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "DELETE_PENDING" => Some(Self::DeletePending),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One sync job row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sync {
    pub id: String,
    pub remote_directory_url: String,
    /// Tag allow-list of the replication; `None` replicates everything.
    pub cids: Option<Vec<String>>,
    pub status: Status,
    pub remote_registry_url: Option<String>,
    pub created_at: String,
    pub last_update_at: String,
}

/// Knobs of the sync controller and scheduler.
#[derive(Clone, Debug)]
pub struct Config {
    pub scheduler_interval: Duration,
    pub worker_count: usize,
    pub worker_timeout: Duration,
    /// Credentials handed to peers requesting replication access.
    pub auth_config: Option<BasicAuth>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(30),
            worker_count: 4,
            worker_timeout: Duration::from_secs(10 * 60),
            auth_config: None,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid remote directory url {0:?}")]
    InvalidUrl(String),

    #[error("no sync found for id {0}")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("remote directory: {0}")]
    Remote(String),

    #[error("mirror: {0}")]
    Mirror(#[from] std::io::Error),

    #[error("mirror config: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl Coded for Error {
    fn code(&self) -> Code {
        match self {
            Self::InvalidUrl(_) => Code::Invalid,
            Self::NotFound(_) => Code::NotFound,
            Self::Db(_) | Self::Remote(_) | Self::Mirror(_) | Self::Config(_) => Code::Unavailable,
        }
    }
}

/// A sync target is either `host:port` (no scheme), or an http(s) URL with
/// a non-empty host.
pub fn validate_remote_url(input: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidUrl(input.to_owned());

    if let Some((scheme, _)) = input.split_once("://") {
        if !matches!(scheme, "http" | "https") {
            return Err(invalid());
        }
        let url = url::Url::parse(input).map_err(|_| invalid())?;
        return match url.host_str() {
            Some(host) if !host.is_empty() => Ok(()),
            _ => Err(invalid()),
        };
    }

    match input.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_url_validation() {
        for accepted in [
            "http://peer:8888",
            "https://dir.example.org",
            "https://dir.example.org:8888/path",
            "peer:8888",
            "127.0.0.1:5000",
        ] {
            validate_remote_url(accepted).unwrap_or_else(|_| panic!("rejected {}", accepted));
        }

        for rejected in ["", "peer", "ftp://peer:21", "http://", ":8888", "peer:port"] {
            assert!(
                validate_remote_url(rejected).is_err(),
                "accepted {}",
                rejected
            );
        }
    }
}
