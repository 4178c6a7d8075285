// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use async_trait::async_trait;

use super::Error;

/// Replication credentials a peer hands out for its registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub registry_url: String,
    pub repository: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure: bool,
}

/// The peer-RPC seam of the regsync worker.
///
/// The production implementation dials the remote directory's Sync service;
/// tests stub it out.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// `RequestRegistryCredentials` against the directory at
    /// `directory_url`, identifying this node as `node_id`.
    async fn registry_credentials(
        &self,
        directory_url: &str,
        node_id: &str,
    ) -> Result<Credentials, Error>;
}
