// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_proto::v1;
use async_trait::async_trait;
use libadir::sync::{Credentials, Error, RemoteDirectory};

/// Credential negotiation against a peer directory, over its Sync service.
pub struct GrpcDirectory;

fn endpoint(directory_url: &str) -> String {
    if directory_url.contains("://") {
        directory_url.to_owned()
    } else {
        format!("http://{}", directory_url)
    }
}

#[async_trait]
impl RemoteDirectory for GrpcDirectory {
    async fn registry_credentials(
        &self,
        directory_url: &str,
        node_id: &str,
    ) -> Result<Credentials, Error> {
        let mut client = v1::sync_service_client::SyncServiceClient::connect(endpoint(directory_url))
            .await
            .map_err(|e| Error::Remote(format!("{}: {}", directory_url, e)))?;

        let response = client
            .request_registry_credentials(v1::RequestRegistryCredentialsRequest {
                requesting_node_id: node_id.to_owned(),
            })
            .await
            .map_err(|e| Error::Remote(format!("{}: {}", directory_url, e.message())))?
            .into_inner();

        Ok(Credentials {
            registry_url: response.registry_url,
            repository: response.repository,
            username: response.basic_auth.as_ref().map(|a| a.username.clone()),
            password: response.basic_auth.map(|a| a.password),
            insecure: response.insecure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_ports_dial_plaintext() {
        assert_eq!(endpoint("peer:8888"), "http://peer:8888");
        assert_eq!(endpoint("https://peer:8888"), "https://peer:8888");
    }
}
