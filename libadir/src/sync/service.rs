// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use uuid::Uuid;

use crate::store;

use super::{remote::Credentials, validate_remote_url, Config, Error, Sync, Syncs};

/// The sync controller: job CRUD plus the credentials the node hands to
/// peers.
#[derive(Clone)]
pub struct Service {
    syncs: Syncs,
    config: Config,
    store: store::Config,
}

impl Service {
    pub fn new(syncs: Syncs, config: Config, store: store::Config) -> Self {
        Self {
            syncs,
            config,
            store,
        }
    }

    pub async fn create(
        &self,
        remote_directory_url: &str,
        cids: Option<&[String]>,
    ) -> Result<Sync, Error> {
        validate_remote_url(remote_directory_url)?;
        let id = Uuid::new_v4().to_string();
        let row = self.syncs.insert(&id, remote_directory_url, cids).await?;
        tracing::info!(id = %row.id, url = remote_directory_url, "sync created");
        Ok(row)
    }

    pub async fn get(&self, id: &str) -> Result<Sync, Error> {
        self.syncs.get(id).await
    }

    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Sync>, Error> {
        self.syncs.list(limit, offset).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        self.syncs.mark_delete_pending(id).await?;
        tracing::info!(id, "sync marked for deletion");
        Ok(())
    }

    /// This node's registry address, repository and replication
    /// credentials, served to a peer's regsync worker.
    pub fn registry_credentials(&self, requesting_node_id: &str) -> Credentials {
        tracing::debug!(peer = requesting_node_id, "registry credentials requested");
        let auth = self.config.auth_config.as_ref();
        Credentials {
            registry_url: self.store.registry_address.clone(),
            repository: self.store.repository_name.clone(),
            username: auth.map(|a| a.username.clone()),
            password: auth.map(|a| a.password.clone()),
            insecure: self.store.insecure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::{db, sync::Status};

    async fn service() -> Service {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        Service::new(syncs, Config::default(), store::Config::default())
    }

    #[tokio::test]
    async fn create_validates_the_url() {
        let service = service().await;
        assert_matches!(
            service.create("not a url", None).await,
            Err(Error::InvalidUrl(_))
        );

        let row = service.create("http://peer:8888", None).await.unwrap();
        assert_eq!(row.status, Status::Pending);
        assert!(!row.id.is_empty());
    }

    #[tokio::test]
    async fn list_pages_by_creation() {
        let service = service().await;
        for _ in 0..5 {
            service.create("http://peer:8888", None).await.unwrap();
        }
        let first = service.list(3, 0).await.unwrap();
        let rest = service.list(3, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn credentials_reflect_node_configuration() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let config = Config {
            auth_config: Some(store::config::BasicAuth {
                username: "replicator".to_owned(),
                password: "hunter2".to_owned(),
            }),
            ..Config::default()
        };
        let service = Service::new(syncs, config, store::Config::default());

        let creds = service.registry_credentials("peer-1");
        assert_eq!(creds.registry_url, "127.0.0.1:5000");
        assert_eq!(creds.repository, "agntcy/dir");
        assert_eq!(creds.username.as_deref(), Some("replicator"));
    }
}
