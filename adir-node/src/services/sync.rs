// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_proto::v1;
use libadir::sync::Service;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::{convert, rpc};

const DEFAULT_PAGE: u32 = 100;
const MAX_PAGE: u32 = 1000;

/// The Sync controller.
pub struct SyncApi {
    service: Service,
}

impl SyncApi {
    pub fn new(service: Service) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl v1::sync_service_server::SyncService for SyncApi {
    type ListSyncsStream = ReceiverStream<Result<v1::Sync, Status>>;

    async fn create_sync(
        &self,
        request: Request<v1::CreateSyncRequest>,
    ) -> Result<Response<v1::CreateSyncResponse>, Status> {
        let message = request.into_inner();
        let cids = (!message.cids.is_empty()).then_some(message.cids);

        let row = self
            .service
            .create(&message.remote_directory_url, cids.as_deref())
            .await
            .map_err(rpc::status)?;

        Ok(Response::new(v1::CreateSyncResponse {
            id: row.id,
            status: convert::sync_status(row.status) as i32,
        }))
    }

    async fn list_syncs(
        &self,
        request: Request<v1::ListSyncsRequest>,
    ) -> Result<Response<Self::ListSyncsStream>, Status> {
        let message = request.into_inner();
        let limit = match message.limit {
            None | Some(0) => DEFAULT_PAGE,
            Some(n) => n.min(MAX_PAGE),
        };
        let rows = self
            .service
            .list(limit, message.offset.unwrap_or(0))
            .await
            .map_err(rpc::status)?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for row in rows {
                if tx.send(Ok(v1::Sync::from(row))).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_sync(
        &self,
        request: Request<v1::GetSyncRequest>,
    ) -> Result<Response<v1::Sync>, Status> {
        let row = self
            .service
            .get(&request.into_inner().id)
            .await
            .map_err(rpc::status)?;
        Ok(Response::new(row.into()))
    }

    async fn delete_sync(
        &self,
        request: Request<v1::DeleteSyncRequest>,
    ) -> Result<Response<v1::DeleteSyncResponse>, Status> {
        self.service
            .delete(&request.into_inner().id)
            .await
            .map_err(rpc::status)?;
        Ok(Response::new(v1::DeleteSyncResponse {}))
    }

    async fn request_registry_credentials(
        &self,
        request: Request<v1::RequestRegistryCredentialsRequest>,
    ) -> Result<Response<v1::RequestRegistryCredentialsResponse>, Status> {
        let creds = self
            .service
            .registry_credentials(&request.into_inner().requesting_node_id);

        let basic_auth = match (creds.username, creds.password) {
            (Some(username), Some(password)) => Some(v1::BasicAuth { username, password }),
            _ => None,
        };
        Ok(Response::new(v1::RequestRegistryCredentialsResponse {
            registry_url: creds.registry_url,
            repository: creds.repository,
            basic_auth,
            insecure: creds.insecure,
        }))
    }
}
