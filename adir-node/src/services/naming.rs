// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_proto::v1;
use libadir::{
    naming::{Resolver, VerificationStatus, Verifications},
    record::domain_of,
    store::{annotations, Store},
};
use tonic::{Request, Response, Status};

use crate::rpc;

use super::Registry;

/// The Naming controller.
pub struct NamingApi {
    resolver: Resolver,
    verifications: Verifications,
    store: Store<Registry>,
}

impl NamingApi {
    pub fn new(resolver: Resolver, verifications: Verifications, store: Store<Registry>) -> Self {
        Self {
            resolver,
            verifications,
            store,
        }
    }
}

#[tonic::async_trait]
impl v1::naming_service_server::NamingService for NamingApi {
    async fn resolve(
        &self,
        request: Request<v1::ResolveRequest>,
    ) -> Result<Response<v1::ResolveResponse>, Status> {
        let message = request.into_inner();
        let input = match &message.version {
            Some(version) => format!("{}:{}", message.name, version),
            None => message.name,
        };

        let cid = self.resolver.resolve(&input).await.map_err(rpc::status)?;
        Ok(Response::new(v1::ResolveResponse {
            cid: cid.to_string(),
        }))
    }

    async fn get_verification_info(
        &self,
        request: Request<v1::GetVerificationInfoRequest>,
    ) -> Result<Response<v1::GetVerificationInfoResponse>, Status> {
        let cid = rpc::parse_cid(&request.into_inner().cid)?;

        let row = self.verifications.get(&cid).await.map_err(rpc::status)?;
        let domain = match self.store.lookup(&cid).await {
            Ok(meta) => meta
                .annotations
                .get(annotations::NAME)
                .and_then(|name| domain_of(name)),
            Err(_) => None,
        };

        let response = match row {
            Some(row) if row.status == VerificationStatus::Verified => {
                v1::GetVerificationInfoResponse {
                    verified: true,
                    domain,
                    method: row.method,
                    key_id: row.key_id,
                    verified_at: Some(row.updated_at),
                    error: None,
                }
            },
            Some(row) => v1::GetVerificationInfoResponse {
                verified: false,
                domain,
                method: None,
                key_id: None,
                verified_at: None,
                error: row.error,
            },
            None => v1::GetVerificationInfoResponse {
                verified: false,
                domain,
                method: None,
                key_id: None,
                verified_at: None,
                error: Some("not verified".to_owned()),
            },
        };
        Ok(Response::new(response))
    }
}
