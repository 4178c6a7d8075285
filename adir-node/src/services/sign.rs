// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_proto::v1;
use libadir::sign::Signers;
use tonic::{Request, Response, Status};

use crate::rpc;

/// The Verify controller. Signing itself stays a client capability.
pub struct SignApi {
    signers: Signers,
}

impl SignApi {
    pub fn new(signers: Signers) -> Self {
        Self { signers }
    }
}

#[tonic::async_trait]
impl v1::sign_service_server::SignService for SignApi {
    async fn verify(
        &self,
        request: Request<v1::VerifyRequest>,
    ) -> Result<Response<v1::VerifyResponse>, Status> {
        let reference = request
            .into_inner()
            .r#ref
            .ok_or_else(|| Status::invalid_argument("missing record ref"))?;
        let cid = rpc::parse_cid(&reference.cid)?;

        let signers = self.signers.verified(&cid).await.map_err(rpc::status)?;
        Ok(Response::new(v1::VerifyResponse {
            success: !signers.is_empty(),
            signers: signers.into_iter().map(v1::Signer::from).collect(),
        }))
    }
}
