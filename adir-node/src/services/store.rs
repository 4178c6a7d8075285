// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::{ops::ControlFlow, sync::Arc};

use adir_proto::v1;
use libadir::{
    index::Index,
    naming::Verifications,
    record::referrer::Referrer,
    store::{WithEvents, WithVerification},
    Record,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::{convert, rpc};

use super::Registry;

/// The Store controller: content in and out of the OCI store, with the
/// search projection written on the side.
pub struct StoreService {
    store: Arc<WithEvents<Registry>>,
    verified: Arc<WithVerification<Registry, Verifications>>,
    index: Index,
}

impl StoreService {
    pub fn new(
        store: Arc<WithEvents<Registry>>,
        verified: Arc<WithVerification<Registry, Verifications>>,
        index: Index,
    ) -> Self {
        Self {
            store,
            verified,
            index,
        }
    }
}

const CHANNEL_DEPTH: usize = 16;

#[tonic::async_trait]
impl v1::store_service_server::StoreService for StoreService {
    type PushStream = ReceiverStream<Result<v1::RecordRef, Status>>;
    type PullStream = ReceiverStream<Result<v1::Record, Status>>;
    type LookupStream = ReceiverStream<Result<v1::RecordMeta, Status>>;
    type PushReferrerStream = ReceiverStream<Result<v1::PushReferrerResponse, Status>>;
    type PullReferrerStream = ReceiverStream<Result<v1::PullReferrerResponse, Status>>;

    async fn push(
        &self,
        request: Request<Streaming<v1::Record>>,
    ) -> Result<Response<Self::PushStream>, Status> {
        let mut incoming = request.into_inner();
        let store = Arc::clone(&self.store);
        let index = self.index.clone();
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            loop {
                let record: Record = match incoming.message().await {
                    Ok(Some(wire)) => wire.into(),
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    },
                };

                let reply = match store.push(&record).await {
                    Ok(cid) => {
                        // the projection is eventually consistent; a failed
                        // insert never fails the push
                        if let Err(e) = index.add_record(&cid, &record).await {
                            tracing::warn!(%cid, err = %e, "search projection insert failed");
                        }
                        Ok(v1::RecordRef {
                            cid: cid.to_string(),
                            size: None,
                        })
                    },
                    Err(e) => Err(rpc::status(e)),
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn pull(
        &self,
        request: Request<Streaming<v1::RecordRef>>,
    ) -> Result<Response<Self::PullStream>, Status> {
        let mut incoming = request.into_inner();
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            loop {
                let reference = match incoming.message().await {
                    Ok(Some(reference)) => reference,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    },
                };
                let reply = match rpc::parse_cid(&reference.cid) {
                    Ok(cid) => store
                        .pull(&cid)
                        .await
                        .map(v1::Record::from)
                        .map_err(rpc::status),
                    Err(status) => Err(status),
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn lookup(
        &self,
        request: Request<Streaming<v1::RecordRef>>,
    ) -> Result<Response<Self::LookupStream>, Status> {
        let mut incoming = request.into_inner();
        let verified = Arc::clone(&self.verified);
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            loop {
                let reference = match incoming.message().await {
                    Ok(Some(reference)) => reference,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    },
                };
                let reply = match rpc::parse_cid(&reference.cid) {
                    Ok(cid) => verified
                        .lookup(&cid)
                        .await
                        .map(|meta| v1::RecordMeta {
                            cid: meta.cid.to_string(),
                            size: meta.size,
                            annotations: meta.annotations.into_iter().collect(),
                        })
                        .map_err(rpc::status),
                    Err(status) => Err(status),
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn delete(
        &self,
        request: Request<Streaming<v1::RecordRef>>,
    ) -> Result<Response<v1::DeleteResponse>, Status> {
        let mut incoming = request.into_inner();

        while let Some(reference) = incoming.message().await? {
            let cid = rpc::parse_cid(&reference.cid)?;
            self.store.delete(&cid).await.map_err(rpc::status)?;
            if let Err(e) = self.index.remove_record(&cid).await {
                tracing::warn!(%cid, err = %e, "search projection removal failed");
            }
        }

        Ok(Response::new(v1::DeleteResponse {}))
    }

    async fn push_referrer(
        &self,
        request: Request<Streaming<v1::PushReferrerRequest>>,
    ) -> Result<Response<Self::PushReferrerStream>, Status> {
        let mut incoming = request.into_inner();
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            loop {
                let message = match incoming.message().await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    },
                };
                let reply = push_one_referrer(&store, message).await;
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn pull_referrer(
        &self,
        request: Request<Streaming<v1::PullReferrerRequest>>,
    ) -> Result<Response<Self::PullReferrerStream>, Status> {
        let mut incoming = request.into_inner();
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            loop {
                let message = match incoming.message().await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    },
                };

                let cid = match message
                    .r#ref
                    .as_ref()
                    .ok_or_else(|| Status::invalid_argument("missing record ref"))
                    .and_then(|r| rpc::parse_cid(&r.cid))
                {
                    Ok(cid) => cid,
                    Err(status) => {
                        if tx.send(Err(status)).await.is_err() {
                            break;
                        }
                        continue;
                    },
                };

                let mut found = Vec::new();
                let walk = store
                    .walk_referrers(&cid, message.media_type.as_deref(), |referrer| {
                        found.push(referrer);
                        ControlFlow::Continue(())
                    })
                    .await;

                let replies: Vec<Result<v1::PullReferrerResponse, Status>> = match walk {
                    Ok(()) => found
                        .into_iter()
                        .map(|referrer| {
                            Ok(v1::PullReferrerResponse {
                                referrer: Some(referrer.into()),
                            })
                        })
                        .collect(),
                    Err(e) => vec![Err(rpc::status(e))],
                };
                for reply in replies {
                    if tx.send(reply).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

async fn push_one_referrer(
    store: &WithEvents<Registry>,
    message: v1::PushReferrerRequest,
) -> Result<v1::PushReferrerResponse, Status> {
    let reference = message
        .r#ref
        .as_ref()
        .ok_or_else(|| Status::invalid_argument("missing record ref"))?;
    let cid = rpc::parse_cid(&reference.cid)?;
    let referrer: Referrer = message
        .referrer
        .ok_or_else(|| Status::invalid_argument("missing referrer payload"))?
        .try_into()
        .map_err(|e: convert::DecodeError| Status::invalid_argument(e.to_string()))?;

    store
        .push_referrer(&cid, &referrer)
        .await
        .map_err(rpc::status)?;
    Ok(v1::PushReferrerResponse { success: true })
}
