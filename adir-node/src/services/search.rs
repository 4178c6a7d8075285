// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_proto::v1;
use libadir::{
    index::{Attribute, Filter, Index, Query},
    store::Store,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::rpc;

use super::Registry;

/// The Search controller.
pub struct SearchService {
    index: Index,
    store: Store<Registry>,
}

impl SearchService {
    pub fn new(index: Index, store: Store<Registry>) -> Self {
        Self { index, store }
    }

    fn query(&self, request: v1::SearchRequest) -> Result<Query, Status> {
        let filters = request
            .queries
            .into_iter()
            .map(|q| {
                Ok(Filter {
                    attribute: Attribute::parse(&q.r#type).map_err(rpc::status)?,
                    value: q.value,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;
        Ok(Query {
            filters,
            limit: request.limit,
            offset: request.offset.unwrap_or(0),
        })
    }
}

#[tonic::async_trait]
impl v1::search_service_server::SearchService for SearchService {
    type SearchCidsStream = ReceiverStream<Result<v1::SearchCidsResponse, Status>>;
    type SearchRecordsStream = ReceiverStream<Result<v1::Record, Status>>;

    async fn search_cids(
        &self,
        request: Request<v1::SearchRequest>,
    ) -> Result<Response<Self::SearchCidsStream>, Status> {
        let query = self.query(request.into_inner())?;
        let hits = self.index.search(&query).await.map_err(rpc::status)?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for cid in hits {
                let reply = Ok(v1::SearchCidsResponse {
                    cid: cid.to_string(),
                });
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn search_records(
        &self,
        request: Request<v1::SearchRequest>,
    ) -> Result<Response<Self::SearchRecordsStream>, Status> {
        let query = self.query(request.into_inner())?;
        let hits = self.index.search(&query).await.map_err(rpc::status)?;
        let store = self.store.clone();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for cid in hits {
                let reply = match store.pull(&cid).await {
                    Ok(record) => Ok(v1::Record::from(record)),
                    // the projection may lag behind a delete
                    Err(libadir::store::Error::NotFound(_)) => {
                        tracing::debug!(%cid, "indexed record no longer stored");
                        continue;
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
}
