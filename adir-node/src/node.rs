// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use adir_proto::v1::{
    naming_service_server::NamingServiceServer, search_service_server::SearchServiceServer,
    sign_service_server::SignServiceServer, store_service_server::StoreServiceServer,
    sync_service_server::SyncServiceServer,
};
use libadir::{
    db,
    index::Index,
    naming::{Dns, Resolver, Verifications, VerifyNames, WellKnown},
    reconciler::Runner,
    sign::{Cosign, Signers, VerifySignatures},
    store::{registry, Store, WithEvents, WithVerification},
    sync::{Regsync, Service as SyncService, Syncs},
};
use tokio::sync::{broadcast, watch};
use tonic::transport::Server;
use tracing::info;

use crate::{
    cfg::Cfg,
    remote::GrpcDirectory,
    services::{
        naming::NamingApi, search::SearchService, sign::SignApi, store::StoreService, sync::SyncApi,
        Registry,
    },
};

const DRAIN_WINDOW: Duration = Duration::from_secs(10);

/// Assemble and run a directory node until interrupted.
pub async fn run(cfg: Cfg) -> anyhow::Result<()> {
    let pool = db::open(&cfg.database_path).await?;

    let backend: Registry = match &cfg.store.local_dir {
        Some(dir) => Arc::new(registry::Fs::new(dir.clone())),
        None => Arc::new(registry::Remote::new(&cfg.store)),
    };
    let store = Store::new(backend, cfg.store.limits.clone());

    let index = Index::new(pool.clone());
    let verifications = Verifications::new(pool.clone());
    let signers = Signers::new(pool.clone());
    let syncs = Syncs::new(pool.clone());
    let resolver = Resolver::new(pool);

    let events = Arc::new(WithEvents::new(store.clone()));
    let verified = Arc::new(WithVerification::new(store.clone(), verifications.clone()));
    spawn_event_log(events.subscribe());

    let sync_service = SyncService::new(syncs.clone(), cfg.sync.to_config(), cfg.store.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler_cfg = cfg.reconciler.to_config();
    let mut runner = Runner::new(DRAIN_WINDOW);
    runner.register(VerifyNames::new(
        store.clone(),
        verifications.clone(),
        vec![
            Box::new(Dns::new()),
            Box::new(WellKnown::new(cfg.verification.allow_insecure_well_known)),
        ],
        cfg.verification.to_naming(),
        reconciler_cfg.clone(),
    ));
    runner.register(VerifySignatures::new(
        store.clone(),
        signers.clone(),
        Cosign::new(cfg.verification.to_sign()),
        cfg.verification.to_sign(),
        cfg.verification.to_sign_task(),
        reconciler_cfg.clone(),
    ));
    let mut local = cfg.store.clone();
    if let Some(registry) = &cfg.mirror.local_registry {
        local.registry_address = registry.clone();
    }
    runner.register(Regsync::new(
        syncs,
        GrpcDirectory,
        local,
        cfg.sync.to_config(),
        cfg.mirror.to_config(&cfg.node_id),
        reconciler_cfg,
    ));
    let reconcilers = tokio::spawn(runner.run(shutdown_rx.clone()));

    let signals = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
        })
    };

    let addr: SocketAddr = cfg.listen_addr.parse()?;
    let mut server_shutdown = shutdown_rx;
    info!(%addr, "node listening");
    Server::builder()
        .add_service(StoreServiceServer::new(StoreService::new(
            Arc::clone(&events),
            Arc::clone(&verified),
            index.clone(),
        )))
        .add_service(SearchServiceServer::new(SearchService::new(
            index,
            store.clone(),
        )))
        .add_service(SyncServiceServer::new(SyncApi::new(sync_service)))
        .add_service(NamingServiceServer::new(NamingApi::new(
            resolver,
            verifications,
            store,
        )))
        .add_service(SignServiceServer::new(SignApi::new(signers)))
        .serve_with_shutdown(addr, async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    // the serve future also ends on transport errors; reconcilers follow
    let _ = shutdown_tx.send(true);
    reconcilers.await?;
    signals.abort();

    Ok(())
}

fn spawn_event_log(mut events: broadcast::Receiver<libadir::store::Event>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "store event"),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "store event log lagged")
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
