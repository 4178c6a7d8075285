// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! The per-job replication worker.
//!
//! Each tick processes DELETE_PENDING rows first (so a registry entry about
//! to be torn down is not recreated), then spawns one worker per PENDING
//! row. A worker assembles an isolated mirror config, runs the external
//! mirror binary once against it, and advances the row. The config file
//! never outlives the worker.

use std::{
    collections::HashSet,
    io,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::{process::Command, sync::Semaphore, time::timeout};

use crate::{reconciler, store};

use super::{remote::Credentials, Config, Error, RemoteDirectory, Status, Sync, Syncs};

/// Knobs of the mirror invocation.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    pub binary_path: PathBuf,
    /// Where the per-job config files are written.
    pub config_dir: PathBuf,
    /// How this node identifies itself to peers.
    pub node_id: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("regsync"),
            config_dir: std::env::temp_dir(),
            node_id: "agent-dir".to_owned(),
        }
    }
}

pub struct Regsync<D> {
    inner: Arc<Inner<D>>,
}

struct Inner<D> {
    syncs: Syncs,
    remote: D,
    local: store::Config,
    sync: Config,
    mirror: MirrorConfig,
    reconciler: reconciler::Config,
    active: RwLock<HashSet<String>>,
    workers: Arc<Semaphore>,
}

impl<D> Regsync<D> {
    pub fn new(
        syncs: Syncs,
        remote: D,
        local: store::Config,
        sync: Config,
        mirror: MirrorConfig,
        reconciler: reconciler::Config,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(sync.worker_count.max(1)));
        Self {
            inner: Arc::new(Inner {
                syncs,
                remote,
                local,
                sync,
                mirror,
                reconciler,
                active: RwLock::new(HashSet::new()),
                workers,
            }),
        }
    }

    /// Jobs currently being worked. Exposed for draining in tests.
    pub fn active_jobs(&self) -> usize {
        self.inner.active.read().len()
    }
}

#[async_trait]
impl<D> reconciler::Task for Regsync<D>
where
    D: RemoteDirectory + 'static,
{
    fn name(&self) -> &'static str {
        "regsync"
    }

    fn interval(&self) -> Duration {
        self.inner.sync.scheduler_interval
    }

    fn enabled(&self) -> bool {
        self.inner.reconciler.enabled
    }

    async fn run(&self) {
        let inner = &self.inner;

        // deletions before creations
        match inner.syncs.with_status(Status::DeletePending).await {
            Ok(rows) => {
                for row in rows {
                    match inner
                        .syncs
                        .transition(&row.id, Status::DeletePending, Status::Deleted)
                        .await
                    {
                        Ok(true) => tracing::info!(id = %row.id, "sync deleted"),
                        Ok(false) => (),
                        Err(e) => tracing::warn!(id = %row.id, err = %e, "cannot delete sync"),
                    }
                }
            },
            Err(e) => {
                tracing::warn!(err = %e, "cannot list DELETE_PENDING syncs");
                return;
            },
        }

        let pending = match inner.syncs.with_status(Status::Pending).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(err = %e, "cannot list PENDING syncs");
                return;
            },
        };

        for job in pending {
            // one active worker per sync id
            if !inner.active.write().insert(job.id.clone()) {
                continue;
            }
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                worker(inner, job).await;
            });
        }
    }
}

async fn worker<D: RemoteDirectory>(inner: Arc<Inner<D>>, job: Sync) {
    let _permit = match Arc::clone(&inner.workers).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            inner.active.write().remove(&job.id);
            return;
        },
    };

    match inner
        .syncs
        .transition(&job.id, Status::Pending, Status::InProgress)
        .await
    {
        Ok(true) => (),
        // raced with a delete request or another scheduler pass
        Ok(false) | Err(_) => {
            inner.active.write().remove(&job.id);
            return;
        },
    }

    let result = mirror_once(&inner, &job).await;
    let target = match &result {
        Ok(()) => Status::Completed,
        Err(e) => {
            tracing::warn!(id = %job.id, err = %e, "sync failed");
            Status::Failed
        },
    };
    if let Err(e) = inner
        .syncs
        .transition(&job.id, Status::InProgress, target)
        .await
    {
        tracing::warn!(id = %job.id, err = %e, "cannot finalise sync");
    } else {
        tracing::info!(id = %job.id, status = target.as_str(), "sync finished");
    }

    inner.active.write().remove(&job.id);
}

async fn mirror_once<D: RemoteDirectory>(inner: &Inner<D>, job: &Sync) -> Result<(), Error> {
    let credentials = inner
        .remote
        .registry_credentials(&job.remote_directory_url, &inner.mirror.node_id)
        .await?;
    inner
        .syncs
        .set_remote_registry(&job.id, &credentials.registry_url)
        .await?;

    let config = mirror_file(&inner.local, &credentials, job.cids.as_deref());
    let mut file = tempfile::Builder::new()
        .prefix(&format!("regsync-{}-", job.id))
        .suffix(".yaml")
        .tempfile_in(&inner.mirror.config_dir)?;
    serde_yaml::to_writer(file.as_file_mut(), &config)?;

    let invocation = Command::new(&inner.mirror.binary_path)
        .arg("once")
        .arg("-c")
        .arg(file.path())
        .kill_on_drop(true)
        .output();

    // `file` lives past the subprocess and is unlinked on every exit path
    match timeout(inner.sync.worker_timeout, invocation).await {
        Err(_) => Err(Error::Mirror(io::Error::new(
            io::ErrorKind::TimedOut,
            "mirror run exceeded the worker timeout",
        ))),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(output)) if !output.status.success() => Err(Error::Mirror(io::Error::new(
            io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))),
        Ok(Ok(_)) => Ok(()),
    }
}

#[derive(Serialize)]
struct MirrorFile {
    version: u8,
    creds: Vec<Cred>,
    defaults: Defaults,
    sync: Vec<SyncEntry>,
}

#[derive(Serialize)]
struct Cred {
    registry: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pass: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<&'static str>,
}

#[derive(Serialize)]
struct Defaults {
    parallel: u8,
}

#[derive(Serialize)]
struct SyncEntry {
    source: String,
    target: String,

    #[serde(rename = "type")]
    ty: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Tags>,

    referrers: bool,
}

#[derive(Serialize)]
struct Tags {
    allow: Vec<String>,
}

fn cred(registry: &str, username: Option<String>, password: Option<String>, insecure: bool) -> Cred {
    Cred {
        registry: registry.to_owned(),
        user: username,
        pass: password,
        tls: insecure.then_some("disabled"),
    }
}

/// One isolated mirror run: local credential, remote credential, a single
/// sync entry from the remote repo into ours, bounded to the job's CIDs
/// when the contract names some.
fn mirror_file(
    local: &store::Config,
    remote: &Credentials,
    cids: Option<&[String]>,
) -> MirrorFile {
    let local_auth = local.basic_auth.as_ref();
    MirrorFile {
        version: 1,
        creds: vec![
            cred(
                &local.registry_address,
                local_auth.map(|a| a.username.clone()),
                local_auth.map(|a| a.password.clone()),
                local.insecure,
            ),
            cred(
                &remote.registry_url,
                remote.username.clone(),
                remote.password.clone(),
                remote.insecure,
            ),
        ],
        defaults: Defaults { parallel: 1 },
        sync: vec![SyncEntry {
            source: format!("{}/{}", remote.registry_url, remote.repository),
            target: format!("{}/{}", local.registry_address, local.repository_name),
            ty: "repository",
            tags: cids.map(|cids| Tags {
                allow: cids.to_vec(),
            }),
            referrers: true,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{db, reconciler::Task as _};

    struct StubPeer;

    #[async_trait]
    impl RemoteDirectory for StubPeer {
        async fn registry_credentials(
            &self,
            _directory_url: &str,
            _node_id: &str,
        ) -> Result<Credentials, Error> {
            Ok(Credentials {
                registry_url: "peer-registry:5000".to_owned(),
                repository: "agntcy/dir".to_owned(),
                username: Some("replicator".to_owned()),
                password: Some("hunter2".to_owned()),
                insecure: true,
            })
        }
    }

    struct UnreachablePeer;

    #[async_trait]
    impl RemoteDirectory for UnreachablePeer {
        async fn registry_credentials(
            &self,
            directory_url: &str,
            _node_id: &str,
        ) -> Result<Credentials, Error> {
            Err(Error::Remote(format!("{} unreachable", directory_url)))
        }
    }

    fn regsync<D: RemoteDirectory>(syncs: Syncs, remote: D, binary: &str) -> Regsync<D> {
        Regsync::new(
            syncs,
            remote,
            store::Config::default(),
            Config {
                worker_timeout: Duration::from_secs(5),
                ..Config::default()
            },
            MirrorConfig {
                binary_path: PathBuf::from(binary),
                ..MirrorConfig::default()
            },
            reconciler::Config::default(),
        )
    }

    async fn settle(syncs: &Syncs, id: &str) -> Status {
        for _ in 0..100 {
            let status = syncs.get(id).await.unwrap().status;
            if !matches!(status, Status::Pending | Status::InProgress) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("sync {} never settled", id)
    }

    #[tokio::test]
    async fn a_successful_mirror_completes_the_job() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let job = syncs.insert("s1", "http://peer:8888", None).await.unwrap();

        let task = regsync(syncs.clone(), StubPeer, "true");
        task.run().await;

        assert_eq!(settle(&syncs, &job.id).await, Status::Completed);
        assert_eq!(
            syncs.get(&job.id).await.unwrap().remote_registry_url.as_deref(),
            Some("peer-registry:5000")
        );
    }

    #[tokio::test]
    async fn a_failing_mirror_fails_the_job() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let job = syncs.insert("s1", "http://peer:8888", None).await.unwrap();

        let task = regsync(syncs.clone(), StubPeer, "false");
        task.run().await;

        assert_eq!(settle(&syncs, &job.id).await, Status::Failed);
    }

    #[tokio::test]
    async fn a_missing_mirror_binary_fails_the_job() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let job = syncs.insert("s1", "http://peer:8888", None).await.unwrap();

        let task = regsync(syncs.clone(), StubPeer, "/nonexistent/regsync");
        task.run().await;

        assert_eq!(settle(&syncs, &job.id).await, Status::Failed);
    }

    #[tokio::test]
    async fn an_unreachable_peer_fails_the_job() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let job = syncs.insert("s1", "http://peer:8888", None).await.unwrap();

        let task = regsync(syncs.clone(), UnreachablePeer, "true");
        task.run().await;

        assert_eq!(settle(&syncs, &job.id).await, Status::Failed);
    }

    #[tokio::test]
    async fn delete_pending_rows_are_deleted_before_pending_rows_run() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let doomed = syncs.insert("s1", "http://peer:8888", None).await.unwrap();
        syncs.mark_delete_pending(&doomed.id).await.unwrap();
        let live = syncs.insert("s2", "http://peer:8888", None).await.unwrap();

        let task = regsync(syncs.clone(), StubPeer, "true");
        task.run().await;

        assert_eq!(syncs.get(&doomed.id).await.unwrap().status, Status::Deleted);
        assert_eq!(settle(&syncs, &live.id).await, Status::Completed);
    }

    #[test]
    fn mirror_file_shape() {
        let local = store::Config::default();
        let remote = Credentials {
            registry_url: "peer:5000".to_owned(),
            repository: "agntcy/dir".to_owned(),
            username: None,
            password: None,
            insecure: false,
        };
        let cids = vec!["bafyone".to_owned()];
        let file = mirror_file(&local, &remote, Some(&cids));

        let yaml = serde_yaml::to_string(&file).unwrap();
        assert!(yaml.contains("source: peer:5000/agntcy/dir"));
        assert!(yaml.contains("target: 127.0.0.1:5000/agntcy/dir"));
        assert!(yaml.contains("referrers: true"));
        assert!(yaml.contains("bafyone"));
    }
}
