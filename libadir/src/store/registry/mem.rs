// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{manifest::sha256_digest, Error};

use super::Registry;

/// In-process registry.
///
/// Backs the test suites, and any caller that wants directory semantics
/// without a registry deployment.
#[derive(Default)]
pub struct Mem {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    manifests: HashMap<String, Vec<u8>>,
    tags: HashMap<String, String>,
}

impl Mem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.blobs.is_empty() && state.manifests.is_empty() && state.tags.is_empty()
    }
}

#[async_trait]
impl Registry for Mem {
    async fn push_blob(&self, bytes: &[u8]) -> Result<String, Error> {
        let digest = sha256_digest(bytes);
        self.state.lock().blobs.insert(digest.clone(), bytes.to_vec());
        Ok(digest)
    }

    async fn pull_blob(&self, digest: &str) -> Result<Vec<u8>, Error> {
        self.state
            .lock()
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::BlobNotFound(digest.to_owned()))
    }

    async fn push_manifest(&self, tag: &str, bytes: Vec<u8>) -> Result<String, Error> {
        let digest = sha256_digest(&bytes);
        let mut state = self.state.lock();
        state.manifests.insert(digest.clone(), bytes);
        state.tags.insert(tag.to_owned(), digest.clone());
        Ok(digest)
    }

    async fn pull_manifest(&self, reference: &str) -> Result<(Vec<u8>, String), Error> {
        let state = self.state.lock();
        let digest = if reference.starts_with("sha256:") {
            reference.to_owned()
        } else {
            state
                .tags
                .get(reference)
                .cloned()
                .ok_or_else(|| Error::ManifestNotFound(reference.to_owned()))?
        };
        state
            .manifests
            .get(&digest)
            .map(|bytes| (bytes.clone(), digest.clone()))
            .ok_or_else(|| Error::ManifestNotFound(reference.to_owned()))
    }

    async fn delete_manifest(&self, reference: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        let digest = if reference.starts_with("sha256:") {
            reference.to_owned()
        } else {
            match state.tags.remove(reference) {
                Some(digest) => digest,
                None => return Err(Error::ManifestNotFound(reference.to_owned())),
            }
        };
        state.tags.retain(|_, target| *target != digest);
        if state.manifests.remove(&digest).is_none() {
            return Err(Error::ManifestNotFound(reference.to_owned()));
        }
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<String>, Error> {
        let mut tags: Vec<_> = self.state.lock().tags.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}
