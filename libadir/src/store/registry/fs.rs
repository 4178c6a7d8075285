// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::store::{manifest::sha256_digest, Error};

use super::Registry;

/// On-disk registry for registry-less local nodes.
///
/// Layout: `blobs/<hex>`, `manifests/<hex>`, `tags/<tag>` (tag files hold
/// the target manifest digest). Tag names the store produces (CIDs and
/// referrer fallback tags) are filename-safe by construction.
pub struct Fs {
    root: PathBuf,
}

impl Fs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join("blobs").join(digest.trim_start_matches("sha256:"))
    }

    fn manifest_path(&self, digest: &str) -> PathBuf {
        self.root
            .join("manifests")
            .join(digest.trim_start_matches("sha256:"))
    }

    fn tag_path(&self, tag: &str) -> PathBuf {
        self.root.join("tags").join(tag)
    }

    async fn write(path: &Path, bytes: &[u8]) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::registry)?;
        }
        fs::write(path, bytes).await.map_err(Error::registry)
    }

    async fn resolve(&self, reference: &str) -> Result<String, Error> {
        if reference.starts_with("sha256:") {
            return Ok(reference.to_owned());
        }
        match fs::read_to_string(self.tag_path(reference)).await {
            Ok(digest) => Ok(digest.trim().to_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ManifestNotFound(reference.to_owned()))
            },
            Err(e) => Err(Error::registry(e)),
        }
    }
}

#[async_trait]
impl Registry for Fs {
    async fn push_blob(&self, bytes: &[u8]) -> Result<String, Error> {
        let digest = sha256_digest(bytes);
        Self::write(&self.blob_path(&digest), bytes).await?;
        Ok(digest)
    }

    async fn pull_blob(&self, digest: &str) -> Result<Vec<u8>, Error> {
        match fs::read(self.blob_path(digest)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobNotFound(digest.to_owned()))
            },
            Err(e) => Err(Error::registry(e)),
        }
    }

    async fn push_manifest(&self, tag: &str, bytes: Vec<u8>) -> Result<String, Error> {
        let digest = sha256_digest(&bytes);
        Self::write(&self.manifest_path(&digest), &bytes).await?;
        Self::write(&self.tag_path(tag), digest.as_bytes()).await?;
        Ok(digest)
    }

    async fn pull_manifest(&self, reference: &str) -> Result<(Vec<u8>, String), Error> {
        let digest = self.resolve(reference).await?;
        match fs::read(self.manifest_path(&digest)).await {
            Ok(bytes) => Ok((bytes, digest)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ManifestNotFound(reference.to_owned()))
            },
            Err(e) => Err(Error::registry(e)),
        }
    }

    async fn delete_manifest(&self, reference: &str) -> Result<(), Error> {
        let digest = self.resolve(reference).await?;
        if !reference.starts_with("sha256:") {
            fs::remove_file(self.tag_path(reference))
                .await
                .map_err(Error::registry)?;
        }
        match fs::remove_file(self.manifest_path(&digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ManifestNotFound(reference.to_owned()))
            },
            Err(e) => Err(Error::registry(e)),
        }
    }

    async fn list_tags(&self) -> Result<Vec<String>, Error> {
        let mut tags = Vec::new();
        let mut dir = match fs::read_dir(self.root.join("tags")).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tags),
            Err(e) => return Err(Error::registry(e)),
        };
        while let Some(entry) = dir.next_entry().await.map_err(Error::registry)? {
            if let Some(name) = entry.file_name().to_str() {
                tags.push(name.to_owned());
            }
        }
        tags.sort();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        record::{gen, validation::Limits},
        store::Store,
    };

    #[tokio::test]
    async fn fs_backed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Fs::new(dir.path()), Limits::default());

        let record = gen::record("https://cisco.com/agent", "v1.0.0");
        let cid = store.push(&record).await.unwrap();
        let pulled = store.pull(&cid).await.unwrap();

        assert_eq!(record, pulled);
        store.delete(&cid).await.unwrap();
        assert!(matches!(
            store.pull(&cid).await,
            Err(crate::store::Error::NotFound(_))
        ));
    }
}
