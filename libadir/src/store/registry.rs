// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use async_trait::async_trait;

use super::Error;

mod fs;
mod mem;
mod remote;

pub use fs::Fs;
pub use mem::Mem;
pub use remote::Remote;

/// The registry primitives the store is built on.
///
/// A repository is implicit in the handle: one `Registry` value addresses
/// one repository of one registry. References are either tags or
/// `sha256:<hex>` digests.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Upload a blob, returning its `sha256:<hex>` digest. Re-uploading an
    /// existing blob is a no-op.
    async fn push_blob(&self, bytes: &[u8]) -> Result<String, Error>;

    async fn pull_blob(&self, digest: &str) -> Result<Vec<u8>, Error>;

    /// Upload manifest bytes and tag them, returning the manifest digest.
    async fn push_manifest(&self, tag: &str, bytes: Vec<u8>) -> Result<String, Error>;

    /// Fetch manifest bytes plus their digest.
    ///
    /// Fails with [`Error::ManifestNotFound`] when nothing is addressed by
    /// `reference`.
    async fn pull_manifest(&self, reference: &str) -> Result<(Vec<u8>, String), Error>;

    /// Untag and delete a manifest.
    async fn delete_manifest(&self, reference: &str) -> Result<(), Error>;

    /// All tags of the repository.
    async fn list_tags(&self) -> Result<Vec<String>, Error>;
}

#[async_trait]
impl<T: Registry + ?Sized> Registry for std::sync::Arc<T> {
    async fn push_blob(&self, bytes: &[u8]) -> Result<String, Error> {
        (**self).push_blob(bytes).await
    }

    async fn pull_blob(&self, digest: &str) -> Result<Vec<u8>, Error> {
        (**self).pull_blob(digest).await
    }

    async fn push_manifest(&self, tag: &str, bytes: Vec<u8>) -> Result<String, Error> {
        (**self).push_manifest(tag, bytes).await
    }

    async fn pull_manifest(&self, reference: &str) -> Result<(Vec<u8>, String), Error> {
        (**self).pull_manifest(reference).await
    }

    async fn delete_manifest(&self, reference: &str) -> Result<(), Error> {
        (**self).delete_manifest(reference).await
    }

    async fn list_tags(&self) -> Result<Vec<String>, Error> {
        (**self).list_tags().await
    }
}
