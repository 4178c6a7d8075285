// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use async_trait::async_trait;
use oci_client::{
    client::{ClientConfig, ClientProtocol},
    manifest::OciDescriptor,
    secrets::RegistryAuth,
    Client, Reference, RegistryOperation,
};

use crate::store::{
    config::Config,
    manifest::{sha256_digest, MEDIA_TYPE_MANIFEST},
    Error,
};

use super::Registry;

/// A repository of a real OCI registry.
///
/// Manifests travel as raw bytes in both directions, so the digests the
/// registry computes are the digests of exactly the bytes the store
/// addressed its referrer tags by.
pub struct Remote {
    client: Client,
    http: reqwest::Client,
    auth: RegistryAuth,
    registry: String,
    repository: String,
    insecure: bool,
}

impl Remote {
    pub fn new(config: &Config) -> Self {
        let protocol = if config.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..ClientConfig::default()
        });

        Self {
            client,
            http: reqwest::Client::new(),
            auth: config.registry_auth(),
            registry: config.registry_address.clone(),
            repository: config.repository_name.clone(),
            insecure: config.insecure,
        }
    }

    fn reference(&self, reference: &str) -> Reference {
        if reference.starts_with("sha256:") {
            Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                reference.to_owned(),
            )
        } else {
            Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                reference.to_owned(),
            )
        }
    }

    async fn authenticate(&self, reference: &Reference, op: RegistryOperation) -> Result<(), Error> {
        self.client
            .auth(reference, &self.auth, op)
            .await
            .map(|_| ())
            .map_err(Error::registry)
    }
}

// Registry error envelopes vary; the 404 class only shows in display text.
fn is_not_found<E: std::fmt::Display>(e: &E) -> bool {
    let text = e.to_string().to_lowercase();
    text.contains("404") || text.contains("not found") || text.contains("unknown")
}

#[async_trait]
impl Registry for Remote {
    async fn push_blob(&self, bytes: &[u8]) -> Result<String, Error> {
        let reference = self.reference("latest");
        self.authenticate(&reference, RegistryOperation::Push).await?;

        let digest = sha256_digest(bytes);
        self.client
            .push_blob(&reference, bytes, &digest)
            .await
            .map_err(Error::registry)?;
        Ok(digest)
    }

    async fn pull_blob(&self, digest: &str) -> Result<Vec<u8>, Error> {
        let reference = self.reference(digest);
        self.authenticate(&reference, RegistryOperation::Pull).await?;

        let descriptor = OciDescriptor {
            digest: digest.to_owned(),
            ..OciDescriptor::default()
        };
        let mut out = Vec::new();
        match self.client.pull_blob(&reference, &descriptor, &mut out).await {
            Ok(()) => Ok(out),
            Err(e) if is_not_found(&e) => Err(Error::BlobNotFound(digest.to_owned())),
            Err(e) => Err(Error::registry(e)),
        }
    }

    async fn push_manifest(&self, tag: &str, bytes: Vec<u8>) -> Result<String, Error> {
        let reference = self.reference(tag);
        self.authenticate(&reference, RegistryOperation::Push).await?;

        let digest = sha256_digest(&bytes);
        self.client
            .push_manifest_raw(
                &reference,
                bytes,
                MEDIA_TYPE_MANIFEST.parse().map_err(Error::registry)?,
            )
            .await
            .map_err(Error::registry)?;
        Ok(digest)
    }

    async fn pull_manifest(&self, reference: &str) -> Result<(Vec<u8>, String), Error> {
        let oci_reference = self.reference(reference);
        self.authenticate(&oci_reference, RegistryOperation::Pull).await?;

        match self
            .client
            .pull_manifest_raw(&oci_reference, &self.auth, &[MEDIA_TYPE_MANIFEST])
            .await
        {
            Ok((bytes, digest)) => Ok((bytes, digest)),
            Err(e) if is_not_found(&e) => Err(Error::ManifestNotFound(reference.to_owned())),
            Err(e) => Err(Error::registry(e)),
        }
    }

    async fn delete_manifest(&self, reference: &str) -> Result<(), Error> {
        // the distribution API deletes by digest only
        let (_, digest) = self.pull_manifest(reference).await?;

        let scheme = if self.insecure { "http" } else { "https" };
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            scheme, self.registry, self.repository, digest
        );
        let mut request = self.http.delete(&url);
        if let RegistryAuth::Basic(user, pass) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(Error::registry)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ManifestNotFound(reference.to_owned()));
        }
        response
            .error_for_status()
            .map(|_| ())
            .map_err(Error::registry)
    }

    async fn list_tags(&self) -> Result<Vec<String>, Error> {
        let reference = self.reference("latest");
        self.authenticate(&reference, RegistryOperation::Pull).await?;

        let mut tags = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let page = self
                .client
                .list_tags(&reference, &self.auth, Some(PAGE), last.as_deref())
                .await
                .map_err(Error::registry)?;
            let len = page.tags.len();
            tags.extend(page.tags);
            if len < PAGE {
                return Ok(tags);
            }
            last = tags.last().cloned();
        }
    }
}

const PAGE: usize = 500;
