// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveError,
    TokioAsyncResolver,
};
use serde::Deserialize;
use thiserror::Error;

use crate::record::referrer::{PemError, PublicKey};

/// DNS TXT records are published under this label of the record's domain.
const TXT_LABEL: &str = "_oasf";

/// Entry format inside the TXT record and the well-known document.
const KEY_ENTRY_PREFIX: &str = "oasf-key=";

const WELL_KNOWN_PATH: &str = "/.well-known/oasf.json";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("dns: {0}")]
    Dns(#[from] ResolveError),

    #[error("well-known probe: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Key(#[from] PemError),

    #[error("{method} evidence for {domain} does not authorise the key")]
    NoEvidence {
        domain: String,
        method: &'static str,
    },
}

/// One way of proving that a domain authorises a public key.
#[async_trait]
pub trait Provider: Send + Sync {
    fn method(&self) -> &'static str;

    async fn verify(&self, domain: &str, key: &PublicKey) -> Result<(), ProviderError>;
}

/// DNS evidence: a TXT record `oasf-key=<key-id>` under `_oasf.<domain>`.
pub struct Dns {
    resolver: TokioAsyncResolver,
}

impl Dns {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for Dns {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for Dns {
    fn method(&self) -> &'static str {
        "dns"
    }

    async fn verify(&self, domain: &str, key: &PublicKey) -> Result<(), ProviderError> {
        let key_id = key.key_id()?;
        let lookup = self
            .resolver
            .txt_lookup(format!("{}.{}.", TXT_LABEL, domain))
            .await?;

        for record in lookup.iter() {
            let entry = record.to_string();
            if let Some(id) = entry.trim().strip_prefix(KEY_ENTRY_PREFIX) {
                if id.trim() == key_id {
                    return Ok(());
                }
            }
        }

        Err(ProviderError::NoEvidence {
            domain: domain.to_owned(),
            method: self.method(),
        })
    }
}

/// HTTPS evidence: a `public_keys` entry in `/.well-known/oasf.json`, given
/// either as `oasf-key=<key-id>` or as the full PEM document.
pub struct WellKnown {
    http: reqwest::Client,
    allow_insecure: bool,
}

#[derive(Deserialize)]
struct WellKnownDocument {
    #[serde(default)]
    public_keys: Vec<String>,
}

impl WellKnown {
    pub fn new(allow_insecure: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            allow_insecure,
        }
    }

    async fn fetch(&self, domain: &str) -> Result<WellKnownDocument, ProviderError> {
        let https = format!("https://{}{}", domain, WELL_KNOWN_PATH);
        match self.get(&https).await {
            Ok(doc) => Ok(doc),
            Err(e) if self.allow_insecure => {
                tracing::debug!(domain, err = %e, "https probe failed, retrying over http");
                self.get(&format!("http://{}{}", domain, WELL_KNOWN_PATH)).await
            },
            Err(e) => Err(e),
        }
    }

    async fn get(&self, url: &str) -> Result<WellKnownDocument, ProviderError> {
        Ok(self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<WellKnownDocument>()
            .await?)
    }
}

impl WellKnown {
    fn authorises(document: &WellKnownDocument, key: &PublicKey, key_id: &str) -> bool {
        document.public_keys.iter().any(|entry| {
            let entry = entry.trim();
            entry
                .strip_prefix(KEY_ENTRY_PREFIX)
                .map(|id| id.trim() == key_id)
                .unwrap_or_else(|| entry == key.pem.trim())
        })
    }
}

#[async_trait]
impl Provider for WellKnown {
    fn method(&self) -> &'static str {
        "well-known"
    }

    async fn verify(&self, domain: &str, key: &PublicKey) -> Result<(), ProviderError> {
        let key_id = key.key_id()?;
        let document = self.fetch(domain).await?;

        if Self::authorises(&document, key, &key_id) {
            return Ok(());
        }
        Err(ProviderError::NoEvidence {
            domain: domain.to_owned(),
            method: self.method(),
        })
    }
}
