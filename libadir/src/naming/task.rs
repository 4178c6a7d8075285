// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::time::Duration;

use adir_canonical::Cid;
use async_trait::async_trait;
use tokio::time::timeout;

use crate::{
    reconciler,
    record::referrer::{PublicKey, Referrer, PUBLIC_KEY_MEDIA_TYPE},
    store::{Registry, Store},
};

use super::{
    provider::Provider,
    store::{now_rfc3339, Verifications},
    Config, Error, Verification, VerificationStatus,
};

/// Background re-verification of domain ownership.
///
/// Each tick picks up the records whose verification row is missing or past
/// the TTL and works through them sequentially, bounded per record. The
/// first key any provider verifies wins.
pub struct VerifyNames<R> {
    store: Store<R>,
    verifications: Verifications,
    providers: Vec<Box<dyn Provider>>,
    config: Config,
    reconciler: reconciler::Config,
}

impl<R> VerifyNames<R> {
    pub fn new(
        store: Store<R>,
        verifications: Verifications,
        providers: Vec<Box<dyn Provider>>,
        config: Config,
        reconciler: reconciler::Config,
    ) -> Self {
        Self {
            store,
            verifications,
            providers,
            config,
            reconciler,
        }
    }
}

#[async_trait]
impl<R: Registry + 'static> reconciler::Task for VerifyNames<R> {
    fn name(&self) -> &'static str {
        "name-verification"
    }

    fn interval(&self) -> Duration {
        self.reconciler.interval
    }

    fn enabled(&self) -> bool {
        self.reconciler.enabled && self.config.enabled
    }

    fn tick_timeout(&self) -> Option<Duration> {
        Some(self.reconciler.timeout)
    }

    async fn run(&self) {
        let due = match self.verifications.expired(self.config.cache_ttl).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(err = %e, "cannot list records due for name verification");
                return;
            },
        };
        tracing::debug!(due = due.len(), "name verification tick");

        for (cid, name) in due {
            match timeout(self.config.record_timeout, self.verify_record(&cid, &name)).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => tracing::warn!(%cid, err = %e, "name verification errored"),
                Err(_) => tracing::warn!(%cid, "name verification timed out"),
            }
        }
    }
}

impl<R: Registry> VerifyNames<R> {
    async fn verify_record(&self, cid: &Cid, name: &str) -> Result<(), Error> {
        let domain = match crate::record::domain_of(name) {
            Some(domain) => domain,
            None => return Ok(()),
        };

        let keys: Vec<PublicKey> = self
            .store
            .referrers(cid, Some(PUBLIC_KEY_MEDIA_TYPE))
            .await?
            .into_iter()
            .filter_map(|referrer| match referrer {
                Referrer::PublicKey(key) => Some(key),
                Referrer::Signature(_) => None,
            })
            .collect();

        if keys.is_empty() {
            return self
                .record_outcome(cid, None, None, Some("no public key attached".to_owned()))
                .await;
        }

        let mut last_error = String::new();
        for key in &keys {
            for provider in &self.providers {
                match provider.verify(&domain, key).await {
                    Ok(()) => {
                        tracing::info!(%cid, domain, method = provider.method(), "name verified");
                        return self
                            .record_outcome(
                                cid,
                                Some(provider.method().to_owned()),
                                key.key_id().ok(),
                                None,
                            )
                            .await;
                    },
                    Err(e) => last_error = e.to_string(),
                }
            }
        }

        self.record_outcome(cid, None, None, Some(last_error)).await
    }

    async fn record_outcome(
        &self,
        cid: &Cid,
        method: Option<String>,
        key_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), Error> {
        let status = if error.is_none() {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };
        self.verifications
            .upsert(&Verification {
                cid: cid.clone(),
                method,
                key_id,
                status,
                error,
                updated_at: now_rfc3339(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{
        db,
        index::Index,
        naming::provider::ProviderError,
        reconciler::Task as _,
        record::{gen, referrer::gen as referrer_gen, validation::Limits},
        store::registry::Mem,
    };

    struct Accepting;

    #[async_trait]
    impl Provider for Accepting {
        fn method(&self) -> &'static str {
            "dns"
        }

        async fn verify(&self, _: &str, _: &PublicKey) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Provider for Rejecting {
        fn method(&self) -> &'static str {
            "well-known"
        }

        async fn verify(&self, domain: &str, _: &PublicKey) -> Result<(), ProviderError> {
            Err(ProviderError::NoEvidence {
                domain: domain.to_owned(),
                method: "well-known",
            })
        }
    }

    async fn fixture(
        provider: Box<dyn Provider>,
    ) -> (VerifyNames<Mem>, Verifications, Cid) {
        let pool = db::in_memory().await.unwrap();
        let store = Store::new(Mem::new(), Limits::default());
        let index = Index::new(pool.clone());
        let verifications = Verifications::new(pool);

        let record = gen::record("https://example.org/agent", "v1.0.0");
        let cid = store.push(&record).await.unwrap();
        index.add_record(&cid, &record).await.unwrap();
        store
            .push_referrer(&cid, &Referrer::PublicKey(referrer_gen::public_key()))
            .await
            .unwrap();

        let task = VerifyNames::new(
            store,
            verifications.clone(),
            vec![provider],
            Config::default(),
            reconciler::Config::default(),
        );
        (task, verifications, cid)
    }

    #[tokio::test]
    async fn a_verifying_key_writes_a_verified_row() {
        let (task, verifications, cid) = fixture(Box::new(Accepting)).await;
        task.run().await;

        let row = verifications.get(&cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Verified);
        assert_eq!(row.method.as_deref(), Some("dns"));
        assert_eq!(
            row.key_id,
            referrer_gen::public_key().key_id().ok()
        );
    }

    #[tokio::test]
    async fn total_failure_writes_the_last_error() {
        let (task, verifications, cid) = fixture(Box::new(Rejecting)).await;
        task.run().await;

        let row = verifications.get(&cid).await.unwrap().unwrap();
        assert_eq!(row.status, VerificationStatus::Failed);
        assert!(row.error.as_deref().unwrap().contains("example.org"));
    }

    #[tokio::test]
    async fn fresh_rows_are_not_touched_again() {
        let (task, verifications, cid) = fixture(Box::new(Accepting)).await;
        task.run().await;
        let first = verifications.get(&cid).await.unwrap().unwrap();

        // within the TTL the next tick has nothing to do
        task.run().await;
        let second = verifications.get(&cid).await.unwrap().unwrap();
        assert_eq!(first, second);
    }
}
