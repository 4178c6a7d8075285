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
    record::referrer::{self, Referrer, Signature},
    store::{sha256_digest, Registry, Store},
};

use super::{
    payload::SimpleSigning,
    store::{Outcome, Signers},
    Config, Error, Verifier,
};

/// Knobs of the signature-verification pass.
#[derive(Clone, Debug)]
pub struct TaskConfig {
    /// Signer rows younger than this are left alone.
    pub ttl: Duration,
    pub record_timeout: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            record_timeout: Duration::from_secs(30),
        }
    }
}

/// Background verification of cosign signatures.
///
/// Each pass re-establishes, per record, the set of verified signers from
/// the signature referrers as they exist right now.
pub struct VerifySignatures<R, V> {
    store: Store<R>,
    signers: Signers,
    verifier: V,
    config: Config,
    task: TaskConfig,
    reconciler: reconciler::Config,
}

impl<R, V> VerifySignatures<R, V> {
    pub fn new(
        store: Store<R>,
        signers: Signers,
        verifier: V,
        config: Config,
        task: TaskConfig,
        reconciler: reconciler::Config,
    ) -> Self {
        Self {
            store,
            signers,
            verifier,
            config,
            task,
            reconciler,
        }
    }
}

#[async_trait]
impl<R, V> reconciler::Task for VerifySignatures<R, V>
where
    R: Registry + 'static,
    V: Verifier + 'static,
{
    fn name(&self) -> &'static str {
        "signature-verification"
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
        let stale = match self.signers.stale_records(self.task.ttl).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!(err = %e, "cannot list records due for signature verification");
                return;
            },
        };
        tracing::debug!(due = stale.len(), "signature verification tick");

        for cid in stale {
            match timeout(self.task.record_timeout, self.verify_record(&cid)).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => tracing::warn!(%cid, err = %e, "signature verification errored"),
                Err(_) => tracing::warn!(%cid, "signature verification timed out"),
            }
        }
    }
}

impl<R: Registry, V: Verifier> VerifySignatures<R, V> {
    async fn verify_record(&self, cid: &Cid) -> Result<(), Error> {
        let signatures: Vec<Signature> = self
            .store
            .referrers(cid, Some(referrer::SIGNATURE_MEDIA_TYPE))
            .await?
            .into_iter()
            .filter_map(|r| match r {
                Referrer::Signature(sig) => Some(sig),
                Referrer::PublicKey(_) => None,
            })
            .collect();
        if signatures.is_empty() {
            return Ok(());
        }

        let manifest_digest = self.store.manifest_digest(cid).await?;
        let payload = SimpleSigning::for_manifest_digest(&manifest_digest).canonical_bytes()?;

        let keys: Vec<String> = self
            .store
            .referrers(cid, Some(referrer::PUBLIC_KEY_MEDIA_TYPE))
            .await?
            .into_iter()
            .filter_map(|r| match r {
                Referrer::PublicKey(key) => Some(key.pem),
                Referrer::Signature(_) => None,
            })
            .collect();

        let mut outcomes = Vec::with_capacity(signatures.len());
        for signature in &signatures {
            outcomes.push(self.verify_signature(cid, &payload, signature, &keys));
        }

        self.signers.replace(cid, &outcomes).await
    }

    fn verify_signature(
        &self,
        cid: &Cid,
        payload: &[u8],
        signature: &Signature,
        keys: &[String],
    ) -> Outcome {
        if let Some(bundle) = &signature.bundle {
            return match self.verifier.verify_bundle(payload, bundle) {
                Ok(signer) => {
                    tracing::info!(%cid, issuer = ?signer.issuer, "bundle verified");
                    Outcome::Verified(signer)
                },
                Err(e) => {
                    tracing::warn!(%cid, err = %e, "bundle rejected");
                    Outcome::Failed {
                        key: failed_key(signature),
                    }
                },
            };
        }

        for pem in keys {
            match self.verifier.verify_key(payload, &signature.signature, pem) {
                Ok(signer) => {
                    tracing::info!(%cid, "signature verified by attached key");
                    return Outcome::Verified(signer);
                },
                Err(e) => tracing::debug!(%cid, err = %e, "key did not verify the signature"),
            }
        }

        tracing::warn!(%cid, "no attached key verifies the signature");
        Outcome::Failed {
            key: failed_key(signature),
        }
    }
}

fn failed_key(signature: &Signature) -> String {
    format!("sig:{}", sha256_digest(signature.signature.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{
        db,
        index::Index,
        reconciler::Task as _,
        record::{gen, referrer::gen as referrer_gen, validation::Limits},
        sign::{Signer, SignerKind},
        store::registry::Mem,
    };

    struct KeyAccepting;

    impl Verifier for KeyAccepting {
        fn verify_key(&self, _: &[u8], _: &str, pem: &str) -> Result<Signer, Error> {
            Ok(Signer::key(pem.to_owned(), "ecdsa-p256".to_owned()))
        }

        fn verify_bundle(&self, _: &[u8], _: &serde_json::Value) -> Result<Signer, Error> {
            Err(Error::Rejected("no bundles here".to_owned()))
        }
    }

    struct Rejecting;

    impl Verifier for Rejecting {
        fn verify_key(&self, _: &[u8], _: &str, _: &str) -> Result<Signer, Error> {
            Err(Error::Rejected("nope".to_owned()))
        }

        fn verify_bundle(&self, _: &[u8], _: &serde_json::Value) -> Result<Signer, Error> {
            Err(Error::Rejected("nope".to_owned()))
        }
    }

    async fn fixture<V: Verifier + 'static>(
        verifier: V,
    ) -> (VerifySignatures<Mem, V>, Signers, Cid) {
        let pool = db::in_memory().await.unwrap();
        let store = Store::new(Mem::new(), Limits::default());
        let index = Index::new(pool.clone());
        let signers = Signers::new(pool);

        let record = gen::record("https://example.org/agent", "v1.0.0");
        let cid = store.push(&record).await.unwrap();
        index.add_record(&cid, &record).await.unwrap();
        store
            .push_referrer(&cid, &Referrer::PublicKey(referrer_gen::public_key()))
            .await
            .unwrap();
        store
            .push_referrer(&cid, &Referrer::Signature(referrer_gen::signature()))
            .await
            .unwrap();

        let task = VerifySignatures::new(
            store,
            signers.clone(),
            verifier,
            Config::default(),
            TaskConfig::default(),
            reconciler::Config::default(),
        );
        (task, signers, cid)
    }

    #[tokio::test]
    async fn a_verifying_key_produces_one_key_signer() {
        let (task, signers, cid) = fixture(KeyAccepting).await;
        task.run().await;

        let verified = signers.verified(&cid).await.unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].kind, SignerKind::Key);
        assert_eq!(verified[0].public_key.as_deref(), Some(referrer_gen::PEM));
    }

    #[tokio::test]
    async fn verification_is_monotone_across_ticks() {
        let (task, signers, cid) = fixture(KeyAccepting).await;
        task.run().await;
        let first = signers.verified(&cid).await.unwrap();

        task.run().await;
        let second = signers.verified(&cid).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failures_report_no_signers() {
        let (task, signers, cid) = fixture(Rejecting).await;
        task.run().await;
        assert_eq!(signers.verified(&cid).await.unwrap(), vec![]);
    }
}
