// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::time::Duration;

use adir_canonical::Cid;
use chrono::{SecondsFormat, Utc};
use sqlx::{Row as _, SqlitePool};

use super::{Error, Signer, SignerKind};

/// Per-referrer verification outcome of one record pass.
#[derive(Clone, Debug)]
pub enum Outcome {
    Verified(Signer),
    /// Kept for audit, never reported as a signer. The key names the
    /// signature that failed, since no identity was established.
    Failed { key: String },
}

/// The signature-verification rows.
#[derive(Clone)]
pub struct Signers {
    pool: SqlitePool,
}

impl Signers {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The verified signers of a record, as of the last pass.
    pub async fn verified(&self, cid: &Cid) -> Result<Vec<Signer>, Error> {
        let rows = sqlx::query(
            "SELECT signer_type, signer_issuer, signer_subject, signer_public_key, signer_algorithm \
             FROM signature_verifications \
             WHERE record_cid = ? AND status = 'verified' \
             ORDER BY signer_key",
        )
        .bind(cid.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let kind: String = row.get("signer_type");
                Signer {
                    kind: SignerKind::parse(&kind).unwrap_or(SignerKind::Key),
                    issuer: row.get("signer_issuer"),
                    subject: row.get("signer_subject"),
                    public_key: row.get("signer_public_key"),
                    algorithm: row.get("signer_algorithm"),
                }
            })
            .collect())
    }

    /// Records whose signer rows are missing or last touched before
    /// `now - ttl`.
    pub async fn stale_records(&self, ttl: Duration) -> Result<Vec<Cid>, Error> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()))
        .to_rfc3339_opts(SecondsFormat::Secs, true);

        let rows = sqlx::query(
            "SELECT r.cid AS cid FROM records r \
             LEFT JOIN (SELECT record_cid, MAX(updated_at) AS updated_at \
                        FROM signature_verifications GROUP BY record_cid) v \
                 ON v.record_cid = r.cid \
             WHERE v.record_cid IS NULL OR v.updated_at < ? \
             ORDER BY r.created_at DESC, r.cid ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let cid: String = row.get("cid");
                Ok(cid.parse::<Cid>()?)
            })
            .collect()
    }

    /// Replace the rows of `cid` with this pass's outcomes: afterwards the
    /// record has exactly one verified row per referrer that verified.
    pub async fn replace(&self, cid: &Cid, outcomes: &[Outcome]) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let cid = cid.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM signature_verifications WHERE record_cid = ?")
            .bind(&cid)
            .execute(&mut *tx)
            .await?;

        for outcome in outcomes {
            let (key, signer, status) = match outcome {
                Outcome::Verified(signer) => (signer.natural_key(), Some(signer), "verified"),
                Outcome::Failed { key } => (key.clone(), None, "failed"),
            };
            sqlx::query(
                "INSERT OR REPLACE INTO signature_verifications \
                 (record_cid, signer_key, signer_type, signer_issuer, signer_subject, \
                  signer_public_key, signer_algorithm, status, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&cid)
            .bind(key)
            .bind(signer.map(|s| s.kind.as_str()).unwrap_or("key"))
            .bind(signer.and_then(|s| s.issuer.clone()))
            .bind(signer.and_then(|s| s.subject.clone()))
            .bind(signer.and_then(|s| s.public_key.clone()))
            .bind(signer.and_then(|s| s.algorithm.clone()))
            .bind(status)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::db;

    #[tokio::test]
    async fn replace_reflects_the_last_pass() {
        let signers = Signers::new(db::in_memory().await.unwrap());
        let cid = Cid::digest(b"record");

        let alice = Signer::oidc(
            "https://token.actions.githubusercontent.com".to_owned(),
            "https://github.com/example/agent/.github/workflows/release.yaml@refs/tags/v1".to_owned(),
        );
        signers
            .replace(&cid, &[Outcome::Verified(alice.clone())])
            .await
            .unwrap();
        assert_eq!(signers.verified(&cid).await.unwrap(), vec![alice.clone()]);

        // the signer is stable across passes
        signers
            .replace(&cid, &[Outcome::Verified(alice.clone())])
            .await
            .unwrap();
        assert_eq!(signers.verified(&cid).await.unwrap(), vec![alice]);

        // a pass with only failures reports no signers but keeps the audit row
        signers
            .replace(
                &cid,
                &[Outcome::Failed {
                    key: "sig:deadbeef".to_owned(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(signers.verified(&cid).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn duplicate_signers_collapse() {
        let signers = Signers::new(db::in_memory().await.unwrap());
        let cid = Cid::digest(b"record");
        let signer = Signer::key("-----BEGIN PUBLIC KEY-----".to_owned(), "ecdsa-p256".to_owned());

        signers
            .replace(
                &cid,
                &[
                    Outcome::Verified(signer.clone()),
                    Outcome::Verified(signer.clone()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(signers.verified(&cid).await.unwrap().len(), 1);
    }
}
