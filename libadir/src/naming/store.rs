// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::time::Duration;

use adir_canonical::Cid;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::{Row as _, SqlitePool};

use crate::{record::domain_of, store::verified::VerificationReader};

use super::{Error, Verification, VerificationStatus};

/// The name-verification rows.
#[derive(Clone)]
pub struct Verifications {
    pool: SqlitePool,
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Verifications {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, cid: &Cid) -> Result<Option<Verification>, Error> {
        let row = sqlx::query(
            "SELECT method, key_id, status, error, updated_at \
             FROM name_verifications WHERE record_cid = ?",
        )
        .bind(cid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let status: String = row.get("status");
            Verification {
                cid: cid.clone(),
                method: row.get("method"),
                key_id: row.get("key_id"),
                status: VerificationStatus::parse(&status).unwrap_or(VerificationStatus::Failed),
                error: row.get("error"),
                updated_at: row.get("updated_at"),
            }
        }))
    }

    /// Upsert by CID. A row that would not change is left alone, so
    /// `updated_at` (and with it the TTL clock) only moves on real change.
    pub async fn upsert(&self, row: &Verification) -> Result<(), Error> {
        if let Some(existing) = self.get(&row.cid).await? {
            if existing.method == row.method
                && existing.key_id == row.key_id
                && existing.status == row.status
                && existing.error == row.error
            {
                return Ok(());
            }
        }

        sqlx::query(
            "INSERT INTO name_verifications (record_cid, method, key_id, status, error, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (record_cid) DO UPDATE SET \
                 method = excluded.method, \
                 key_id = excluded.key_id, \
                 status = excluded.status, \
                 error = excluded.error, \
                 updated_at = excluded.updated_at",
        )
        .bind(row.cid.to_string())
        .bind(&row.method)
        .bind(&row.key_id)
        .bind(row.status.as_str())
        .bind(&row.error)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records whose verification row is missing or older than `now - ttl`,
    /// restricted to names that carry a domain component.
    pub async fn expired(&self, ttl: Duration) -> Result<Vec<(Cid, String)>, Error> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()))
        .to_rfc3339_opts(SecondsFormat::Secs, true);

        let rows = sqlx::query(
            "SELECT r.cid AS cid, r.name AS name FROM records r \
             LEFT JOIN name_verifications v ON v.record_cid = r.cid \
             WHERE v.record_cid IS NULL OR v.updated_at < ? \
             ORDER BY r.created_at DESC, r.cid ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut due = Vec::new();
        for row in rows {
            let name: String = row.get("name");
            if domain_of(&name).is_none() {
                continue;
            }
            let cid: String = row.get("cid");
            due.push((cid.parse::<Cid>()?, name));
        }
        Ok(due)
    }
}

#[async_trait]
impl VerificationReader for Verifications {
    async fn verification(&self, cid: &Cid) -> Result<Option<Verification>, Error> {
        self.get(cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{db, index::Index, record::gen};

    fn verified(cid: Cid) -> Verification {
        Verification {
            cid,
            method: Some("dns".to_owned()),
            key_id: Some("00".repeat(32)),
            status: VerificationStatus::Verified,
            error: None,
            updated_at: now_rfc3339(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let pool = db::in_memory().await.unwrap();
        let verifications = Verifications::new(pool);
        let row = verified(Cid::digest(b"record"));

        verifications.upsert(&row).await.unwrap();
        assert_eq!(verifications.get(&row.cid).await.unwrap(), Some(row));
    }

    #[tokio::test]
    async fn unchanged_rows_keep_their_updated_at() {
        let pool = db::in_memory().await.unwrap();
        let verifications = Verifications::new(pool);
        let mut row = verified(Cid::digest(b"record"));

        verifications.upsert(&row).await.unwrap();
        let first = verifications.get(&row.cid).await.unwrap().unwrap();

        row.updated_at = "2030-01-01T00:00:00Z".to_owned();
        verifications.upsert(&row).await.unwrap();
        let second = verifications.get(&row.cid).await.unwrap().unwrap();

        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn fresh_rows_are_not_due_expired_ones_are() {
        let pool = db::in_memory().await.unwrap();
        let index = Index::new(pool.clone());
        let verifications = Verifications::new(pool);

        let record = gen::record("https://example.org/agent", "v1.0.0");
        let cid = record.cid().unwrap();
        index.add_record(&cid, &record).await.unwrap();

        // no row yet: due
        let due = verifications.expired(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(due.len(), 1);

        verifications.upsert(&verified(cid.clone())).await.unwrap();
        let due = verifications.expired(Duration::from_secs(3600)).await.unwrap();
        assert!(due.is_empty());

        // a zero TTL expires everything immediately
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let due = verifications.expired(Duration::ZERO).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn names_without_a_domain_are_never_due() {
        let pool = db::in_memory().await.unwrap();
        let index = Index::new(pool.clone());
        let verifications = Verifications::new(pool);

        let record = gen::record("just-a-name", "v1.0.0");
        let cid = record.cid().unwrap();
        index.add_record(&cid, &record).await.unwrap();

        let due = verifications.expired(Duration::ZERO).await.unwrap();
        assert!(due.is_empty());
    }
}
