// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use chrono::{SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row as _, SqlitePool};

use super::{Error, Status, Sync};

/// The sync job rows.
#[derive(Clone)]
pub struct Syncs {
    pool: SqlitePool,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn decode(row: SqliteRow) -> Sync {
    let status: String = row.get("status");
    let cids: Option<String> = row.get("cids");
    Sync {
        id: row.get("id"),
        remote_directory_url: row.get("remote_directory_url"),
        cids: cids.and_then(|json| serde_json::from_str(&json).ok()),
        status: Status::parse(&status).unwrap_or(Status::Failed),
        remote_registry_url: row.get("remote_registry_url"),
        created_at: row.get("created_at"),
        last_update_at: row.get("last_update_at"),
    }
}

const COLUMNS: &str =
    "id, remote_directory_url, cids, status, remote_registry_url, created_at, last_update_at";

impl Syncs {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        id: &str,
        remote_directory_url: &str,
        cids: Option<&[String]>,
    ) -> Result<Sync, Error> {
        let stamp = now();
        let cids_json = cids.map(serde_json::to_string).transpose().ok().flatten();
        sqlx::query(
            "INSERT INTO syncs (id, remote_directory_url, cids, status, created_at, last_update_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(remote_directory_url)
        .bind(&cids_json)
        .bind(Status::Pending.as_str())
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        Ok(Sync {
            id: id.to_owned(),
            remote_directory_url: remote_directory_url.to_owned(),
            cids: cids.map(|c| c.to_vec()),
            status: Status::Pending,
            remote_registry_url: None,
            created_at: stamp.clone(),
            last_update_at: stamp,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Sync, Error> {
        sqlx::query(&format!("SELECT {} FROM syncs WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(decode)
            .ok_or_else(|| Error::NotFound(id.to_owned()))
    }

    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Sync>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM syncs ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(decode).collect())
    }

    pub async fn with_status(&self, status: Status) -> Result<Vec<Sync>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM syncs WHERE status = ? ORDER BY created_at ASC, id ASC",
            COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(decode).collect())
    }

    /// Conditional transition: only applies when the row still is in
    /// `from`. Returns whether the row moved, so racing writers detect the
    /// loss instead of clobbering each other.
    pub async fn transition(&self, id: &str, from: Status, to: Status) -> Result<bool, Error> {
        let moved = sqlx::query(
            "UPDATE syncs SET status = ?, last_update_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(moved > 0)
    }

    /// Client-requested deletion: any live state moves to DELETE_PENDING;
    /// repeating the request is a no-op.
    pub async fn mark_delete_pending(&self, id: &str) -> Result<(), Error> {
        let moved = sqlx::query(
            "UPDATE syncs SET status = ?, last_update_at = ? \
             WHERE id = ? AND status NOT IN (?, ?)",
        )
        .bind(Status::DeletePending.as_str())
        .bind(now())
        .bind(id)
        .bind(Status::DeletePending.as_str())
        .bind(Status::Deleted.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if moved == 0 {
            // distinguish "already deleting" from "never existed"
            self.get(id).await?;
        }
        Ok(())
    }

    pub async fn set_remote_registry(&self, id: &str, registry_url: &str) -> Result<(), Error> {
        sqlx::query("UPDATE syncs SET remote_registry_url = ?, last_update_at = ? WHERE id = ?")
            .bind(registry_url)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::db;

    #[tokio::test]
    async fn lifecycle_happy_path() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let row = syncs.insert("s1", "http://peer:8888", None).await.unwrap();
        assert_eq!(row.status, Status::Pending);

        assert!(syncs.transition("s1", Status::Pending, Status::InProgress).await.unwrap());
        assert!(syncs
            .transition("s1", Status::InProgress, Status::Completed)
            .await
            .unwrap());
        assert_eq!(syncs.get("s1").await.unwrap().status, Status::Completed);
    }

    #[tokio::test]
    async fn conditional_transitions_do_not_move_backwards() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        syncs.insert("s1", "http://peer:8888", None).await.unwrap();

        assert!(syncs.transition("s1", Status::Pending, Status::InProgress).await.unwrap());
        // a raced second worker loses
        assert!(!syncs.transition("s1", Status::Pending, Status::InProgress).await.unwrap());
        assert!(syncs
            .transition("s1", Status::InProgress, Status::Failed)
            .await
            .unwrap());
        // terminal rows never go active again
        assert!(!syncs.transition("s1", Status::Pending, Status::InProgress).await.unwrap());
        assert_eq!(syncs.get("s1").await.unwrap().status, Status::Failed);
    }

    #[tokio::test]
    async fn deletion_legs() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        syncs.insert("s1", "http://peer:8888", None).await.unwrap();

        syncs.mark_delete_pending("s1").await.unwrap();
        assert_eq!(syncs.get("s1").await.unwrap().status, Status::DeletePending);

        // idempotent
        syncs.mark_delete_pending("s1").await.unwrap();

        assert!(syncs
            .transition("s1", Status::DeletePending, Status::Deleted)
            .await
            .unwrap());
        syncs.mark_delete_pending("s1").await.unwrap();
        assert_eq!(syncs.get("s1").await.unwrap().status, Status::Deleted);

        assert!(matches!(
            syncs.mark_delete_pending("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cids_roundtrip() {
        let syncs = Syncs::new(db::in_memory().await.unwrap());
        let cids = vec!["bafyone".to_owned(), "bafytwo".to_owned()];
        syncs
            .insert("s1", "http://peer:8888", Some(&cids))
            .await
            .unwrap();
        assert_eq!(syncs.get("s1").await.unwrap().cids, Some(cids));
    }
}
