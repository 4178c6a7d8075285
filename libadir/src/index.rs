// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Relational projection of stored records, serving multi-predicate search.
//!
//! The projection is eventually consistent with the store: writers log and
//! continue when an insert fails, and a reconciliation sweep can re-derive
//! every row from the store.

use adir_canonical::Cid;
use sqlx::{QueryBuilder, Row as _, Sqlite, SqlitePool};
use thiserror::Error as ThisError;

use crate::{
    error::{Code, Coded},
    record::Record,
};

pub mod query;

pub use query::{Attribute, Filter, Query, DEFAULT_LIMIT, MAX_LIMIT};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("unknown search attribute {0}")]
    UnknownAttribute(String),

    #[error("attribute {attribute} takes a numeric value, got {value}")]
    Numeric { attribute: &'static str, value: String },

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("corrupt projection row: {0}")]
    Corrupt(#[from] adir_canonical::cid::ParseError),
}

impl Coded for Error {
    fn code(&self) -> Code {
        match self {
            Self::UnknownAttribute(_) | Self::Numeric { .. } => Code::Invalid,
            Self::Db(_) => Code::Unavailable,
            Self::Corrupt(_) => Code::Internal,
        }
    }
}

/// The search index.
#[derive(Clone)]
pub struct Index {
    pool: SqlitePool,
}

impl Index {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the projection of `record`. Idempotent: a CID already present
    /// is left untouched, child rows are deduplicated by natural key.
    pub async fn add_record(&self, cid: &Cid, record: &Record) -> Result<(), Error> {
        let cid = cid.to_string();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO records (cid, name, version, schema_version, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&cid)
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.schema_version)
        .bind(&record.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(());
        }

        for (seq, author) in record.authors.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO record_authors (cid, seq, author) VALUES (?, ?, ?)")
                .bind(&cid)
                .bind(seq as i64)
                .bind(author)
                .execute(&mut *tx)
                .await?;
        }
        for (seq, skill) in record.skills.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO record_skills (cid, seq, skill_id, name) VALUES (?, ?, ?, ?)",
            )
            .bind(&cid)
            .bind(seq as i64)
            .bind(skill.id as i64)
            .bind(&skill.name)
            .execute(&mut *tx)
            .await?;
        }
        for (seq, locator) in record.locators.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO record_locators (cid, seq, type, url, size, digest) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&cid)
            .bind(seq as i64)
            .bind(&locator.ty)
            .bind(&locator.url)
            .bind(locator.size.map(|s| s as i64))
            .bind(&locator.digest)
            .execute(&mut *tx)
            .await?;
        }
        for (seq, module) in record.modules.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO record_modules (cid, seq, module_id, name, version) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&cid)
            .bind(seq as i64)
            .bind(module.id as i64)
            .bind(&module.name)
            .bind(&module.version)
            .execute(&mut *tx)
            .await?;
        }
        for (seq, domain) in record.domains.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO record_domains (cid, seq, domain_id, name) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&cid)
            .bind(seq as i64)
            .bind(domain.id as i64)
            .bind(&domain.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove the projection of `cid` and all its child rows.
    pub async fn remove_record(&self, cid: &Cid) -> Result<(), Error> {
        let cid = cid.to_string();
        let mut tx = self.pool.begin().await?;
        for table in [
            "record_authors",
            "record_skills",
            "record_locators",
            "record_modules",
            "record_domains",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE cid = ?", table))
                .bind(&cid)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM records WHERE cid = ?")
            .bind(&cid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Multi-predicate search.
    ///
    /// Filters on different attributes are conjoined, filters on the same
    /// attribute form a disjunction. The result is ordered by `created_at`
    /// descending with the CID as tie-breaker, so paginated traversals are
    /// repeatable in the absence of writes.
    pub async fn search(&self, query: &Query) -> Result<Vec<Cid>, Error> {
        let compiled = query::compile(&query.filters)?;
        let limit = query.effective_limit();
        let offset = query.offset;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT r.cid AS cid, r.version AS version FROM records r",
        );
        compiled.push_where(&mut qb);
        qb.push(" ORDER BY r.created_at DESC, r.cid ASC");

        // semver predicates cannot run in SQL; paginate after the fact
        let paged_in_sql = compiled.paged_in_sql();
        if paged_in_sql {
            qb.push(" LIMIT ").push_bind(limit as i64);
            qb.push(" OFFSET ").push_bind(offset as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let cid: String = row.get("cid");
            let recorded: String = row.get("version");
            if !compiled.version_matches(&recorded) {
                continue;
            }
            hits.push(cid.parse::<Cid>()?);
        }

        if paged_in_sql {
            Ok(hits)
        } else {
            Ok(hits
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{db, record::gen};

    async fn index_with(records: &[Record]) -> (Index, Vec<Cid>) {
        let index = Index::new(db::in_memory().await.unwrap());
        let mut cids = Vec::new();
        for record in records {
            let cid = record.cid().unwrap();
            index.add_record(&cid, record).await.unwrap();
            cids.push(cid);
        }
        (index, cids)
    }

    fn filters(pairs: &[(&str, &str)]) -> Vec<Filter> {
        pairs
            .iter()
            .map(|(attribute, value)| Filter {
                attribute: Attribute::parse(attribute).unwrap(),
                value: (*value).to_owned(),
            })
            .collect()
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let record = gen::record("https://cisco.com/agent", "v1.0.0");
        let (index, cids) = index_with(&[record.clone()]).await;

        index.add_record(&cids[0], &record).await.unwrap();
        let hits = index
            .search(&Query::filtered(filters(&[("name", "https://cisco.com/agent")])))
            .await
            .unwrap();
        assert_eq!(hits, cids);
    }

    #[tokio::test]
    async fn remove_cascades() {
        let record = gen::record("https://cisco.com/agent", "v1.0.0");
        let (index, cids) = index_with(&[record]).await;

        index.remove_record(&cids[0]).await.unwrap();
        let hits = index
            .search(&Query::filtered(filters(&[("skill-name", "nlp*")])))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn conjunction_across_attributes_disjunction_within() {
        let mut v1 = gen::record("https://cisco.com/agent", "v1.0.0");
        v1.created_at = "2024-03-05T10:00:00Z".to_owned();
        let mut v2 = gen::record("https://cisco.com/agent", "v2.0.0");
        v2.created_at = "2024-03-06T10:00:00Z".to_owned();
        let other = gen::record("https://example.org/other", "v1.0.0");
        let (index, cids) = index_with(&[v1, v2, other]).await;

        // one attribute, two values: either version matches
        let either = index
            .search(&Query::filtered(filters(&[
                ("version", "v1.0.0"),
                ("version", "v2.0.0"),
                ("name", "https://cisco.com/*"),
            ])))
            .await
            .unwrap();
        assert_eq!(either, vec![cids[1].clone(), cids[0].clone()]);

        // conjunction: name and version must both hold
        let exact = index
            .search(&Query::filtered(filters(&[
                ("version", "v1.0.0"),
                ("name", "https://cisco.com/*"),
            ])))
            .await
            .unwrap();
        assert_eq!(exact, vec![cids[0].clone()]);
    }

    #[tokio::test]
    async fn glob_and_children() {
        let record = gen::record("https://cisco.com/agent", "v1.0.0");
        let (index, cids) = index_with(&[record]).await;

        for (attribute, value) in [
            ("skill-name", "nlp*"),
            ("skill-id", "101"),
            ("module-name", "runtime/?anguage"),
            ("module-id", "7"),
            ("author", "Cisco*"),
            ("locator", "docker-image"),
            ("schema-version", "v0.3.1"),
        ] {
            let hits = index
                .search(&Query::filtered(filters(&[(attribute, value)])))
                .await
                .unwrap();
            assert_eq!(hits, cids, "attribute {}", attribute);
        }
    }

    #[tokio::test]
    async fn created_at_and_version_comparisons() {
        let mut old = gen::record("https://cisco.com/agent", "v1.2.0");
        old.created_at = "2024-01-01T00:00:00Z".to_owned();
        let mut new = gen::record("https://cisco.com/agent", "v1.10.0");
        new.created_at = "2024-06-01T00:00:00Z".to_owned();
        let (index, cids) = index_with(&[old, new]).await;

        let recent = index
            .search(&Query::filtered(filters(&[("created-at", ">=2024-05-01T00:00:00Z")])))
            .await
            .unwrap();
        assert_eq!(recent, vec![cids[1].clone()]);

        // semver, not lexicographic: v1.10.0 > v1.2.0
        let above = index
            .search(&Query::filtered(filters(&[("version", ">v1.2.0")])))
            .await
            .unwrap();
        assert_eq!(above, vec![cids[1].clone()]);
    }

    #[tokio::test]
    async fn unknown_attribute_is_rejected() {
        assert!(Attribute::parse("extension-name").is_err());
    }

    #[tokio::test]
    async fn pagination_is_closed_over_the_result_set() {
        let records: Vec<Record> = (0..25)
            .map(|i| {
                let mut r = gen::record("https://cisco.com/agent", &format!("v1.{}.0", i));
                r.created_at = format!("2024-03-05T10:{:02}:00Z", i % 60);
                r
            })
            .collect();
        let (index, cids) = index_with(&records).await;

        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = index
                .search(&Query {
                    filters: filters(&[("skill-name", "nlp*")]),
                    limit: Some(10),
                    offset,
                })
                .await
                .unwrap();
            let len = page.len();
            seen.extend(page);
            if len < 10 {
                break;
            }
            offset += 10;
        }

        assert_eq!(seen.len(), cids.len());
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), cids.len());
    }
}
