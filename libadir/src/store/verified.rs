// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::ops::ControlFlow;

use adir_canonical::Cid;
use async_trait::async_trait;

use crate::{
    naming::{self, Verification, VerificationStatus},
    record::{domain_of, referrer::Referrer, Record},
};

use super::{annotations, Error, RecordMeta, Registry, Store};

/// Read side of the name-verification rows, as the store wrapper needs it.
#[async_trait]
pub trait VerificationReader: Send + Sync {
    async fn verification(&self, cid: &Cid) -> Result<Option<Verification>, naming::Error>;
}

/// Store wrapper flattening the latest verification outcome into Lookup
/// annotations.
///
/// Verification state is advisory on this path: when the reader is
/// unavailable the lookup still succeeds, without the projection.
pub struct WithVerification<R, V> {
    inner: Store<R>,
    reader: V,
}

impl<R, V> WithVerification<R, V> {
    pub fn new(inner: Store<R>, reader: V) -> Self {
        Self { inner, reader }
    }

    pub fn inner(&self) -> &Store<R> {
        &self.inner
    }
}

impl<R: Registry, V: VerificationReader> WithVerification<R, V> {
    pub async fn lookup(&self, cid: &Cid) -> Result<RecordMeta, Error> {
        let mut meta = self.inner.lookup(cid).await?;

        match self.reader.verification(cid).await {
            Ok(row) => annotate(&mut meta, row),
            Err(e) => tracing::warn!(%cid, err = %e, "verification projection unavailable"),
        }

        Ok(meta)
    }

    pub async fn push(&self, record: &Record) -> Result<Cid, Error> {
        self.inner.push(record).await
    }

    pub async fn pull(&self, cid: &Cid) -> Result<Record, Error> {
        self.inner.pull(cid).await
    }

    pub async fn delete(&self, cid: &Cid) -> Result<(), Error> {
        self.inner.delete(cid).await
    }

    pub async fn push_referrer(&self, cid: &Cid, referrer: &Referrer) -> Result<(), Error> {
        self.inner.push_referrer(cid, referrer).await
    }

    pub async fn walk_referrers<F>(
        &self,
        cid: &Cid,
        media_type: Option<&str>,
        f: F,
    ) -> Result<(), Error>
    where
        F: FnMut(Referrer) -> ControlFlow<()>,
    {
        self.inner.walk_referrers(cid, media_type, f).await
    }
}

fn annotate(meta: &mut RecordMeta, row: Option<Verification>) {
    let insert = |meta: &mut RecordMeta, key: &str, value: String| {
        meta.annotations.insert(key.to_owned(), value);
    };

    match row {
        Some(row) if row.status == VerificationStatus::Verified => {
            insert(meta, annotations::VERIFIED, "true".to_owned());
            if let Some(method) = row.method {
                insert(meta, annotations::VERIFIED_METHOD, method);
            }
            if let Some(key_id) = row.key_id {
                insert(meta, annotations::VERIFIED_KEY_ID, key_id);
            }
            insert(meta, annotations::VERIFIED_AT, row.updated_at);
            if let Some(domain) = meta
                .annotations
                .get(annotations::NAME)
                .and_then(|name| domain_of(name))
            {
                insert(meta, annotations::VERIFIED_DOMAIN, domain);
            }
        },
        Some(row) => {
            insert(meta, annotations::VERIFIED, "false".to_owned());
            if let Some(error) = row.error {
                insert(meta, annotations::VERIFIED_ERROR, error);
            }
        },
        None => insert(meta, annotations::VERIFIED, "false".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::record::{gen, validation::Limits};
    use crate::store::registry::Mem;

    struct Fixed(Option<Verification>);

    #[async_trait]
    impl VerificationReader for Fixed {
        async fn verification(&self, _: &Cid) -> Result<Option<Verification>, naming::Error> {
            Ok(self.0.clone())
        }
    }

    fn verified_row(cid: Cid) -> Verification {
        Verification {
            cid,
            method: Some("dns".to_owned()),
            key_id: Some("ab".repeat(32)),
            status: VerificationStatus::Verified,
            error: None,
            updated_at: "2024-03-06T00:00:00Z".to_owned(),
        }
    }

    #[tokio::test]
    async fn lookup_flattens_a_verified_row() {
        let record = gen::record("https://example.org/agent", "v1.0.0");
        let inner = Store::new(Mem::new(), Limits::default());
        let cid = inner.push(&record).await.unwrap();

        let store = WithVerification::new(inner, Fixed(Some(verified_row(cid.clone()))));
        let meta = store.lookup(&cid).await.unwrap();

        assert_eq!(meta.annotations.get(annotations::VERIFIED).unwrap(), "true");
        assert_eq!(meta.annotations.get(annotations::VERIFIED_METHOD).unwrap(), "dns");
        assert_eq!(
            meta.annotations.get(annotations::VERIFIED_DOMAIN).unwrap(),
            "example.org"
        );
    }

    #[tokio::test]
    async fn lookup_without_a_row_reports_unverified() {
        let record = gen::record("https://example.org/agent", "v1.0.0");
        let inner = Store::new(Mem::new(), Limits::default());
        let cid = inner.push(&record).await.unwrap();

        let store = WithVerification::new(inner, Fixed(None));
        let meta = store.lookup(&cid).await.unwrap();

        assert_eq!(meta.annotations.get(annotations::VERIFIED).unwrap(), "false");
        assert!(!meta.annotations.contains_key(annotations::VERIFIED_DOMAIN));
    }
}
