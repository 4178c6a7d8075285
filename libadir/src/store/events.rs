// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::ops::ControlFlow;

use adir_canonical::Cid;
use tokio::sync::broadcast;

use crate::record::{referrer::Referrer, Record};

use super::{Error, RecordMeta, Registry, Store};

/// Domain events emitted on successful store writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Pushed { cid: Cid },
    Deleted { cid: Cid },
    ReferrerPushed { cid: Cid, media_type: String },
}

/// Store wrapper publishing [`Event`]s on successful writes.
///
/// Slow subscribers are lagged, never blocked: the channel drops the oldest
/// events first, which is fine for an at-most-once notification stream.
pub struct WithEvents<R> {
    inner: Store<R>,
    tx: broadcast::Sender<Event>,
}

impl<R> WithEvents<R> {
    pub fn new(inner: Store<R>) -> Self {
        let (tx, _) = broadcast::channel(128);
        Self { inner, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn inner(&self) -> &Store<R> {
        &self.inner
    }
}

impl<R: Registry> WithEvents<R> {
    pub async fn push(&self, record: &Record) -> Result<Cid, Error> {
        let cid = self.inner.push(record).await?;
        let _ = self.tx.send(Event::Pushed { cid: cid.clone() });
        Ok(cid)
    }

    pub async fn delete(&self, cid: &Cid) -> Result<(), Error> {
        self.inner.delete(cid).await?;
        let _ = self.tx.send(Event::Deleted { cid: cid.clone() });
        Ok(())
    }

    pub async fn push_referrer(&self, cid: &Cid, referrer: &Referrer) -> Result<(), Error> {
        self.inner.push_referrer(cid, referrer).await?;
        let _ = self.tx.send(Event::ReferrerPushed {
            cid: cid.clone(),
            media_type: referrer.media_type().to_owned(),
        });
        Ok(())
    }

    pub async fn pull(&self, cid: &Cid) -> Result<Record, Error> {
        self.inner.pull(cid).await
    }

    pub async fn lookup(&self, cid: &Cid) -> Result<RecordMeta, Error> {
        self.inner.lookup(cid).await
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

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::record::{gen, validation::Limits};
    use crate::store::registry::Mem;

    #[tokio::test]
    async fn successful_writes_emit_events() {
        let store = WithEvents::new(Store::new(Mem::new(), Limits::default()));
        let mut events = store.subscribe();

        let record = gen::record("https://cisco.com/agent", "v1.0.0");
        let cid = store.push(&record).await.unwrap();
        store.delete(&cid).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), Event::Pushed { cid: cid.clone() });
        assert_eq!(events.recv().await.unwrap(), Event::Deleted { cid });
    }

    #[tokio::test]
    async fn failed_writes_emit_nothing() {
        let store = WithEvents::new(Store::new(Mem::new(), Limits::default()));
        let mut events = store.subscribe();

        let mut record = gen::record("https://cisco.com/agent", "v1.0.0");
        record.name.clear();
        assert!(store.push(&record).await.is_err());

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ))
    }
}
