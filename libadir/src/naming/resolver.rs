// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use adir_canonical::Cid;
use sqlx::{QueryBuilder, Row as _, Sqlite, SqlitePool};

use super::{version, Error};

/// Maps user-supplied references to record CIDs.
#[derive(Clone)]
pub struct Resolver {
    pool: SqlitePool,
}

impl Resolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a CID (returned verbatim), a name (latest version by semver
    /// among matches) or `name:version` (the unique match).
    pub async fn resolve(&self, input: &str) -> Result<Cid, Error> {
        if let Ok(cid) = input.parse::<Cid>() {
            return Ok(cid);
        }

        let (name, version) = split_version(input);
        let candidates = self.candidates(name).await?;

        match version {
            Some(version) => {
                let mut matches = candidates
                    .into_iter()
                    .filter(|(_, v)| v == version)
                    .collect::<Vec<_>>();
                match matches.len() {
                    0 => Err(Error::NotFound(input.to_owned())),
                    1 => Ok(matches.remove(0).0),
                    n => Err(Error::Ambiguous {
                        name: name.to_owned(),
                        version: version.to_owned(),
                        matches: n,
                    }),
                }
            },
            None => candidates
                .into_iter()
                .max_by(|(a_cid, a), (b_cid, b)| {
                    version::compare(a, b).then_with(|| a_cid.cmp(b_cid))
                })
                .map(|(cid, _)| cid)
                .ok_or_else(|| Error::NotFound(input.to_owned())),
        }
    }

    async fn candidates(&self, name: &str) -> Result<Vec<(Cid, String)>, Error> {
        let names = expand(name);
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT cid, version FROM records WHERE name IN (",
        );
        let mut separated = qb.separated(", ");
        for candidate in &names {
            separated.push_bind(candidate);
        }
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let cid: String = row.get("cid");
                let version: String = row.get("version");
                Ok((cid.parse::<Cid>()?, version))
            })
            .collect()
    }
}

/// Split a trailing `:version` off a reference. The scheme colon of
/// protocol-qualified names never qualifies: whatever follows it contains a
/// slash.
pub(crate) fn split_version(input: &str) -> (&str, Option<&str>) {
    match input.rsplit_once(':') {
        Some((name, version))
            if !name.is_empty() && !version.is_empty() && !version.contains('/') =>
        {
            (name, Some(version))
        },
        _ => (input, None),
    }
}

/// Expand a bare name to the identities it may be stored under.
pub(crate) fn expand(name: &str) -> Vec<String> {
    if name.starts_with("http://") || name.starts_with("https://") {
        vec![name.to_owned()]
    } else {
        vec![
            name.to_owned(),
            format!("http://{}", name),
            format!("https://{}", name),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{db, index::Index, record::gen};

    async fn populated(records: &[crate::Record]) -> (Resolver, Vec<Cid>) {
        let pool = db::in_memory().await.unwrap();
        let index = Index::new(pool.clone());
        let mut cids = Vec::new();
        for record in records {
            let cid = record.cid().unwrap();
            index.add_record(&cid, record).await.unwrap();
            cids.push(cid);
        }
        (Resolver::new(pool), cids)
    }

    #[test]
    fn version_splitting() {
        assert_eq!(
            split_version("https://cisco.com/agent:v1.0.0"),
            ("https://cisco.com/agent", Some("v1.0.0"))
        );
        assert_eq!(split_version("cisco.com/agent"), ("cisco.com/agent", None));
        assert_eq!(
            split_version("http://cisco.com/agent"),
            ("http://cisco.com/agent", None)
        );
    }

    #[test]
    fn bare_names_expand_protocol_prefixes() {
        assert_eq!(
            expand("cisco.com/agent"),
            vec![
                "cisco.com/agent".to_owned(),
                "http://cisco.com/agent".to_owned(),
                "https://cisco.com/agent".to_owned(),
            ]
        );
        assert_eq!(expand("https://cisco.com/agent").len(), 1);
    }

    #[tokio::test]
    async fn a_cid_resolves_to_itself() {
        let (resolver, _) = populated(&[]).await;
        let cid = Cid::digest(b"whatever");
        assert_eq!(resolver.resolve(&cid.to_string()).await.unwrap(), cid);
    }

    #[tokio::test]
    async fn a_name_resolves_to_the_semver_latest() {
        let records = [
            gen::record("https://cisco.com/agent", "v1.0.0"),
            gen::record("https://cisco.com/agent", "v1.2.0"),
            gen::record("https://cisco.com/agent", "v2.0.0-rc1"),
        ];
        let (resolver, cids) = populated(&records).await;

        // the protocol-qualified name, typed bare
        let latest = resolver.resolve("cisco.com/agent").await.unwrap();
        assert_eq!(latest, cids[2]);

        let pinned = resolver
            .resolve("https://cisco.com/agent:v1.0.0")
            .await
            .unwrap();
        assert_eq!(pinned, cids[0]);
    }

    #[tokio::test]
    async fn unknown_names_are_not_found() {
        let (resolver, _) = populated(&[]).await;
        assert!(matches!(
            resolver.resolve("nobody.example/agent").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("nobody.example/agent:v1.0.0").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn equivocal_name_version_pairs_are_failed_preconditions() {
        // same name and version under two protocol identities
        let records = [
            gen::record("http://cisco.com/agent", "v1.0.0"),
            gen::record("https://cisco.com/agent", "v1.0.0"),
        ];
        let (resolver, _) = populated(&records).await;

        assert!(matches!(
            resolver.resolve("cisco.com/agent:v1.0.0").await,
            Err(Error::Ambiguous { matches: 2, .. })
        ));
    }
}
