// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::collections::HashSet;

use thiserror::Error;

use super::Record;
use crate::error::{Code, Coded};

/// Bounds a store places on incoming records.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Accepted `schema_version` values.
    pub schema_versions: Vec<String>,
    /// Upper bound on the canonical encoding, in bytes.
    pub max_record_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            schema_versions: vec!["v0.3.1".to_owned(), "0.3.1".to_owned()],
            max_record_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("record name must not be empty")]
    EmptyName,

    #[error("record version must not be empty")]
    EmptyVersion,

    #[error("unsupported schema version {0}")]
    UnsupportedSchemaVersion(String),

    #[error("created_at is not an RFC 3339 timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("record too large: {size} bytes exceeds the {max} byte bound")]
    TooLarge { size: usize, max: usize },

    #[error("duplicate skill id {0}")]
    DuplicateSkill(u64),

    #[error("duplicate locator {0}")]
    DuplicateLocator(String),

    #[error("locator url must not be empty")]
    EmptyLocatorUrl,

    #[error(transparent)]
    Canonical(#[from] adir_canonical::CjsonError),
}

impl Coded for Error {
    fn code(&self) -> Code {
        match self {
            Self::Canonical(_) => Code::Internal,
            _ => Code::Invalid,
        }
    }
}

/// Validate a record against the structural contract and the given
/// [`Limits`]. Called on every push, before any bytes reach the registry.
pub fn validate(record: &Record, limits: &Limits) -> Result<(), Error> {
    if record.name.is_empty() {
        return Err(Error::EmptyName);
    }
    if record.version.is_empty() {
        return Err(Error::EmptyVersion);
    }
    if !limits.schema_versions.iter().any(|v| v == &record.schema_version) {
        return Err(Error::UnsupportedSchemaVersion(record.schema_version.clone()));
    }
    chrono::DateTime::parse_from_rfc3339(&record.created_at)?;

    let mut skills = HashSet::new();
    for skill in &record.skills {
        if !skills.insert(skill.id) {
            return Err(Error::DuplicateSkill(skill.id));
        }
    }

    let mut locators = HashSet::new();
    for locator in &record.locators {
        if locator.url.is_empty() {
            return Err(Error::EmptyLocatorUrl);
        }
        let key = format!("{}+{}", locator.ty, locator.url);
        if !locators.insert(key.clone()) {
            return Err(Error::DuplicateLocator(key));
        }
    }

    let size = record.canonical_bytes()?.len();
    if size > limits.max_record_bytes {
        return Err(Error::TooLarge {
            size,
            max: limits.max_record_bytes,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    use crate::record::gen;

    #[test]
    fn accepts_a_well_formed_record() {
        validate(&gen::record("https://cisco.com/agent", "v1.0.0"), &Limits::default()).unwrap()
    }

    #[test]
    fn rejects_empty_name() {
        let mut record = gen::record("", "v1.0.0");
        record.name.clear();
        assert_matches!(
            validate(&record, &Limits::default()),
            Err(Error::EmptyName)
        )
    }

    #[test]
    fn rejects_unknown_schema() {
        let mut record = gen::record("https://cisco.com/agent", "v1.0.0");
        record.schema_version = "v9.9.9".to_owned();
        assert_matches!(
            validate(&record, &Limits::default()),
            Err(Error::UnsupportedSchemaVersion(_))
        )
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut record = gen::record("https://cisco.com/agent", "v1.0.0");
        record.created_at = "yesterday".to_owned();
        assert_matches!(validate(&record, &Limits::default()), Err(Error::Timestamp(_)))
    }

    #[test]
    fn rejects_duplicate_skill_ids() {
        let mut record = gen::record("https://cisco.com/agent", "v1.0.0");
        let dup = record.skills[0].clone();
        record.skills.push(dup);
        assert_matches!(
            validate(&record, &Limits::default()),
            Err(Error::DuplicateSkill(101))
        )
    }

    #[test]
    fn rejects_oversized_records() {
        let mut record = gen::record("https://cisco.com/agent", "v1.0.0");
        record.authors = vec!["x".repeat(64); 8];
        let tight = Limits {
            max_record_bytes: 128,
            ..Limits::default()
        };
        assert_matches!(validate(&record, &tight), Err(Error::TooLarge { .. }))
    }
}
