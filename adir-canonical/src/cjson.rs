// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct CjsonError(#[from] serde_json::error::Error);

/// The canonical byte encoding records are addressed by.
///
/// Canonical JSON per the OLPC rules: object keys sorted bytewise, no
/// insignificant whitespace, minimal string escapes. Field order of the
/// [`Serialize`] impl does not matter, the formatter orders keys itself.
/// Two records are the same record iff this encoding of them is
/// byte-identical, so nothing else in the workspace may serialise content
/// that gets hashed.
pub fn canonical_json<T>(value: &T) -> Result<Vec<u8>, CjsonError>
where
    T: Serialize,
{
    let mut buf = vec![];
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, olpc_cjson::CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[derive(serde::Serialize)]
    struct Unordered {
        zulu: u64,
        alpha: &'static str,
    }

    #[test]
    fn keys_are_sorted() {
        let bytes = canonical_json(&Unordered {
            zulu: 1,
            alpha: "a",
        })
        .unwrap();
        assert_eq!(br#"{"alpha":"a","zulu":1}"#.to_vec(), bytes)
    }

    proptest! {
        #[test]
        fn insertion_order_is_irrelevant(entries in proptest::collection::vec(("[a-z]{1,8}", any::<u64>()), 0..16)) {
            let forward: BTreeMap<String, u64> = entries.iter().cloned().collect();
            let backward: BTreeMap<String, u64> = entries.iter().rev().cloned().collect();

            prop_assert_eq!(
                canonical_json(&forward).unwrap(),
                canonical_json(&backward).unwrap()
            )
        }
    }
}
