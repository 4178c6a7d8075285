// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::cmp::Ordering;

/// Total, stable version order.
///
/// Two parseable versions compare by semver (a leading `v` is tolerated);
/// as soon as one side is not semver-shaped, both compare as plain strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn parse(s: &str) -> Option<semver::Version> {
    semver::Version::parse(s.strip_prefix('v').unwrap_or(s)).ok()
}
