// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` filters; `ADIR_LOG_FMT=json`
/// switches to line-delimited JSON.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ADIR_LOG_FMT")
        .map(|fmt| fmt == "json")
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init()
    } else {
        builder.init()
    }
}
