// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    adir_node::logging::init();

    let config = std::env::args().nth(1).map(PathBuf::from);
    let cfg = adir_node::cfg::Cfg::load(config.as_deref())?;
    adir_node::node::run(cfg).await
}
