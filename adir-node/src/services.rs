// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! gRPC service implementations over the core library.

pub mod naming;
pub mod search;
pub mod sign;
pub mod store;
pub mod sync;

/// The node talks to its registry through a trait object: which backend is
/// in play (remote registry, on-disk, in-memory) is an assembly decision.
pub type Registry = std::sync::Arc<dyn libadir::store::Registry>;
