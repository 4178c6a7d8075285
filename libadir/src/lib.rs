// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Core library of an agent directory node.
//!
//! A directory node accepts signed agent records into an OCI-backed content
//! store ([`store`]), mirrors them into a relational search index
//! ([`index`]), resolves human names to content identifiers ([`naming`]),
//! verifies domain ownership and cosign signatures in the background
//! ([`naming::task`], [`sign::task`]) and replicates record subsets between
//! peer nodes under explicit sync contracts ([`sync`]).

pub mod db;
pub mod error;
pub mod index;
pub mod naming;
pub mod reconciler;
pub mod record;
pub mod sign;
pub mod store;
pub mod sync;

pub use adir_canonical as canonical;
pub use adir_canonical::Cid;
pub use record::Record;
