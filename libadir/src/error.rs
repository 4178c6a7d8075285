// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

/// Canonical status classes surfaced at the RPC boundary.
///
/// Module error types stay structured ([`thiserror`] enums per seam), while
/// the service layer only needs to know which class a failure belongs to in
/// order to pick the wire status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    /// Client-supplied input violated a contract.
    Invalid,
    /// The named entity does not exist.
    NotFound,
    /// The operation would be ambiguous or unsafe in the current state.
    FailedPrecondition,
    /// Transient downstream failure, retriable.
    Unavailable,
    /// An internal invariant was violated.
    Internal,
    /// The capability is unsupported by this build.
    Unimplemented,
}

/// Classification of an error into a [`Code`].
pub trait Coded {
    fn code(&self) -> Code;
}
