// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

pub mod cid;
pub mod cjson;

pub use cid::Cid;
pub use cjson::{canonical_json, CjsonError};
