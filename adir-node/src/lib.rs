// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Directory node assembly: gRPC services over [`libadir`], the reconciler
//! runner, configuration and logging.

pub mod cfg;
pub mod convert;
pub mod logging;
pub mod node;
pub mod remote;
pub mod rpc;
pub mod services;
