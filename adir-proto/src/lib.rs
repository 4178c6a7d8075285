// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Generated gRPC bindings.

pub mod v1 {
    tonic::include_proto!("agntcy.dir.v1");
}
