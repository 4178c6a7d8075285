// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::path::PathBuf;

use oci_client::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};

use crate::record::validation::Limits;

/// Where and how this node stores content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry_address: String,
    pub repository_name: String,
    pub insecure: bool,
    pub basic_auth: Option<BasicAuth>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,

    /// When set, content lives in an on-disk store under this directory
    /// instead of a registry.
    pub local_dir: Option<PathBuf>,

    #[serde(skip)]
    pub limits: Limits,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_address: "127.0.0.1:5000".to_owned(),
            repository_name: "agntcy/dir".to_owned(),
            insecure: false,
            basic_auth: None,
            refresh_token: None,
            access_token: None,
            local_dir: None,
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Credential precedence: explicit basic auth, then the token
    /// conventions registries accept over basic (`oauth2accesstoken` for
    /// access tokens, the zero-UUID identity for refresh tokens).
    pub fn registry_auth(&self) -> RegistryAuth {
        if let Some(BasicAuth { username, password }) = &self.basic_auth {
            return RegistryAuth::Basic(username.clone(), password.clone());
        }
        if let Some(token) = &self.access_token {
            return RegistryAuth::Basic("oauth2accesstoken".to_owned(), token.clone());
        }
        if let Some(token) = &self.refresh_token {
            return RegistryAuth::Basic(
                "00000000-0000-0000-0000-000000000000".to_owned(),
                token.clone(),
            );
        }
        RegistryAuth::Anonymous
    }
}
