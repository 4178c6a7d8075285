// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::{path::Path, path::PathBuf, time::Duration};

use anyhow::Context as _;
use libadir::{naming, reconciler, sign, store, sync};
use serde::{Deserialize, Serialize};

/// On-disk node configuration (JSON). Every knob has a default; a missing
/// file yields a local single-node setup.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Cfg {
    pub listen_addr: String,
    pub database_path: PathBuf,
    /// How this node identifies itself to peers.
    pub node_id: String,
    pub store: store::Config,
    pub sync: SyncCfg,
    pub verification: VerificationCfg,
    pub reconciler: ReconcilerCfg,
    pub mirror: MirrorCfg,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8888".to_owned(),
            database_path: PathBuf::from("adir.db"),
            node_id: "agent-dir".to_owned(),
            store: store::Config::default(),
            sync: SyncCfg::default(),
            verification: VerificationCfg::default(),
            reconciler: ReconcilerCfg::default(),
            mirror: MirrorCfg::default(),
        }
    }
}

impl Cfg {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncCfg {
    pub scheduler_interval_secs: u64,
    pub worker_count: usize,
    pub worker_timeout_secs: u64,
    pub auth_config: Option<store::config::BasicAuth>,
}

impl Default for SyncCfg {
    fn default() -> Self {
        Self {
            scheduler_interval_secs: 30,
            worker_count: 4,
            worker_timeout_secs: 600,
            auth_config: None,
        }
    }
}

impl SyncCfg {
    pub fn to_config(&self) -> sync::Config {
        sync::Config {
            scheduler_interval: Duration::from_secs(self.scheduler_interval_secs),
            worker_count: self.worker_count,
            worker_timeout: Duration::from_secs(self.worker_timeout_secs),
            auth_config: self.auth_config.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationCfg {
    pub enabled: bool,
    pub cache_ttl_secs: u64,
    pub allow_insecure_well_known: bool,
    pub record_timeout_secs: u64,
    pub staging: bool,
    pub trust_root: Option<TrustRootCfg>,
    pub ignore_tlog: bool,
    pub ignore_tsa: bool,
    pub ignore_sct: bool,
}

impl Default for VerificationCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_secs: 24 * 60 * 60,
            allow_insecure_well_known: false,
            record_timeout_secs: 30,
            staging: false,
            trust_root: None,
            ignore_tlog: false,
            ignore_tsa: false,
            ignore_sct: false,
        }
    }
}

/// Inline PEM material of an offline trust root.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrustRootCfg {
    pub fulcio_pem: Vec<String>,
    pub rekor_key_pem: Option<String>,
    pub tsa_pem: Vec<String>,
    pub ct_log_keys_pem: Vec<String>,
}

impl VerificationCfg {
    pub fn to_naming(&self) -> naming::Config {
        naming::Config {
            enabled: self.enabled,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            allow_insecure_well_known: self.allow_insecure_well_known,
            record_timeout: Duration::from_secs(self.record_timeout_secs),
        }
    }

    pub fn to_sign(&self) -> sign::Config {
        sign::Config {
            enabled: self.enabled,
            staging: self.staging,
            trust_root: self.trust_root.as_ref().map(|root| sign::TrustRoot {
                fulcio_pem: root.fulcio_pem.clone(),
                rekor_key_pem: root.rekor_key_pem.clone(),
                tsa_pem: root.tsa_pem.clone(),
                ct_log_keys_pem: root.ct_log_keys_pem.clone(),
            }),
            ignore_tlog: self.ignore_tlog,
            ignore_tsa: self.ignore_tsa,
            ignore_sct: self.ignore_sct,
        }
    }

    pub fn to_sign_task(&self) -> sign::task::TaskConfig {
        sign::task::TaskConfig {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            record_timeout: Duration::from_secs(self.record_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerCfg {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub worker_count: usize,
}

impl Default for ReconcilerCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 120,
            worker_count: 4,
        }
    }
}

impl ReconcilerCfg {
    pub fn to_config(&self) -> reconciler::Config {
        reconciler::Config {
            enabled: self.enabled,
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            worker_count: self.worker_count,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MirrorCfg {
    pub mirror_binary_path: PathBuf,
    pub mirror_config_path: PathBuf,
    /// Overrides the store registry address on the local side of mirror
    /// runs (a sidecar registry may be reachable under another name).
    pub local_registry: Option<String>,
}

impl Default for MirrorCfg {
    fn default() -> Self {
        Self {
            mirror_binary_path: PathBuf::from("regsync"),
            mirror_config_path: std::env::temp_dir(),
            local_registry: None,
        }
    }
}

impl MirrorCfg {
    pub fn to_config(&self, node_id: &str) -> sync::regsync::MirrorConfig {
        sync::regsync::MirrorConfig {
            binary_path: self.mirror_binary_path.clone(),
            config_dir: self.mirror_config_path.clone(),
            node_id: node_id.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_stand_alone() {
        let cfg = Cfg::load(None).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8888");
        assert!(cfg.verification.enabled);
    }

    #[test]
    fn partial_files_fill_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{ "listen_addr": "127.0.0.1:9999", "verification": { "staging": true } }"#,
        )
        .unwrap();

        let cfg = Cfg::load(Some(&path)).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9999");
        assert!(cfg.verification.staging);
        assert_eq!(cfg.sync.worker_count, 4);
    }
}
