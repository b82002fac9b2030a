use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;

/// Build environment an audit ran under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub crate_version: String,
    pub target_os: String,
    pub target_arch: String,
    pub target_family: String,
}

impl EnvironmentInfo {
    pub fn current() -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            target_os: std::env::consts::OS.to_string(),
            target_arch: std::env::consts::ARCH.to_string(),
            target_family: std::env::consts::FAMILY.to_string(),
        }
    }
}

/// What is needed to rerun an audit and get identical numbers: the same
/// cohort, the same config, and this bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityBundle {
    pub environment: EnvironmentInfo,
    pub bootstrap_ci: bool,
    pub n_bootstrap: u32,
    pub confidence_level: f64,
    /// Always recorded, including when it was generated for the run.
    pub random_seed: u64,
}

impl ReproducibilityBundle {
    pub fn capture(config: &AuditConfig, random_seed: u64) -> Self {
        Self {
            environment: EnvironmentInfo::current(),
            bootstrap_ci: config.bootstrap_ci,
            n_bootstrap: config.n_bootstrap,
            confidence_level: config.confidence_level,
            random_seed,
        }
    }

    /// Copy of `config` pinned to the recorded seed.
    pub fn pinned_config(&self, config: &AuditConfig) -> AuditConfig {
        AuditConfig {
            bootstrap_ci: self.bootstrap_ci,
            n_bootstrap: self.n_bootstrap,
            confidence_level: self.confidence_level,
            random_seed: Some(self.random_seed),
            ..config.clone()
        }
    }
}
