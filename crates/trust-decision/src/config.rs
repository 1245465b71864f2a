// config.rs - Engine configuration.
//
// Loaded from TOML (e.g. trustd.toml). Every field has a default, so an empty
// file and `EngineConfig::default()` are both valid:
//
//   approvals_required = 2
//   trust_token_ttl_secs = 120
//   signer_timeout_ms = 2000
//   zero_trust_cross_org = false
//   risk_window_secs = 30
//   risk_spike_threshold = 50
//   graph_cache_ttl_ms = 5000
//   graph_cache_neg_ttl_ms = 1000
//   background_workers = 2
//   background_queue = 256
//   max_inflight = 0          # 0 = unlimited

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DecisionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Distinct approvers needed before a version becomes approved.
    #[serde(default = "default_approvals_required")]
    pub approvals_required: usize,

    /// Lifetime of minted trust tokens (`exp` offset).
    #[serde(default = "default_token_ttl_secs")]
    pub trust_token_ttl_secs: u64,

    /// Upper bound on one Signer call.
    #[serde(default = "default_signer_timeout_ms")]
    pub signer_timeout_ms: u64,

    /// Require the `attest` authentication kind on cross-org requests.
    #[serde(default)]
    pub zero_trust_cross_org: bool,

    /// Sliding window of the risk tracker.
    #[serde(default = "default_risk_window_secs")]
    pub risk_window_secs: u64,

    /// Requests per window that map to score 100 and the `rate_spike` flag.
    #[serde(default = "default_risk_spike_threshold")]
    pub risk_spike_threshold: usize,

    /// Graph cache lifetime for allow answers.
    #[serde(default = "default_graph_cache_ttl_ms")]
    pub graph_cache_ttl_ms: u64,

    /// Graph cache lifetime for deny answers.
    #[serde(default = "default_graph_cache_neg_ttl_ms")]
    pub graph_cache_neg_ttl_ms: u64,

    /// Background task workers.
    #[serde(default = "default_background_workers")]
    pub background_workers: usize,

    /// Background queue bound. Submissions beyond it are dropped.
    #[serde(default = "default_background_queue")]
    pub background_queue: usize,

    /// Concurrent verify requests admitted; 0 disables the limit.
    #[serde(default)]
    pub max_inflight: usize,
}

fn default_approvals_required() -> usize {
    2
}

fn default_token_ttl_secs() -> u64 {
    120
}

fn default_signer_timeout_ms() -> u64 {
    2000
}

fn default_risk_window_secs() -> u64 {
    30
}

fn default_risk_spike_threshold() -> usize {
    50
}

fn default_graph_cache_ttl_ms() -> u64 {
    5000
}

fn default_graph_cache_neg_ttl_ms() -> u64 {
    1000
}

fn default_background_workers() -> usize {
    2
}

fn default_background_queue() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approvals_required: default_approvals_required(),
            trust_token_ttl_secs: default_token_ttl_secs(),
            signer_timeout_ms: default_signer_timeout_ms(),
            zero_trust_cross_org: false,
            risk_window_secs: default_risk_window_secs(),
            risk_spike_threshold: default_risk_spike_threshold(),
            graph_cache_ttl_ms: default_graph_cache_ttl_ms(),
            graph_cache_neg_ttl_ms: default_graph_cache_neg_ttl_ms(),
            background_workers: default_background_workers(),
            background_queue: default_background_queue(),
            max_inflight: 0,
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DecisionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DecisionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, DecisionError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine unusable.
    pub fn validate(&self) -> Result<(), DecisionError> {
        let positive = [
            ("approvals_required", self.approvals_required),
            ("risk_spike_threshold", self.risk_spike_threshold),
            ("background_workers", self.background_workers),
            ("background_queue", self.background_queue),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(DecisionError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.risk_window_secs == 0 {
            return Err(DecisionError::Config("risk_window_secs must be at least 1".into()));
        }
        if self.trust_token_ttl_secs == 0 {
            return Err(DecisionError::Config("trust_token_ttl_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn signer_timeout(&self) -> Duration {
        Duration::from_millis(self.signer_timeout_ms)
    }

    pub fn risk_window(&self) -> Duration {
        Duration::from_secs(self.risk_window_secs)
    }

    pub fn graph_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.graph_cache_ttl_ms)
    }

    pub fn graph_cache_neg_ttl(&self) -> Duration {
        Duration::from_millis(self.graph_cache_neg_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.approvals_required, 2);
        assert_eq!(c.trust_token_ttl_secs, 120);
        assert_eq!(c.signer_timeout(), Duration::from_secs(2));
        assert!(!c.zero_trust_cross_org);
        assert_eq!(c.risk_window(), Duration::from_secs(30));
        assert_eq!(c.risk_spike_threshold, 50);
        assert_eq!(c.graph_cache_ttl(), Duration::from_secs(5));
        assert_eq!(c.graph_cache_neg_ttl(), Duration::from_secs(1));
        assert_eq!((c.background_workers, c.background_queue), (2, 256));
        assert_eq!(c.max_inflight, 0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let c = EngineConfig::from_toml("approvals_required = 3\nzero_trust_cross_org = true\n").unwrap();
        assert_eq!(c.approvals_required, 3);
        assert!(c.zero_trust_cross_org);
        assert_eq!(c.trust_token_ttl_secs, 120);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("approvals_required = 0"),
            Err(DecisionError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("approvals_required = \"two\""),
            Err(DecisionError::ConfigParse(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trustd.toml");
        std::fs::write(&path, "risk_spike_threshold = 5\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().risk_spike_threshold, 5);
        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(DecisionError::ConfigRead { .. })
        ));
    }
}
