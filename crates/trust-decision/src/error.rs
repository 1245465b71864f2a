// error.rs - Error types for the decision engine.
//
// These surface from lifecycle operations, configuration loading and signer
// calls. The verify path itself never returns them: every failure there is
// turned into a deny decision with an explanatory reason.

use std::path::PathBuf;
use thiserror::Error;
use trust_audit::AuditError;
use trust_graph::GraphError;
use trust_policy::PolicyError;

/// Errors that can occur in the decision engine.
#[derive(Debug, Error)]
pub enum DecisionError {
    /// A policy repository or evaluator operation failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// A relationship graph operation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The audit ledger rejected an entry.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The simulate-before-activate gate evaluated to deny.
    #[error("simulation denied activation: {0}")]
    SimulationDenied(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to read the configuration file.
    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for EngineConfig.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The signer failed or no signer is configured.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The signer did not answer within the configured deadline.
    #[error("signer timed out after {0} ms")]
    SignerTimeout(u64),

    /// A trust token is malformed, expired or carries a bad signature.
    #[error("invalid trust token: {0}")]
    InvalidToken(String),

    /// A trace, reputation or federation store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl DecisionError {
    /// True for lifecycle conflicts, including a failed simulation gate.
    pub fn is_conflict(&self) -> bool {
        match self {
            DecisionError::Policy(e) => e.is_conflict(),
            DecisionError::SimulationDenied(_) => true,
            _ => false,
        }
    }

    /// True when the addressed policy or version does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DecisionError::Policy(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn classification_passes_through() {
        let conflict = DecisionError::from(PolicyError::NotApproved {
            version: 1,
            status: "draft".into(),
        });
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());

        let missing = DecisionError::from(PolicyError::NotFound(Uuid::nil()));
        assert!(missing.is_not_found());

        assert!(DecisionError::SimulationDenied("Matched deny rule".into()).is_conflict());
        assert!(!DecisionError::SignerTimeout(2000).is_conflict());
    }

    #[test]
    fn messages() {
        assert_eq!(
            DecisionError::SignerTimeout(250).to_string(),
            "signer timed out after 250 ms"
        );
    }
}
