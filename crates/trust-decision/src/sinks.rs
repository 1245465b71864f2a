// sinks.rs - Collaborators fed by background decision telemetry.
//
// TraceSink persists explainability traces; ReputationSink keeps a per-agent
// violation counter. Both are written from the background pool, so failures
// are logged and never reach the caller.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use trust_policy::Trace;
use uuid::Uuid;

use crate::error::DecisionError;

/// Reliability assigned on an agent's first recorded violation.
pub const INITIAL_RELIABILITY: u32 = 95;

/// Reliability lost on each further violation.
pub const RELIABILITY_PENALTY: u32 = 5;

/// A decision trace as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRecord {
    pub trace_id: String,
    pub org_id: Uuid,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    pub allow: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub trace: Trace,
}

pub trait TraceSink: Send + Sync {
    fn persist(&self, record: TraceRecord) -> Result<(), DecisionError>;
}

/// Per-agent abuse score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    pub violations: u64,
    /// 0 to 100.
    pub reliability: u32,
}

pub trait ReputationSink: Send + Sync {
    /// Count one violation and return the updated reputation.
    fn record_violation(&self, org_id: Uuid, agent_id: &str) -> Result<Reputation, DecisionError>;
}

#[derive(Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for MemoryTraceSink {
    fn persist(&self, record: TraceRecord) -> Result<(), DecisionError> {
        self.records
            .lock()
            .map_err(|_| DecisionError::Store("trace sink lock poisoned".into()))?
            .push(record);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReputationSink {
    scores: Mutex<HashMap<(Uuid, String), Reputation>>,
}

impl MemoryReputationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, org_id: Uuid, agent_id: &str) -> Option<Reputation> {
        self.scores
            .lock()
            .ok()
            .and_then(|s| s.get(&(org_id, agent_id.to_string())).copied())
    }
}

impl ReputationSink for MemoryReputationSink {
    fn record_violation(&self, org_id: Uuid, agent_id: &str) -> Result<Reputation, DecisionError> {
        let mut scores = self
            .scores
            .lock()
            .map_err(|_| DecisionError::Store("reputation sink lock poisoned".into()))?;
        let rep = scores
            .entry((org_id, agent_id.to_string()))
            .and_modify(|r| {
                r.violations += 1;
                r.reliability = r.reliability.saturating_sub(RELIABILITY_PENALTY);
            })
            .or_insert(Reputation {
                violations: 1,
                reliability: INITIAL_RELIABILITY,
            });
        Ok(*rep)
    }
}
