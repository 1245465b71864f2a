// metrics.rs - In-process decision counters.
//
// Counters are cheap to bump from the decision path: plain atomics for the
// scalar totals and small mutex-guarded maps for labelled counts. Exporters
// (Prometheus, OTLP) read `snapshot()` and are not part of this crate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

pub const OUTCOME_ALLOWED: &str = "ALLOWED";
pub const OUTCOME_DENIED: &str = "DENIED";

pub fn outcome(allow: bool) -> &'static str {
    if allow {
        OUTCOME_ALLOWED
    } else {
        OUTCOME_DENIED
    }
}

#[derive(Default)]
pub struct DecisionMetrics {
    /// org -> outcome -> count
    by_org: Mutex<BTreeMap<String, BTreeMap<String, u64>>>,
    /// outcome -> reason -> count
    by_reason: Mutex<BTreeMap<String, BTreeMap<String, u64>>>,
    tokens_minted: AtomicU64,
    token_failures: AtomicU64,
    dropped_tasks: AtomicU64,
    quick_rejects: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub decisions_by_org: BTreeMap<String, BTreeMap<String, u64>>,
    pub reasons: BTreeMap<String, BTreeMap<String, u64>>,
    pub tokens_minted: u64,
    pub token_failures: u64,
    pub dropped_tasks: u64,
    pub quick_rejects: u64,
}

impl MetricsSnapshot {
    /// Total decisions with the given outcome across all orgs.
    pub fn total(&self, outcome: &str) -> u64 {
        self.decisions_by_org
            .values()
            .filter_map(|m| m.get(outcome))
            .sum()
    }

    pub fn reason_count(&self, outcome: &str, reason: &str) -> u64 {
        self.reasons
            .get(outcome)
            .and_then(|m| m.get(reason))
            .copied()
            .unwrap_or(0)
    }
}

fn bump(map: &Mutex<BTreeMap<String, BTreeMap<String, u64>>>, outer: &str, inner: &str) {
    let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
    *map.entry(outer.to_string())
        .or_default()
        .entry(inner.to_string())
        .or_insert(0) += 1;
}

impl DecisionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one decision. An empty reason is not counted by reason.
    pub fn record_decision(&self, org_id: &str, allow: bool, reason: &str) {
        let outcome = outcome(allow);
        bump(&self.by_org, org_id, outcome);
        if !reason.is_empty() {
            bump(&self.by_reason, outcome, reason);
        }
    }

    pub fn record_token(&self, minted: bool) {
        let counter = if minted {
            &self.tokens_minted
        } else {
            &self.token_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_task(&self) {
        self.dropped_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quick_reject(&self) {
        self.quick_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_by_org: self
                .by_org
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            reasons: self
                .by_reason
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            tokens_minted: self.tokens_minted.load(Ordering::Relaxed),
            token_failures: self.token_failures.load(Ordering::Relaxed),
            dropped_tasks: self.dropped_tasks.load(Ordering::Relaxed),
            quick_rejects: self.quick_rejects.load(Ordering::Relaxed),
        }
    }
}
