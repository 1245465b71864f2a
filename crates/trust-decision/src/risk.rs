// risk.rs - Sliding-window request-rate risk signals per (org, agent).
//
// score = hits_in_window * 100 / threshold, capped at 100. Reaching the
// threshold adds the `rate_spike` flag. Operators can also raise transient
// alert flags that expire on their own.
//
// A key is dropped once its window and alerts are both empty. Keys that are
// never read again are caught by a full sweep every SWEEP_EVERY records.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const FLAG_RATE_SPIKE: &str = "rate_spike";

const SWEEP_EVERY: u64 = 1024;

/// Runtime signals merged into the evaluation context under `risk`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSignals {
    pub score: u32,
    pub flags: Vec<String>,
}

impl RiskSignals {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

#[derive(Default)]
struct TrackerState {
    hits: HashMap<String, VecDeque<Instant>>,
    /// key -> flag -> expiry; BTreeMap keeps flag output sorted.
    alerts: HashMap<String, BTreeMap<String, Instant>>,
    records: u64,
}

impl TrackerState {
    /// Drop expired hits and alerts for `key`; forget the key when nothing
    /// is left. Returns the hits still in the window.
    fn prune(&mut self, key: &str, window: Duration, now: Instant) -> usize {
        let count = match self.hits.get_mut(key) {
            Some(hits) => {
                while hits
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= window)
                {
                    hits.pop_front();
                }
                hits.len()
            }
            None => 0,
        };
        if count == 0 {
            self.hits.remove(key);
        }
        if let Some(alerts) = self.alerts.get_mut(key) {
            alerts.retain(|_, expires| now < *expires);
            if alerts.is_empty() {
                self.alerts.remove(key);
            }
        }
        count
    }

    fn sweep(&mut self, window: Duration, now: Instant) {
        let keys: Vec<String> = self
            .hits
            .keys()
            .chain(self.alerts.keys())
            .cloned()
            .collect();
        for key in keys {
            self.prune(&key, window, now);
        }
    }
}

pub struct RiskTracker {
    window: Duration,
    threshold: usize,
    state: Mutex<TrackerState>,
}

impl RiskTracker {
    /// A zero window or threshold falls back to 30s / 50.
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window: if window.is_zero() { Duration::from_secs(30) } else { window },
            threshold: if threshold == 0 { 50 } else { threshold },
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn key(org_id: &str, agent_id: &str) -> String {
        format!("{}:{}", org_id, agent_id)
    }

    pub fn record(&self, org_id: &str, agent_id: &str) {
        self.record_at(org_id, agent_id, Instant::now());
    }

    pub fn record_at(&self, org_id: &str, agent_id: &str, now: Instant) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records += 1;
        if state.records % SWEEP_EVERY == 0 {
            state.sweep(self.window, now);
        }
        state
            .hits
            .entry(Self::key(org_id, agent_id))
            .or_default()
            .push_back(now);
    }

    pub fn signals(&self, org_id: &str, agent_id: &str) -> RiskSignals {
        self.signals_at(org_id, agent_id, Instant::now())
    }

    /// Prune hits older than the window, then score what remains.
    pub fn signals_at(&self, org_id: &str, agent_id: &str, now: Instant) -> RiskSignals {
        let key = Self::key(org_id, agent_id);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let count = state.prune(&key, self.window, now);

        let mut signals = RiskSignals::default();
        if count > 0 {
            signals.score = (count.saturating_mul(100) / self.threshold).min(100) as u32;
            if count >= self.threshold {
                signals.flags.push(FLAG_RATE_SPIKE.to_string());
            }
        }
        if let Some(alerts) = state.alerts.get(&key) {
            for flag in alerts.keys() {
                if !signals.has_flag(flag) {
                    signals.flags.push(flag.clone());
                }
            }
        }
        signals
    }

    /// Set a transient flag for (org, agent) until `expires`.
    pub fn raise_alert(&self, org_id: &str, agent_id: &str, flag: &str, expires: Instant) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .alerts
            .entry(Self::key(org_id, agent_id))
            .or_default()
            .insert(flag.to_string(), expires);
    }

    pub fn clear_alert(&self, org_id: &str, agent_id: &str, flag: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let key = Self::key(org_id, agent_id);
        if let Some(alerts) = state.alerts.get_mut(&key) {
            alerts.remove(flag);
            if alerts.is_empty() {
                state.alerts.remove(&key);
            }
        }
    }

    /// Number of (org, agent) keys currently tracked.
    pub fn tracked(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<&String> = state.hits.keys().chain(state.alerts.keys()).collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_scales_with_hits() {
        let tracker = RiskTracker::new(Duration::from_secs(30), 10);
        let now = Instant::now();
        assert_eq!(tracker.signals_at("o", "a", now), RiskSignals::default());
        for _ in 0..5 {
            tracker.record_at("o", "a", now);
        }
        let s = tracker.signals_at("o", "a", now);
        assert_eq!(s.score, 50);
        assert!(s.flags.is_empty());
    }

    #[test]
    fn spike_flag_and_cap() {
        let tracker = RiskTracker::new(Duration::from_secs(30), 4);
        let now = Instant::now();
        for _ in 0..9 {
            tracker.record_at("o", "a", now);
        }
        let s = tracker.signals_at("o", "a", now);
        assert_eq!(s.score, 100);
        assert_eq!(s.flags, vec!["rate_spike".to_string()]);
        // Other agents are unaffected.
        assert_eq!(tracker.signals_at("o", "b", now).score, 0);
    }

    #[test]
    fn old_hits_leave_the_window() {
        let tracker = RiskTracker::new(Duration::from_secs(30), 2);
        let start = Instant::now();
        tracker.record_at("o", "a", start);
        tracker.record_at("o", "a", start);
        assert!(tracker.signals_at("o", "a", start).has_flag("rate_spike"));
        let later = start + Duration::from_secs(31);
        assert_eq!(tracker.signals_at("o", "a", later), RiskSignals::default());
    }

    #[test]
    fn alerts_expire_and_clear() {
        let tracker = RiskTracker::new(Duration::from_secs(30), 50);
        let now = Instant::now();
        tracker.raise_alert("o", "a", "geo_anomaly", now + Duration::from_secs(10));
        tracker.raise_alert("o", "a", "credential_reuse", now + Duration::from_secs(1));
        let s = tracker.signals_at("o", "a", now);
        assert_eq!(s.flags, vec!["credential_reuse".to_string(), "geo_anomaly".to_string()]);

        let s = tracker.signals_at("o", "a", now + Duration::from_secs(5));
        assert_eq!(s.flags, vec!["geo_anomaly".to_string()]);

        tracker.clear_alert("o", "a", "geo_anomaly");
        assert!(tracker.signals_at("o", "a", now).flags.is_empty());
    }

    #[test]
    fn idle_keys_are_forgotten() {
        let tracker = RiskTracker::new(Duration::from_secs(30), 50);
        let start = Instant::now();
        tracker.record_at("o", "a", start);
        tracker.raise_alert("o", "b", "geo_anomaly", start + Duration::from_secs(1));
        assert_eq!(tracker.tracked(), 2);

        let later = start + Duration::from_secs(31);
        tracker.signals_at("o", "a", later);
        tracker.signals_at("o", "b", later);
        assert_eq!(tracker.tracked(), 0);

        tracker.raise_alert("o", "c", "geo_anomaly", later + Duration::from_secs(60));
        tracker.clear_alert("o", "c", "geo_anomaly");
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn sweep_drops_keys_never_read_again() {
        let tracker = RiskTracker::new(Duration::from_secs(30), 50);
        let start = Instant::now();
        for i in 0..100 {
            tracker.record_at("o", &format!("agent-{}", i), start);
        }
        assert_eq!(tracker.tracked(), 100);

        let later = start + Duration::from_secs(31);
        for _ in 100..SWEEP_EVERY {
            tracker.record_at("o", "busy", later);
        }
        // The sweep runs before the triggering hit is stored.
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn zero_settings_fall_back() {
        let tracker = RiskTracker::new(Duration::ZERO, 0);
        let now = Instant::now();
        for _ in 0..50 {
            tracker.record_at("o", "a", now);
        }
        assert!(tracker.signals_at("o", "a", now).has_flag("rate_spike"));
    }
}
