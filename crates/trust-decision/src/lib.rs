//! # trust-decision
//!
//! The authorization decision engine for agent requests.
//!
//! [`DecisionEngine::decide`] takes a [`VerifyRequest`] through policy
//! selection, federation contract checks, the relationship gate, canary
//! routing and evaluation, and returns a [`VerifyResponse`], optionally with
//! a signed trust token. [`PolicyLifecycle`] is the authoring side: submit,
//! approve, simulate, activate, assign and roll out policy versions.
//!
//! ## Key invariants
//!
//! - **Fail-closed**: `decide` never errors. Missing assignments, unknown
//!   engines, compile errors, graph failures and out-of-scope federation
//!   requests all become deny decisions with a reason.
//! - **Relationship gate first**: when a resource is named, the agent must
//!   hold `can_act_for` on the org before any policy is evaluated.
//! - **Deterministic routing**: assignment selection and canary buckets are
//!   pure functions of the request identity.
//! - **Non-blocking telemetry**: traces, audit entries and reputation
//!   updates go through a bounded background pool; a full queue drops work.
//! - **Bounded signing**: token minting is capped by the signer timeout and
//!   a failure only omits the token.

pub mod background;
pub mod bucket;
pub mod config;
pub mod context;
pub mod error;
pub mod federation;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod risk;
pub mod sinks;
pub mod token;

pub use background::BackgroundPool;
pub use config::EngineConfig;
pub use error::DecisionError;
pub use federation::{FederationContract, FederationScope, FederationStore, MemoryFederationStore};
pub use lifecycle::{
    ApprovalOutcome, NoopPolicyInvalidation, PolicyInvalidationPublisher, PolicyLifecycle,
};
pub use metrics::{DecisionMetrics, MetricsSnapshot, OUTCOME_ALLOWED, OUTCOME_DENIED};
pub use orchestrator::{
    DecisionEngine, Principal, VerifyRequest, VerifyResponse, REASON_NO_ASSIGNMENT,
    REASON_NO_DELEGATION, REASON_OVERLOADED, REASON_UNSUPPORTED_ENGINE, RELATION_CAN_ACT_FOR,
};
pub use risk::{RiskSignals, RiskTracker, FLAG_RATE_SPIKE};
pub use sinks::{
    MemoryReputationSink, MemoryTraceSink, Reputation, ReputationSink, TraceRecord, TraceSink,
};
pub use token::{LocalEd25519Signer, Signer, TrustClaims};
