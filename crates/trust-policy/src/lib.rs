//! # trust-policy
//!
//! Versioned authorization policies for agent requests.
//!
//! A [`Policy`] owns an ordered series of [`PolicyVersion`]s that move
//! through draft → approved → active. Bodies are compiled by a pluggable
//! [`Evaluator`] (the built-in one runs the AuraJSON rule DSL), and compiled
//! artifacts are shared through a [`CompiledCache`].
//!
//! ## Key invariants
//!
//! - **One active version**: activating a version demotes every sibling to
//!   draft in the same step.
//! - **Approved before active**: only an approved version can be activated.
//! - **Monotonic numbering**: version numbers are allocated max+1 and never
//!   reused, even under concurrent writers.
//! - **Deterministic evaluation**: the same compiled body and input always
//!   yield the same decision and trace id.

pub mod aurajson;
pub mod cache;
pub mod canonical;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod repository;

pub use aurajson::{AuraJsonEvaluator, CompiledAuraJson};
pub use cache::CompiledCache;
pub use decision::{Decision, PrincipalTrace, RuleTrace, Trace};
pub use error::PolicyError;
pub use evaluator::{CompiledPolicy, Evaluator, EvaluatorRegistry};
pub use model::{
    ActiveAssignment, Policy, PolicyApproval, PolicyAssignment, PolicyRollout, PolicyVersion,
    ScopeType, VersionStatus, ENGINE_AURA_JSON, ENGINE_REGO,
};
pub use repository::{MemoryPolicyRepository, PolicyRepository};
