//! OCTOREFLEX core: a host-level reflexive containment agent.
//!
//! Kernel events flow through anomaly scoring and pressure accumulation
//! (`scorer`, `pressure`), are composed into a severity score
//! (`severity`) that the escalation engine (`escalation`) checks against a
//! budget gate (invariant G1) and a constitutional validator
//! (`constitution`) before committing a state transition to the audit
//! ledger (`ledger`) and applying containment actuators (`actuators`).
//! Camouflage rotation (`camouflage`) and gossip-based quorum
//! corroboration (`gossip`) round out the reflex; `operator` and `metrics`
//! are the local control and observability surfaces.

pub mod actuators;
pub mod camouflage;
pub mod config;
pub mod constitution;
pub mod error;
pub mod escalation;
pub mod gossip;
pub mod kernel;
pub mod ledger;
pub mod metrics;
pub mod operator;
pub mod pressure;
pub mod scorer;
pub mod severity;
pub mod types;

pub use error::{OctoError, Result};
