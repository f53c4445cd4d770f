// Crate-wide error aggregation. Individual components define their own
// `thiserror` enums (see `ledger::storage::StorageError`,
// `config::ConfigError`, `gossip::envelope::GossipError`); this is the
// top-level enum the binary crates convert into `anyhow::Error` at the
// process boundary, per spec §7's error kind taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OctoError {
    #[error("fatal init failure: {0}")]
    FatalInit(String),

    #[error("transient i/o failure: {0}")]
    TransientIo(String),

    #[error("constitutional violation: {0}")]
    ConstitutionalViolation(String),

    #[error("budget exhausted for target state")]
    BudgetExhausted,

    #[error("gossip envelope rejected: {0}")]
    GossipRejected(String),

    #[error("actuator failed: {0}")]
    ActuatorFailed(String),

    #[error("operator authentication failed")]
    OperatorAuthFailed,

    #[error(transparent)]
    Storage(#[from] crate::ledger::storage::StorageError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, OctoError>;
