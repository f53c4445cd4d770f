pub mod decision;
pub mod storage;

pub use decision::{CanonicalInputs, DecisionFlag, DecisionRecord};
pub use storage::{LedgerStore, StorageError};
