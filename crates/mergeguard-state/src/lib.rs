//! MergeGuard State: persistence for the decision engine
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durability of decisions, the at-most-once apply ledger, and the
//! append-only outcome log the learner trains from.
//!
//! ## Key Components
//!
//! - `storage_traits`: `DecisionStore`, `ApplyLedger`, `OutcomeLog`
//! - `fakes`: in-memory implementations for tests and dry runs
//! - `SurrealStore`: SurrealDB implementation of all three traits

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
mod surreal_store;

pub use error::StorageError;
pub use storage_traits::{
    AppliedRecord, ApplyLedger, ApplyStatus, ClaimOutcome, ContentDigest, DecisionRow,
    DecisionStore, OutcomeLog, OutcomeRow, StorageResult,
};
pub use surreal_store::{StoreConfig, SurrealStore};
