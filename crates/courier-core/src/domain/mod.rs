//! Domain model (IDs, failure decisions, cycle outcomes).

pub mod decision;
pub mod ids;
pub mod outcome;

pub use decision::{FailureDecision, decide_failure};
pub use ids::{EntryId, Gid, WorkerId};
pub use outcome::{CycleOutcome, SweepReport};
