//! Queue module: entry state, row models, backoff policy, timestamp encoding.

mod backoff;
mod record;
mod state;
pub mod timestamp;

pub use backoff::BackoffPolicy;
pub use record::{Lease, NewEvent, QueueEntry, Record};
pub use state::{EntryStatus, UnknownStatus};
