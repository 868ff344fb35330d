//! GoalStore - generic record persistence over SQLite
//!
//! Records are stored as JSON documents keyed by `(collection, id)`. Each record
//! declares a set of indexed fields which are written to a side table so that
//! `list` and `delete_by_index` can filter without deserializing every row.
//!
//! Multi-record changes go through [`Store::batch`], which runs inside a single
//! SQLite transaction: either every write lands or none does.

mod record;
mod schema;
mod store;

pub use record::{Filter, FilterOp, IndexValue, Record, now_ms};
pub use store::{Batch, Store};
