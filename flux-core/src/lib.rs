//! FluxDB core storage engine
//!
//! Records are persisted as length-prefixed frames in one file per
//! collection, with inserts staged in a per-collection write buffer, optional
//! JSON field indexes, deferred transactions and a small query/aggregation
//! engine on top. [`Store`] ties the pieces together.

pub mod error;
pub mod config;
pub mod types;
pub mod codec;
pub mod collection;
pub mod buffer;
pub mod transaction;
pub mod index;
pub mod query;
pub mod aggregate;
pub mod transfer;
pub mod store;

pub use error::{Error, Result};
pub use config::StoreConfig;
pub use types::{Document, Record, ID_FIELD};
pub use query::{FindOptions, SortKey};
pub use transaction::{PendingOp, TransactionState};
pub use store::Store;
