//! Core types for Quarry.

mod ids;
mod rid;

pub use ids::{Lsn, PageId, TxnId};
pub use rid::Rid;
