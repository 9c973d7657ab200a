//! # quarry-common
//!
//! Common types and configuration for the Quarry storage engine.
//!
//! This crate provides the foundational pieces shared by every Quarry
//! component:
//!
//! - **Types**: the core identifiers (`PageId`, `Lsn`, `TxnId`) and the
//!   record identifier (`Rid`)
//! - **Constants**: page geometry and subsystem defaults
//! - **Config**: the engine configuration passed into the subsystems from
//!   the entry point

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod types;

pub use config::EngineConfig;
pub use constants::*;
pub use types::{Lsn, PageId, Rid, TxnId};
