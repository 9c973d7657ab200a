//! # quarry-wal
//!
//! The write-ahead log subsystem of Quarry: the log record wire format,
//! the log manager with its group-commit flush thread, the sharp
//! checkpoint, and the ARIES-style redo/undo recovery procedure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod error;
pub mod manager;
pub mod record;
pub mod recovery;

pub use checkpoint::CheckpointManager;
pub use error::{WalError, WalResult};
pub use manager::LogManager;
pub use record::{LogPayload, LogRecord, RecordHeader, RecordType};
pub use recovery::{LogRecovery, RecoveryOutcome};
