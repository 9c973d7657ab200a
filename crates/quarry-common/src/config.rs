//! Engine configuration.
//!
//! The recognized options mirror the knobs the subsystems expose: buffer
//! pool capacity, log buffer capacity, the flush-thread timeout, and
//! whether mutations append log records. The configuration is built once
//! at the entry point and passed into the subsystems; the log timeout
//! additionally stays runtime-mutable on the log manager itself.

use std::time::Duration;

use crate::constants::{DEFAULT_LOG_BUFFER_SIZE, DEFAULT_LOG_TIMEOUT_MS, DEFAULT_POOL_SIZE};

/// Configuration for the storage engine core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// Byte capacity of each log buffer (active and flush).
    pub log_buffer_size: usize,
    /// Flush-thread sleep interval.
    pub log_timeout: Duration,
    /// Whether mutations append log records.
    pub enable_logging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            log_buffer_size: DEFAULT_LOG_BUFFER_SIZE,
            log_timeout: Duration::from_millis(DEFAULT_LOG_TIMEOUT_MS),
            enable_logging: true,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer pool size in frames.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the per-buffer log capacity in bytes.
    #[must_use]
    pub fn with_log_buffer_size(mut self, size: usize) -> Self {
        self.log_buffer_size = size;
        self
    }

    /// Sets the flush-thread sleep interval.
    #[must_use]
    pub fn with_log_timeout(mut self, timeout: Duration) -> Self {
        self.log_timeout = timeout;
        self
    }

    /// Enables or disables write-ahead logging.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool_size must be > 0".to_string());
        }
        if self.log_buffer_size < crate::constants::LOG_RECORD_HEADER_SIZE {
            return Err("log_buffer_size must hold at least one record header".to_string());
        }
        if self.log_timeout.is_zero() {
            return Err("log_timeout must be non-zero".to_string());
        }
        Ok(())
    }
}
