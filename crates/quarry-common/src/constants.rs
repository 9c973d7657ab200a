//! System-wide constants for Quarry.

/// Size of a disk page in bytes.
///
/// Page i of the data file occupies bytes `[i * PAGE_SIZE, (i + 1) * PAGE_SIZE)`.
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames in the buffer pool.
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Default capacity of each log buffer (active and flush), in bytes.
pub const DEFAULT_LOG_BUFFER_SIZE: usize = 64 * 1024;

/// Default flush-thread sleep interval, in milliseconds.
pub const DEFAULT_LOG_TIMEOUT_MS: u64 = 1_000;

/// Size of the fixed log record header in bytes.
///
/// Layout (little-endian): size (4), lsn (4), txn_id (4), prev_lsn (4),
/// record_type (4).
pub const LOG_RECORD_HEADER_SIZE: usize = 20;

/// Size of an encoded record identifier in bytes (page id + slot).
pub const RID_SIZE: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
    }

    #[test]
    fn test_log_header_holds_five_fields() {
        assert_eq!(LOG_RECORD_HEADER_SIZE, 5 * 4);
    }
}
