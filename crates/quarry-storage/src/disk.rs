//! Disk manager.
//!
//! The disk manager owns two files: the data file, addressed in
//! fixed-size pages by page id, and an append-only log file addressed by
//! byte offset. It also hands out page ids; allocation is monotonically
//! increasing and survives restarts by deriving the next id from the data
//! file's length.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use quarry_common::constants::PAGE_SIZE;
use quarry_common::types::PageId;

/// Result type for disk operations.
pub type DiskResult<T> = Result<T, DiskError>;

/// Errors produced by the disk manager.
#[derive(Debug, Error)]
pub enum DiskError {
    /// Underlying I/O failure. Fatal.
    #[error("disk I/O error: {source}")]
    Io {
        /// Source error.
        #[from]
        source: std::io::Error,
    },

    /// A page buffer of the wrong length was supplied.
    #[error("page buffer must be {expected} bytes, got {actual}")]
    BadBufferSize {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },
}

/// Disk manager statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStats {
    /// Pages written to the data file.
    pub page_writes: u64,
    /// Pages read from the data file.
    pub page_reads: u64,
    /// Log writes (each followed by a sync).
    pub log_writes: u64,
}

/// Manages the data file and the log file of one database.
pub struct DiskManager {
    /// Data file, guarded for seek+read/write atomicity.
    db_file: Mutex<File>,
    /// Append-only log file.
    log_file: Mutex<File>,
    /// Data file path.
    db_path: PathBuf,
    /// Log file path.
    log_path: PathBuf,
    /// Next page id to hand out.
    next_page_id: AtomicU32,
    page_writes: AtomicU64,
    page_reads: AtomicU64,
    log_writes: AtomicU64,
}

impl DiskManager {
    /// Opens (creating if necessary) the data file at `db_path` and its
    /// sibling log file, which takes the same path with a `.log` extension.
    pub fn open(db_path: impl AsRef<Path>) -> DiskResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let log_path = db_path.with_extension("log");

        let db_file = Self::open_file(&db_path)?;
        let log_file = Self::open_file(&log_path)?;

        // Resume allocation after the highest page the file already holds.
        let len = db_file.metadata()?.len();
        let next_page_id = (len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            db_path,
            log_path,
            next_page_id: AtomicU32::new(next_page_id),
            page_writes: AtomicU64::new(0),
            page_reads: AtomicU64::new(0),
            log_writes: AtomicU64::new(0),
        })
    }

    fn open_file(path: &Path) -> DiskResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?)
    }

    /// Returns the data file path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Returns the log file path.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Allocates a fresh page id.
    pub fn allocate_page(&self) -> PageId {
        PageId::new(self.next_page_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Deallocates a page.
    ///
    /// Allocation is monotonic; deallocated ids are not recycled, so this
    /// currently only exists to keep the page lifecycle explicit.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Reads page `page_id` into `buf`.
    ///
    /// A page that was allocated but never written reads back as zeroes;
    /// the same holds for the unwritten tail of a short file.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::BadBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        let len = file.metadata()?.len();

        if offset >= len {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);

        self.page_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `buf` as page `page_id`.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> DiskResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::BadBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;

        self.page_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends `buf` to the log file and syncs it to stable storage.
    ///
    /// The sync is what lets the log manager advance its persistent LSN
    /// after this call returns.
    pub fn write_log(&self, buf: &[u8]) -> DiskResult<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        file.sync_data()?;

        self.log_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads up to `buf.len()` bytes of the log file starting at `offset`.
    ///
    /// Returns the number of bytes read; 0 means the offset is at or past
    /// the end of the log. A short read is a normal end-of-log signal, not
    /// an error.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> DiskResult<usize> {
        let mut file = self.log_file.lock();
        let len = file.metadata()?.len();

        if offset >= len {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((len - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..available])?;
        Ok(available)
    }

    /// Returns the current length of the log file in bytes.
    pub fn log_len(&self) -> DiskResult<u64> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    /// Returns a snapshot of the disk statistics.
    pub fn stats(&self) -> DiskStats {
        DiskStats {
            page_writes: self.page_writes.load(Ordering::Relaxed),
            page_reads: self.page_reads.load(Ordering::Relaxed),
            log_writes: self.log_writes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("db_path", &self.db_path)
            .field("log_path", &self.log_path)
            .field("next_page_id", &self.next_page_id.load(Ordering::Relaxed))
            .finish()
    }
}
