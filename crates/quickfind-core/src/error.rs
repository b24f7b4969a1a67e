//! Per-subsystem error taxonomy.
//!
//! Each boundary in the pipeline gets its own `thiserror` enum rather than
//! a single catch-all, so callers can match on what actually went wrong
//! instead of stringly-typed context. `anyhow` is reserved for the binary
//! entry point, which only needs to report failures, not recover from them.

use crate::index::RecordId;
use thiserror::Error;

/// Raw volume I/O failures (C1).
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("could not open volume {drive_letter}: (windows error {code})")]
    Open { drive_letter: char, code: i32 },

    #[error("seek to offset {offset} failed on volume {drive_letter}")]
    Seek { drive_letter: char, offset: u64 },

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("I/O error reading volume: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-record parse failures inside an MFT record (C2).
///
/// These are absorbed by the iterator — a record that fails to parse is
/// skipped, it never aborts the scan.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("record has no FILE magic number")]
    NoMagicNumber,

    #[error("record is not marked in use")]
    NotInUse,

    #[error("update sequence fixup check mismatched")]
    FixupMismatch,

    #[error("no resident $FILE_NAME attribute found")]
    NameAttributeMissing,

    #[error("$FILE_NAME attribute is non-resident")]
    NameAttributeNonResident,
}

/// Whole-volume failures that abort MFT ingestion before any records are
/// produced (C3).
#[derive(Debug, Error)]
pub enum MftError {
    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("boot sector has unexpected layout")]
    InvalidBootSector,

    #[error("$MFT record itself failed to parse: {0}")]
    SelfRecordInvalid(RecordParseError),

    #[error("$MFT has no non-resident $DATA attribute")]
    DataAttributeMissing,

    #[error("$MFT $DATA attribute is resident (expected non-resident)")]
    DataAttributeResident,
}

/// USN journal follower failures (C4).
#[derive(Debug, Error)]
pub enum UsnError {
    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("FSCTL_QUERY_USN_JOURNAL failed (windows error {0})")]
    QueryJournal(i32),

    #[error("FSCTL_READ_USN_JOURNAL failed (windows error {0})")]
    ReadJournal(i32),

    #[error("journal was reset or deleted under us (journal id changed)")]
    JournalIdChanged,
}

/// Snapshot persistence failures (C7).
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format version {found} unsupported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("snapshot file is truncated or corrupt")]
    Truncated,
}

/// Top-level service errors surfaced to the worker loop / IPC dispatch (C8).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Mft(#[from] MftError),

    #[error(transparent)]
    Usn(#[from] UsnError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("named pipe error: {0}")]
    Pipe(String),

    #[error("index is not yet initialized")]
    NotInitialized,
}

/// Wire-level error codes sent back to IPC clients (C6/C9).
///
/// This is the one error type that crosses the process boundary; it is
/// intentionally flat (no payload) so it fits in a fixed-layout frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum WireError {
    #[error("ok")]
    Ok = 0,
    #[error("cancelled")]
    Cancelled,
    #[error("invalid request")]
    InvalidRequest,
    #[error("invalid response")]
    InvalidResponse,
    #[error("server not initialized")]
    ServerNotInitialized,
    #[error("database not initialized")]
    DatabaseNotInitialized,
    #[error("could not connect to server")]
    CouldNotConnectToServer,
    #[error("out of memory")]
    OutOfMemory,
    #[error("platform error")]
    PlatformError,
    #[error("could not get path")]
    CouldNotGetPath,
    #[error("connection timeout")]
    ConnectionTimeout,
    #[error("I/O read error")]
    IoRead,
    #[error("I/O write error")]
    IoWrite,
    #[error("no result")]
    NoResult,
}

impl From<&ServiceError> for WireError {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::NotInitialized => WireError::DatabaseNotInitialized,
            ServiceError::Pipe(_) => WireError::IoWrite,
            ServiceError::Mft(_) | ServiceError::Usn(_) | ServiceError::Snapshot(_) => {
                WireError::PlatformError
            }
        }
    }
}
