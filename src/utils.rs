//! Utility functions for fsaudit
//!
//! ## Categories of Utilities
//!
//! ### Content hashing
//! - Streaming SHA-256 of file content in fixed-size chunks
//! - SHA-256 of in-memory data
//!
//! ### File identity
//! - `(device, inode)` pairs for recognizing one object under several names
//!
//! ### Time conversion
//! - `SystemTime` to signed seconds since the Unix epoch
//!
//! ### Formatting
//! - Human-readable byte counts
//!
//! All functions are thread-safe and hold no state between calls.

use crate::error::{AuditError, Result};
use sha2::{Digest, Sha256};
use std::fs::{File, Metadata, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Chunk size used when streaming file content through the hasher
pub const HASH_CHUNK_SIZE: usize = 8192;

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Hash a file's content using SHA-256
///
/// `expected` is the `lstat` result the caller classified the entry with.
/// The file is opened without following a final symlink and without
/// blocking, then checked to be the same regular file before any byte is
/// read, so an entry swapped for a link or a fifo after the `lstat` is never
/// hashed.
///
/// The file is read in [`HASH_CHUNK_SIZE`] chunks so memory use does not
/// depend on file size. Returns the digest as 64 lowercase hex characters
/// together with the number of bytes read.
///
/// # Errors
///
/// - [`AuditError::Io`] if the file cannot be opened or read
/// - [`AuditError::EntryChanged`] if the opened file is not the one `expected`
///   describes
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::hash_file_content;
/// use std::path::Path;
///
/// let path = Path::new("/etc/hostname");
/// let (hash, bytes) = hash_file_content(path, &std::fs::symlink_metadata(path)?)?;
/// assert_eq!(hash.len(), 64);
/// ```
pub fn hash_file_content(path: &Path, expected: &Metadata) -> Result<(String, u64)> {
    let mut file = open_unfollowed(path)?;

    let opened = file.metadata()?;
    if !opened.is_file() || file_identity(&opened) != file_identity(expected) {
        return Err(AuditError::EntryChanged {
            path: path.to_path_buf(),
        });
    }

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    trace!("Hashed {} bytes of {:?}", total, path);
    Ok((hex::encode(hasher.finalize()), total))
}

#[cfg(unix)]
fn open_unfollowed(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_unfollowed(path: &Path) -> std::io::Result<File> {
    File::open(path)
}

/// `(device, inode)` pair identifying a filesystem object
pub type FileIdentity = (u64, u64);

/// Identity of the object `metadata` describes
///
/// `None` where the platform exposes no inode numbers.
#[cfg(unix)]
pub fn file_identity(metadata: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

/// Identity of the object `metadata` describes
///
/// `None` where the platform exposes no inode numbers.
#[cfg(not(unix))]
pub fn file_identity(_metadata: &Metadata) -> Option<FileIdentity> {
    None
}

/// Hash arbitrary data using SHA-256
///
/// Produces the same digest [`hash_file_content`] produces for a file with
/// this content.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert a timestamp to whole seconds since the Unix epoch
///
/// Times before the epoch become negative; sub-second precision is dropped
/// toward negative infinity.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => {
            let d = before.duration();
            let secs = d.as_secs() as i64;
            if d.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// Format bytes as human-readable string
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::format_bytes;
///
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
