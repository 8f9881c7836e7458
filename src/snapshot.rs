//! Metadata snapshots of filesystem entries
//!
//! [`capture`] turns one `lstat` result into a [`FileRecord`]. Only regular
//! files and symbolic links produce records; directories are walked by the
//! scanner instead, and fifos, sockets and device nodes are skipped because
//! opening them for hashing could block or have side effects.
//!
//! ## What is captured
//!
//! - Regular file: SHA-256 of the content (streamed in chunks), byte length
//! - Symbolic link: the target string, never the target's content. An
//!   unreadable target becomes [`LinkTarget::Unreadable`] instead of an error
//! - Both: mode bits, owner ids, containing device, timestamps, extended
//!   attribute names (never values) and the ACL placeholder
//!
//! Capturing reads the entry and nothing else. It never writes, truncates or
//! follows a final symlink.

use crate::attributes::AttributeMask;
use crate::error::Result;
use crate::paths;
use crate::types::{EntryKind, FileRecord, LinkTarget, XattrNames, ACL_PLACEHOLDER};
use crate::utils;
use std::fs::{self, Metadata};
use std::path::Path;
use tracing::{debug, trace};

/// Result of capturing one entry
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Captured record
    pub record: FileRecord,
    /// Bytes read by the content hasher
    pub bytes_hashed: u64,
}

/// Capture a record for the entry at `path` from its `lstat` result
///
/// `record_path` is the key the record is stored under; the scanner derives
/// it from escaped entry names, so it can differ from `path` for names that
/// are not valid UTF-8. Returns `Ok(None)` for directories and special
/// files. The content hash is computed only when `mask` includes
/// [`AttributeMask::HASH`].
///
/// # Errors
///
/// - [`AuditError::Io`](crate::AuditError::Io) if a regular file cannot be opened or read
///   for hashing. The caller decides whether to skip the entry.
/// - [`AuditError::EntryChanged`](crate::AuditError::EntryChanged) if the entry was
///   replaced after `metadata` was taken
pub fn capture(
    path: &Path,
    record_path: &str,
    metadata: &Metadata,
    mask: AttributeMask,
) -> Result<Option<Snapshot>> {
    let file_type = metadata.file_type();

    let (kind, size, content_hash, symlink, bytes_hashed) = if file_type.is_file() {
        let (hash, bytes) = if mask.contains(AttributeMask::HASH) {
            let (hash, bytes) = utils::hash_file_content(path, metadata)?;
            (Some(hash), bytes)
        } else {
            (None, 0)
        };
        (EntryKind::File, metadata.len(), hash, LinkTarget::NotALink, bytes)
    } else if file_type.is_symlink() {
        let target = match fs::read_link(path) {
            Ok(target) => LinkTarget::Target(paths::escape_name(target.as_os_str()).into_owned()),
            Err(e) => {
                debug!("Cannot read link target of {}: {}", record_path, e);
                LinkTarget::Unreadable
            }
        };
        (EntryKind::Symlink, 0, None, target, 0)
    } else {
        trace!("No record for {} ({:?})", record_path, file_type);
        return Ok(None);
    };

    let fields = platform::fields(metadata);

    let record = FileRecord {
        path: record_path.to_string(),
        size,
        content_hash,
        mode: fields.mode,
        acl: ACL_PLACEHOLDER.to_string(),
        created: fields.created,
        modified: fields.modified,
        accessed: fields.accessed,
        xattrs: list_xattr_names(path),
        uid: fields.uid,
        gid: fields.gid,
        device: fields.device,
        symlink,
        kind,
    };

    Ok(Some(Snapshot { record, bytes_hashed }))
}

/// `lstat` the path and capture it under its own spelling
///
/// Convenience for callers that do not already hold the metadata.
pub fn capture_path(path: &str, mask: AttributeMask) -> Result<Option<Snapshot>> {
    let metadata = fs::symlink_metadata(path)?;
    capture(Path::new(path), path, &metadata, mask)
}

/// Platform-dependent numeric fields of an entry
struct PlatformFields {
    mode: u32,
    uid: u32,
    gid: u32,
    device: u64,
    created: i64,
    modified: i64,
    accessed: i64,
}

#[cfg(unix)]
mod platform {
    use super::PlatformFields;
    use crate::utils::unix_seconds;
    use std::fs::Metadata;
    use std::os::unix::fs::MetadataExt;

    pub(super) fn fields(metadata: &Metadata) -> PlatformFields {
        // Birth time where the filesystem records it, status-change time otherwise
        let created = metadata
            .created()
            .map(unix_seconds)
            .unwrap_or_else(|_| metadata.ctime());

        PlatformFields {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            device: metadata.dev(),
            created,
            modified: metadata.mtime(),
            accessed: metadata.atime(),
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::PlatformFields;
    use crate::utils::unix_seconds;
    use std::fs::Metadata;

    pub(super) fn fields(metadata: &Metadata) -> PlatformFields {
        let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
        let secs = |t: std::io::Result<std::time::SystemTime>| t.map(unix_seconds).unwrap_or(0);

        PlatformFields {
            mode,
            uid: 0,
            gid: 0,
            device: 0,
            created: secs(metadata.created()),
            modified: secs(metadata.modified()),
            accessed: secs(metadata.accessed()),
        }
    }
}

/// List extended attribute names of `path` without following a final symlink
///
/// Names come back in the order the kernel enumerates them, escaped like
/// entry names. Filesystems and platforms that cannot enumerate attributes
/// report [`XattrNames::Unsupported`], which is distinct from an empty list.
pub fn list_xattr_names(path: &Path) -> XattrNames {
    if !xattr::SUPPORTED_PLATFORM {
        return XattrNames::Unsupported;
    }

    match xattr::list(path) {
        Ok(names) => XattrNames::Names(
            names
                .map(|name| paths::escape_name(&name).into_owned())
                .collect(),
        ),
        Err(e) => {
            debug!("Extended attributes unavailable for {:?}: {}", path, e);
            XattrNames::Unsupported
        }
    }
}
