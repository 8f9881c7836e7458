//! Core data types used throughout fsaudit
//!
//! ## Overview
//!
//! - **Records**: [`FileRecord`] with its typed fields [`EntryKind`],
//!   [`XattrNames`] and [`LinkTarget`]
//! - **Outcomes**: [`AuditEvent`], [`AttributeChange`], [`AuditSummary`]
//! - **Configuration**: [`ScanMode`], [`AuditConfig`], [`BaselineMeta`]
//! - **Progress**: [`ProgressInfo`], [`ProgressCallback`]
//!
//! Sentinel strings exist only at the storage boundary. In memory every
//! "not available" case is its own enum variant, and the store converts to
//! and from the persisted text form.

use crate::attributes::AttributeMask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Stored placeholder for fields the platform cannot supply
pub const NOT_AVAILABLE: &str = "n/a";

/// Stored marker for a symlink whose target could not be read
pub const UNREADABLE: &str = "<unreadable>";

/// Placeholder ACL summary; ACL content is not collected
pub const ACL_PLACEHOLDER: &str = NOT_AVAILABLE;

/// Kind of audited filesystem entry
///
/// Directories are traversal nodes and never become records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Symbolic link
    Symlink,
    /// A stored row whose kind is missing or malformed
    Unknown,
}

impl EntryKind {
    /// Persisted form
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Symlink => "symlink",
            EntryKind::Unknown => "unknown",
        }
    }

    /// Parse the persisted form; anything unexpected is `Unknown`
    pub fn from_stored(s: Option<&str>) -> Self {
        match s {
            Some("file") => EntryKind::File,
            Some("symlink") => EntryKind::Symlink,
            _ => EntryKind::Unknown,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extended attribute names present on an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XattrNames {
    /// Platform or filesystem cannot enumerate extended attributes
    Unsupported,
    /// Names in enumeration order; empty when none are set
    Names(Vec<String>),
}

impl XattrNames {
    /// Persisted form: `n/a`, or the names joined with `,`
    pub fn to_stored(&self) -> String {
        match self {
            XattrNames::Unsupported => NOT_AVAILABLE.to_string(),
            XattrNames::Names(names) => names.join(","),
        }
    }

    /// Parse the persisted form
    pub fn from_stored(s: Option<&str>) -> Self {
        match s {
            None | Some(NOT_AVAILABLE) => XattrNames::Unsupported,
            Some("") => XattrNames::Names(Vec::new()),
            Some(joined) => XattrNames::Names(joined.split(',').map(str::to_string).collect()),
        }
    }
}

/// Symlink target of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTarget {
    /// Entry is not a symbolic link
    NotALink,
    /// Target string as read from the link
    Target(String),
    /// Entry is a link but its target could not be read
    Unreadable,
}

impl LinkTarget {
    /// Persisted form
    pub fn to_stored(&self) -> String {
        match self {
            LinkTarget::NotALink => NOT_AVAILABLE.to_string(),
            LinkTarget::Target(t) => t.clone(),
            LinkTarget::Unreadable => UNREADABLE.to_string(),
        }
    }

    /// Parse the persisted form
    pub fn from_stored(s: Option<&str>) -> Self {
        match s {
            None | Some(NOT_AVAILABLE) => LinkTarget::NotALink,
            Some(UNREADABLE) => LinkTarget::Unreadable,
            Some(target) => LinkTarget::Target(target.to_string()),
        }
    }
}

/// Snapshot of one audited path
///
/// Field order follows the persisted schema. `path` is the identity; the
/// baseline holds at most one record per path.
///
/// # Examples
///
/// ```rust
/// # use fsaudit::types::{FileRecord, EntryKind, LinkTarget, XattrNames};
/// let record = FileRecord {
///     path: "/etc/hosts".to_string(),
///     size: 220,
///     content_hash: Some("ab".repeat(32)),
///     mode: 0o100644,
///     acl: "n/a".to_string(),
///     created: 1_700_000_000,
///     modified: 1_700_000_000,
///     accessed: 1_700_000_500,
///     xattrs: XattrNames::Names(vec![]),
///     uid: 0,
///     gid: 0,
///     device: 2049,
///     symlink: LinkTarget::NotALink,
///     kind: EntryKind::File,
/// };
/// assert_eq!(record.permissions(), 0o644);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute normalized path
    pub path: String,
    /// Byte length of regular file content; 0 for symlinks
    pub size: u64,
    /// Hex SHA-256 of content; `None` for symlinks or when hashing is off
    pub content_hash: Option<String>,
    /// Raw mode bits including the file type
    pub mode: u32,
    /// ACL summary placeholder
    pub acl: String,
    /// Creation time, seconds since epoch
    pub created: i64,
    /// Modification time, seconds since epoch
    pub modified: i64,
    /// Access time, seconds since epoch
    pub accessed: i64,
    /// Extended attribute names
    pub xattrs: XattrNames,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Id of the device containing the entry
    pub device: u64,
    /// Symlink target
    pub symlink: LinkTarget,
    /// Entry kind at capture time
    pub kind: EntryKind,
}

impl FileRecord {
    /// Permission portion of the mode (low 12 bits)
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Which half of the two-phase protocol a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Write a fresh baseline
    #[default]
    Generate,
    /// Compare the live tree against an existing baseline
    Compare,
}

/// One differing attribute of a changed path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Display label (`Hash`, `Size`, `Type`, ...)
    pub label: String,
    /// Stored value
    pub old: String,
    /// Live value
    pub new: String,
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}->{}", self.label, self.old, self.new)
    }
}

/// Classification of a path produced by a compare run
///
/// Unchanged paths produce no event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum AuditEvent {
    /// Path absent from the baseline
    New {
        /// Record path
        path: String,
    },
    /// Path present with at least one tracked difference
    Changed {
        /// Record path
        path: String,
        /// Differences in attribute table order
        changes: Vec<AttributeChange>,
    },
    /// Path in the baseline that was not visited this run
    Deleted {
        /// Record path
        path: String,
    },
}

impl AuditEvent {
    /// Path the event refers to
    pub fn path(&self) -> &str {
        match self {
            AuditEvent::New { path }
            | AuditEvent::Changed { path, .. }
            | AuditEvent::Deleted { path } => path,
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::New { path } => write!(f, "NEW: {}", path),
            AuditEvent::Changed { path, changes } => write!(
                f,
                "CHANGED: {} ({})",
                path,
                crate::diff::format_changes(changes)
            ),
            AuditEvent::Deleted { path } => write!(f, "DELETED: {}", path),
        }
    }
}

/// Counters for a completed run
///
/// The skip counters cover every non-fatal condition the scanner contains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSummary {
    /// Mode of the run
    pub mode: ScanMode,
    /// Records written (generate) or compared (compare)
    pub files_scanned: usize,
    /// Bytes fed through the content hasher
    pub bytes_hashed: u64,
    /// Paths reported as NEW
    pub new: usize,
    /// Paths reported as CHANGED
    pub changed: usize,
    /// Paths present and identical
    pub unchanged: usize,
    /// Paths reported as DELETED
    pub deleted: usize,
    /// Regular files that could not be read
    pub unreadable_files: usize,
    /// Directories that could not be opened
    pub unreadable_dirs: usize,
    /// Entries whose metadata could not be read
    pub unstatable_entries: usize,
    /// Fifos, sockets and device nodes
    pub special_files: usize,
    /// Entries dropped by exclude patterns
    pub excluded: usize,
    /// Names that are not valid UTF-8, recorded in escaped form
    pub non_utf8_names: usize,
    /// Directories already visited through another path
    pub repeated_dirs: usize,
    /// Wall-clock duration
    pub duration: Duration,
}

impl AuditSummary {
    /// Whether any NEW, CHANGED or DELETED path was reported
    pub fn has_changes(&self) -> bool {
        self.new > 0 || self.changed > 0 || self.deleted > 0
    }

    /// Total entries skipped for any non-fatal reason
    pub fn skipped(&self) -> usize {
        self.unreadable_files
            + self.unreadable_dirs
            + self.unstatable_entries
            + self.special_files
    }
}

/// Resolved session configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Normalized scan root
    pub root: String,
    /// Normalized baseline location
    pub baseline_path: String,
    /// Attributes compared and stored
    pub mask: AttributeMask,
    /// Exclude glob patterns
    pub excludes: Vec<String>,
}

/// Provenance stored alongside a baseline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineMeta {
    /// Random id of this baseline generation
    pub baseline_id: String,
    /// Scan root the baseline was generated from
    pub root: String,
    /// Generation time
    pub created_at: DateTime<Utc>,
    /// Host that generated the baseline
    pub host: String,
    /// fsaudit version that generated the baseline
    pub version: String,
    /// Attribute names enabled at generation time
    pub mask: String,
}

impl BaselineMeta {
    /// Metadata for a new generation of `root` with `mask`
    pub fn new(root: impl Into<String>, mask: AttributeMask) -> Self {
        Self {
            baseline_id: uuid::Uuid::new_v4().to_string(),
            root: root.into(),
            created_at: Utc::now(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mask: mask.names(),
        }
    }

    /// Mask the baseline was generated with, if it parses
    pub fn attribute_mask(&self) -> Option<AttributeMask> {
        AttributeMask::from_names(&self.mask).ok()
    }
}

/// Progress callback for long-running scans
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Path currently being processed
    pub current_item: Option<String>,
    /// Records processed so far
    pub processed: usize,
    /// Bytes hashed so far
    pub bytes_processed: u64,
}
