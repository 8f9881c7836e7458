//! # fsaudit - File integrity auditing
//!
//! Records a baseline of a directory tree's metadata and content digests,
//! then compares the live tree against it and reports what was added,
//! modified or removed.
//!
//! ## Overview
//!
//! Auditing is a two-phase protocol:
//!
//! 1. **Generate**: walk the tree and store one [`FileRecord`] per regular
//!    file and symbolic link in a SQLite baseline
//! 2. **Compare**: walk the tree again and report each path as
//!    - `NEW`: not in the baseline
//!    - `CHANGED`: in the baseline with at least one tracked difference
//!    - `DELETED`: in the baseline but not reached by this walk
//!
//!    Unchanged paths produce no output.
//!
//! Which attributes count as a difference is controlled by an
//! [`AttributeMask`]. The default compares everything except access time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fsaudit::{AuditBuilder, ScanMode};
//! use fsaudit::report::TextReporter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = AuditBuilder::new().build("/etc", "/var/lib/fsaudit/etc.db")?;
//! let mut reporter = TextReporter::new(std::io::stdout());
//!
//! session.run(ScanMode::Generate, &mut reporter)?;
//! // ... time passes ...
//! let summary = session.run(ScanMode::Compare, &mut reporter)?;
//! if summary.has_changes() {
//!     eprintln!("{} new, {} changed, {} deleted", summary.new, summary.changed, summary.deleted);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Change descriptions
//!
//! A changed path lists every differing attribute as `Label: old->new`, in
//! a fixed order:
//!
//! ```text
//! CHANGED: /srv/app/config.toml (Hash: 2cf2...->5891..., Size: 5->6)
//! ```
//!
//! A regular file replaced by a symlink (or the reverse) additionally
//! reports `Type: file->symlink` first, even when no attribute is enabled.
//!
//! ## Failure handling
//!
//! Problems with individual entries never abort a scan. Unreadable files
//! and directories are logged through `tracing`, counted in the
//! [`AuditSummary`], and kept out of the `DELETED` report, since their state
//! could not be verified. Problems with the baseline itself, the scan root,
//! or the command line are fatal and reported as an [`AuditError`].
//!
//! ## Module Organization
//!
//! - [`audit`]: session builder and run orchestration
//! - [`scanner`]: directory traversal and per-mode entry sinks
//! - [`snapshot`]: metadata capture for one entry
//! - [`diff`]: attribute comparison and change descriptions
//! - [`baseline`]: the storage seam and its SQLite and in-memory stores
//! - [`reconcile`]: deletion detection after a compare walk
//! - [`report`]: event output
//! - [`attributes`]: tracked attributes and the mask
//! - [`paths`]: path normalization
//! - [`types`]: common types and data structures
//! - [`error`]: error types and handling

pub mod attributes;
pub mod audit;
pub mod baseline;
pub mod diff;
pub mod error;
pub mod paths;
pub mod reconcile;
pub mod report;
pub mod scanner;
pub mod snapshot;
pub mod types;

mod utils;

// Re-export main types for convenience
pub use attributes::{Attribute, AttributeMask};
pub use audit::{AuditBuilder, AuditSession};
pub use baseline::{BaselineStore, MemoryBaseline, SqliteBaseline};
pub use error::{AuditError, Result};
pub use report::{CollectingReporter, JsonReporter, Reporter, TextReporter};
pub use types::*;
pub use utils::format_bytes;
