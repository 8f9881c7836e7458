//! Directory traversal and per-entry dispatch
//!
//! The scanner walks a directory tree depth-first, captures a
//! [`FileRecord`] for every regular file and symbolic link, and hands each
//! record to an [`EntrySink`]. What happens to a record (stored, or compared
//! against the baseline) is decided once per run by choosing the sink; the
//! traversal loop itself never looks at the run mode.
//!
//! ## Traversal rules
//!
//! - Pending directories live on an explicit work stack, so tree depth is
//!   bounded by memory rather than by the call stack
//! - Symbolic links are recorded, never followed
//! - Each directory is identified by its `(device, inode)` pair and is
//!   descended at most once, which breaks loops created by bind mounts
//! - Entries are visited in name order within a directory
//!
//! ## Skipped entries
//!
//! | entry | handling |
//! |-------|----------|
//! | the baseline file, its `-journal`/`-wal`/`-shm` sidecars, or a hard link to it | silently skipped |
//! | path matching an exclude pattern | skipped and counted, subtree too |
//! | fifo, socket, device node | counted |
//! | directory that cannot be opened | warned, counted, listed in [`ScanOutcome::unreadable_dirs`] |
//! | file that cannot be read | warned, counted, still reported to the sink as visited |
//! | entry whose metadata cannot be read | warned, counted, still reported as visited |
//!
//! None of these abort the walk. An unreadable scan root does, as does any
//! error returned by the sink.
//!
//! Baseline sidecars are recognized by the identity of the directory that
//! holds them plus their name, so the root may be spelled differently from
//! the baseline path (`/srv/.` against `/srv/base.db`).
//!
//! ## Record paths
//!
//! Names that are not valid UTF-8 are recorded, not skipped: the record
//! path carries them through [`paths::escape_name`], while the filesystem
//! is always addressed with the raw name.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fsaudit::scanner::{GenerateSink, Scanner};
//! use fsaudit::baseline::MemoryBaseline;
//! use fsaudit::attributes::AttributeMask;
//!
//! let mut store = MemoryBaseline::new();
//! let mut sink = GenerateSink::new(&mut store);
//! let outcome = Scanner::new(AttributeMask::default())
//!     .with_baseline("/var/lib/audit/base.db")
//!     .walk("/etc", &mut sink)?;
//! println!("{} records", outcome.records);
//! ```

use crate::attributes::AttributeMask;
use crate::baseline::BaselineStore;
use crate::diff;
use crate::error::{AuditError, Result};
use crate::paths;
use crate::report::Reporter;
use crate::snapshot;
use crate::types::{AuditEvent, FileRecord, ProgressCallback, ProgressInfo};
use globset::{Glob, GlobSet, GlobSetBuilder};
use crate::utils::{file_identity, FileIdentity};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Suffixes SQLite appends to a database path for its side files
pub const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// Receiver for the entries a walk visits
///
/// Errors returned by a sink are fatal and end the walk.
pub trait EntrySink {
    /// A regular file or symlink was captured
    fn record(&mut self, record: FileRecord) -> Result<()>;

    /// An entry exists but could not be captured
    fn unreadable(&mut self, path: &str) -> Result<()>;
}

/// Sink that writes every record into the baseline
pub struct GenerateSink<'a> {
    store: &'a mut dyn BaselineStore,
    written: usize,
}

impl<'a> GenerateSink<'a> {
    /// Create a sink over a store that has begun generation
    pub fn new(store: &'a mut dyn BaselineStore) -> Self {
        Self { store, written: 0 }
    }

    /// Records written so far
    pub fn written(&self) -> usize {
        self.written
    }
}

impl EntrySink for GenerateSink<'_> {
    fn record(&mut self, record: FileRecord) -> Result<()> {
        self.store.upsert(&record)?;
        self.written += 1;
        Ok(())
    }

    fn unreadable(&mut self, path: &str) -> Result<()> {
        trace!("Not recording unreadable entry {}", path);
        Ok(())
    }
}

/// Sink that classifies every record against the baseline
///
/// Each visited path is marked seen before it is looked up, so the
/// reconciliation pass that follows only finds paths the walk never reached.
pub struct CompareSink<'a> {
    store: &'a mut dyn BaselineStore,
    reporter: &'a mut dyn Reporter,
    mask: AttributeMask,
    /// Paths absent from the baseline
    pub new: usize,
    /// Paths with at least one difference
    pub changed: usize,
    /// Paths identical to the baseline
    pub unchanged: usize,
}

impl<'a> CompareSink<'a> {
    /// Create a sink over a store that has begun comparison
    pub fn new(
        store: &'a mut dyn BaselineStore,
        reporter: &'a mut dyn Reporter,
        mask: AttributeMask,
    ) -> Self {
        Self {
            store,
            reporter,
            mask,
            new: 0,
            changed: 0,
            unchanged: 0,
        }
    }
}

impl EntrySink for CompareSink<'_> {
    fn record(&mut self, record: FileRecord) -> Result<()> {
        self.store.mark_seen(&record.path)?;

        let Some(stored) = self.store.get(&record.path)? else {
            self.new += 1;
            return self.reporter.report(&AuditEvent::New { path: record.path });
        };

        let changes = diff::compare(&stored, &record, self.mask);
        if changes.is_empty() {
            self.unchanged += 1;
            return Ok(());
        }

        self.changed += 1;
        self.reporter.report(&AuditEvent::Changed {
            path: record.path,
            changes,
        })
    }

    fn unreadable(&mut self, path: &str) -> Result<()> {
        self.store.mark_seen(path)
    }
}

/// Compiled exclude patterns
///
/// Patterns are shell globs matched against absolute record paths; `*`
/// also matches across separators, so `*.log` excludes log files at any
/// depth and `/srv/cache` excludes that directory with its subtree.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
    len: usize,
}

impl ExcludeSet {
    /// Compile a list of patterns
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidPattern`] if any pattern is not a valid glob
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern.as_ref())?);
        }
        Ok(Self {
            set: builder.build()?,
            len: patterns.len(),
        })
    }

    /// An exclude set that matches nothing
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            len: 0,
        }
    }

    /// Whether `path` is excluded
    pub fn is_match(&self, path: &str) -> bool {
        self.len > 0 && self.set.is_match(path)
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no patterns
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a completed walk saw
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Records handed to the sink
    pub records: usize,
    /// Bytes read by the content hasher
    pub bytes_hashed: u64,
    /// Regular files that could not be read
    pub unreadable_files: usize,
    /// Directories that could not be opened, in visit order
    pub unreadable_dirs: Vec<String>,
    /// Entries whose metadata could not be read
    pub unstatable_entries: usize,
    /// Fifos, sockets and device nodes
    pub special_files: usize,
    /// Entries dropped by exclude patterns
    pub excluded: usize,
    /// Names that are not valid UTF-8, recorded in escaped form
    pub non_utf8_names: usize,
    /// Directories reached a second time
    pub repeated_dirs: usize,
    /// Root the walk started from, as spelled in record paths
    pub root: String,
}

/// Directories already descended during one walk
///
/// Keyed by `(device, inode)`. Directories without an identity (non-unix)
/// are always treated as new.
#[derive(Debug, Default)]
pub struct VisitedDirs {
    seen: HashSet<FileIdentity>,
}

impl VisitedDirs {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit; `false` if this directory was visited before
    pub fn first_visit(&mut self, id: Option<FileIdentity>) -> bool {
        match id {
            Some(id) => self.seen.insert(id),
            None => true,
        }
    }

    /// Number of distinct directories recorded
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no directory was recorded
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Directory holding the baseline and the names it occupies there
#[derive(Debug, Clone)]
struct BaselineDir {
    id: FileIdentity,
    names: Vec<OsString>,
}

impl BaselineDir {
    fn holds(&self, dir: Option<FileIdentity>, name: &OsStr) -> bool {
        dir == Some(self.id) && self.names.iter().any(|n| n == name)
    }
}

/// A directory waiting on the work stack
struct PendingDir {
    fs_path: PathBuf,
    key: String,
    id: Option<FileIdentity>,
}

/// Depth-first directory walker
///
/// Configured with the builder methods and run with [`Scanner::walk`]. A
/// scanner holds no state between walks.
#[derive(Default)]
pub struct Scanner {
    mask: AttributeMask,
    excludes: ExcludeSet,
    skip_paths: Vec<String>,
    skip_identity: Option<FileIdentity>,
    baseline_dir: Option<BaselineDir>,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

impl Scanner {
    /// Create a scanner capturing the attributes in `mask`
    pub fn new(mask: AttributeMask) -> Self {
        Self {
            mask,
            ..Self::default()
        }
    }

    /// Skip entries matching these patterns
    pub fn with_excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = excludes;
        self
    }

    /// Never record the baseline file itself
    ///
    /// Skips the normalized path and its SQLite sidecars whether reached
    /// under that spelling or through the directory that holds them, plus
    /// any entry that is the same file under another name.
    pub fn with_baseline(mut self, baseline_path: &str) -> Self {
        self.skip_paths = std::iter::once(baseline_path.to_string())
            .chain(
                SIDECAR_SUFFIXES
                    .iter()
                    .map(|suffix| format!("{}{}", baseline_path, suffix)),
            )
            .collect();
        self.skip_identity = fs::metadata(baseline_path)
            .ok()
            .as_ref()
            .and_then(file_identity);

        let path = Path::new(baseline_path);
        self.baseline_dir = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
                fs::metadata(parent)
                    .ok()
                    .as_ref()
                    .and_then(file_identity)
                    .map(|id| BaselineDir {
                        id,
                        names: std::iter::once(name.to_os_string())
                            .chain(SIDECAR_SUFFIXES.iter().map(|suffix| {
                                let mut sidecar = name.to_os_string();
                                sidecar.push(suffix);
                                sidecar
                            }))
                            .collect(),
                    })
            }
            _ => None,
        };
        self
    }

    /// Stop the walk between entries once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Report each captured record
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Walk `root` and feed every captured entry to `sink`
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidRoot`] if `root` is not a readable directory
    /// - [`AuditError::Cancelled`] if the cancel flag was set
    /// - Any error returned by the sink
    pub fn walk(&self, root: &str, sink: &mut dyn EntrySink) -> Result<ScanOutcome> {
        let root = paths::strip_trailing_separator(root).to_string();
        let invalid_root = |reason: String| AuditError::InvalidRoot {
            path: PathBuf::from(&root),
            reason,
        };

        let root_meta = fs::metadata(&root).map_err(|e| invalid_root(e.to_string()))?;
        if !root_meta.is_dir() {
            return Err(invalid_root("not a directory".to_string()));
        }

        let mut outcome = ScanOutcome {
            root: root.clone(),
            ..ScanOutcome::default()
        };
        let mut visited = VisitedDirs::new();
        let root_id = file_identity(&root_meta);
        visited.first_visit(root_id);

        let mut stack = vec![PendingDir {
            fs_path: PathBuf::from(&root),
            key: root.clone(),
            id: root_id,
        }];
        while let Some(dir) = stack.pop() {
            let names = match read_names(&dir, &mut outcome) {
                Ok(names) => names,
                Err(e) if dir.key == root => return Err(invalid_root(e.to_string())),
                Err(e) => {
                    warn!("Cannot read directory {}: {}", dir.key, e);
                    outcome.unreadable_dirs.push(dir.key);
                    continue;
                }
            };
            debug!("Scanning {} ({} entries)", dir.key, names.len());

            let mut subdirs = Vec::new();
            for name in names {
                self.check_cancelled()?;

                let escaped = paths::escape_name(&name);
                if name.to_str().is_none() {
                    debug!("Recording non-UTF-8 name in {} as {}", dir.key, escaped);
                    outcome.non_utf8_names += 1;
                }
                let path = paths::join_entry(&dir.key, &escaped);
                let fs_path = dir.fs_path.join(&name);

                if self.skip_paths.contains(&path)
                    || self.baseline_dir.as_ref().is_some_and(|b| b.holds(dir.id, &name))
                {
                    trace!("Skipping baseline file {}", path);
                    continue;
                }
                if self.excludes.is_match(&path) {
                    trace!("Excluded {}", path);
                    outcome.excluded += 1;
                    continue;
                }

                let metadata = match fs::symlink_metadata(&fs_path) {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        trace!("{} vanished during scan", path);
                        continue;
                    }
                    Err(e) => {
                        warn!("Cannot stat {}: {}", path, e);
                        outcome.unstatable_entries += 1;
                        sink.unreadable(&path)?;
                        continue;
                    }
                };

                let file_type = metadata.file_type();
                if file_type.is_dir() {
                    let id = file_identity(&metadata);
                    if visited.first_visit(id) {
                        subdirs.push(PendingDir { fs_path, key: path, id });
                    } else {
                        debug!("Already visited {}, not descending", path);
                        outcome.repeated_dirs += 1;
                    }
                    continue;
                }

                if self.skip_identity.is_some() && file_identity(&metadata) == self.skip_identity {
                    trace!("Skipping alias of baseline file {}", path);
                    continue;
                }

                if !file_type.is_file() && !file_type.is_symlink() {
                    trace!("Skipping special file {}", path);
                    outcome.special_files += 1;
                    continue;
                }

                match snapshot::capture(&fs_path, &path, &metadata, self.mask) {
                    Ok(Some(snap)) => {
                        outcome.records += 1;
                        outcome.bytes_hashed += snap.bytes_hashed;
                        sink.record(snap.record)?;
                        self.report_progress(&path, &outcome);
                    }
                    Ok(None) => outcome.special_files += 1,
                    Err(e) => {
                        warn!("Cannot read {}: {}", path, e);
                        outcome.unreadable_files += 1;
                        sink.unreadable(&path)?;
                    }
                }
            }

            // Reversed so the smallest name is popped first
            stack.extend(subdirs.into_iter().rev());
        }

        Ok(outcome)
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(AuditError::Cancelled),
            _ => Ok(()),
        }
    }

    fn report_progress(&self, path: &str, outcome: &ScanOutcome) {
        if let Some(callback) = &self.progress {
            callback(ProgressInfo {
                operation: "Scanning".to_string(),
                current_item: Some(path.to_string()),
                processed: outcome.records,
                bytes_processed: outcome.bytes_hashed,
            });
        }
    }
}

/// Read the raw entry names of a directory, sorted
fn read_names(dir: &PendingDir, outcome: &mut ScanOutcome) -> std::io::Result<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir.fs_path)? {
        match entry {
            Ok(entry) => names.push(entry.file_name()),
            Err(e) => {
                warn!("Cannot read entry in {}: {}", dir.key, e);
                outcome.unstatable_entries += 1;
            }
        }
    }
    names.sort_unstable();
    Ok(names)
}
