//! Audit session orchestration
//!
//! This module ties the scanner, the baseline store, and the reconciliation
//! pass together into one run.
//!
//! ## Overview
//!
//! An [`AuditSession`] is assembled by [`AuditBuilder`] and owns everything a
//! run needs: the normalized root and baseline paths, the attribute mask, the
//! compiled exclude patterns, and the optional cancellation flag and progress
//! callback. Nothing is kept in process-wide state, so several sessions can
//! coexist in one process.
//!
//! A run is one of two modes:
//!
//! - **Generate**: walk the tree and replace the baseline's record set. The
//!   new set becomes visible only if the walk completes; otherwise the
//!   previous baseline is left as it was.
//! - **Compare**: walk the tree against the baseline opened read-only,
//!   report `NEW` and `CHANGED` paths as they are found, then report every
//!   stored path the walk never reached as `DELETED`.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use fsaudit::{AuditBuilder, ScanMode};
//! use fsaudit::report::TextReporter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = AuditBuilder::new()
//!     .exclude_patterns(vec!["*.log".to_string()])
//!     .build("/etc", "/var/lib/fsaudit/etc.db")?;
//!
//! let mut reporter = TextReporter::new(std::io::stdout());
//! session.run(ScanMode::Generate, &mut reporter)?;
//!
//! // ... later ...
//! let summary = session.run(ScanMode::Compare, &mut reporter)?;
//! println!("{} changed", summary.changed);
//! # Ok(())
//! # }
//! ```

use crate::attributes::AttributeMask;
use crate::baseline::{BaselineStore, SqliteBaseline};
use crate::error::{AuditError, Result};
use crate::paths;
use crate::reconcile::reconcile;
use crate::report::Reporter;
use crate::scanner::{CompareSink, ExcludeSet, GenerateSink, ScanOutcome, Scanner};
use crate::types::{AuditConfig, AuditSummary, BaselineMeta, ProgressCallback, ScanMode};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Builder for [`AuditSession`]
///
/// # Examples
///
/// ```rust
/// use fsaudit::AuditBuilder;
/// use fsaudit::attributes::AttributeMask;
///
/// let builder = AuditBuilder::new()
///     .mask(AttributeMask::from_flags(["nohash", "atime"]).unwrap())
///     .exclude_patterns(vec!["/proc/**".to_string()]);
/// ```
#[derive(Default)]
pub struct AuditBuilder {
    mask: AttributeMask,
    excludes: Vec<String>,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

impl AuditBuilder {
    /// Create a builder with the default attribute mask and no excludes
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attributes to capture and compare
    pub fn mask(mut self, mask: AttributeMask) -> Self {
        self.mask = mask;
        self
    }

    /// Set exclude glob patterns
    ///
    /// Patterns match absolute paths. An excluded directory is not descended,
    /// and excluded stored paths are never reported as deleted.
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.excludes = patterns;
        self
    }

    /// Set a flag that cancels a running scan when set
    ///
    /// The flag is checked between entries. A cancelled generate run leaves
    /// the previous baseline intact; a cancelled compare run reports no
    /// deletions.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Set a callback invoked for every captured entry
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Build a session for `root` and `baseline_path`
    ///
    /// Relative paths are resolved against the current directory and
    /// repeated separators are collapsed.
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidRoot`] if `root` is not a directory
    /// - [`AuditError::InvalidPattern`] if an exclude pattern does not compile
    /// - [`AuditError::Io`] if the current directory cannot be determined
    pub fn build(self, root: &str, baseline_path: &str) -> Result<AuditSession> {
        let cwd = std::env::current_dir()?;
        let cwd = cwd
            .to_str()
            .ok_or_else(|| AuditError::internal("current directory is not valid UTF-8"))?;

        let root = resolve(cwd, root);
        let baseline_path = resolve(cwd, baseline_path);

        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(AuditError::InvalidRoot {
                    path: PathBuf::from(&root),
                    reason: "not a directory".to_string(),
                })
            }
            Err(e) => {
                return Err(AuditError::InvalidRoot {
                    path: PathBuf::from(&root),
                    reason: e.to_string(),
                })
            }
        }

        let excludes = ExcludeSet::new(&self.excludes)?;
        debug!(
            "Session for {} with baseline {} (mask: {}, {} excludes)",
            root,
            baseline_path,
            self.mask.names(),
            excludes.len()
        );

        Ok(AuditSession {
            config: AuditConfig {
                root,
                baseline_path,
                mask: self.mask,
                excludes: self.excludes,
            },
            excludes,
            cancel: self.cancel,
            progress: self.progress,
        })
    }
}

fn resolve(cwd: &str, path: &str) -> String {
    let normalized = paths::collapse(&paths::normalize(cwd, path));
    paths::strip_trailing_separator(&normalized).to_string()
}

/// A configured audit of one directory against one baseline
pub struct AuditSession {
    config: AuditConfig,
    excludes: ExcludeSet,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

impl AuditSession {
    /// Resolved configuration
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Run against the SQLite baseline at the configured path
    ///
    /// Generate opens (or creates) the file for writing; compare opens it
    /// read-only.
    ///
    /// # Errors
    ///
    /// - [`AuditError::BaselineOpen`] or [`AuditError::Schema`] if the
    ///   baseline cannot be used
    /// - [`AuditError::InvalidRoot`] if the root cannot be read
    /// - [`AuditError::Cancelled`] if the cancel flag was set
    /// - Store errors raised during the run
    pub fn run(&self, mode: ScanMode, reporter: &mut dyn Reporter) -> Result<AuditSummary> {
        let mut store = match mode {
            ScanMode::Generate => SqliteBaseline::open_for_generation(&self.config.baseline_path)?,
            ScanMode::Compare => SqliteBaseline::open_for_comparison(&self.config.baseline_path)?,
        };
        self.run_with_store(mode, &mut store, reporter)
    }

    /// Run against any baseline store
    pub fn run_with_store(
        &self,
        mode: ScanMode,
        store: &mut dyn BaselineStore,
        reporter: &mut dyn Reporter,
    ) -> Result<AuditSummary> {
        let start = Instant::now();
        let scanner = self.scanner();
        let root = self.config.root.as_str();
        let mut summary = AuditSummary {
            mode,
            ..AuditSummary::default()
        };

        info!("Scanning {} ({:?})", root, mode);

        match mode {
            ScanMode::Generate => {
                let meta = BaselineMeta::new(root, self.config.mask);
                store.begin_generation(&meta)?;

                let walked = {
                    let mut sink = GenerateSink::new(store);
                    scanner.walk(root, &mut sink)
                };
                let outcome = match walked {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if let Err(abort) = store.abort_generation() {
                            warn!("Failed to roll back baseline: {}", abort);
                        }
                        return Err(e);
                    }
                };

                store.finish_generation()?;
                absorb(&mut summary, &outcome);
            }
            ScanMode::Compare => {
                let meta = store.begin_comparison()?;
                self.check_meta(meta.as_ref());

                let outcome = {
                    let mut sink = CompareSink::new(store, reporter, self.config.mask);
                    let outcome = scanner.walk(root, &mut sink)?;
                    summary.new = sink.new;
                    summary.changed = sink.changed;
                    summary.unchanged = sink.unchanged;
                    outcome
                };
                absorb(&mut summary, &outcome);

                let deleted = reconcile(store, &outcome, &self.excludes, reporter)?;
                summary.deleted = deleted.len();
            }
        }

        reporter.finish()?;
        summary.duration = start.elapsed();

        info!(
            "Finished {:?} of {}: {} files, {} new, {} changed, {} deleted, {} skipped",
            mode,
            root,
            summary.files_scanned,
            summary.new,
            summary.changed,
            summary.deleted,
            summary.skipped()
        );
        Ok(summary)
    }

    fn scanner(&self) -> Scanner {
        let mut scanner = Scanner::new(self.config.mask)
            .with_excludes(self.excludes.clone())
            .with_baseline(&self.config.baseline_path);
        if let Some(flag) = &self.cancel {
            scanner = scanner.with_cancel_flag(Arc::clone(flag));
        }
        if let Some(callback) = &self.progress {
            scanner = scanner.with_progress_callback(Arc::clone(callback));
        }
        scanner
    }

    fn check_meta(&self, meta: Option<&BaselineMeta>) {
        let Some(meta) = meta else {
            debug!("Baseline carries no provenance");
            return;
        };

        debug!(
            "Baseline {} generated {} on {} by version {}",
            meta.baseline_id, meta.created_at, meta.host, meta.version
        );

        if meta.root != self.config.root {
            warn!(
                "Baseline was generated for {} but {} is being scanned",
                meta.root, self.config.root
            );
        }

        let stored_mask = meta.attribute_mask().unwrap_or_else(AttributeMask::empty);
        if self.config.mask.contains(AttributeMask::HASH) && !stored_mask.contains(AttributeMask::HASH) {
            warn!("Baseline was generated without content hashes; every file will report a Hash change");
        }
    }
}

fn absorb(summary: &mut AuditSummary, outcome: &ScanOutcome) {
    summary.files_scanned = outcome.records;
    summary.bytes_hashed = outcome.bytes_hashed;
    summary.unreadable_files = outcome.unreadable_files;
    summary.unreadable_dirs = outcome.unreadable_dirs.len();
    summary.unstatable_entries = outcome.unstatable_entries;
    summary.special_files = outcome.special_files;
    summary.excluded = outcome.excluded;
    summary.non_utf8_names = outcome.non_utf8_names;
    summary.repeated_dirs = outcome.repeated_dirs;
}
