//! Deletion detection after a compare walk
//!
//! Once the walk has marked every visited path seen, the stored paths that
//! remain unseen are candidates for deletion. Two kinds of candidates are
//! unverified rather than deleted and are dropped here:
//!
//! - paths below a directory the walk could not open
//! - paths matching an exclude pattern, or lying below a directory that
//!   does (the walk never descends into an excluded directory)
//!
//! Everything else becomes exactly one [`AuditEvent::Deleted`].

use crate::baseline::BaselineStore;
use crate::error::Result;
use crate::paths;
use crate::report::Reporter;
use crate::scanner::{ExcludeSet, ScanOutcome};
use crate::types::AuditEvent;
use tracing::debug;

/// Find deleted paths and report them
///
/// Issues a single [`BaselineStore::paths_not_seen`] query. Returns the
/// reported paths in sorted order.
pub fn reconcile(
    store: &dyn BaselineStore,
    outcome: &ScanOutcome,
    excludes: &ExcludeSet,
    reporter: &mut dyn Reporter,
) -> Result<Vec<String>> {
    let candidates = store.paths_not_seen()?;
    let total = candidates.len();

    let deleted: Vec<String> = candidates
        .into_iter()
        .filter(|path| is_verifiable(path, outcome, excludes))
        .collect();

    if deleted.len() != total {
        debug!(
            "{} unseen paths not reported: unreadable parent or excluded",
            total - deleted.len()
        );
    }

    for path in &deleted {
        reporter.report(&AuditEvent::Deleted { path: path.clone() })?;
    }
    Ok(deleted)
}

fn is_verifiable(path: &str, outcome: &ScanOutcome, excludes: &ExcludeSet) -> bool {
    if excludes.is_match(path) {
        return false;
    }
    if !excludes.is_empty()
        && paths::ancestors_below(path, &outcome.root).any(|dir| excludes.is_match(dir))
    {
        return false;
    }
    !outcome
        .unreadable_dirs
        .iter()
        .any(|dir| paths::is_under(path, dir))
}
