//! Integration tests for fsaudit
//!
//! Generate/compare scenarios against real trees and a real SQLite
//! baseline, including the failure paths a long-running audit meets.

use ::fsaudit::*;
use filetime::FileTime;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::info;

/// Fixed timestamp used to pin modification times across rewrites
const PINNED_MTIME: i64 = 1_600_000_000;

/// Test harness owning a scanned tree and a baseline location
pub struct AuditHarness {
    pub tree: TempDir,
    pub store_dir: TempDir,
    pub root: String,
    pub baseline: String,
}

impl AuditHarness {
    /// Create an empty tree and a baseline path outside it
    pub fn new() -> Self {
        let tree = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let root = tree.path().to_str().unwrap().to_string();
        let baseline = store_dir.path().join("baseline.db").to_str().unwrap().to_string();
        Self {
            tree,
            store_dir,
            root,
            baseline,
        }
    }

    /// Absolute record path of a tree-relative path
    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.root, rel)
    }

    /// Write a file, creating parents, with a pinned modification time
    pub fn write(&self, rel: &str, content: &[u8]) {
        let path = self.tree.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(PINNED_MTIME, 0)).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        let path = self.tree.path().join(rel);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
    }

    pub fn session(&self, mask: AttributeMask) -> AuditSession {
        AuditBuilder::new()
            .mask(mask)
            .build(&self.root, &self.baseline)
            .unwrap()
    }

    pub fn generate(&self, mask: AttributeMask) -> AuditSummary {
        let mut reporter = CollectingReporter::new();
        let summary = self.session(mask).run(ScanMode::Generate, &mut reporter).unwrap();
        assert!(reporter.events().is_empty());
        summary
    }

    pub fn compare(&self, mask: AttributeMask) -> (AuditSummary, Vec<AuditEvent>) {
        let mut reporter = CollectingReporter::new();
        let summary = self.session(mask).run(ScanMode::Compare, &mut reporter).unwrap();
        info!("compare produced {} events", reporter.events().len());
        (summary, reporter.into_events())
    }

    /// Every stored record, in path order
    pub fn stored_records(&self) -> Vec<FileRecord> {
        let mut store = SqliteBaseline::open_for_comparison(&self.baseline).unwrap();
        store.begin_comparison().unwrap();
        store
            .paths_not_seen()
            .unwrap()
            .iter()
            .map(|p| store.get(p).unwrap().unwrap())
            .collect()
    }
}

/// Default attributes minus creation time
///
/// Where birth time is unavailable the status-change time stands in, and
/// every rewrite moves it.
fn stable_mask() -> AttributeMask {
    AttributeMask::default() - AttributeMask::CTIME
}

fn lines(events: &[AuditEvent]) -> BTreeSet<String> {
    events.iter().map(ToString::to_string).collect()
}

#[test]
fn test_new_changed_deleted_scenario() {
    let h = AuditHarness::new();
    h.write("f1", b"hello");
    h.write("f2", b"world");
    h.write("untouched", b"steady");

    let summary = h.generate(stable_mask());
    assert_eq!(summary.files_scanned, 3);
    let records = h.stored_records();
    assert_ne!(records[0].content_hash, records[1].content_hash);

    h.write("f1", b"hello!");
    h.remove("f2");
    h.write("f3", b"new");

    let (summary, events) = h.compare(stable_mask());
    assert_eq!((summary.new, summary.changed, summary.deleted), (1, 1, 1));
    assert_eq!(summary.unchanged, 1);

    let expected: BTreeSet<String> = [
        format!(
            "CHANGED: {} (Hash: {}->{}, Size: 5->6)",
            h.path("f1"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
            "ce06092fb948d9ffac7d1a376e404b26b7575bcc11ee05a4615fef4fec3a308b"
        ),
        format!("NEW: {}", h.path("f3")),
        format!("DELETED: {}", h.path("f2")),
    ]
    .into_iter()
    .collect();
    assert_eq!(lines(&events), expected);
}

#[test]
fn test_unmodified_tree_reports_nothing() {
    let h = AuditHarness::new();
    h.write("a/one", b"1");
    h.write("a/b/two", b"22");
    h.write("three", b"333");

    h.generate(AttributeMask::default());
    for _ in 0..2 {
        let (summary, events) = h.compare(AttributeMask::default());
        assert!(events.is_empty(), "unexpected events: {:?}", events);
        assert_eq!(summary.unchanged, 3);
    }
}

#[test]
fn test_generate_is_idempotent() {
    let h = AuditHarness::new();
    h.write("x", b"alpha");
    h.write("dir/y", b"beta");

    // Reading for the hash may move access times
    let without_atime = |mut records: Vec<FileRecord>| {
        for r in &mut records {
            r.accessed = 0;
        }
        records
    };

    h.generate(AttributeMask::default());
    let first = without_atime(h.stored_records());
    h.generate(AttributeMask::default());
    let second = without_atime(h.stored_records());
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn test_regenerate_accepts_changes() {
    let h = AuditHarness::new();
    h.write("keep", b"k");
    h.write("drop", b"d");
    h.generate(stable_mask());

    h.remove("drop");
    h.write("keep", b"kk");
    h.write("add", b"a");
    let (_, events) = h.compare(stable_mask());
    assert_eq!(events.len(), 3);

    h.generate(stable_mask());
    let (_, events) = h.compare(stable_mask());
    assert!(events.is_empty(), "stale rows survived: {:?}", events);
    assert_eq!(h.stored_records().len(), 2);
}

#[test]
fn test_nohash_nosize_ignores_content_change() {
    let h = AuditHarness::new();
    h.write("doc", b"short");
    let mask = AttributeMask::from_flags(["--nohash", "--nosize", "--noctime"]).unwrap();
    h.generate(mask);

    h.write("doc", b"considerably longer content");
    let (summary, events) = h.compare(mask);
    assert!(events.is_empty(), "unexpected events: {:?}", events);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.bytes_hashed, 0);

    let (_, events) = h.compare(stable_mask());
    assert_eq!(events.len(), 1);
    let text = events[0].to_string();
    assert!(text.contains("Hash: none->"), "{}", text);
    assert!(text.contains("Size: 5->27"), "{}", text);
}

#[test]
fn test_atime_drift_only_reported_when_enabled() {
    let h = AuditHarness::new();
    h.write("watched", b"data");
    let path = h.tree.path().join("watched");
    filetime::set_file_atime(&path, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();

    // No hashing, so nothing reads the file and moves its atime
    let with_atime = (stable_mask() - AttributeMask::HASH) | AttributeMask::ATIME;
    let without_atime = stable_mask() - AttributeMask::HASH;
    h.generate(with_atime);

    filetime::set_file_atime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

    let (_, events) = h.compare(without_atime);
    assert!(events.is_empty(), "atime drift leaked: {:?}", events);

    let (_, events) = h.compare(with_atime);
    assert_eq!(
        lines(&events),
        [format!("CHANGED: {} (Accessed: 2000000000->1000000000)", h.path("watched"))]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_mtime_change_reported() {
    let h = AuditHarness::new();
    h.write("conf", b"x=1");
    h.generate(stable_mask());

    let path = h.tree.path().join("conf");
    filetime::set_file_mtime(&path, FileTime::from_unix_time(PINNED_MTIME + 60, 0)).unwrap();
    let (_, events) = h.compare(stable_mask());
    assert_eq!(
        events[0].to_string(),
        format!(
            "CHANGED: {} (Modified: {}->{})",
            h.path("conf"),
            PINNED_MTIME,
            PINNED_MTIME + 60
        )
    );
}

#[test]
fn test_deletion_completeness() {
    let h = AuditHarness::new();
    let mut all = Vec::new();
    for d in 0..4 {
        for f in 0..5 {
            let rel = format!("dir{}/file{}", d, f);
            h.write(&rel, rel.as_bytes());
            all.push(rel);
        }
    }
    h.generate(stable_mask());

    h.remove("dir2");
    h.remove("dir0/file3");
    h.remove("dir3/file0");

    let (summary, events) = h.compare(stable_mask());
    let deleted: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AuditEvent::Deleted { path } => Some(path.as_str()),
            _ => None,
        })
        .collect();

    let mut expected: Vec<String> = (0..5).map(|f| h.path(&format!("dir2/file{}", f))).collect();
    expected.push(h.path("dir0/file3"));
    expected.push(h.path("dir3/file0"));
    expected.sort();

    assert_eq!(deleted, expected);
    assert_eq!(summary.deleted, 7);
    assert_eq!(summary.unchanged, all.len() - 7);
    assert_eq!(events.len(), 7);
}

#[cfg(unix)]
#[test]
fn test_file_replaced_by_symlink() {
    let h = AuditHarness::new();
    h.write("target", b"t");
    h.write("entry", b"e");
    h.generate(stable_mask());

    h.remove("entry");
    std::os::unix::fs::symlink("target", h.tree.path().join("entry")).unwrap();

    let (_, events) = h.compare(stable_mask());
    assert_eq!(events.len(), 1);
    let text = events[0].to_string();
    assert!(
        text.starts_with(&format!("CHANGED: {} (Type: file->symlink, ", h.path("entry"))),
        "{}",
        text
    );
    assert!(text.contains("Link: n/a->target"), "{}", text);

    let (_, events) = h.compare(AttributeMask::empty());
    assert_eq!(
        events[0].to_string(),
        format!("CHANGED: {} (Type: file->symlink)", h.path("entry"))
    );
}

#[cfg(unix)]
#[test]
fn test_symlink_retarget_reported() {
    let h = AuditHarness::new();
    let link = h.tree.path().join("current");
    std::os::unix::fs::symlink("release-1", &link).unwrap();
    h.generate(AttributeMask::LINK);

    fs::remove_file(&link).unwrap();
    std::os::unix::fs::symlink("release-2", &link).unwrap();
    let (_, events) = h.compare(AttributeMask::LINK);
    assert_eq!(
        events[0].to_string(),
        format!("CHANGED: {} (Link: release-1->release-2)", h.path("current"))
    );
}

#[cfg(unix)]
#[test]
fn test_permission_change_reported_in_octal() {
    use std::os::unix::fs::PermissionsExt;

    let h = AuditHarness::new();
    h.write("script", b"#!/bin/sh\n");
    let path = h.tree.path().join("script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    h.generate(AttributeMask::MODE);

    fs::set_permissions(&path, fs::Permissions::from_mode(0o4755)).unwrap();
    let (_, events) = h.compare(AttributeMask::MODE);
    assert_eq!(
        events[0].to_string(),
        format!("CHANGED: {} (Mode: 644->4755)", h.path("script"))
    );
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_not_reported_deleted() {
    use std::os::unix::fs::PermissionsExt;

    // Permission bits do not restrict root
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let h = AuditHarness::new();
    h.write("locked/secret", b"s");
    h.write("open", b"o");
    h.generate(stable_mask());

    let locked = h.tree.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    let (summary, events) = h.compare(stable_mask());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(events.is_empty(), "unexpected events: {:?}", events);
    assert_eq!(summary.unreadable_dirs, 1);
}

#[test]
fn test_excluded_paths_neither_new_nor_deleted() {
    let h = AuditHarness::new();
    h.write("app.conf", b"c");
    h.write("logs/app.log", b"l");
    h.generate(stable_mask());

    h.remove("logs");
    h.write("cache/tmp.bin", b"t");

    let excludes = vec![format!("{}/logs", h.root), format!("{}/cache", h.root), "*.log".to_string()];
    let session = AuditBuilder::new()
        .mask(stable_mask())
        .exclude_patterns(excludes)
        .build(&h.root, &h.baseline)
        .unwrap();
    let mut reporter = CollectingReporter::new();
    let summary = session.run(ScanMode::Compare, &mut reporter).unwrap();

    assert!(reporter.events().is_empty(), "{:?}", reporter.events());
    assert_eq!(summary.excluded, 1);
}

#[test]
fn test_json_reporter_end_to_end() {
    let h = AuditHarness::new();
    h.write("a", b"1");
    h.generate(stable_mask());
    h.write("a", b"22");

    let mut reporter = JsonReporter::new(Vec::new());
    h.session(stable_mask())
        .run(ScanMode::Compare, &mut reporter)
        .unwrap();

    let out = String::from_utf8(reporter.into_inner()).unwrap();
    let event: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(event["status"], "CHANGED");
    assert_eq!(event["path"], h.path("a"));
    assert_eq!(event["changes"][1]["label"], "Size");
    assert_eq!(event["changes"][1]["old"], "1");
    assert_eq!(event["changes"][1]["new"], "2");
}

#[test]
fn test_baseline_records_provenance() {
    let h = AuditHarness::new();
    h.write("a", b"1");
    let mask = AttributeMask::from_flags(["nouid", "atime"]).unwrap();
    h.generate(mask);

    let mut store = SqliteBaseline::open_for_comparison(&h.baseline).unwrap();
    let meta = store.begin_comparison().unwrap().unwrap();
    assert_eq!(meta.root, h.root);
    assert_eq!(meta.attribute_mask(), Some(mask));
    assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
    assert!(Path::new(&h.baseline).exists());
}

#[test]
fn test_excluded_directory_children_not_deleted() {
    let h = AuditHarness::new();
    h.write("cache/blob", b"b");
    h.write("cache/nested/chunk", b"c");
    h.write("keep", b"k");
    h.generate(stable_mask());

    let session = AuditBuilder::new()
        .mask(stable_mask())
        .exclude_patterns(vec![h.path("cache")])
        .build(&h.root, &h.baseline)
        .unwrap();
    let mut reporter = CollectingReporter::new();
    let summary = session.run(ScanMode::Compare, &mut reporter).unwrap();

    assert!(reporter.events().is_empty(), "{:?}", reporter.events());
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.excluded, 1);
}

#[cfg(unix)]
#[test]
fn test_non_utf8_name_reported_new() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let h = AuditHarness::new();
    h.write("bin/ls", b"elf");
    h.generate(stable_mask());

    let implant = h.tree.path().join("bin").join(OsStr::from_bytes(b"implant\xff"));
    if fs::write(&implant, b"payload").is_err() {
        // Filesystem rejects non-UTF-8 names
        return;
    }

    let (summary, events) = h.compare(stable_mask());
    assert_eq!(
        events,
        vec![AuditEvent::New { path: h.path("bin/implant\\xff") }]
    );
    assert_eq!(summary.non_utf8_names, 1);

    // Once recorded, the escaped path matches on the next run
    h.generate(stable_mask());
    fs::write(&implant, b"payload, altered").unwrap();
    let (_, events) = h.compare(stable_mask());
    assert_eq!(events.len(), 1);
    assert!(
        events[0].to_string().starts_with(&format!("CHANGED: {} (Hash: ", h.path("bin/implant\\xff"))),
        "{}",
        events[0]
    );
}

#[test]
fn test_added_xattr_reported_changed() {
    let h = AuditHarness::new();
    h.write("tagged", b"t");
    h.generate(stable_mask());
    let before = h.stored_records()[0].xattrs.clone();

    if !xattr::SUPPORTED_PLATFORM || xattr::set(h.tree.path().join("tagged"), "user.a", b"1").is_err() {
        // No user xattrs on this filesystem
        return;
    }

    let (summary, events) = h.compare(stable_mask());
    assert_eq!(summary.changed, 1);
    let line = events[0].to_string();
    assert!(line.starts_with(&format!("CHANGED: {} (", h.path("tagged"))), "{}", line);
    match &before {
        XattrNames::Names(names) if names.is_empty() => {
            assert!(line.contains("Xattrs: ->user.a"), "{}", line);
        }
        // Security labels applied by the system come first
        _ => assert!(line.contains("Xattrs: ") && line.contains("user.a"), "{}", line),
    }
}
