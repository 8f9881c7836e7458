//! Property-based testing for fsaudit
//!
//! Uses proptest to verify invariants of path normalization, attribute
//! comparison, and whole generate/compare runs across randomly generated
//! inputs.

use ::fsaudit::diff::{compare, format_changes};
use ::fsaudit::paths::normalize;
use ::fsaudit::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tempfile::TempDir;

/// Absolute base paths, with doubled and trailing separators mixed in
fn base_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(("[a-z]{1,6}", "/{1,3}"), 0..5).prop_map(|parts| {
        let mut base = String::from("/");
        for (name, sep) in parts {
            base.push_str(&name);
            base.push_str(&sep);
        }
        base
    })
}

/// Relative paths, possibly with separator runs
fn relative_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(/{1,3}[a-z.]{1,6}){0,4}/?"
}

fn record_strategy() -> impl Strategy<Value = FileRecord> {
    (
        (0u64..10, prop::option::of("[0-9a-f]{64}"), 0u32..0o200000),
        (0i64..4, 0i64..4, 0i64..4),
        (0u32..3, 0u32..3, 0u64..3),
        prop_oneof![
            Just(XattrNames::Unsupported),
            prop::collection::vec("user\\.[a-z]{1,4}", 0..3).prop_map(XattrNames::Names),
        ],
        prop_oneof![
            Just(LinkTarget::NotALink),
            Just(LinkTarget::Unreadable),
            "[a-z/]{1,8}".prop_map(LinkTarget::Target),
        ],
        prop_oneof![Just(EntryKind::File), Just(EntryKind::Symlink), Just(EntryKind::Unknown)],
    )
        .prop_map(
            |((size, content_hash, mode), (created, modified, accessed), (uid, gid, device), xattrs, symlink, kind)| {
                FileRecord {
                    path: "/p".to_string(),
                    size,
                    content_hash,
                    mode,
                    acl: "n/a".to_string(),
                    created,
                    modified,
                    accessed,
                    xattrs,
                    uid,
                    gid,
                    device,
                    symlink,
                    kind,
                }
            },
        )
}

proptest! {
    #[test]
    fn prop_normalize_is_idempotent(base in base_strategy(), rel in relative_strategy()) {
        let once = normalize(&base, &rel);
        prop_assert_eq!(normalize(&base, &once), once);
    }

    #[test]
    fn prop_normalize_has_no_separator_runs(base in base_strategy(), rel in relative_strategy()) {
        let out = normalize(&base, &rel);
        prop_assert!(!out.contains("//"), "{}", out);
        prop_assert!(out.starts_with('/'));
    }

    #[test]
    fn prop_separator_runs_do_not_change_identity(base in base_strategy(), rel in relative_strategy()) {
        let doubled = base.replace('/', "//");
        prop_assert_eq!(normalize(&doubled, &rel), normalize(&base, &rel));
    }

    #[test]
    fn prop_absolute_input_passes_through(base in base_strategy(), rel in relative_strategy()) {
        let absolute = format!("/{}", rel);
        prop_assert_eq!(normalize(&base, &absolute), absolute);
    }

    #[test]
    fn prop_compare_identical_records_is_empty(record in record_strategy(), bits in any::<u16>()) {
        let mask = AttributeMask::from_bits_truncate(bits);
        prop_assert!(compare(&record, &record.clone(), mask).is_empty());
    }

    #[test]
    fn prop_mask_selects_fragments(
        stored in record_strategy(),
        live in record_strategy(),
        bits in any::<u16>(),
    ) {
        let mask = AttributeMask::from_bits_truncate(bits);
        let full = compare(&stored, &live, AttributeMask::all());
        let masked = compare(&stored, &live, mask);

        let expected: Vec<_> = full
            .into_iter()
            .filter(|c| {
                c.label == "Type"
                    || mask.attributes().any(|a| a.label() == c.label)
            })
            .collect();
        prop_assert_eq!(&masked, &expected);

        // Type always leads when present
        if stored.kind != live.kind {
            prop_assert_eq!(masked[0].label.as_str(), "Type");
        }
        prop_assert_eq!(format_changes(&masked).is_empty(), masked.is_empty());
    }

    #[test]
    fn prop_mask_flags_last_wins(flags in prop::collection::vec((0usize..12, any::<bool>()), 0..20)) {
        let names: Vec<String> = flags
            .iter()
            .map(|(i, on)| {
                let attr = Attribute::ALL[*i];
                if *on { attr.name().to_string() } else { attr.negated_name().to_string() }
            })
            .collect();
        let mask = AttributeMask::from_flags(&names).unwrap();

        let mut last: BTreeMap<usize, bool> = BTreeMap::new();
        for (i, on) in &flags {
            last.insert(*i, *on);
        }
        for (i, attr) in Attribute::ALL.iter().enumerate() {
            let expected = last.get(&i).copied().unwrap_or(attr.default_on());
            prop_assert_eq!(mask.contains(attr.flag()), expected, "{}", attr);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_compare_reports_exact_differences(
        files in prop::collection::btree_map("[a-z]{1,6}", prop::collection::vec(any::<u8>(), 0..64), 1..12),
        removals in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        additions in prop::collection::btree_map("new_[a-z]{1,4}", Just(b"x".to_vec()), 0..4),
    ) {
        let tree = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let root = tree.path().to_str().unwrap().to_string();
        let baseline = store.path().join("b.db").to_str().unwrap().to_string();

        for (name, content) in &files {
            fs::write(tree.path().join(name), content).unwrap();
        }

        let mask = AttributeMask::HASH | AttributeMask::SIZE;
        let session = AuditBuilder::new().mask(mask).build(&root, &baseline).unwrap();
        session.run(ScanMode::Generate, &mut CollectingReporter::new()).unwrap();

        let names: Vec<&String> = files.keys().collect();
        let removed: BTreeSet<String> = removals
            .iter()
            .map(|idx| idx.get(&names).to_string())
            .collect();
        for name in &removed {
            fs::remove_file(tree.path().join(name)).unwrap();
        }
        for (name, content) in &additions {
            fs::write(tree.path().join(name), content).unwrap();
        }

        let mut reporter = CollectingReporter::new();
        let summary = session.run(ScanMode::Compare, &mut reporter).unwrap();

        let mut deleted = BTreeSet::new();
        let mut added = BTreeSet::new();
        for event in reporter.events() {
            match event {
                AuditEvent::Deleted { path } => prop_assert!(deleted.insert(path.clone())),
                AuditEvent::New { path } => prop_assert!(added.insert(path.clone())),
                AuditEvent::Changed { path, .. } => prop_assert!(false, "unexpected change {}", path),
            }
        }

        let expected_deleted: BTreeSet<String> =
            removed.iter().map(|n| format!("{}/{}", root, n)).collect();
        let expected_added: BTreeSet<String> =
            additions.keys().map(|n| format!("{}/{}", root, n)).collect();
        prop_assert_eq!(deleted, expected_deleted);
        prop_assert_eq!(added, expected_added);
        prop_assert_eq!(summary.unchanged, files.len() - removed.len());
    }
}
