//! Attribute-level comparison of two records
//!
//! This module decides whether a live entry differs from its stored record
//! and describes every difference.
//!
//! ## Overview
//!
//! [`compare`] walks the attribute table in declaration order and, for each
//! attribute enabled in the mask, renders the stored and the live value into
//! their canonical text form. Two renderings that are not byte-identical make
//! one [`AttributeChange`]. The output order therefore never depends on how
//! the comparison was evaluated.
//!
//! A change of entry kind (regular file to symlink or back) is reported
//! first with the `Type` label, whatever the mask says. It is classified from
//! the live entry, so a stored row with a damaged kind also surfaces here.
//!
//! ## Canonical renderings
//!
//! | attribute | rendering |
//! |-----------|-----------|
//! | hash | lowercase hex, `none` when absent |
//! | size, uid, gid, dev, times | decimal |
//! | link | target, `n/a` for non-links, `<unreadable>` |
//! | mode | low 12 bits in octal (`644`) |
//! | xattr | names joined with `,`, `n/a` when unsupported |
//! | acl | placeholder on both sides |
//!
//! ## Examples
//!
//! ```rust,ignore
//! use fsaudit::diff::{compare, format_changes};
//! use fsaudit::attributes::AttributeMask;
//!
//! let changes = compare(&stored, &live, AttributeMask::default());
//! if !changes.is_empty() {
//!     println!("CHANGED: {} ({})", live.path, format_changes(&changes));
//! }
//! ```

use crate::attributes::{Attribute, AttributeMask};
use crate::types::{AttributeChange, FileRecord};

/// Label used for a change of entry kind
pub const TYPE_LABEL: &str = "Type";

/// Separator between change fragments
pub const FRAGMENT_SEPARATOR: &str = ", ";

/// Rendering of an absent content hash
const NO_HASH: &str = "none";

/// Compare a stored record with the live one
///
/// Returns the differences in attribute table order, preceded by a `Type`
/// change when the entry kind differs. An empty result means unchanged.
pub fn compare(stored: &FileRecord, live: &FileRecord, mask: AttributeMask) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    if stored.kind != live.kind {
        changes.push(AttributeChange {
            label: TYPE_LABEL.to_string(),
            old: stored.kind.to_string(),
            new: live.kind.to_string(),
        });
    }

    for attr in mask.attributes() {
        let old = render(attr, stored);
        let new = render(attr, live);
        if old != new {
            changes.push(AttributeChange {
                label: attr.label().to_string(),
                old,
                new,
            });
        }
    }

    changes
}

/// Render one attribute of a record in its canonical form
pub fn render(attr: Attribute, record: &FileRecord) -> String {
    match attr {
        Attribute::Hash => record
            .content_hash
            .clone()
            .unwrap_or_else(|| NO_HASH.to_string()),
        Attribute::Size => record.size.to_string(),
        Attribute::Link => record.symlink.to_stored(),
        Attribute::Uid => record.uid.to_string(),
        Attribute::Gid => record.gid.to_string(),
        Attribute::Ctime => record.created.to_string(),
        Attribute::Mtime => record.modified.to_string(),
        Attribute::Atime => record.accessed.to_string(),
        Attribute::Mode => format!("{:o}", record.permissions()),
        Attribute::Xattr => record.xattrs.to_stored(),
        Attribute::Acl => record.acl.clone(),
        Attribute::Dev => record.device.to_string(),
    }
}

/// Join change fragments into one description
pub fn format_changes(changes: &[AttributeChange]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}
