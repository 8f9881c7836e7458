//! Tracked attributes and the attribute mask
//!
//! Every property fsaudit can compare is listed once in [`Attribute::ALL`].
//! The table order is significant: change descriptions are always emitted in
//! this order, independent of how the comparison was evaluated.
//!
//! | flag    | label      | default |
//! |---------|------------|---------|
//! | `hash`  | `Hash`     | on      |
//! | `size`  | `Size`     | on      |
//! | `link`  | `Link`     | on      |
//! | `uid`   | `UID`      | on      |
//! | `gid`   | `GID`      | on      |
//! | `ctime` | `Created`  | on      |
//! | `mtime` | `Modified` | on      |
//! | `atime` | `Accessed` | off     |
//! | `mode`  | `Mode`     | on      |
//! | `xattr` | `Xattrs`   | on      |
//! | `acl`   | `ACL`      | on      |
//! | `dev`   | `Device`   | on      |
//!
//! A flag is switched off by prefixing its name with `no` (`nohash`).
//!
//! ```rust
//! use fsaudit::attributes::AttributeMask;
//!
//! let mask = AttributeMask::from_flags(["--nohash", "atime"]).unwrap();
//! assert!(!mask.contains(AttributeMask::HASH));
//! assert!(mask.contains(AttributeMask::ATIME));
//! assert!(AttributeMask::from_flags(["--colour"]).is_err());
//! ```

use crate::error::{AuditError, Result};
use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Set of attributes that participate in comparison
    ///
    /// Built once at startup and copied by value afterwards; nothing mutates
    /// it once a session is running.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttributeMask: u16 {
        /// Content digest
        const HASH  = 1 << 0;
        /// Byte length
        const SIZE  = 1 << 1;
        /// Symlink target
        const LINK  = 1 << 2;
        /// Owner user id
        const UID   = 1 << 3;
        /// Owner group id
        const GID   = 1 << 4;
        /// Creation time
        const CTIME = 1 << 5;
        /// Modification time
        const MTIME = 1 << 6;
        /// Access time
        const ATIME = 1 << 7;
        /// Permission bits
        const MODE  = 1 << 8;
        /// Extended attribute names
        const XATTR = 1 << 9;
        /// ACL summary
        const ACL   = 1 << 10;
        /// Containing device id
        const DEV   = 1 << 11;
    }
}

/// A single tracked attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    Hash,
    Size,
    Link,
    Uid,
    Gid,
    Ctime,
    Mtime,
    Atime,
    Mode,
    Xattr,
    Acl,
    Dev,
}

impl Attribute {
    /// All attributes in declaration order
    pub const ALL: [Attribute; 12] = [
        Attribute::Hash,
        Attribute::Size,
        Attribute::Link,
        Attribute::Uid,
        Attribute::Gid,
        Attribute::Ctime,
        Attribute::Mtime,
        Attribute::Atime,
        Attribute::Mode,
        Attribute::Xattr,
        Attribute::Acl,
        Attribute::Dev,
    ];

    /// Flag name used on the command line
    pub const fn name(self) -> &'static str {
        match self {
            Attribute::Hash => "hash",
            Attribute::Size => "size",
            Attribute::Link => "link",
            Attribute::Uid => "uid",
            Attribute::Gid => "gid",
            Attribute::Ctime => "ctime",
            Attribute::Mtime => "mtime",
            Attribute::Atime => "atime",
            Attribute::Mode => "mode",
            Attribute::Xattr => "xattr",
            Attribute::Acl => "acl",
            Attribute::Dev => "dev",
        }
    }

    /// Negated flag name (`nohash`)
    pub const fn negated_name(self) -> &'static str {
        match self {
            Attribute::Hash => "nohash",
            Attribute::Size => "nosize",
            Attribute::Link => "nolink",
            Attribute::Uid => "nouid",
            Attribute::Gid => "nogid",
            Attribute::Ctime => "noctime",
            Attribute::Mtime => "nomtime",
            Attribute::Atime => "noatime",
            Attribute::Mode => "nomode",
            Attribute::Xattr => "noxattr",
            Attribute::Acl => "noacl",
            Attribute::Dev => "nodev",
        }
    }

    /// Label used in change descriptions
    pub const fn label(self) -> &'static str {
        match self {
            Attribute::Hash => "Hash",
            Attribute::Size => "Size",
            Attribute::Link => "Link",
            Attribute::Uid => "UID",
            Attribute::Gid => "GID",
            Attribute::Ctime => "Created",
            Attribute::Mtime => "Modified",
            Attribute::Atime => "Accessed",
            Attribute::Mode => "Mode",
            Attribute::Xattr => "Xattrs",
            Attribute::Acl => "ACL",
            Attribute::Dev => "Device",
        }
    }

    /// One-line help text
    pub const fn description(self) -> &'static str {
        match self {
            Attribute::Hash => "content digest changed",
            Attribute::Size => "byte length changed",
            Attribute::Link => "symlink target changed",
            Attribute::Uid => "owner user id changed",
            Attribute::Gid => "owner group id changed",
            Attribute::Ctime => "creation time changed",
            Attribute::Mtime => "modification time changed",
            Attribute::Atime => "access time changed",
            Attribute::Mode => "permission bits changed",
            Attribute::Xattr => "extended attribute name set changed",
            Attribute::Acl => "ACL summary changed",
            Attribute::Dev => "containing-device id changed",
        }
    }

    /// Mask bit for this attribute
    pub const fn flag(self) -> AttributeMask {
        match self {
            Attribute::Hash => AttributeMask::HASH,
            Attribute::Size => AttributeMask::SIZE,
            Attribute::Link => AttributeMask::LINK,
            Attribute::Uid => AttributeMask::UID,
            Attribute::Gid => AttributeMask::GID,
            Attribute::Ctime => AttributeMask::CTIME,
            Attribute::Mtime => AttributeMask::MTIME,
            Attribute::Atime => AttributeMask::ATIME,
            Attribute::Mode => AttributeMask::MODE,
            Attribute::Xattr => AttributeMask::XATTR,
            Attribute::Acl => AttributeMask::ACL,
            Attribute::Dev => AttributeMask::DEV,
        }
    }

    /// Whether the attribute is compared when no flag mentions it
    pub const fn default_on(self) -> bool {
        !matches!(self, Attribute::Atime)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attribute {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        Attribute::ALL
            .iter()
            .copied()
            .find(|a| a.name() == s)
            .ok_or_else(|| AuditError::UnknownFlag(s.to_string()))
    }
}

impl Default for AttributeMask {
    fn default() -> Self {
        Attribute::ALL
            .iter()
            .filter(|a| a.default_on())
            .fold(AttributeMask::empty(), |mask, a| mask | a.flag())
    }
}

impl AttributeMask {
    /// Apply one command-line style flag
    ///
    /// Accepts `name`, `noname`, `--name` and `--noname`. Anything else is an
    /// [`AuditError::UnknownFlag`]; callers must not continue with a flag they
    /// did not understand.
    pub fn apply_flag(&mut self, flag: &str) -> Result<()> {
        let name = flag.strip_prefix("--").unwrap_or(flag);

        if let Ok(attr) = name.parse::<Attribute>() {
            self.insert(attr.flag());
            return Ok(());
        }

        match name.strip_prefix("no").map(str::parse::<Attribute>) {
            Some(Ok(attr)) => {
                self.remove(attr.flag());
                Ok(())
            }
            _ => Err(AuditError::UnknownFlag(flag.to_string())),
        }
    }

    /// Build a mask from the defaults plus a sequence of flags
    ///
    /// Flags are applied in order, so the last mention of an attribute wins.
    pub fn from_flags<I, S>(flags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = AttributeMask::default();
        for flag in flags {
            mask.apply_flag(flag.as_ref())?;
        }
        Ok(mask)
    }

    /// Enabled attributes in declaration order
    pub fn attributes(self) -> impl Iterator<Item = Attribute> {
        Attribute::ALL
            .into_iter()
            .filter(move |a| self.contains(a.flag()))
    }

    /// Comma-separated list of enabled attribute names
    pub fn names(self) -> String {
        self.attributes()
            .map(Attribute::name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the output of [`AttributeMask::names`]
    pub fn from_names(names: &str) -> Result<Self> {
        names
            .split(',')
            .filter(|n| !n.is_empty())
            .try_fold(AttributeMask::empty(), |mask, n| {
                Ok(mask | n.parse::<Attribute>()?.flag())
            })
    }
}
