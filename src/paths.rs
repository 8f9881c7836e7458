//! Path normalization
//!
//! Record paths are plain absolute strings. Two spellings of the same location
//! that differ only in repeated separators must produce the same record key,
//! so every path that reaches the store passes through [`normalize`].
//!
//! Normalization is purely lexical: `.` and `..` components are kept, links
//! are not resolved, and malformed input is passed through collapsed rather
//! than rejected.
//!
//! Entry names reach record paths through [`escape_name`], which spells
//! names that are not valid UTF-8 with `\xNN` escapes instead of dropping
//! or lossily replacing them.

use std::borrow::Cow;
use std::ffi::OsStr;

/// Path separator used in record paths
pub const SEPARATOR: char = '/';

/// Escape character in record forms of entry names
pub const ESCAPE: char = '\\';

/// Join `relative` onto `base` and collapse repeated separators
///
/// An absolute `relative` is returned unchanged. Otherwise the result is
/// `base + "/" + relative` with every run of `/` reduced to a single `/`.
/// Applying it twice with the same base gives the same result as applying it
/// once.
///
/// # Example
///
/// ```rust
/// use fsaudit::paths::normalize;
///
/// assert_eq!(normalize("/a//b/", "c"), "/a/b/c");
/// assert_eq!(normalize("/a/b", "c"), "/a/b/c");
/// assert_eq!(normalize("/ignored", "/etc//passwd"), "/etc//passwd");
/// ```
pub fn normalize(base: &str, relative: &str) -> String {
    if relative.starts_with(SEPARATOR) {
        return relative.to_string();
    }

    let mut out = String::with_capacity(base.len() + relative.len() + 1);
    let joined = base
        .chars()
        .chain(std::iter::once(SEPARATOR))
        .chain(relative.chars());

    for c in joined {
        if c == SEPARATOR && out.ends_with(SEPARATOR) {
            continue;
        }
        out.push(c);
    }
    out
}

/// Collapse separator runs in an already absolute path
pub fn collapse(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == SEPARATOR && out.ends_with(SEPARATOR) {
            continue;
        }
        out.push(c);
    }
    out
}

/// Drop a trailing separator, keeping a bare `/` intact
pub fn strip_trailing_separator(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix(SEPARATOR).unwrap_or(path)
    } else {
        path
    }
}

/// Build the record path of a directory entry
pub fn join_entry(dir: &str, name: &str) -> String {
    normalize(dir, name)
}

/// Whether `path` lies strictly below directory `dir`
pub fn is_under(path: &str, dir: &str) -> bool {
    let dir = strip_trailing_separator(dir);
    if dir == "/" {
        return path.len() > 1 && path.starts_with('/');
    }
    path.len() > dir.len() + 1
        && path.starts_with(dir)
        && path.as_bytes()[dir.len()] == b'/'
}

/// Record form of a raw entry name
///
/// Valid UTF-8 is kept with every `\` doubled. Each byte of an invalid
/// sequence becomes `\xNN` in lowercase hex. The mapping is injective, so
/// two distinct names never share a record path, and names without `\` or
/// invalid bytes are borrowed unchanged.
///
/// # Example
///
/// ```rust
/// use fsaudit::paths::escape_bytes;
///
/// assert_eq!(escape_bytes(b"plain.txt"), "plain.txt");
/// assert_eq!(escape_bytes(b"implant\xff"), "implant\\xff");
/// assert_eq!(escape_bytes(b"back\\slash"), "back\\\\slash");
/// ```
pub fn escape_bytes(raw: &[u8]) -> Cow<'_, str> {
    if let Ok(valid) = std::str::from_utf8(raw) {
        if !valid.contains(ESCAPE) {
            return Cow::Borrowed(valid);
        }
    }

    let mut out = String::with_capacity(raw.len() + 8);
    let mut rest = raw;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_escaped(&mut out, valid);
                break;
            }
            Err(e) => {
                let (valid, tail) = rest.split_at(e.valid_up_to());
                push_escaped(&mut out, std::str::from_utf8(valid).unwrap_or_default());
                let bad = e.error_len().unwrap_or(tail.len());
                for byte in &tail[..bad] {
                    out.push_str(&format!("{}x{:02x}", ESCAPE, byte));
                }
                rest = &tail[bad..];
            }
        }
    }
    Cow::Owned(out)
}

/// Record form of an entry name as returned by the OS
pub fn escape_name(name: &OsStr) -> Cow<'_, str> {
    escape_bytes(name.as_encoded_bytes())
}

fn push_escaped(out: &mut String, valid: &str) {
    for c in valid.chars() {
        if c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Ancestors of `path` that lie strictly below `root`, nearest the root first
///
/// An empty `root` places no bound, so every proper ancestor except `/` is
/// yielded.
pub fn ancestors_below<'a>(path: &'a str, root: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    path.match_indices(SEPARATOR)
        .map(move |(i, _)| &path[..i])
        .filter(move |ancestor| !ancestor.is_empty() && (root.is_empty() || is_under(ancestor, root)))
}
