//! Baseline storage
//!
//! The scanner and reconciliation pass talk to the baseline only through
//! [`BaselineStore`]. Any engine that offers point lookup by path plus a
//! set difference between stored paths and the paths seen in this run can
//! stand behind it.
//!
//! ## Lifecycle
//!
//! A store handle serves exactly one run and follows one of two sequences:
//!
//! ```text
//! generate: begin_generation -> upsert* -> finish_generation | abort_generation
//! compare:  begin_comparison -> (get | mark_seen)* -> paths_not_seen
//! ```
//!
//! Calling an operation outside its sequence is an
//! [`AuditError::StoreState`] error rather than silent misuse.
//!
//! ## Implementations
//!
//! - [`SqliteBaseline`]: the on-disk baseline. Generation replaces the whole
//!   record set inside one transaction, so a failed or cancelled run leaves
//!   the previous baseline untouched. Comparison opens the file read-only and
//!   keeps the seen set in a `TEMP` table that disappears with the connection.
//! - [`MemoryBaseline`]: a map-backed store with the same semantics, for
//!   tests and for library callers that keep no on-disk state.

use crate::error::{AuditError, Result};
use crate::types::{BaselineMeta, EntryKind, FileRecord, LinkTarget, XattrNames};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persisted schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Persistence seam between the audit core and a baseline engine
pub trait BaselineStore {
    /// Start replacing the stored record set
    fn begin_generation(&mut self, meta: &BaselineMeta) -> Result<()>;

    /// Insert a record, replacing any record with the same path
    fn upsert(&mut self, record: &FileRecord) -> Result<()>;

    /// Make the new record set durable
    fn finish_generation(&mut self) -> Result<()>;

    /// Discard everything written since [`begin_generation`](Self::begin_generation)
    ///
    /// Safe to call when no generation is in progress.
    fn abort_generation(&mut self) -> Result<()>;

    /// Verify the stored baseline and prepare an empty seen set
    ///
    /// Returns the stored provenance, if the baseline carries any.
    fn begin_comparison(&mut self) -> Result<Option<BaselineMeta>>;

    /// Look up the stored record for `path`
    fn get(&self, path: &str) -> Result<Option<FileRecord>>;

    /// Record that `path` was visited in this run
    fn mark_seen(&mut self, path: &str) -> Result<()>;

    /// Stored paths that were not marked seen, sorted
    fn paths_not_seen(&self) -> Result<Vec<String>>;

    /// Number of stored records
    fn record_count(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Generating,
    Comparing,
}

fn expect_phase(actual: Phase, expected: Phase, op: &str) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(AuditError::store_state(format!(
            "{} called while {:?}, expected {:?}",
            op, actual, expected
        )))
    }
}

const CREATE_SCHEMA: &str = "
    DROP TABLE IF EXISTS files;
    DROP TABLE IF EXISTS baseline_meta;
    CREATE TABLE files (
        path     TEXT PRIMARY KEY NOT NULL,
        size     INTEGER,
        sha256   TEXT,
        mode     INTEGER,
        acl      TEXT,
        created  INTEGER,
        modified INTEGER,
        accessed INTEGER,
        xattrs   TEXT,
        uid      INTEGER,
        gid      INTEGER,
        device   INTEGER,
        symlink  TEXT,
        kind     TEXT
    );
    CREATE TABLE baseline_meta (
        id          INTEGER PRIMARY KEY CHECK (id = 1),
        baseline_id TEXT NOT NULL,
        root        TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        host        TEXT NOT NULL,
        version     TEXT NOT NULL,
        mask        TEXT NOT NULL
    );
    PRAGMA user_version = 1;
";

const SELECT_RECORD: &str = "
    SELECT path, size, sha256, mode, acl, created, modified, accessed,
           xattrs, uid, gid, device, symlink, kind
    FROM files WHERE path = ?1";

const UPSERT_RECORD: &str = "
    INSERT OR REPLACE INTO files
        (path, size, sha256, mode, acl, created, modified, accessed,
         xattrs, uid, gid, device, symlink, kind)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

const SELECT_NOT_SEEN: &str = "
    SELECT path FROM files
    WHERE path NOT IN (SELECT path FROM temp.seen)
    ORDER BY path";

/// SQLite-backed baseline file
///
/// Open it with [`SqliteBaseline::open_for_generation`] or
/// [`SqliteBaseline::open_for_comparison`]; the open mode decides which
/// lifecycle the handle accepts.
pub struct SqliteBaseline {
    conn: Connection,
    path: PathBuf,
    read_only: bool,
    phase: Phase,
}

impl SqliteBaseline {
    /// Open or create a baseline file for writing
    ///
    /// # Errors
    ///
    /// - [`AuditError::BaselineOpen`] if the file cannot be opened or created
    pub fn open_for_generation(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| open_error(path, e))?;

        debug!("Opened baseline {:?} for generation", path);
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            read_only: false,
            phase: Phase::Idle,
        })
    }

    /// Open an existing baseline file read-only
    ///
    /// The stored record set cannot be modified through this handle.
    ///
    /// # Errors
    ///
    /// - [`AuditError::BaselineOpen`] if the file does not exist or cannot be opened
    pub fn open_for_comparison(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Err(e) = std::fs::metadata(path) {
            return Err(AuditError::BaselineOpen {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| open_error(path, e))?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

        debug!("Opened baseline {:?} read-only", path);
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            read_only: true,
            phase: Phase::Idle,
        })
    }

    /// Location of the baseline file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let has_files: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'files'",
            [],
            |row| row.get(0),
        )?;

        if !has_files {
            return Err(AuditError::schema(format!(
                "{:?} contains no baseline",
                self.path
            )));
        }
        if version != SCHEMA_VERSION {
            return Err(AuditError::schema(format!(
                "{:?} has schema version {}, expected {}",
                self.path, version, SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    fn read_meta(&self) -> Result<Option<BaselineMeta>> {
        let row = self
            .conn
            .query_row(
                "SELECT baseline_id, root, created_at, host, version, mask
                 FROM baseline_meta WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((baseline_id, root, created_at, host, version, mask)) = row else {
            return Ok(None);
        };

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| AuditError::schema(format!("invalid baseline timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(BaselineMeta {
            baseline_id,
            root,
            created_at,
            host,
            version,
            mask,
        }))
    }
}

fn open_error(path: &Path, e: rusqlite::Error) -> AuditError {
    AuditError::BaselineOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Decode one `files` row
///
/// Missing values decode to neutral defaults and a missing or unknown kind
/// to [`EntryKind::Unknown`], so a damaged row shows up as a change instead
/// of failing the run.
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let int = |idx: usize| -> rusqlite::Result<i64> {
        Ok(row.get::<_, Option<i64>>(idx)?.unwrap_or(0))
    };

    Ok(FileRecord {
        path: row.get(0)?,
        size: int(1)? as u64,
        content_hash: row.get(2)?,
        mode: int(3)? as u32,
        acl: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        created: int(5)?,
        modified: int(6)?,
        accessed: int(7)?,
        xattrs: XattrNames::from_stored(row.get::<_, Option<String>>(8)?.as_deref()),
        uid: int(9)? as u32,
        gid: int(10)? as u32,
        device: int(11)? as u64,
        symlink: LinkTarget::from_stored(row.get::<_, Option<String>>(12)?.as_deref()),
        kind: EntryKind::from_stored(row.get::<_, Option<String>>(13)?.as_deref()),
    })
}

impl BaselineStore for SqliteBaseline {
    fn begin_generation(&mut self, meta: &BaselineMeta) -> Result<()> {
        expect_phase(self.phase, Phase::Idle, "begin_generation")?;
        if self.read_only {
            return Err(AuditError::store_state(
                "baseline was opened read-only for comparison",
            ));
        }

        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.phase = Phase::Generating;

        let setup = self.conn.execute_batch(CREATE_SCHEMA).and_then(|_| {
            self.conn.execute(
                "INSERT INTO baseline_meta
                     (id, baseline_id, root, created_at, host, version, mask)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    meta.baseline_id,
                    meta.root,
                    meta.created_at.to_rfc3339(),
                    meta.host,
                    meta.version,
                    meta.mask
                ],
            )
        });
        if let Err(e) = setup {
            self.abort_generation()?;
            return Err(e.into());
        }

        info!("Generating baseline {} for {}", meta.baseline_id, meta.root);
        Ok(())
    }

    fn upsert(&mut self, record: &FileRecord) -> Result<()> {
        expect_phase(self.phase, Phase::Generating, "upsert")?;

        let mut stmt = self.conn.prepare_cached(UPSERT_RECORD)?;
        stmt.execute(params![
            record.path,
            record.size as i64,
            record.content_hash,
            record.mode as i64,
            record.acl,
            record.created,
            record.modified,
            record.accessed,
            record.xattrs.to_stored(),
            record.uid as i64,
            record.gid as i64,
            record.device as i64,
            record.symlink.to_stored(),
            record.kind.as_str(),
        ])?;
        Ok(())
    }

    fn finish_generation(&mut self) -> Result<()> {
        expect_phase(self.phase, Phase::Generating, "finish_generation")?;
        self.conn.execute_batch("COMMIT;")?;
        self.phase = Phase::Idle;
        debug!("Committed baseline {:?}", self.path);
        Ok(())
    }

    fn abort_generation(&mut self) -> Result<()> {
        if self.phase != Phase::Generating {
            return Ok(());
        }
        self.phase = Phase::Idle;
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;")?;
        }
        info!("Rolled back baseline {:?}", self.path);
        Ok(())
    }

    fn begin_comparison(&mut self) -> Result<Option<BaselineMeta>> {
        expect_phase(self.phase, Phase::Idle, "begin_comparison")?;
        self.check_schema()?;
        self.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS seen (path TEXT PRIMARY KEY NOT NULL);
             DELETE FROM temp.seen;",
        )?;
        self.phase = Phase::Comparing;
        self.read_meta()
    }

    fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn.prepare_cached(SELECT_RECORD)?;
        Ok(stmt.query_row([path], record_from_row).optional()?)
    }

    fn mark_seen(&mut self, path: &str) -> Result<()> {
        expect_phase(self.phase, Phase::Comparing, "mark_seen")?;
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR IGNORE INTO temp.seen (path) VALUES (?1)")?;
        stmt.execute([path])?;
        Ok(())
    }

    fn paths_not_seen(&self) -> Result<Vec<String>> {
        expect_phase(self.phase, Phase::Comparing, "paths_not_seen")?;
        let mut stmt = self.conn.prepare(SELECT_NOT_SEEN)?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    fn record_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// In-memory baseline
///
/// Generation stages records and swaps them in on
/// [`finish_generation`](BaselineStore::finish_generation), matching the
/// all-or-nothing behavior of [`SqliteBaseline`].
#[derive(Debug, Default)]
pub struct MemoryBaseline {
    records: BTreeMap<String, FileRecord>,
    meta: Option<BaselineMeta>,
    staged: BTreeMap<String, FileRecord>,
    staged_meta: Option<BaselineMeta>,
    seen: HashSet<String>,
    phase: Option<Phase>,
}

impl MemoryBaseline {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records in path order
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Stored provenance
    pub fn meta(&self) -> Option<&BaselineMeta> {
        self.meta.as_ref()
    }

    fn phase(&self) -> Phase {
        self.phase.unwrap_or(Phase::Idle)
    }
}

impl BaselineStore for MemoryBaseline {
    fn begin_generation(&mut self, meta: &BaselineMeta) -> Result<()> {
        expect_phase(self.phase(), Phase::Idle, "begin_generation")?;
        self.staged.clear();
        self.staged_meta = Some(meta.clone());
        self.phase = Some(Phase::Generating);
        Ok(())
    }

    fn upsert(&mut self, record: &FileRecord) -> Result<()> {
        expect_phase(self.phase(), Phase::Generating, "upsert")?;
        self.staged.insert(record.path.clone(), record.clone());
        Ok(())
    }

    fn finish_generation(&mut self) -> Result<()> {
        expect_phase(self.phase(), Phase::Generating, "finish_generation")?;
        self.records = std::mem::take(&mut self.staged);
        self.meta = self.staged_meta.take();
        self.phase = Some(Phase::Idle);
        Ok(())
    }

    fn abort_generation(&mut self) -> Result<()> {
        if self.phase() == Phase::Generating {
            self.staged.clear();
            self.staged_meta = None;
            self.phase = Some(Phase::Idle);
        }
        Ok(())
    }

    fn begin_comparison(&mut self) -> Result<Option<BaselineMeta>> {
        expect_phase(self.phase(), Phase::Idle, "begin_comparison")?;
        self.seen.clear();
        self.phase = Some(Phase::Comparing);
        Ok(self.meta.clone())
    }

    fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.records.get(path).cloned())
    }

    fn mark_seen(&mut self, path: &str) -> Result<()> {
        expect_phase(self.phase(), Phase::Comparing, "mark_seen")?;
        self.seen.insert(path.to_string());
        Ok(())
    }

    fn paths_not_seen(&self) -> Result<Vec<String>> {
        expect_phase(self.phase(), Phase::Comparing, "paths_not_seen")?;
        Ok(self
            .records
            .keys()
            .filter(|p| !self.seen.contains(*p))
            .cloned()
            .collect())
    }

    fn record_count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}
