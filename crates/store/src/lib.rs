//! Content-addressed artifact store over embedded SQLite.
//!
//! The [`Context`] is the process-scoped handle for one repository: it
//! owns the database connection, the artifact and manifest caches, the
//! deferred leaf-check and verify-at-commit queues, and a small
//! scratch-buffer pool. A context is deliberately single-threaded; open
//! one per thread (the database file serializes writers across
//! processes).

mod bag;
mod branch;
mod buffer;
mod cache;
mod content;
mod crosslink;
mod db;
mod error;
mod hash;
mod leaf;
mod pq;
mod schema;
mod tag;
mod vpath;

pub use bag::IdBag;
pub use branch::BranchOptions;
pub use buffer::{compress, is_compressed, uncompress, uncompressed_size, Buffer, Seek};
pub use content::ContentPut;
pub use error::{Error, Result};
pub use hash::{hash_bytes, hash_matches, HashPolicy};
pub use leaf::LeafMode;
pub use pq::Pq;
pub use tag::{TAGID_BGCOLOR, TAGID_BRANCH, TAGID_CLOSED, TAGID_COMMENT, TAGID_DATE, TAGID_PRIVATE, TAGID_USER};
pub use vpath::{Path, PathStep};

pub use deck::{ArtifactType, Deck, TagType};
pub use delta::VerifyChecksum;

use rusqlite::Connection;
use std::path::Path as FsPath;

/// Repository-local integer id of an artifact. Always positive for real
/// artifacts.
pub type Rid = i64;

/// Tunables fixed at context creation.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Artifact-cache byte ceiling.
    pub cache_size_limit: usize,
    /// Artifact-cache entry ceiling.
    pub cache_entry_limit: u16,
    /// Validate delta checksums when resolving delta chains. The safe
    /// default is on; turning it off still catches structural corruption
    /// (size mismatches) but not bit flips inside literal runs.
    pub delta_checksums: VerifyChecksum,
    /// Hash naming newly stored artifacts.
    pub hash_policy: HashPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            cache_size_limit: 20_000_000,
            cache_entry_limit: 300,
            delta_checksums: VerifyChecksum::Yes,
            hash_policy: HashPolicy::default(),
        }
    }
}

/// Reusable byte-buffer pool. Fixed capacity; more than eight
/// simultaneously outstanding buffers is a programming error.
struct Scratchpads {
    free: Vec<Buffer>,
    outstanding: u8,
}

const SCRATCHPAD_SLOTS: u8 = 8;

impl Scratchpads {
    fn new() -> Scratchpads {
        Scratchpads {
            free: Vec::new(),
            outstanding: 0,
        }
    }

    fn acquire(&mut self) -> Buffer {
        self.outstanding += 1;
        debug_assert!(
            self.outstanding <= SCRATCHPAD_SLOTS,
            "scratchpad pool exhausted: {} outstanding",
            self.outstanding
        );
        self.free.pop().unwrap_or_default()
    }

    fn give_back(&mut self, mut b: Buffer) {
        debug_assert!(self.outstanding > 0, "scratchpad yielded twice");
        self.outstanding = self.outstanding.saturating_sub(1);
        b.reuse();
        if self.free.len() < SCRATCHPAD_SLOTS as usize {
            self.free.push(b);
        }
    }
}

/// One open repository.
pub struct Context {
    pub(crate) db: db::Db,
    pub(crate) acache: cache::Acache,
    pub(crate) mcache: cache::ManifestCache,
    /// RIDs queued for a leaf recheck at the next outermost commit.
    pub(crate) leaf_check: IdBag,
    /// Freshly inserted RIDs whose content is re-read and re-hashed at
    /// the next outermost commit.
    pub(crate) to_verify: IdBag,
    scratch: Scratchpads,
    pub(crate) opts: StoreOptions,
}

impl Context {
    /// Create a new, empty repository at `path`. Any existing file there
    /// is truncated.
    pub fn create(path: impl AsRef<FsPath>) -> Result<Context> {
        Self::create_with(path, StoreOptions::default())
    }

    pub fn create_with(path: impl AsRef<FsPath>, opts: StoreOptions) -> Result<Context> {
        std::fs::write(&path, [])?;
        let conn = Connection::open(path)?;
        let mut cx = Context::from_connection(conn, opts);
        cx.init_schema()?;
        Ok(cx)
    }

    /// Create a throwaway in-memory repository.
    pub fn create_in_memory() -> Result<Context> {
        let conn = Connection::open_in_memory()?;
        let mut cx = Context::from_connection(conn, StoreOptions::default());
        cx.init_schema()?;
        Ok(cx)
    }

    /// Open an existing repository.
    pub fn open(path: impl AsRef<FsPath>) -> Result<Context> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: impl AsRef<FsPath>, opts: StoreOptions) -> Result<Context> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
        )?;
        let cx = Context::from_connection(conn, opts);
        if !cx.db.exists(
            "SELECT 1 FROM sqlite_schema WHERE type='table' AND name='blob'",
            [],
        )? {
            return Err(Error::Misuse("file is not a repository (no blob table)"));
        }
        Ok(cx)
    }

    fn from_connection(conn: Connection, opts: StoreOptions) -> Context {
        Context {
            db: db::Db::new(conn),
            acache: cache::Acache::new(opts.cache_size_limit, opts.cache_entry_limit),
            mcache: cache::ManifestCache::new(),
            leaf_check: IdBag::new(),
            to_verify: IdBag::new(),
            scratch: Scratchpads::new(),
            opts,
        }
    }

    fn init_schema(&mut self) -> Result<()> {
        self.transaction_begin()?;
        let r = self.db.conn.execute_batch(schema::REPO_SCHEMA);
        match r {
            Ok(()) => self.transaction_commit(),
            Err(e) => {
                self.transaction_rollback()?;
                Err(e.into())
            }
        }
    }

    /// Begin a (possibly nested) transaction. Only the outermost commit
    /// writes.
    pub fn transaction_begin(&mut self) -> Result<()> {
        self.db.begin()
    }

    pub fn transaction_commit(&mut self) -> Result<()> {
        self.transaction_end(false)
    }

    /// Roll back. With nesting this poisons the whole stack: the
    /// outermost end will ROLLBACK no matter how it is invoked.
    pub fn transaction_rollback(&mut self) -> Result<()> {
        self.transaction_end(true)
    }

    pub fn transaction_level(&self) -> u32 {
        self.db.transaction_level()
    }

    fn transaction_end(&mut self, rollback: bool) -> Result<()> {
        let outermost = self.db.end_begins(rollback)?;
        if !outermost {
            return Ok(());
        }
        let mut first_err: Option<Error> = None;
        if !rollback && !self.db.is_poisoned() {
            // Before-commit hooks, deferred leaf checks, then content
            // verification, in that order, all ahead of the physical
            // COMMIT. The first failure poisons the transaction.
            if let Err(e) = self.db.run_before_commit() {
                first_err = Some(e);
            }
            if first_err.is_none() {
                if let Err(e) = self.leaf_do_pending_checks() {
                    self.db.poison();
                    first_err = Some(e);
                }
            }
            if first_err.is_none() {
                if let Err(e) = self.verify_at_commit() {
                    self.db.poison();
                    first_err = Some(e);
                }
            }
        }
        self.leaf_check.clear();
        self.to_verify.clear();
        if rollback || first_err.is_some() || self.db.is_poisoned() {
            // Cached content may describe rows this rollback erases.
            self.acache.clear();
            self.mcache.clear();
        }
        match self.db.finish() {
            Ok(()) => first_err.map_or(Ok(()), Err),
            Err(e) => Err(first_err.unwrap_or(e)),
        }
    }

    /// Grab a scratch buffer from the pool; return it with
    /// [`Context::scratchpad_yield`].
    pub fn scratchpad(&mut self) -> Buffer {
        self.scratch.acquire()
    }

    pub fn scratchpad_yield(&mut self, b: Buffer) {
        self.scratch.give_back(b);
    }

    /// Read a config value.
    pub fn config_get(&self, name: &str) -> Result<Option<String>> {
        self.db
            .one_text("SELECT value FROM config WHERE name=?1", [name])
    }

    /// Write a config value, stamping its mtime.
    pub fn config_set(&mut self, name: &str, value: &str) -> Result<()> {
        self.db.exec(
            "REPLACE INTO config(name, value, mtime) VALUES(?1, ?2, strftime('%s','now'))",
            [name, value],
        )?;
        Ok(())
    }

    /// Julian-day now from the database clock.
    pub fn julian_now(&self) -> Result<f64> {
        self.db.julian_now()
    }

    /// The raw database handle, for callers with queries of their own.
    /// Schema tables and columns are a stable surface.
    pub fn connection(&self) -> &Connection {
        &self.db.conn
    }

    /// One-way latch: set once any delta manifest is seen in this
    /// repository. Its presence permits the engine to generate more of
    /// them; it is never cleared.
    pub fn seen_delta_manifest(&self) -> Result<bool> {
        Ok(self.config_get("seen-delta-manifest")?.as_deref() == Some("1"))
    }

    pub(crate) fn note_delta_manifest(&mut self) -> Result<()> {
        self.config_set("seen-delta-manifest", "1")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_transactions_commit_once() {
        let mut cx = Context::create_in_memory().unwrap();
        cx.transaction_begin().unwrap();
        cx.transaction_begin().unwrap();
        cx.config_set("test-key", "v1").unwrap();
        cx.transaction_commit().unwrap();
        assert_eq!(cx.transaction_level(), 1);
        cx.transaction_commit().unwrap();
        assert_eq!(cx.transaction_level(), 0);
        assert_eq!(cx.config_get("test-key").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn inner_rollback_poisons_outer_commit() {
        let mut cx = Context::create_in_memory().unwrap();
        cx.config_set("k", "before").unwrap();
        cx.transaction_begin().unwrap();
        cx.transaction_begin().unwrap();
        cx.config_set("k", "after").unwrap();
        cx.transaction_rollback().unwrap();
        cx.transaction_commit().unwrap();
        assert_eq!(cx.config_get("k").unwrap().as_deref(), Some("before"));
    }

    #[test]
    fn before_commit_hooks_run_in_order() {
        let mut cx = Context::create_in_memory().unwrap();
        cx.transaction_begin().unwrap();
        cx.db.before_commit("REPLACE INTO config(name,value,mtime) VALUES('h','one',0)");
        cx.db.before_commit("UPDATE config SET value='two' WHERE name='h'");
        cx.transaction_commit().unwrap();
        assert_eq!(cx.config_get("h").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn failing_hook_rolls_everything_back() {
        let mut cx = Context::create_in_memory().unwrap();
        cx.transaction_begin().unwrap();
        cx.config_set("k", "dirty").unwrap();
        cx.db.before_commit("INSERT INTO no_such_table VALUES(1)");
        assert!(cx.transaction_commit().is_err());
        assert_eq!(cx.config_get("k").unwrap(), None);
    }

    #[test]
    fn scratchpad_round_robin() {
        let mut cx = Context::create_in_memory().unwrap();
        let mut a = cx.scratchpad();
        a.append(b"junk");
        let b = cx.scratchpad();
        cx.scratchpad_yield(a);
        cx.scratchpad_yield(b);
        let c = cx.scratchpad();
        assert!(c.is_empty(), "recycled scratchpads come back clean");
        cx.scratchpad_yield(c);
    }

    #[test]
    fn open_rejects_non_repository() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-repo.db");
        std::fs::write(&path, b"junk").unwrap();
        assert!(Context::open(&path).is_err());
    }

    #[test]
    fn create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.db");
        {
            let mut cx = Context::create(&path).unwrap();
            cx.config_set("project-name", "demo").unwrap();
        }
        let cx = Context::open(&path).unwrap();
        assert_eq!(cx.config_get("project-name").unwrap().as_deref(), Some("demo"));
    }
}
