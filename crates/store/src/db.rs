use crate::{Error, Result, Rid};
use rusqlite::{Connection, OptionalExtension};

/// Connection wrapper carrying the nested-transaction state.
///
/// `begin` calls nest: only the outermost `end` runs COMMIT, and a
/// rollback anywhere inside the stack poisons the whole transaction.
/// Before-commit SQL hooks accumulate during the transaction and run once,
/// in insertion order, right before the physical COMMIT.
pub(crate) struct Db {
    pub conn: Connection,
    begin_count: u32,
    do_rollback: bool,
    before_commit: Vec<String>,
}

impl Db {
    pub fn new(conn: Connection) -> Db {
        Db {
            conn,
            begin_count: 0,
            do_rollback: false,
            before_commit: Vec::new(),
        }
    }

    pub fn transaction_level(&self) -> u32 {
        self.begin_count
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.begin_count == 0 {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
        }
        self.begin_count += 1;
        Ok(())
    }

    /// Queue SQL to run at the outermost commit.
    pub fn before_commit(&mut self, sql: impl Into<String>) {
        self.before_commit.push(sql.into());
    }

    /// Unwind one transaction level. When `rollback` is set (now or by any
    /// nested end), the outermost level issues ROLLBACK instead of COMMIT.
    ///
    /// Returns `Ok(true)` when this end was the outermost one and the
    /// caller should run its own pre-commit work via `finish`; interior
    /// ends return `Ok(false)`.
    pub fn end_begins(&mut self, rollback: bool) -> Result<bool> {
        if self.begin_count == 0 {
            return Err(Error::Misuse("transaction end without begin"));
        }
        if rollback {
            self.do_rollback = true;
        }
        self.begin_count -= 1;
        Ok(self.begin_count == 0)
    }

    /// Run the queued before-commit SQL in insertion order. Any failure
    /// poisons the transaction and is returned; remaining hooks are
    /// dropped.
    pub fn run_before_commit(&mut self) -> Result<()> {
        debug_assert_eq!(self.begin_count, 0);
        let hooks = std::mem::take(&mut self.before_commit);
        if self.do_rollback {
            return Ok(());
        }
        for sql in &hooks {
            if let Err(e) = self.conn.execute_batch(sql) {
                self.do_rollback = true;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Issue the physical COMMIT or ROLLBACK for the outermost
    /// transaction and reset the rollback latch.
    pub fn finish(&mut self) -> Result<()> {
        debug_assert_eq!(self.begin_count, 0);
        self.before_commit.clear();
        let sql = if self.do_rollback { "ROLLBACK" } else { "COMMIT" };
        self.do_rollback = false;
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Force the whole stack down with a ROLLBACK, regardless of depth.
    pub fn rollback_force(&mut self) -> Result<()> {
        self.begin_count = 0;
        self.do_rollback = false;
        self.before_commit.clear();
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Mark the active transaction as doomed without unwinding it yet.
    pub fn poison(&mut self) {
        self.do_rollback = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.do_rollback
    }

    // Small typed query helpers over prepare_cached.

    pub fn one_i64(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<i64>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, |r| r.get(0)).optional()?)
    }

    pub fn one_f64(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<f64>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, |r| r.get(0)).optional()?)
    }

    pub fn one_text(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, |r| r.get(0)).optional()?)
    }

    pub fn exists(&self, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
        Ok(self.one_i64(sql, params)?.is_some())
    }

    pub fn exec(&self, sql: &str, params: impl rusqlite::Params) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    /// All first-column IDs of a query.
    pub fn ids(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Rid>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |r| r.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Julian-day now, from SQLite's clock.
    pub fn julian_now(&self) -> Result<f64> {
        Ok(self
            .one_f64("SELECT julianday('now')", [])?
            .expect("julianday('now') always yields a row"))
    }
}
