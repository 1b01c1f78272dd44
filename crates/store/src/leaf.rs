use crate::tag::TAGID_CLOSED;
use crate::{Context, Error, Result, Rid};

/// Filter for [`Context::compute_leaves`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeafMode {
    #[default]
    All,
    /// Exclude leaves carrying the `closed` tag.
    OpenOnly,
    /// Only leaves carrying the `closed` tag.
    ClosedOnly,
}

/// A leaf is a checkin with no primary child *within its own branch*;
/// branch membership comes from the propagated `branch` tag, defaulting
/// to "trunk".
const IS_LEAF_SQL: &str = "SELECT 1 FROM plink \
     WHERE pid=?1 \
     AND coalesce((SELECT value FROM tagxref \
                    WHERE tagid=8 AND rid=?1), 'trunk') \
       = coalesce((SELECT value FROM tagxref \
                    WHERE tagid=8 AND rid=plink.cid), 'trunk')";

impl Context {
    /// Is `rid` currently a leaf?
    pub fn is_leaf(&self, rid: Rid) -> Result<bool> {
        if rid <= 0 {
            return Err(Error::Range(format!("invalid RID {rid}")));
        }
        Ok(!self.db.exists(IS_LEAF_SQL, [rid])?)
    }

    /// Number of children of `rid` that stay on its branch (all primary
    /// children plus same-branch merge children).
    pub fn count_nonbranch_children(&self, rid: Rid) -> Result<i64> {
        Ok(self
            .db
            .one_i64(
                "SELECT count(*) FROM plink \
                 WHERE pid=?1 AND isprim \
                 AND coalesce((SELECT value FROM tagxref \
                               WHERE tagid=8 AND rid=plink.pid), 'trunk') \
                   = coalesce((SELECT value FROM tagxref \
                               WHERE tagid=8 AND rid=plink.cid), 'trunk')",
                [rid],
            )?
            .unwrap_or(0))
    }

    /// Insert or remove `rid` from the leaf table to match reality.
    pub fn leaf_check(&mut self, rid: Rid) -> Result<()> {
        if self.is_leaf(rid)? {
            self.db
                .exec("INSERT OR IGNORE INTO leaf VALUES(?1)", [rid])?;
        } else {
            self.db.exec("DELETE FROM leaf WHERE rid=?1", [rid])?;
        }
        Ok(())
    }

    /// Queue `rid` and its parents for a leaf recheck at the next
    /// outermost commit.
    pub fn leaf_eventually_check(&mut self, rid: Rid) -> Result<()> {
        if rid <= 0 {
            return Err(Error::Range(format!("invalid RID {rid}")));
        }
        let parents = self
            .db
            .ids("SELECT pid FROM plink WHERE cid=?1 AND pid>0", [rid])?;
        self.leaf_check.insert(rid);
        for pid in parents {
            self.leaf_check.insert(pid);
        }
        Ok(())
    }

    /// Drain the deferred leaf-check queue. Runs at the outermost commit.
    pub(crate) fn leaf_do_pending_checks(&mut self) -> Result<()> {
        let pending: Vec<Rid> = self.leaf_check.iter().collect();
        self.leaf_check.clear();
        for rid in pending {
            self.leaf_check(rid)?;
        }
        Ok(())
    }

    /// Recompute the whole leaf table from first principles.
    pub fn leaves_rebuild(&mut self) -> Result<()> {
        self.db.conn.execute_batch(
            "DELETE FROM leaf;
             INSERT OR IGNORE INTO leaf
               SELECT cid FROM plink
               EXCEPT
               SELECT pid FROM plink
                WHERE coalesce((SELECT value FROM tagxref
                                WHERE tagid=8 AND rid=plink.pid), 'trunk')
                    = coalesce((SELECT value FROM tagxref
                                WHERE tagid=8 AND rid=plink.cid), 'trunk');",
        )?;
        Ok(())
    }

    /// All rids currently in the leaf table, ascending.
    pub fn leaves(&self) -> Result<Vec<Rid>> {
        self.db.ids("SELECT rid FROM leaf ORDER BY rid", [])
    }

    /// Compute the leaves of the subtree descending from `base` into the
    /// TEMP `leaves` table (the whole leaf set when `base` is zero or
    /// negative).
    ///
    /// The descent treats a merge child as a continuation of its parent
    /// only when both carry the same branch tag; children that open a new
    /// branch do not keep their parent from being a leaf.
    pub fn compute_leaves(&mut self, base: Rid, mode: LeafMode) -> Result<()> {
        self.db.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS leaves(rid INTEGER PRIMARY KEY);
             DELETE FROM leaves;",
        )?;
        if base <= 0 {
            self.db
                .conn
                .execute_batch("INSERT INTO leaves SELECT leaf.rid FROM leaf")?;
        } else {
            let mut seen = crate::IdBag::new();
            let mut pending = crate::IdBag::new();
            pending.insert(base);
            while let Some(rid) = pending.first() {
                pending.remove(rid);
                // Children that continue this checkin's line: primary
                // ones, plus merges that stay on the same branch.
                let children: Vec<Rid> = self.db.ids(
                    "SELECT cid FROM plink \
                     WHERE pid=?1 \
                     AND (isprim \
                          OR coalesce((SELECT value FROM tagxref \
                                       WHERE tagid=8 AND rid=plink.pid), 'trunk') \
                            = coalesce((SELECT value FROM tagxref \
                                        WHERE tagid=8 AND rid=plink.cid), 'trunk'))",
                    [rid],
                )?;
                let mut continuing = 0u32;
                for cid in children {
                    seen.insert(cid);
                    pending.insert(cid);
                    let starts_branch = self.db.exists(
                        "SELECT 1 FROM tagxref \
                         WHERE rid=?1 AND tagid=8 AND tagtype=2 AND srcid>0",
                        [cid],
                    )?;
                    if !starts_branch {
                        continuing += 1;
                    }
                }
                if continuing == 0 && !self.is_leaf(rid)? {
                    continuing += 1;
                }
                if continuing == 0 {
                    self.db
                        .exec("INSERT OR IGNORE INTO leaves VALUES(?1)", [rid])?;
                }
            }
        }
        match mode {
            LeafMode::All => {}
            LeafMode::OpenOnly => {
                self.db.exec(
                    "DELETE FROM leaves WHERE rid IN \
                     (SELECT leaves.rid FROM leaves, tagxref \
                       WHERE tagxref.rid=leaves.rid \
                         AND tagxref.tagid=?1 AND tagxref.tagtype>0)",
                    [TAGID_CLOSED],
                )?;
            }
            LeafMode::ClosedOnly => {
                self.db.exec(
                    "DELETE FROM leaves WHERE rid NOT IN \
                     (SELECT leaves.rid FROM leaves, tagxref \
                       WHERE tagxref.rid=leaves.rid \
                         AND tagxref.tagid=?1 AND tagxref.tagtype>0)",
                    [TAGID_CLOSED],
                )?;
            }
        }
        Ok(())
    }

    pub fn computed_leaves(&self) -> Result<Vec<Rid>> {
        self.db.ids("SELECT rid FROM leaves ORDER BY rid", [])
    }

    pub fn computed_leaves_count(&self) -> Result<i64> {
        Ok(self
            .db
            .one_i64("SELECT count(*) FROM leaves", [])?
            .unwrap_or(0))
    }

    /// Most recently committed computed leaf, by event time.
    pub fn computed_leaves_latest(&self) -> Result<Option<Rid>> {
        self.db.one_i64(
            "SELECT rid FROM leaves, event \
             WHERE event.objid=leaves.rid \
             ORDER BY event.mtime DESC",
            [],
        )
    }

    pub fn computed_leaves_cleanup(&mut self) -> Result<()> {
        self.db
            .conn
            .execute_batch("DROP TABLE IF EXISTS leaves")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rusqlite::params;

    fn seed_checkin(cx: &mut Context, rid: Rid) {
        cx.db
            .exec(
                "INSERT OR IGNORE INTO blob(rid, uuid, size, content) \
                 VALUES(?1, printf('%040d', ?1), 0, zeroblob(0))",
                [rid],
            )
            .unwrap();
    }

    fn seed_edge(cx: &mut Context, pid: Rid, cid: Rid, isprim: bool) {
        seed_checkin(cx, pid);
        seed_checkin(cx, cid);
        cx.db
            .exec(
                "INSERT INTO plink(pid, cid, isprim, mtime) VALUES(?1, ?2, ?3, ?2)",
                params![pid, cid, isprim],
            )
            .unwrap();
    }

    fn set_branch(cx: &mut Context, rid: Rid, branch: &str) {
        cx.db
            .exec(
                "REPLACE INTO tagxref(tagid, tagtype, srcid, origid, value, mtime, rid) \
                 VALUES(8, 2, ?1, ?1, ?2, 1.0, ?1)",
                params![rid, branch],
            )
            .unwrap();
    }

    #[test]
    fn tip_is_leaf_parent_is_not() {
        let mut cx = Context::create_in_memory().unwrap();
        seed_edge(&mut cx, 1, 2, true);
        assert!(!cx.is_leaf(1).unwrap());
        assert!(cx.is_leaf(2).unwrap());
        cx.leaf_check(1).unwrap();
        cx.leaf_check(2).unwrap();
        assert_eq!(cx.leaves().unwrap(), vec![2]);
    }

    #[test]
    fn branch_child_leaves_parent_a_leaf() {
        let mut cx = Context::create_in_memory().unwrap();
        seed_edge(&mut cx, 1, 2, true);
        set_branch(&mut cx, 2, "feature");
        // 2 is on another branch, so 1 keeps its leaf status on trunk.
        assert!(cx.is_leaf(1).unwrap());
        assert!(cx.is_leaf(2).unwrap());
        cx.leaves_rebuild().unwrap();
        assert_eq!(cx.leaves().unwrap(), vec![1, 2]);
    }

    #[test]
    fn eventually_check_defers_to_commit() {
        let mut cx = Context::create_in_memory().unwrap();
        cx.transaction_begin().unwrap();
        seed_edge(&mut cx, 1, 2, true);
        cx.leaf_eventually_check(2).unwrap();
        assert_eq!(cx.leaves().unwrap(), Vec::<Rid>::new());
        cx.transaction_commit().unwrap();
        assert_eq!(cx.leaves().unwrap(), vec![2]);
    }

    #[test]
    fn compute_leaves_descends_and_filters() {
        let mut cx = Context::create_in_memory().unwrap();
        // 1 -> 2 -> 3 and 2 -> 4 (branch "side"): leaves of subtree(1)
        // are 3 and 4, but 4 starts a branch so only its own subtree
        // counts it.
        seed_edge(&mut cx, 1, 2, true);
        seed_edge(&mut cx, 2, 3, true);
        seed_edge(&mut cx, 2, 4, true);
        set_branch(&mut cx, 4, "side");
        cx.leaves_rebuild().unwrap();

        cx.compute_leaves(1, LeafMode::All).unwrap();
        assert_eq!(cx.computed_leaves().unwrap(), vec![3, 4]);

        // Close 4 and filter.
        cx.db
            .exec(
                "REPLACE INTO tagxref(tagid, tagtype, srcid, origid, value, mtime, rid) \
                 VALUES(9, 1, 4, 4, NULL, 2.0, 4)",
                [],
            )
            .unwrap();
        cx.compute_leaves(1, LeafMode::OpenOnly).unwrap();
        assert_eq!(cx.computed_leaves().unwrap(), vec![3]);
        cx.compute_leaves(1, LeafMode::ClosedOnly).unwrap();
        assert_eq!(cx.computed_leaves().unwrap(), vec![4]);
        cx.computed_leaves_cleanup().unwrap();
    }
}
