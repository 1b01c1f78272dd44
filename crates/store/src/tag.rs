use crate::pq::Pq;
use crate::{Context, Error, Result, Rid};
use deck::TagType;
use rusqlite::params;

// Built-in tags are pre-interned by the schema at fixed ids.
pub const TAGID_BGCOLOR: i64 = 1;
pub const TAGID_COMMENT: i64 = 2;
pub const TAGID_USER: i64 = 3;
pub const TAGID_DATE: i64 = 4;
pub const TAGID_HIDDEN: i64 = 5;
pub const TAGID_PRIVATE: i64 = 6;
pub const TAGID_CLUSTER: i64 = 7;
pub const TAGID_BRANCH: i64 = 8;
pub const TAGID_CLOSED: i64 = 9;

impl Context {
    /// Intern a tag name, creating it on demand when `create` is set.
    pub fn tag_id(&mut self, name: &str, create: bool) -> Result<Option<i64>> {
        if name.is_empty() {
            return Err(Error::Range("empty tag name".into()));
        }
        if let Some(id) = self
            .db
            .one_i64("SELECT tagid FROM tag WHERE tagname=?1", [name])?
        {
            return Ok(Some(id));
        }
        if !create {
            return Ok(None);
        }
        self.db
            .exec("INSERT INTO tag(tagname) VALUES(?1)", [name])?;
        Ok(Some(self.db.conn.last_insert_rowid()))
    }

    /// Apply tag `name` to `target`, writing the tagxref row and fanning
    /// out all side effects.
    ///
    /// Idempotent under the mtime rule: if a row for `(name, target)`
    /// with mtime >= `mtime` already exists, nothing changes. By tag:
    /// `bgcolor`/`comment`/`user`/`date` update the denormalized event
    /// row, `private` feeds the private table, `branch` schedules a
    /// deferred leaf recheck. Finally the tag propagates down the DAG
    /// (adds degrade to cancels for propagation purposes).
    ///
    /// Returns the interned tag id.
    pub fn tag_insert(
        &mut self,
        tag_type: TagType,
        name: &str,
        value: Option<&str>,
        src_rid: Rid,
        mtime: Option<f64>,
        target: Rid,
    ) -> Result<i64> {
        let tagid = self
            .tag_id(name, true)?
            .expect("tag_id with create=true yields an id");
        let mtime = match mtime {
            Some(t) if t > 0.0 => t,
            _ => self.db.julian_now()?,
        };

        let newer_exists = self.db.exists(
            "SELECT 1 FROM tagxref WHERE tagid=?1 AND rid=?2 AND mtime>=?3",
            params![tagid, target, mtime],
        )?;
        if newer_exists {
            // A more recent application wins; this one is a no-op.
            return Ok(tagid);
        }

        self.db.exec(
            "REPLACE INTO tagxref(tagid, tagtype, srcid, origid, value, mtime, rid) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?4)",
            params![tagid, tag_type as i64, src_rid, target, value, mtime],
        )?;

        if tagid == TAGID_BRANCH {
            self.leaf_eventually_check(target)?;
        }

        let event_col = match tagid {
            TAGID_BGCOLOR => Some("bgcolor"),
            TAGID_COMMENT => Some("ecomment"),
            TAGID_USER => Some("euser"),
            _ => None,
        };
        if let Some(col) = event_col {
            self.db.exec(
                &format!("UPDATE event SET {col}=?1 WHERE objid=?2"),
                params![value, target],
            )?;
        }
        if tagid == TAGID_PRIVATE {
            self.db
                .exec("INSERT OR IGNORE INTO private(rid) VALUES(?1)", [target])?;
        }
        if tagid == TAGID_DATE {
            self.db.exec(
                "UPDATE event SET mtime=julianday(?1), \
                 omtime=coalesce(omtime, mtime) WHERE objid=?2",
                params![value, target],
            )?;
        }

        let propagate_as = match tag_type {
            // An add never propagates to descendants; for propagation
            // purposes it behaves like a cancel.
            TagType::Add => TagType::Cancel,
            other => other,
        };
        self.tag_propagate(propagate_as, target, tagid, target, value, mtime)?;
        Ok(tagid)
    }

    /// Walk forward from `pid` along primary child edges, propagating (or
    /// cancelling) tag `tagid` on each descendant that has not received a
    /// newer application. The walk is ordered by child mtime through a
    /// priority queue so older descendants settle before younger ones.
    pub fn tag_propagate(
        &mut self,
        tag_type: TagType,
        pid: Rid,
        tagid: i64,
        origid: Rid,
        value: Option<&str>,
        mtime: f64,
    ) -> Result<()> {
        debug_assert!(matches!(tag_type, TagType::Cancel | TagType::Propagating));
        if pid <= 0 || tagid <= 0 {
            return Err(Error::Range(format!(
                "invalid tag propagation ids (pid {pid}, tagid {tagid})"
            )));
        }
        if tag_type == TagType::Propagating && origid <= 0 {
            return Err(Error::Range("propagating tag requires an origin".into()));
        }

        let mut queue = Pq::new();
        queue.insert(pid, 0.0);

        while let Some(pid) = queue.extract() {
            // Children reached through this node that should take the
            // tag: never-tagged ones always do; tagged ones only when
            // their copy is older and was itself propagated (srcid=0).
            let children: Vec<(Rid, f64)> = {
                let mut stmt = self.db.conn.prepare_cached(
                    "SELECT cid, plink.mtime, \
                            coalesce(srcid=0 AND tagxref.mtime<?3, ?4) AS doit \
                     FROM plink LEFT JOIN tagxref \
                          ON cid=rid AND tagid=?2 \
                     WHERE pid=?1 AND isprim",
                )?;
                let rows = stmt.query_map(
                    params![pid, tagid, mtime, tag_type == TagType::Propagating],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, f64>(1)?,
                            r.get::<_, bool>(2)?,
                        ))
                    },
                )?;
                let mut v = Vec::new();
                for row in rows {
                    let (cid, child_mtime, doit) = row?;
                    if doit {
                        v.push((cid, child_mtime));
                    }
                }
                v
            };
            for (cid, child_mtime) in children {
                debug_assert!(cid > 0);
                queue.insert(cid, child_mtime);
                match tag_type {
                    TagType::Propagating => {
                        self.db.exec(
                            "REPLACE INTO tagxref(tagid, tagtype, srcid, origid, value, mtime, rid) \
                             VALUES(?1, 2, 0, ?2, ?3, ?4, ?5)",
                            params![tagid, origid, value, mtime, cid],
                        )?;
                    }
                    _ => {
                        self.db.exec(
                            "DELETE FROM tagxref WHERE tagid=?1 AND rid=?2",
                            params![tagid, cid],
                        )?;
                    }
                }
                if tagid == TAGID_BGCOLOR {
                    let v = if tag_type == TagType::Propagating { value } else { None };
                    self.db.exec(
                        "UPDATE event SET bgcolor=?1 WHERE objid=?2",
                        params![v, cid],
                    )?;
                } else if tagid == TAGID_BRANCH {
                    self.leaf_eventually_check(cid)?;
                }
            }
        }
        Ok(())
    }

    /// Re-run propagation for every tag attached to `pid`, e.g. after new
    /// children appeared beneath it.
    pub fn tag_propagate_all(&mut self, pid: Rid) -> Result<()> {
        if pid <= 0 {
            return Err(Error::Range(format!("invalid RID {pid}")));
        }
        let tags: Vec<(i64, i64, f64, Option<String>, Rid)> = {
            let mut stmt = self.db.conn.prepare_cached(
                "SELECT tagid, tagtype, mtime, value, origid FROM tagxref WHERE rid=?1",
            )?;
            let rows = stmt.query_map([pid], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get(4)?,
                ))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for (tagid, tagtype, mtime, value, origid) in tags {
            let tag_type = match TagType::from_i64(tagtype) {
                Some(TagType::Add) | Some(TagType::Cancel) => TagType::Cancel,
                Some(TagType::Propagating) => TagType::Propagating,
                None => {
                    return Err(Error::Consistency(format!(
                        "tagxref row for rid {pid} carries unknown tagtype {tagtype}"
                    )))
                }
            };
            self.tag_propagate(tag_type, pid, tagid, origid, value.as_deref(), mtime)?;
        }
        Ok(())
    }

    /// The value of tag `tagid` on `rid`, e.g. the branch name.
    pub fn tag_value(&self, tagid: i64, rid: Rid) -> Result<Option<String>> {
        self.db.one_text(
            "SELECT value FROM tagxref WHERE tagid=?1 AND rid=?2 AND tagtype>0",
            params![tagid, rid],
        )
    }

    /// The branch a checkin belongs to, defaulting to "trunk".
    pub fn branch_of(&self, rid: Rid) -> Result<String> {
        Ok(self
            .tag_value(TAGID_BRANCH, rid)?
            .unwrap_or_else(|| "trunk".to_owned()))
    }
}
