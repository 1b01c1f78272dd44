//! Crosslinking: projecting a structural artifact into the relational
//! tables (`plink`, `mlink`, `filename`, `tagxref`, `event`, and the
//! per-kind side tables) so queries never re-parse artifacts.

use crate::content::ContentPut;
use crate::hash::hash_bytes;
use crate::{Context, Error, Result, Rid};
use deck::{ArtifactType, Deck, FilePerm, TagType};
use rusqlite::params;

fn perm_int(perm: FilePerm) -> i64 {
    match perm {
        FilePerm::Regular => 0,
        FilePerm::Exe => 1,
        FilePerm::Link => 2,
    }
}

/// Resolved view of one file entry while diffing two file lists.
#[derive(Debug, Clone)]
struct FileSlot {
    name: String,
    uuid: String,
    perm: FilePerm,
    prior_name: Option<String>,
}

impl Context {
    /// Serialize `d`, store it, and crosslink it, all in one transaction.
    /// The deck's `rid` and `uuid` are filled in. Returns the RID.
    pub fn save_deck(&mut self, d: &mut Deck, is_private: bool) -> Result<Rid> {
        let bytes = d.serialize()?;
        let uuid = hash_bytes(self.opts.hash_policy, &bytes);

        self.transaction_begin()?;
        let r = (|| -> Result<Rid> {
            let rid = self.content_put_ex(ContentPut {
                bytes: &bytes,
                known_hash: Some(&uuid),
                is_private,
                ..Default::default()
            })?;
            d.rid = rid;
            d.uuid = Some(uuid.clone());
            self.crosslink(d)?;
            Ok(rid)
        })();
        match r {
            Ok(rid) => {
                self.transaction_commit()?;
                Ok(rid)
            }
            Err(e) => {
                self.transaction_rollback()?;
                Err(e)
            }
        }
    }

    /// Open a bulk-crosslink batch: everything until
    /// [`Context::crosslink_end`] commits atomically and deferred work
    /// (leaf checks, verification) runs once at the end.
    pub fn crosslink_begin(&mut self) -> Result<()> {
        self.transaction_begin()
    }

    pub fn crosslink_end(&mut self) -> Result<()> {
        self.transaction_commit()
    }

    /// Update every derived table for artifact `d`, which must already be
    /// stored and carry its `rid`.
    pub fn crosslink(&mut self, d: &Deck) -> Result<()> {
        if d.rid <= 0 {
            return Err(Error::Misuse("crosslink requires a stored deck with a rid"));
        }
        tracing::debug!(rid = d.rid, ty = ?d.ty, "crosslinking artifact");
        self.transaction_begin()?;
        let r = match d.ty {
            ArtifactType::Checkin => self.crosslink_checkin(d),
            ArtifactType::Control => self.crosslink_control(d),
            ArtifactType::Wiki => self.crosslink_wiki(d),
            ArtifactType::Technote => self.crosslink_technote(d),
            ArtifactType::ForumPost => self.crosslink_forum(d),
            ArtifactType::TicketChange => self.crosslink_ticket(d),
            ArtifactType::Cluster => self.crosslink_cluster(d),
            ArtifactType::Attachment => self.crosslink_attachment(d),
        };
        match r {
            Ok(()) => self.transaction_commit(),
            Err(e) => {
                self.transaction_rollback()?;
                Err(e)
            }
        }
    }

    /// RID for `uuid`, registering a phantom when the artifact has not
    /// arrived yet.
    fn rid_or_phantom(&mut self, uuid: &str, is_private: bool) -> Result<Rid> {
        match self.rid_for_hash(uuid)? {
            Some(rid) => Ok(rid),
            None => self.content_new_phantom(uuid, is_private),
        }
    }

    fn filename_id(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self
            .db
            .one_i64("SELECT fnid FROM filename WHERE name=?1", [name])?
        {
            return Ok(id);
        }
        self.db
            .exec("INSERT INTO filename(name) VALUES(?1)", [name])?;
        Ok(self.db.conn.last_insert_rowid())
    }

    /// The effective (baseline-merged) file list of a checkin deck.
    fn effective_files(&mut self, d: &Deck) -> Result<Vec<FileSlot>> {
        let baseline = match &d.b {
            Some(b_uuid) => {
                let b_rid = self.rid_or_phantom(b_uuid, false)?;
                match self.deck_take(b_rid) {
                    Ok(b) => Some(b),
                    // An absent or phantom baseline: fall back to the
                    // delta's own cards; rebuild repairs mlink later.
                    Err(Error::Phantom(_)) | Err(Error::NotFound) => None,
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };
        let out = deck::files(d, baseline.as_ref())
            .map(|fc| FileSlot {
                name: fc.name.clone(),
                uuid: fc.uuid.clone().expect("merged file lists carry content hashes"),
                perm: fc.perm,
                prior_name: fc.prior_name.clone(),
            })
            .collect();
        if let Some(b) = baseline {
            self.deck_give(b);
        }
        Ok(out)
    }

    fn crosslink_checkin(&mut self, d: &Deck) -> Result<()> {
        let mtime = d.d.ok_or(Error::Misuse("checkin deck lacks its D card"))?;
        let rid = d.rid;
        let is_private = self.content_is_private(rid)?;
        if d.b.is_some() {
            // One-way latch: this repository now contains delta
            // manifests, so the engine may produce more of them.
            self.note_delta_manifest()?;
        }

        // Parent links, first parent primary.
        let mut parent_rids = Vec::new();
        for (i, p_uuid) in d.p.iter().enumerate() {
            let pid = self.rid_or_phantom(p_uuid, is_private)?;
            parent_rids.push(pid);
            self.db.exec(
                "INSERT OR IGNORE INTO plink(pid, cid, isprim, mtime) VALUES(?1, ?2, ?3, ?4)",
                params![pid, rid, i == 0, mtime],
            )?;
        }

        // Timeline row. euser/ecomment stay NULL until a tag overrides.
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES('ci', ?1, ?2, ?3, ?4)",
            params![mtime, rid, d.u, d.c],
        )?;

        self.mlink_checkin(d, parent_rids.first().copied(), is_private)?;

        // The checkin's own tags (T cards with `*` target apply to self).
        self.apply_tag_cards(d, mtime)?;

        // Let the primary parent's propagating tags flow down to the new
        // child; direct T-card applications above carry a newer mtime and
        // win where they overlap.
        if let Some(&pid) = parent_rids.first() {
            self.tag_propagate_all(pid)?;
        }

        self.leaf_eventually_check(rid)?;
        Ok(())
    }

    /// Populate `mlink` and `filename` from the file-list diff between
    /// this checkin and its primary parent.
    fn mlink_checkin(&mut self, d: &Deck, parent: Option<Rid>, is_private: bool) -> Result<()> {
        let rid = d.rid;
        let child_files = self.effective_files(d)?;
        let parent_files = match parent {
            Some(pid) => match self.deck_take(pid) {
                Ok(p) => {
                    let files = self.effective_files(&p)?;
                    self.deck_give(p);
                    files
                }
                // Phantom or opaque parent: treat as empty; a rebuild
                // would repair these rows once the parent arrives.
                Err(Error::Phantom(_)) | Err(Error::NotFound) | Err(Error::Artifact(_)) => {
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
            None => Vec::new(),
        };

        // Names consumed as rename sources do not also count as deletes.
        let renamed_from: Vec<&str> = child_files
            .iter()
            .filter_map(|f| f.prior_name.as_deref())
            .collect();

        let write = |cx: &mut Context,
                         fid_uuid: Option<&str>,
                         pid_uuid: Option<&str>,
                         name: &str,
                         prior: Option<&str>,
                         perm: FilePerm|
         -> Result<()> {
            let fid = match fid_uuid {
                Some(u) => cx.rid_or_phantom(u, is_private)?,
                None => 0,
            };
            let pid = match pid_uuid {
                Some(u) => cx.rid_or_phantom(u, is_private)?,
                None => 0,
            };
            let fnid = cx.filename_id(name)?;
            let pfnid = match prior {
                Some(p) => cx.filename_id(p)?,
                None => 0,
            };
            cx.db.exec(
                "INSERT INTO mlink(mid, fid, pid, fnid, pfnid, mperm) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![rid, fid, pid, fnid, pfnid, perm_int(perm)],
            )?;
            Ok(())
        };

        let mut ci = 0;
        let mut pi = 0;
        loop {
            match (child_files.get(ci), parent_files.get(pi)) {
                (None, None) => break,
                (Some(c), None) => {
                    let prior = c.prior_name.as_deref();
                    let prior_uuid = prior
                        .and_then(|p| parent_files.iter().find(|f| f.name == p))
                        .map(|f| f.uuid.as_str());
                    write(self, Some(&c.uuid), prior_uuid, &c.name, prior, c.perm)?;
                    ci += 1;
                }
                (None, Some(p)) => {
                    if !renamed_from.contains(&p.name.as_str()) {
                        write(self, None, Some(&p.uuid), &p.name, None, FilePerm::Regular)?;
                    }
                    pi += 1;
                }
                (Some(c), Some(p)) => match c.name.cmp(&p.name) {
                    std::cmp::Ordering::Less => {
                        let prior = c.prior_name.as_deref();
                        let prior_uuid = prior
                            .and_then(|pn| parent_files.iter().find(|f| f.name == pn))
                            .map(|f| f.uuid.as_str());
                        write(self, Some(&c.uuid), prior_uuid, &c.name, prior, c.perm)?;
                        ci += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        if !renamed_from.contains(&p.name.as_str()) {
                            write(self, None, Some(&p.uuid), &p.name, None, FilePerm::Regular)?;
                        }
                        pi += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        if c.uuid != p.uuid || c.perm != p.perm {
                            write(self, Some(&c.uuid), Some(&p.uuid), &c.name, None, c.perm)?;
                        }
                        ci += 1;
                        pi += 1;
                    }
                },
            }
        }
        Ok(())
    }

    /// Apply a deck's T cards through the tag engine. A missing target
    /// hash means "the containing artifact".
    fn apply_tag_cards(&mut self, d: &Deck, mtime: f64) -> Result<()> {
        for t in &d.t {
            let target = match &t.uuid {
                Some(u) => self.rid_or_phantom(u, false)?,
                None => d.rid,
            };
            self.tag_insert(
                t.tag_type,
                &t.name,
                t.value.as_deref(),
                d.rid,
                Some(mtime),
                target,
            )?;
        }
        Ok(())
    }

    fn crosslink_control(&mut self, d: &Deck) -> Result<()> {
        let mtime = d.d.ok_or(Error::Misuse("control deck lacks its D card"))?;
        self.apply_tag_cards(d, mtime)?;
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES('g', ?1, ?2, ?3, NULL)",
            params![mtime, d.rid, d.u],
        )?;
        Ok(())
    }

    fn crosslink_wiki(&mut self, d: &Deck) -> Result<()> {
        let mtime = d.d.ok_or(Error::Misuse("wiki deck lacks its D card"))?;
        let name = d.l.as_deref().expect("validated wiki deck has an L card");
        let tag = format!("wiki-{name}");
        self.tag_insert(TagType::Add, &tag, None, d.rid, Some(mtime), d.rid)?;
        let comment = if d.p.is_empty() {
            format!("Added wiki page [{name}]")
        } else if d.w.as_deref().unwrap_or("").is_empty() {
            format!("Deleted wiki page [{name}]")
        } else {
            format!("Changes to wiki page [{name}]")
        };
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES('w', ?1, ?2, ?3, ?4)",
            params![mtime, d.rid, d.u, comment],
        )?;
        Ok(())
    }

    fn crosslink_technote(&mut self, d: &Deck) -> Result<()> {
        let (etime, id) = d.e.as_ref().expect("validated technote deck has an E card");
        let tag = format!("event-{id}");
        let mtime = d.d.expect("validated technote deck has a D card");
        self.tag_insert(TagType::Add, &tag, None, d.rid, Some(mtime), d.rid)?;
        self.apply_tag_cards(d, mtime)?;
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES('e', ?1, ?2, ?3, ?4)",
            params![etime, d.rid, d.u, d.c],
        )?;
        Ok(())
    }

    fn crosslink_forum(&mut self, d: &Deck) -> Result<()> {
        self.db.conn.execute_batch(crate::schema::FORUM_SCHEMA)?;
        let mtime = d.d.ok_or(Error::Misuse("forum deck lacks its D card"))?;
        let froot = match &d.g {
            Some(g) => self.rid_or_phantom(g, false)?,
            None => d.rid,
        };
        let firt = match &d.i {
            Some(i) => Some(self.rid_or_phantom(i, false)?),
            None => None,
        };
        let fprev = match d.p.first() {
            Some(p) => Some(self.rid_or_phantom(p, false)?),
            None => None,
        };
        self.db.exec(
            "REPLACE INTO forumpost(fpid, froot, fprev, firt, fmtime) \
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![d.rid, froot, fprev, firt, mtime],
        )?;
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES('f', ?1, ?2, ?3, ?4)",
            params![mtime, d.rid, d.u, d.h],
        )?;
        Ok(())
    }

    fn crosslink_ticket(&mut self, d: &Deck) -> Result<()> {
        self.db.conn.execute_batch(crate::schema::TICKET_SCHEMA)?;
        let mtime = d.d.ok_or(Error::Misuse("ticket deck lacks its D card"))?;
        let uuid = d.k.as_deref().expect("validated ticket deck has a K card");
        self.db.exec(
            "INSERT INTO ticket(tkt_uuid, tkt_mtime, tkt_ctime) VALUES(?1, ?2, ?2) \
             ON CONFLICT(tkt_uuid) DO UPDATE SET tkt_mtime=max(tkt_mtime, ?2)",
            params![uuid, mtime],
        )?;
        let tkt_id = self
            .db
            .one_i64("SELECT tkt_id FROM ticket WHERE tkt_uuid=?1", [uuid])?
            .expect("upserted just above");
        self.db.exec(
            "INSERT INTO ticketchng(tkt_id, tkt_rid, tkt_mtime, tkt_user) \
             VALUES(?1, ?2, ?3, ?4)",
            params![tkt_id, d.rid, mtime, d.u],
        )?;
        let comment = format!("Ticket [{}] change", &uuid[..10.min(uuid.len())]);
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES('t', ?1, ?2, ?3, ?4)",
            params![mtime, d.rid, d.u, comment],
        )?;
        Ok(())
    }

    fn crosslink_cluster(&mut self, d: &Deck) -> Result<()> {
        // A cluster vouches for its members: they no longer need
        // clustering themselves.
        for m in &d.m {
            self.db.exec(
                "DELETE FROM unclustered WHERE rid=(SELECT rid FROM blob WHERE uuid=?1)",
                [m],
            )?;
        }
        Ok(())
    }

    fn crosslink_attachment(&mut self, d: &Deck) -> Result<()> {
        let mtime = d.d.ok_or(Error::Misuse("attachment deck lacks its D card"))?;
        let a = d.a.as_ref().expect("validated attachment deck has an A card");
        // Attachments to technotes (hash target) land on the technote
        // timeline; wiki-page targets on the wiki timeline.
        let ty = if deck::is_hash(&a.target) { "e" } else { "w" };
        let verb = if a.src.is_some() { "Attach" } else { "Delete attachment" };
        let comment = format!("{verb} \"{}\" to [{}]", a.filename, a.target);
        self.db.exec(
            "REPLACE INTO event(type, mtime, objid, user, comment) \
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![ty, mtime, d.rid, d.u, comment],
        )?;
        Ok(())
    }
}
