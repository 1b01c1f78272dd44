use crate::buffer::{compress, uncompress};
use crate::hash::{hash_bytes, hash_matches};
use crate::{Context, Error, Result, Rid};
use rusqlite::params;

/// Full-form arguments to [`Context::content_put_ex`].
///
/// With `baseline` set, `bytes` must be an already-compressed binary delta
/// against that row, `uncompressed_size` its inflated length, and
/// `known_hash` the hash of the *full* content the delta reproduces.
#[derive(Debug, Default)]
pub struct ContentPut<'a> {
    pub bytes: &'a [u8],
    pub known_hash: Option<&'a str>,
    pub baseline: Option<Rid>,
    pub uncompressed_size: Option<usize>,
    pub is_private: bool,
}

impl Context {
    /// Store `bytes` as a new artifact, returning its RID. Content is
    /// deduplicated by hash; storing existing content returns the
    /// existing RID.
    pub fn content_put(&mut self, bytes: &[u8]) -> Result<Rid> {
        self.content_put_ex(ContentPut {
            bytes,
            ..Default::default()
        })
    }

    pub fn content_put_ex(&mut self, put: ContentPut<'_>) -> Result<Rid> {
        if put.baseline.is_some() && (put.known_hash.is_none() || put.uncompressed_size.is_none()) {
            return Err(Error::Misuse(
                "delta-form put requires the full-content hash and the delta's uncompressed size",
            ));
        }
        let uuid = match put.known_hash {
            Some(h) => {
                if !deck::is_hash(h) {
                    return Err(Error::Range(format!("malformed hash: {h:?}")));
                }
                h.to_owned()
            }
            None => hash_bytes(self.opts.hash_policy, put.bytes),
        };

        if let Some(src) = put.baseline {
            if src <= 0 {
                return Err(Error::Range(format!("invalid baseline RID {src}")));
            }
            // A public artifact must never ride on a private delta
            // source.
            if !put.is_private && self.content_is_private(src)? {
                return Err(Error::Access(
                    "refusing to store a public artifact as a delta of private content",
                ));
            }
        }

        self.transaction_begin()?;
        let r = self.content_put_inner(&uuid, &put);
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

    fn content_put_inner(&mut self, uuid: &str, put: &ContentPut<'_>) -> Result<Rid> {
        let existing = {
            let mut stmt = self
                .db
                .conn
                .prepare_cached("SELECT rid, size FROM blob WHERE uuid=?1")?;
            let row = stmt
                .query_row([uuid], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)));
            rusqlite::OptionalExtension::optional(row)?
        };

        let (content, size, srcid): (Vec<u8>, i64, Option<Rid>) = match put.baseline {
            Some(src) => (
                put.bytes.to_vec(),
                put.uncompressed_size.expect("checked by caller") as i64,
                Some(src),
            ),
            None => (compress(put.bytes), put.bytes.len() as i64, None),
        };

        let rid = match existing {
            Some((rid, old_size)) if old_size >= 0 => {
                // Deduplicated; nothing to write.
                return Ok(rid);
            }
            Some((rid, _)) => {
                // Phantom promotion: the hash was known, now the bytes
                // are too.
                tracing::debug!(rid, uuid, "promoting phantom to real content");
                self.db.exec(
                    "UPDATE blob SET content=?1, size=?2, srcid=?3 WHERE rid=?4",
                    params![content, size, srcid, rid],
                )?;
                self.acache.missing.remove(rid);
                rid
            }
            None => {
                self.db.exec(
                    "INSERT INTO blob(uuid, size, content, srcid) VALUES(?1, ?2, ?3, ?4)",
                    params![uuid, size, content, srcid],
                )?;
                self.db.conn.last_insert_rowid()
            }
        };

        self.db
            .exec("INSERT OR IGNORE INTO unsent VALUES(?1)", [rid])?;
        self.db
            .exec("INSERT OR IGNORE INTO unclustered VALUES(?1)", [rid])?;
        if put.is_private {
            self.db
                .exec("INSERT OR IGNORE INTO private VALUES(?1)", [rid])?;
        }
        self.to_verify.insert(rid);
        Ok(rid)
    }

    /// Register a phantom: the hash is known (announced by a peer, named
    /// by a delta chain) but the bytes are not yet. Returns the new or
    /// existing RID.
    pub fn content_new_phantom(&mut self, uuid: &str, is_private: bool) -> Result<Rid> {
        if !deck::is_hash(uuid) {
            return Err(Error::Range(format!("malformed hash: {uuid:?}")));
        }
        if let Some(rid) = self.rid_for_hash(uuid)? {
            return Ok(rid);
        }
        self.db.exec(
            "INSERT INTO blob(uuid, size, content, srcid) VALUES(?1, -1, NULL, NULL)",
            [uuid],
        )?;
        let rid = self.db.conn.last_insert_rowid();
        self.db
            .exec("INSERT OR IGNORE INTO unclustered VALUES(?1)", [rid])?;
        if is_private {
            self.db
                .exec("INSERT OR IGNORE INTO private VALUES(?1)", [rid])?;
        }
        tracing::debug!(rid, uuid, "registered phantom");
        Ok(rid)
    }

    /// Materialize the full content of `rid`, resolving any delta chain.
    ///
    /// The chain is collected iteratively (never recursively: chains can
    /// outgrow the stack), then applied from the base blob forward, with
    /// every intermediate memoized through the artifact cache.
    pub fn content_get(&mut self, rid: Rid) -> Result<Vec<u8>> {
        if rid <= 0 {
            return Err(Error::Range(format!("invalid RID {rid}")));
        }
        if let Some(bytes) = self.acache.get(rid) {
            return Ok(bytes.to_vec());
        }

        // Walk the srcid chain down to a full blob.
        let mut chain = vec![rid];
        let mut cursor = rid;
        loop {
            let row = {
                let mut stmt = self
                    .db
                    .conn
                    .prepare_cached("SELECT size, srcid FROM blob WHERE rid=?1")?;
                let row = stmt.query_row([cursor], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, Option<i64>>(1)?))
                });
                rusqlite::OptionalExtension::optional(row)?
            };
            let (size, srcid) = match row {
                Some(v) => v,
                None => {
                    self.acache.missing.insert(cursor);
                    return Err(Error::NotFound);
                }
            };
            if size < 0 {
                return Err(Error::Phantom(cursor));
            }
            match srcid {
                None => break,
                Some(src) => {
                    if chain.contains(&src) {
                        return Err(Error::Consistency(format!(
                            "delta loop in repository at rid {src}"
                        )));
                    }
                    chain.push(src);
                    cursor = src;
                }
            }
        }

        // Materialize from the base of the chain back up to `rid`.
        let mut bytes = self.raw_payload(*chain.last().expect("chain is non-empty"))?;
        for &link in chain.iter().rev().skip(1) {
            let delta = self.raw_payload(link)?;
            bytes = delta::apply(&bytes, &delta, self.opts.delta_checksums)?;
            if link != rid {
                self.acache.insert(link, bytes.clone());
            }
        }
        self.acache.available.insert(rid);
        self.acache.insert(rid, bytes.clone());
        Ok(bytes)
    }

    /// The stored payload of one row, inflated but with no delta
    /// resolution: full content for base rows, delta bytes for delta
    /// rows.
    fn raw_payload(&self, rid: Rid) -> Result<Vec<u8>> {
        let mut stmt = self
            .db
            .conn
            .prepare_cached("SELECT content FROM blob WHERE rid=?1")?;
        let row = stmt.query_row([rid], |r| r.get::<_, Option<Vec<u8>>>(0));
        match rusqlite::OptionalExtension::optional(row)? {
            Some(Some(z)) => uncompress(&z),
            Some(None) => Err(Error::Phantom(rid)),
            None => Err(Error::NotFound),
        }
    }

    /// Stored size of `rid`'s payload, or None when no such row. Negative
    /// marks a phantom.
    pub fn content_size(&self, rid: Rid) -> Result<Option<i64>> {
        self.db.one_i64("SELECT size FROM blob WHERE rid=?1", [rid])
    }

    pub fn content_is_phantom(&self, rid: Rid) -> Result<bool> {
        Ok(matches!(self.content_size(rid)?, Some(s) if s < 0))
    }

    /// The delta source of `rid`, or None when stored as a full blob.
    pub fn delta_src(&self, rid: Rid) -> Result<Option<Rid>> {
        self.db
            .one_i64("SELECT srcid FROM blob WHERE rid=?1 AND srcid IS NOT NULL", [rid])
    }

    pub fn rid_for_hash(&self, uuid: &str) -> Result<Option<Rid>> {
        self.db.one_i64("SELECT rid FROM blob WHERE uuid=?1", [uuid])
    }

    pub fn hash_for_rid(&self, rid: Rid) -> Result<Option<String>> {
        self.db.one_text("SELECT uuid FROM blob WHERE rid=?1", [rid])
    }

    pub fn content_is_private(&self, rid: Rid) -> Result<bool> {
        self.db
            .exists("SELECT 1 FROM private WHERE rid=?1", [rid])
    }

    /// Re-store `rid` as a delta against `src` when that is worthwhile:
    /// the delta must be at least 25% smaller, both contents at least 50
    /// bytes, `src` must not (transitively) be a delta of `rid`, and a
    /// private source never backs public content. Without `force`, a row
    /// that is already a delta is left alone; `force` also waives the
    /// profitability thresholds (but never the reverse-delta or privacy
    /// rules).
    ///
    /// Returns whether a delta was written.
    pub fn content_deltify(&mut self, rid: Rid, src: Rid, force: bool) -> Result<bool> {
        if rid <= 0 || src <= 0 {
            return Err(Error::Range(format!("invalid RID pair ({rid}, {src})")));
        }
        if rid == src {
            return Ok(false);
        }
        if !force && self.delta_src(rid)?.is_some() {
            return Ok(false);
        }
        if self.content_is_private(src)? && !self.content_is_private(rid)? {
            return Ok(false);
        }
        // Refuse when src is a delta of rid, directly or transitively;
        // this doubles as the loop guard.
        let mut cursor = src;
        let mut hops = 0;
        while let Some(next) = self.delta_src(cursor)? {
            if next == rid {
                return Ok(false);
            }
            cursor = next;
            hops += 1;
            if hops > 10_000_000 {
                return Err(Error::Consistency(format!(
                    "delta loop in repository at rid {cursor}"
                )));
            }
        }
        if self.content_is_phantom(rid)? || self.content_is_phantom(src)? {
            return Ok(false);
        }

        let data = self.content_get(rid)?;
        let src_data = self.content_get(src)?;
        if !force && (data.len() < 50 || src_data.len() < 50) {
            return Ok(false);
        }
        let d = delta::create(&src_data, &data);
        if !force && d.len() >= data.len() * 3 / 4 {
            return Ok(false);
        }
        tracing::debug!(rid, src, full = data.len(), delta = d.len(), "deltifying content");
        let z = compress(&d);
        self.transaction_begin()?;
        let r = self.db.exec(
            "UPDATE blob SET content=?1, size=?2, srcid=?3 WHERE rid=?4",
            params![z, d.len() as i64, src, rid],
        );
        match r {
            Ok(_) => {
                self.transaction_commit()?;
                Ok(true)
            }
            Err(e) => {
                self.transaction_rollback()?;
                Err(e)
            }
        }
    }

    /// Inverse of [`Context::content_deltify`]: rewrite `rid` as a full
    /// blob. No-op when it already is one.
    pub fn content_undeltify(&mut self, rid: Rid) -> Result<()> {
        if self.delta_src(rid)?.is_none() {
            return Ok(());
        }
        let data = self.content_get(rid)?;
        let z = compress(&data);
        self.transaction_begin()?;
        let r = self.db.exec(
            "UPDATE blob SET content=?1, size=?2, srcid=NULL WHERE rid=?3",
            params![z, data.len() as i64, rid],
        );
        match r {
            Ok(_) => self.transaction_commit(),
            Err(e) => {
                self.transaction_rollback()?;
                Err(e)
            }
        }
    }

    /// Can the full content of `rid` be produced, without producing it?
    /// Walks the delta chain consulting (and feeding) the known-missing
    /// and known-available bags. A chain longer than the historical limit
    /// is reported as store corruption.
    pub fn content_available(&mut self, rid: Rid) -> Result<bool> {
        debug_assert!(rid > 0);
        let mut cursor = rid;
        let mut depth = 0;
        const LIMIT: u32 = 10_000_000;
        while depth < LIMIT {
            depth += 1;
            if self.acache.missing.contains(cursor) {
                return Ok(false);
            }
            if self.acache.available.contains(cursor) {
                return Ok(true);
            }
            match self.content_size(cursor)? {
                None | Some(i64::MIN..=-1) => {
                    self.acache.missing.insert(cursor);
                    return Ok(false);
                }
                Some(_) => {}
            }
            match self.delta_src(cursor)? {
                None => {
                    self.acache.available.insert(cursor);
                    return Ok(true);
                }
                Some(src) => cursor = src,
            }
        }
        Err(Error::Consistency(format!(
            "delta loop in repository at rid {cursor}"
        )))
    }

    /// Load the parsed deck for `rid`, preferring the manifest cache.
    /// Hand it back with [`Context::deck_give`] when done so the next
    /// crosslink can reuse the parse.
    pub fn deck_take(&mut self, rid: Rid) -> Result<deck::Deck> {
        if let Some(d) = self.mcache.take(rid) {
            return Ok(d);
        }
        let bytes = self.content_get(rid)?;
        let mut d = deck::parse(&bytes)?;
        d.rid = rid;
        d.uuid = self.hash_for_rid(rid)?;
        Ok(d)
    }

    pub fn deck_give(&mut self, deck: deck::Deck) {
        if deck.rid > 0 {
            self.mcache.insert(deck);
        }
    }

    /// Verify-at-commit: every artifact inserted in this transaction is
    /// re-read through the full delta/compression stack and re-hashed.
    /// Any mismatch is store corruption and dooms the commit.
    pub(crate) fn verify_at_commit(&mut self) -> Result<()> {
        let rids: Vec<Rid> = self.to_verify.iter().collect();
        self.to_verify.clear();
        for rid in rids {
            let uuid = self
                .hash_for_rid(rid)?
                .ok_or_else(|| Error::Consistency(format!("no blob row for rid {rid}")))?;
            let bytes = self.content_get(rid)?;
            if !hash_matches(&uuid, &bytes) {
                return Err(Error::Consistency(format!(
                    "stored content for rid {rid} does not hash back to {uuid}"
                )));
            }
        }
        Ok(())
    }
}
