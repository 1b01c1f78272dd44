use crate::{Context, Error, Result, Rid};
use deck::{ArtifactType, Deck, TagType};

/// Arguments to [`Context::branch_create`].
#[derive(Debug)]
pub struct BranchOptions<'a> {
    /// Checkin the branch forks from.
    pub basis: Rid,
    pub name: &'a str,
    pub user: &'a str,
    /// Timeline background color, `#rrggbb`.
    pub bg_color: Option<&'a str>,
    pub comment: Option<&'a str>,
    /// Julian-day mtime; defaults to now.
    pub mtime: Option<f64>,
    pub is_private: bool,
}

impl Context {
    /// Open a new branch: a checkin that copies the basis' files, cancels
    /// its symbolic tags, and carries propagating `branch` and
    /// `sym-<name>` tags (plus `bgcolor` when given). The basis is
    /// re-stored as a delta of the new tip. Returns the new checkin's
    /// RID.
    pub fn branch_create(&mut self, opt: &BranchOptions<'_>) -> Result<Rid> {
        if opt.basis <= 0 || opt.name.is_empty() || opt.user.is_empty() {
            return Err(Error::Misuse("branch_create requires a basis, name, and user"));
        }
        let parent = self.deck_take(opt.basis)?;
        if parent.ty != ArtifactType::Checkin {
            self.deck_give(parent);
            return Err(Error::TypeMismatch("branch basis is not a checkin"));
        }
        let parent_uuid = parent
            .uuid
            .clone()
            .expect("decks loaded by rid carry their hash");

        let mut d = Deck::new(ArtifactType::Checkin);
        if let Some(b) = &parent.b {
            d.set_baseline(b)?;
        }
        let mtime = match opt.mtime {
            Some(t) if t > 0.0 => t,
            _ => self.julian_now()?,
        };
        d.set_mtime(mtime)?;
        // The F cards cannot be moved wholesale: the new deck owns its
        // own copies.
        for fc in &parent.f {
            d.add_file(&fc.name, fc.uuid.as_deref(), fc.perm, fc.prior_name.as_deref())?;
        }
        d.set_user(opt.user)?;
        d.add_parent(&parent_uuid)?;
        match opt.comment {
            Some(c) if !c.is_empty() => d.set_comment(c)?,
            _ => d.set_comment(&format!("Created branch [{}].", opt.name))?,
        }
        if let Some(r) = &parent.r {
            // Same file set, same repository checksum.
            d.set_repo_checksum(r)?;
        }

        let is_private = opt.is_private || self.content_is_private(parent.rid)?;
        if is_private {
            d.add_tag(TagType::Add, None, "private", None)?;
        }
        if let Some(color) = opt.bg_color {
            if color.starts_with('#') {
                d.add_tag(TagType::Propagating, None, "bgcolor", Some(color))?;
            }
        }
        d.add_tag(TagType::Propagating, None, "branch", Some(opt.name))?;
        d.add_tag(TagType::Propagating, None, &format!("sym-{}", opt.name), None)?;

        self.transaction_begin()?;
        let r = (|| -> Result<Rid> {
            // Cancel every symbolic tag the basis carries so the new tip
            // answers only to its own branch names.
            let sym_tags: Vec<String> = {
                let mut stmt = self.db.conn.prepare_cached(
                    "SELECT tagname FROM tagxref, tag \
                     WHERE tagxref.rid=?1 AND tagxref.tagid=tag.tagid \
                       AND tagtype>0 AND tagname GLOB 'sym-*' \
                     ORDER BY tagname",
                )?;
                let rows = stmt.query_map([parent.rid], |r| r.get::<_, String>(0))?;
                rows.collect::<std::result::Result<_, _>>()?
            };
            for tag in sym_tags {
                if tag != format!("sym-{}", opt.name) {
                    d.add_tag(TagType::Cancel, None, &tag, None)?;
                }
            }
            let rid = self.save_deck(&mut d, is_private)?;
            // Storage optimization: the basis usually differs from the
            // new tip only in metadata, so re-store it as a delta.
            self.content_deltify(parent.rid, rid, false)?;
            Ok(rid)
        })();
        let basis_rid = parent.rid;
        self.deck_give(parent);
        match r {
            Ok(rid) => {
                self.transaction_commit()?;
                tracing::debug!(basis = basis_rid, rid, name = opt.name, "created branch");
                Ok(rid)
            }
            Err(e) => {
                self.transaction_rollback()?;
                Err(e)
            }
        }
    }

    /// Tag an existing artifact by writing and crosslinking a control
    /// artifact. Returns the control artifact's RID.
    pub fn tag_rid(
        &mut self,
        tag_type: TagType,
        target: Rid,
        name: &str,
        value: Option<&str>,
        user: &str,
        mtime: Option<f64>,
    ) -> Result<Rid> {
        if name.is_empty() || user.is_empty() {
            return Err(Error::Misuse("tagging requires a tag name and user"));
        }
        if target <= 0 {
            return Err(Error::Range(format!("invalid RID {target}")));
        }
        let target_uuid = self
            .hash_for_rid(target)?
            .ok_or_else(|| Error::Range(format!("no artifact with RID {target}")))?;
        let mtime = match mtime {
            Some(t) if t > 0.0 => t,
            _ => self.julian_now()?,
        };
        let mut d = Deck::new(ArtifactType::Control);
        d.add_tag(tag_type, Some(&target_uuid), name, value)?;
        d.set_mtime(mtime)?;
        d.set_user(user)?;
        let is_private = self.content_is_private(target)?;
        self.save_deck(&mut d, is_private)
    }
}
