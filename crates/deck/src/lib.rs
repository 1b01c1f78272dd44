//! Parsed, validated representation of structural artifacts.
//!
//! A structural artifact is a text document of newline-terminated "cards",
//! each a single uppercase letter followed by whitespace-separated fields
//! and closed by a `Z` card carrying an MD5 over everything before it. The
//! [`Deck`] type is the in-memory form: build one card by card and
//! [`serialize`](Deck::serialize) it, or [`parse`] stored bytes back into
//! cards. Validation against the per-subtype card matrix happens on both
//! paths.

mod fcard;
mod fossilize;
mod matrix;
mod parse;
mod serialize;
mod time;

pub use fcard::{files, FSeek, FileIter};
pub use fossilize::{defossilize, fossilize};
pub use parse::{parse, verify_z_card};
pub use time::{iso8601_to_julian, julian_to_iso8601};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The bytes do not carry a valid Z card; they are ordinary content,
    /// not a structural artifact.
    #[error("not a structural artifact (missing or mismatched Z card)")]
    NotAnArtifact,
    /// Structural-artifact syntax or validation failure.
    #[error("malformed artifact: {0}")]
    Malformed(String),
    /// A card is not part of this artifact type's legal card set.
    #[error("card {letter} is not valid for a {ty:?} artifact")]
    CardForbidden { letter: char, ty: ArtifactType },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The eight structural-artifact subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    Attachment,
    Checkin,
    Cluster,
    Control,
    Technote,
    ForumPost,
    TicketChange,
    Wiki,
}

/// Tag application type. The numeric values are persisted in `tagxref`
/// rows and must stay stable; the enum exists only at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TagType {
    Cancel = 0,
    Add = 1,
    Propagating = 2,
}

impl TagType {
    pub fn from_i64(v: i64) -> Option<TagType> {
        match v {
            0 => Some(TagType::Cancel),
            1 => Some(TagType::Add),
            2 => Some(TagType::Propagating),
            _ => None,
        }
    }

    /// The T-card sigil for this type.
    pub fn sigil(self) -> char {
        match self {
            TagType::Cancel => '-',
            TagType::Add => '+',
            TagType::Propagating => '*',
        }
    }

    pub fn from_sigil(c: u8) -> Option<TagType> {
        match c {
            b'-' => Some(TagType::Cancel),
            b'+' => Some(TagType::Add),
            b'*' => Some(TagType::Propagating),
            _ => None,
        }
    }
}

/// File permission carried by an F card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilePerm {
    #[default]
    Regular,
    Exe,
    Link,
}

/// File entry of a checkin. `uuid: None` only appears in delta manifests
/// and means "remove this file relative to the baseline".
#[derive(Debug, Clone, PartialEq)]
pub struct FCard {
    pub name: String,
    pub uuid: Option<String>,
    pub perm: FilePerm,
    pub prior_name: Option<String>,
}

/// Tag card. `uuid: None` serializes as the `*` target, meaning "the
/// artifact containing this card".
#[derive(Debug, Clone, PartialEq)]
pub struct TCard {
    pub tag_type: TagType,
    pub uuid: Option<String>,
    pub name: String,
    pub value: Option<String>,
}

/// Attachment card: attach (or with `src: None`, detach) a file to a wiki
/// page or technote.
#[derive(Debug, Clone, PartialEq)]
pub struct ACard {
    pub filename: String,
    pub target: String,
    pub src: Option<String>,
}

/// Cherrypick/backout record of a checkin.
#[derive(Debug, Clone, PartialEq)]
pub struct QCard {
    /// +1 cherrypick merge, -1 backout.
    pub is_backout: bool,
    pub target: String,
    pub baseline: Option<String>,
}

/// Ticket field change. `append` distinguishes `+field` (append to prior
/// value) from plain assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct JCard {
    pub append: bool,
    pub field: String,
    pub value: Option<String>,
}

/// In-memory deck of cards for one structural artifact.
///
/// Card slots mirror the wire format one to one. Multi-valued cards are
/// kept sorted in their canonical order by `serialize` (and verified to be
/// sorted by `parse`).
#[derive(Debug, Clone, PartialEq)]
pub struct Deck {
    pub ty: ArtifactType,
    /// RID of the stored artifact, when known. Zero means unknown.
    pub rid: i64,
    /// Hash of the serialized artifact, when known.
    pub uuid: Option<String>,

    pub a: Option<ACard>,
    /// Baseline hash: present iff this checkin is a delta manifest.
    pub b: Option<String>,
    pub c: Option<String>,
    /// Julian-day mtime.
    pub d: Option<f64>,
    /// Technote timestamp and id.
    pub e: Option<(f64, String)>,
    pub f: Vec<FCard>,
    /// Forum thread root.
    pub g: Option<String>,
    /// Forum post title.
    pub h: Option<String>,
    /// Forum in-reply-to.
    pub i: Option<String>,
    pub j: Vec<JCard>,
    /// Ticket id.
    pub k: Option<String>,
    /// Wiki page name.
    pub l: Option<String>,
    /// Cluster members.
    pub m: Vec<String>,
    /// MIME type.
    pub n: Option<String>,
    /// Parent hashes; the first is the primary parent.
    pub p: Vec<String>,
    pub q: Vec<QCard>,
    /// Repository checksum over file contents.
    pub r: Option<String>,
    pub t: Vec<TCard>,
    pub u: Option<String>,
    /// Wiki/technote/forum body.
    pub w: Option<String>,
}

/// True for a well-formed artifact hash: 40 (SHA1) or 64 (SHA3-256)
/// lowercase hex digits.
pub fn is_hash(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64)
        && s.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'))
}

impl Deck {
    pub fn new(ty: ArtifactType) -> Deck {
        Deck {
            ty,
            rid: 0,
            uuid: None,
            a: None,
            b: None,
            c: None,
            d: None,
            e: None,
            f: Vec::new(),
            g: None,
            h: None,
            i: None,
            j: Vec::new(),
            k: None,
            l: None,
            m: Vec::new(),
            n: None,
            p: Vec::new(),
            q: Vec::new(),
            r: None,
            t: Vec::new(),
            u: None,
            w: None,
        }
    }

    fn allow(&self, letter: char) -> Result<()> {
        let rule = matrix::rule_for(self.ty);
        let bit = 1u32 << (letter as u8 - b'A');
        if (rule.required | rule.optional) & bit == 0 {
            return Err(Error::CardForbidden { letter, ty: self.ty });
        }
        Ok(())
    }

    fn checked_hash(uuid: &str) -> Result<String> {
        if !is_hash(uuid) {
            return Err(Error::Malformed(format!("malformed hash: {uuid:?}")));
        }
        Ok(uuid.to_owned())
    }

    pub fn set_attachment(&mut self, filename: &str, target: &str, src: Option<&str>) -> Result<()> {
        self.allow('A')?;
        let src = match src {
            Some(s) => Some(Self::checked_hash(s)?),
            None => None,
        };
        self.a = Some(ACard {
            filename: filename.to_owned(),
            target: target.to_owned(),
            src,
        });
        Ok(())
    }

    pub fn set_baseline(&mut self, uuid: &str) -> Result<()> {
        self.allow('B')?;
        self.b = Some(Self::checked_hash(uuid)?);
        Ok(())
    }

    pub fn set_comment(&mut self, comment: &str) -> Result<()> {
        self.allow('C')?;
        self.c = Some(comment.to_owned());
        Ok(())
    }

    pub fn set_mtime(&mut self, julian: f64) -> Result<()> {
        // Every type carries a D card except clusters.
        if self.ty == ArtifactType::Cluster {
            return Err(Error::CardForbidden { letter: 'D', ty: self.ty });
        }
        self.d = Some(julian);
        Ok(())
    }

    pub fn set_technote(&mut self, julian: f64, id: &str) -> Result<()> {
        self.allow('E')?;
        self.e = Some((julian, Self::checked_hash(id)?));
        Ok(())
    }

    pub fn add_file(
        &mut self,
        name: &str,
        uuid: Option<&str>,
        perm: FilePerm,
        prior_name: Option<&str>,
    ) -> Result<()> {
        self.allow('F')?;
        if name.is_empty() {
            return Err(Error::Malformed("empty filename in F card".into()));
        }
        let uuid = match uuid {
            Some(u) => Some(Self::checked_hash(u)?),
            None => None,
        };
        self.f.push(FCard {
            name: name.to_owned(),
            uuid,
            perm,
            prior_name: prior_name.map(str::to_owned),
        });
        Ok(())
    }

    pub fn set_forum_root(&mut self, uuid: &str) -> Result<()> {
        self.allow('G')?;
        self.g = Some(Self::checked_hash(uuid)?);
        Ok(())
    }

    pub fn set_forum_title(&mut self, title: &str) -> Result<()> {
        self.allow('H')?;
        self.h = Some(title.to_owned());
        Ok(())
    }

    pub fn set_in_reply_to(&mut self, uuid: &str) -> Result<()> {
        self.allow('I')?;
        self.i = Some(Self::checked_hash(uuid)?);
        Ok(())
    }

    pub fn add_ticket_field(&mut self, append: bool, field: &str, value: Option<&str>) -> Result<()> {
        self.allow('J')?;
        self.j.push(JCard {
            append,
            field: field.to_owned(),
            value: value.map(str::to_owned),
        });
        Ok(())
    }

    pub fn set_ticket_id(&mut self, uuid: &str) -> Result<()> {
        self.allow('K')?;
        self.k = Some(Self::checked_hash(uuid)?);
        Ok(())
    }

    pub fn set_wiki_name(&mut self, name: &str) -> Result<()> {
        self.allow('L')?;
        self.l = Some(name.to_owned());
        Ok(())
    }

    pub fn add_cluster_member(&mut self, uuid: &str) -> Result<()> {
        self.allow('M')?;
        self.m.push(Self::checked_hash(uuid)?);
        Ok(())
    }

    pub fn set_mimetype(&mut self, mimetype: &str) -> Result<()> {
        self.allow('N')?;
        self.n = Some(mimetype.to_owned());
        Ok(())
    }

    pub fn add_parent(&mut self, uuid: &str) -> Result<()> {
        self.allow('P')?;
        self.p.push(Self::checked_hash(uuid)?);
        Ok(())
    }

    pub fn add_cherrypick(&mut self, is_backout: bool, target: &str, baseline: Option<&str>) -> Result<()> {
        self.allow('Q')?;
        let baseline = match baseline {
            Some(b) => Some(Self::checked_hash(b)?),
            None => None,
        };
        self.q.push(QCard {
            is_backout,
            target: Self::checked_hash(target)?,
            baseline,
        });
        Ok(())
    }

    pub fn set_repo_checksum(&mut self, md5: &str) -> Result<()> {
        self.allow('R')?;
        if md5.len() != 32 || !md5.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::Malformed(format!("malformed R-card checksum: {md5:?}")));
        }
        self.r = Some(md5.to_owned());
        Ok(())
    }

    pub fn add_tag(
        &mut self,
        tag_type: TagType,
        uuid: Option<&str>,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.allow('T')?;
        if name.is_empty() {
            return Err(Error::Malformed("empty tag name in T card".into()));
        }
        let uuid = match uuid {
            Some(u) => Some(Self::checked_hash(u)?),
            None => None,
        };
        self.t.push(TCard {
            tag_type,
            uuid,
            name: name.to_owned(),
            value: value.map(str::to_owned),
        });
        Ok(())
    }

    pub fn set_user(&mut self, user: &str) -> Result<()> {
        // Like D, the U card is universal outside clusters.
        if self.ty == ArtifactType::Cluster {
            return Err(Error::CardForbidden { letter: 'U', ty: self.ty });
        }
        self.u = Some(user.to_owned());
        Ok(())
    }

    pub fn set_body(&mut self, body: &str) -> Result<()> {
        self.allow('W')?;
        self.w = Some(body.to_owned());
        Ok(())
    }

    /// True if this checkin is a delta manifest (has a B card).
    pub fn is_delta_manifest(&self) -> bool {
        self.b.is_some()
    }

    /// Look up the F card for `name`, binary-searching the sorted list.
    pub fn file_by_name(&self, name: &str) -> Option<&FCard> {
        self.f
            .binary_search_by(|fc| fc.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.f[i])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const H1: &str = "f572d396fae9206628714fb2ce00f72e94f2258f";
    const H2: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    const H3: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    fn mtime() -> f64 {
        iso8601_to_julian("2021-03-26T14:30:15").unwrap()
    }

    fn round_trip(d: &mut Deck) -> Deck {
        let bytes = d.serialize().unwrap();
        let parsed = parse(&bytes).unwrap();
        // Canonical form is stable: re-serializing the parse yields the
        // same bytes.
        assert_eq!(parsed.clone().serialize().unwrap(), bytes);
        parsed
    }

    #[test]
    fn checkin_round_trip() {
        let mut d = Deck::new(ArtifactType::Checkin);
        d.set_comment("fix the spaceship\nsecond line").unwrap();
        d.set_mtime(mtime()).unwrap();
        d.set_user("alyssa p hacker").unwrap();
        d.add_file("src/main.c", Some(H1), FilePerm::Regular, None).unwrap();
        d.add_file("bin/run", Some(H2), FilePerm::Exe, None).unwrap();
        d.add_file("docs/a b.txt", Some(H3), FilePerm::Regular, Some("docs/old.txt")).unwrap();
        d.add_parent(H2).unwrap();
        d.add_tag(TagType::Propagating, None, "branch", Some("trunk")).unwrap();

        let parsed = round_trip(&mut d);
        assert_eq!(parsed.ty, ArtifactType::Checkin);
        assert_eq!(parsed.c.as_deref(), Some("fix the spaceship\nsecond line"));
        assert_eq!(parsed.u.as_deref(), Some("alyssa p hacker"));
        // F cards come back sorted by pathname.
        let names: Vec<_> = parsed.f.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["bin/run", "docs/a b.txt", "src/main.c"]);
        assert_eq!(parsed.f[0].perm, FilePerm::Exe);
        assert_eq!(parsed.f[1].prior_name.as_deref(), Some("docs/old.txt"));
        assert_eq!(parsed.p, vec![H2.to_owned()]);
        assert_eq!(parsed.t[0].tag_type, TagType::Propagating);
        assert!((parsed.d.unwrap() - mtime()).abs() < 1e-8);
    }

    #[test]
    fn wiki_round_trip() {
        let mut d = Deck::new(ArtifactType::Wiki);
        d.set_mtime(mtime()).unwrap();
        d.set_wiki_name("Release Notes").unwrap();
        d.set_user("drh").unwrap();
        d.set_body("first line\nsecond line\n").unwrap();
        d.set_mimetype("text/x-markdown").unwrap();
        d.add_parent(H1).unwrap();

        let parsed = round_trip(&mut d);
        assert_eq!(parsed.ty, ArtifactType::Wiki);
        assert_eq!(parsed.l.as_deref(), Some("Release Notes"));
        assert_eq!(parsed.w.as_deref(), Some("first line\nsecond line\n"));
    }

    #[test]
    fn cluster_control_ticket_round_trips() {
        let mut cluster = Deck::new(ArtifactType::Cluster);
        cluster.add_cluster_member(H2).unwrap();
        cluster.add_cluster_member(H1).unwrap();
        let parsed = round_trip(&mut cluster);
        assert_eq!(parsed.ty, ArtifactType::Cluster);
        // Members come back sorted ascending.
        assert_eq!(parsed.m, vec![H2.to_owned(), H1.to_owned()]);

        let mut control = Deck::new(ArtifactType::Control);
        control.set_mtime(mtime()).unwrap();
        control.set_user("drh").unwrap();
        control.add_tag(TagType::Add, Some(H1), "sym-release", None).unwrap();
        assert_eq!(round_trip(&mut control).ty, ArtifactType::Control);

        let mut tkt = Deck::new(ArtifactType::TicketChange);
        tkt.set_mtime(mtime()).unwrap();
        tkt.set_user("drh").unwrap();
        tkt.set_ticket_id(H1).unwrap();
        tkt.add_ticket_field(false, "status", Some("open")).unwrap();
        tkt.add_ticket_field(true, "comment", Some("more details")).unwrap();
        let parsed = round_trip(&mut tkt);
        assert_eq!(parsed.ty, ArtifactType::TicketChange);
        assert_eq!(parsed.j.len(), 2);
    }

    #[test]
    fn technote_forum_attachment_round_trips() {
        let mut tn = Deck::new(ArtifactType::Technote);
        tn.set_mtime(mtime()).unwrap();
        tn.set_technote(mtime(), H1).unwrap();
        tn.set_user("drh").unwrap();
        tn.set_body("note body\n").unwrap();
        assert_eq!(round_trip(&mut tn).ty, ArtifactType::Technote);

        let mut post = Deck::new(ArtifactType::ForumPost);
        post.set_mtime(mtime()).unwrap();
        post.set_forum_root(H1).unwrap();
        post.set_in_reply_to(H2).unwrap();
        post.set_user("visitor").unwrap();
        post.set_body("I found a bug\n").unwrap();
        assert_eq!(round_trip(&mut post).ty, ArtifactType::ForumPost);

        let mut att = Deck::new(ArtifactType::Attachment);
        att.set_mtime(mtime()).unwrap();
        att.set_attachment("screen shot.png", "Release Notes", Some(H2)).unwrap();
        att.set_user("visitor").unwrap();
        let parsed = round_trip(&mut att);
        assert_eq!(parsed.ty, ArtifactType::Attachment);
        assert_eq!(parsed.a.as_ref().unwrap().filename, "screen shot.png");
    }

    #[test]
    fn z_card_mismatch_is_not_an_artifact() {
        let mut d = Deck::new(ArtifactType::Wiki);
        d.set_mtime(mtime()).unwrap();
        d.set_wiki_name("P").unwrap();
        d.set_user("u").unwrap();
        d.set_body("b\n").unwrap();
        let mut bytes = d.serialize().unwrap();

        // Flip one bit anywhere before the Z card.
        bytes[3] ^= 1;
        assert_eq!(parse(&bytes).unwrap_err(), Error::NotAnArtifact);

        assert_eq!(parse(b"random blob content\n").unwrap_err(), Error::NotAnArtifact);
    }

    #[test]
    fn forbidden_card_is_rejected() {
        let mut d = Deck::new(ArtifactType::Cluster);
        assert_eq!(
            d.set_comment("nope").unwrap_err(),
            Error::CardForbidden { letter: 'C', ty: ArtifactType::Cluster }
        );
    }

    #[test]
    fn out_of_order_cards_are_rejected() {
        // Build a syntactically valid wiki artifact, then swap two card
        // lines so L precedes D.
        let mut d = Deck::new(ArtifactType::Wiki);
        d.set_mtime(mtime()).unwrap();
        d.set_wiki_name("Page").unwrap();
        d.set_user("u").unwrap();
        d.set_body("x\n").unwrap();
        let bytes = d.serialize().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.swap(0, 1); // D and L
        let mut swapped = lines.join("\n");
        swapped.push('\n');
        // Recompute the Z card so only ordering is at fault.
        let no_z = &swapped[..swapped.find("Z ").unwrap()];
        let digest = md5::compute(no_z.as_bytes());
        let rebuilt = format!("{no_z}Z {digest:x}\n");
        match parse(rebuilt.as_bytes()).unwrap_err() {
            Error::Malformed(msg) => assert!(msg.contains("out of order"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_required_card_is_rejected() {
        let mut d = Deck::new(ArtifactType::Wiki);
        d.set_mtime(mtime()).unwrap();
        d.set_wiki_name("Page").unwrap();
        d.set_user("u").unwrap();
        // No W card.
        match d.serialize().unwrap_err() {
            Error::Malformed(msg) => assert!(msg.contains("missing"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
