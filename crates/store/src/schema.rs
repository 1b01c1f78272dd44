//! Embedded repository schema. Table and column names are a compatibility
//! surface shared with other tooling and must not drift.

/// Core schema applied when a repository is created.
pub(crate) const REPO_SCHEMA: &str = r#"
-- Every artifact, content-addressed. A negative size marks a phantom
-- (hash known, bytes absent). A non-NULL srcid marks the content as a
-- delta against that row; content bytes are zlib-compressed either way.
CREATE TABLE blob(
  rid INTEGER PRIMARY KEY,
  uuid TEXT UNIQUE NOT NULL,
  size INTEGER,
  content BLOB,
  srcid INTEGER
);
CREATE INDEX blob_srcid ON blob(srcid) WHERE srcid IS NOT NULL;

-- Parent/child checkin edges. isprim is true for the first P-card parent.
CREATE TABLE plink(
  pid INTEGER REFERENCES blob,
  cid INTEGER REFERENCES blob,
  isprim BOOLEAN,
  mtime DATETIME,
  UNIQUE(pid, cid)
);
CREATE INDEX plink_cid ON plink(cid);

-- Per-file changes of each checkin: mid is the checkin, fid the new file
-- content (0 on delete), pid the prior content (0 on add), fnid/pfnid the
-- interned current/prior filename.
CREATE TABLE mlink(
  mid INTEGER REFERENCES blob,
  fid INTEGER,
  pid INTEGER,
  fnid INTEGER REFERENCES filename,
  pfnid INTEGER,
  mperm INTEGER
);
CREATE INDEX mlink_mid ON mlink(mid);
CREATE INDEX mlink_fid ON mlink(fid);
CREATE INDEX mlink_fnid ON mlink(fnid);

CREATE TABLE filename(
  fnid INTEGER PRIMARY KEY,
  name TEXT UNIQUE
);

CREATE TABLE tag(
  tagid INTEGER PRIMARY KEY,
  tagname TEXT UNIQUE
);
-- Built-in tags occupy fixed ids; user tags intern above them.
INSERT INTO tag VALUES(1, 'bgcolor');
INSERT INTO tag VALUES(2, 'comment');
INSERT INTO tag VALUES(3, 'user');
INSERT INTO tag VALUES(4, 'date');
INSERT INTO tag VALUES(5, 'hidden');
INSERT INTO tag VALUES(6, 'private');
INSERT INTO tag VALUES(7, 'cluster');
INSERT INTO tag VALUES(8, 'branch');
INSERT INTO tag VALUES(9, 'closed');

-- Denormalized, propagated application of tags to artifacts.
-- tagtype: 0 cancel, 1 add (single), 2 propagating.
CREATE TABLE tagxref(
  tagid INTEGER REFERENCES tag,
  tagtype INTEGER,
  srcid INTEGER,
  origid INTEGER,
  value TEXT,
  mtime TIMESTAMP,
  rid INTEGER REFERENCES blob,
  UNIQUE(rid, tagid)
);
CREATE INDEX tagxref_tagid ON tagxref(tagid);

-- Timeline rows, one per crosslinked artifact. euser/ecomment hold
-- values overridden by user/comment tags; omtime the original mtime.
CREATE TABLE event(
  type TEXT,
  mtime DATETIME,
  objid INTEGER PRIMARY KEY,
  bgcolor TEXT,
  euser TEXT,
  user TEXT,
  ecomment TEXT,
  comment TEXT,
  omtime DATETIME
);
CREATE INDEX event_mtime ON event(mtime);

-- Checkins with no same-branch primary child.
CREATE TABLE leaf(rid INTEGER PRIMARY KEY);

CREATE TABLE private(rid INTEGER PRIMARY KEY);
CREATE TABLE unsent(rid INTEGER PRIMARY KEY);
CREATE TABLE unclustered(rid INTEGER PRIMARY KEY);

CREATE TABLE config(
  name TEXT PRIMARY KEY,
  value CLOB,
  mtime INTEGER
) WITHOUT ROWID;
"#;

/// Ticket tables, created on demand when the first ticket-change artifact
/// is crosslinked.
pub(crate) const TICKET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ticket(
  tkt_id INTEGER PRIMARY KEY,
  tkt_uuid TEXT UNIQUE NOT NULL,
  tkt_mtime DATE,
  tkt_ctime DATE
);
CREATE TABLE IF NOT EXISTS ticketchng(
  tkt_id INTEGER REFERENCES ticket,
  tkt_rid INTEGER REFERENCES blob,
  tkt_mtime DATE,
  tkt_user TEXT
);
CREATE INDEX IF NOT EXISTS ticketchng_tkt_id ON ticketchng(tkt_id);
"#;

/// Forum table, created on demand with the first forum post.
pub(crate) const FORUM_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS forumpost(
  fpid INTEGER PRIMARY KEY,
  froot INT,
  fprev INT,
  firt INT,
  fmtime REAL
);
CREATE INDEX IF NOT EXISTS forumpost_root ON forumpost(froot, fmtime);
"#;
