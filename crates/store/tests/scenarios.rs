//! End-to-end walks through the storage core: artifacts in, relational
//! state out.

use store::{ArtifactType, BranchOptions, Context, Deck, Rid, TagType, TAGID_BRANCH};

fn julian(hours: u32) -> f64 {
    deck::iso8601_to_julian("2021-06-01T00:00:00").unwrap() + hours as f64 / 24.0
}

/// Build a minimal checkin deck: comment, time, user, files, parents.
fn checkin(
    comment: &str,
    hours: u32,
    files: &[(&str, &str)],
    parents: &[&str],
) -> Deck {
    let mut d = Deck::new(ArtifactType::Checkin);
    d.set_comment(comment).unwrap();
    d.set_mtime(julian(hours)).unwrap();
    d.set_user("dev").unwrap();
    for (name, uuid) in files {
        d.add_file(name, Some(uuid), deck::FilePerm::Regular, None).unwrap();
    }
    for p in parents {
        d.add_parent(p).unwrap();
    }
    d
}

/// The initial checkin of a repository carries its branch tags, the way
/// a freshly initialized repository seeds trunk.
fn root_checkin(hours: u32) -> Deck {
    let mut d = checkin("initial empty check-in", hours, &[], &[]);
    d.add_tag(TagType::Propagating, None, "branch", Some("trunk")).unwrap();
    d.add_tag(TagType::Propagating, None, "sym-trunk", None).unwrap();
    d
}

fn tagxref_row(cx: &Context, rid: Rid, tag: &str) -> Option<(i64, Option<String>)> {
    let conn = cx.connection();
    conn.query_row(
        "SELECT tagtype, value FROM tagxref, tag \
         WHERE tagxref.tagid=tag.tagid AND tagname=?1 AND rid=?2",
        rusqlite::params![tag, rid],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .ok()
}

#[test]
fn scenario_1_empty_repo_put() {
    let mut cx = Context::create_in_memory().unwrap();
    let rid = cx.content_put(b"hello\n").unwrap();
    assert_eq!(rid, 1);
    assert_eq!(
        cx.hash_for_rid(rid).unwrap().as_deref(),
        Some("f572d396fae9206628714fb2ce00f72e94f2258f")
    );
    assert_eq!(cx.content_get(rid).unwrap(), b"hello\n");
    let (size, srcid): (i64, Option<i64>) = cx
        .connection()
        .query_row("SELECT size, srcid FROM blob WHERE rid=1", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(size, 6);
    assert_eq!(srcid, None);
}

#[test]
fn scenario_2_delta_put_and_retrieve() {
    let mut cx = Context::create_in_memory().unwrap();
    let a = b"The quick brown fox\n";
    let b = b"The quick brown cat\n";
    let rid_a = cx.content_put(a).unwrap();
    let rid_b = cx.content_put(b).unwrap();
    assert_eq!((rid_a, rid_b), (1, 2));

    assert!(cx.content_deltify(rid_b, rid_a, true).unwrap());
    assert_eq!(cx.content_get(rid_b).unwrap(), b);
    assert_eq!(cx.delta_src(rid_b).unwrap(), Some(rid_a));

    let stored: Vec<u8> = cx
        .connection()
        .query_row("SELECT content FROM blob WHERE rid=2", [], |r| r.get(0))
        .unwrap();
    let payload = store::uncompress(&stored).unwrap();
    assert_eq!(delta::applied_size(&payload).unwrap(), b.len());
}

#[test]
fn scenario_3_checkin_and_leaf() {
    let mut cx = Context::create_in_memory().unwrap();
    let file_rid = cx.content_put(b"file body\n").unwrap();
    let file_uuid = cx.hash_for_rid(file_rid).unwrap().unwrap();

    let mut parent = checkin("parent", 1, &[("a.txt", file_uuid.as_str())], &[]);
    let p_rid = cx.save_deck(&mut parent, false).unwrap();
    let p_uuid = parent.uuid.clone().unwrap();

    let mut child = checkin("child", 2, &[("a.txt", file_uuid.as_str())], &[p_uuid.as_str()]);
    let c_rid = cx.save_deck(&mut child, false).unwrap();

    assert_eq!(cx.leaves().unwrap(), vec![c_rid]);
    let plink: Vec<(Rid, Rid, bool)> = {
        let conn = cx.connection();
        let mut stmt = conn
            .prepare("SELECT pid, cid, isprim FROM plink ORDER BY pid, cid")
            .unwrap();
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap();
        rows.collect::<Result<_, _>>().unwrap()
    };
    assert_eq!(plink, vec![(p_rid, c_rid, true)]);

    // The stored artifact parses back into an equivalent deck.
    let bytes = cx.content_get(c_rid).unwrap();
    let parsed = deck::parse(&bytes).unwrap();
    assert_eq!(parsed.ty, ArtifactType::Checkin);
    assert_eq!(parsed.p, vec![p_uuid]);
}

#[test]
fn scenario_4_branch_creation() {
    let mut cx = Context::create_in_memory().unwrap();
    let mut root = root_checkin(1);
    let p_rid = cx.save_deck(&mut root, false).unwrap();
    let p_uuid = root.uuid.clone().unwrap();
    assert_eq!(cx.branch_of(p_rid).unwrap(), "trunk");

    let b_rid = cx
        .branch_create(&BranchOptions {
            basis: p_rid,
            name: "feature",
            user: "dev",
            bg_color: Some("#ff0000"),
            comment: None,
            mtime: Some(julian(2)),
            is_private: false,
        })
        .unwrap();

    // The branch tip carries the P card back to the basis.
    let bytes = cx.content_get(b_rid).unwrap();
    let d = deck::parse(&bytes).unwrap();
    assert_eq!(d.p, vec![p_uuid]);

    assert_eq!(tagxref_row(&cx, b_rid, "branch"), Some((2, Some("feature".into()))));
    assert_eq!(tagxref_row(&cx, b_rid, "sym-feature"), Some((2, None)));
    assert_eq!(tagxref_row(&cx, b_rid, "sym-trunk"), Some((0, None)));
    assert_eq!(tagxref_row(&cx, b_rid, "bgcolor"), Some((2, Some("#ff0000".into()))));
    assert_eq!(cx.branch_of(b_rid).unwrap(), "feature");

    // The branch tip is a leaf; the basis stays a leaf of trunk, since
    // its only child left the branch.
    let mut leaves = cx.leaves().unwrap();
    leaves.sort();
    assert_eq!(leaves, vec![p_rid, b_rid]);

    // Storage: the basis may have been re-stored as a delta of the new
    // tip (when small enough to pay off); its content must read back
    // unchanged either way.
    if let Some(src) = cx.delta_src(p_rid).unwrap() {
        assert_eq!(src, b_rid);
    }
    assert_eq!(deck::parse(&cx.content_get(p_rid).unwrap()).unwrap().ty, ArtifactType::Checkin);
}

#[test]
fn scenario_5_three_way_merge_conflict() {
    let pivot = b"line1\nline2\nline3\n";
    let v1 = b"line1\nLINE2A\nline3\n";
    let v2 = b"line1\nLINE2B\nline3\n";
    let merged = textdiff::merge3(pivot, v1, v2).unwrap();
    assert_eq!(merged.conflicts, 1);
    let text = String::from_utf8(merged.bytes).unwrap();
    assert_eq!(
        text,
        "line1\n\
         <<<<<<< BEGIN MERGE CONFLICT: local copy shown first <<<<<<<<<<<<<<<\n\
         LINE2A\n\
         ||||||| COMMON ANCESTOR content follows ||||||||||||||||||||||||||||\n\
         line2\n\
         ======= MERGED IN content follows ==================================\n\
         LINE2B\n\
         >>>>>>> END MERGE CONFLICT >>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>\n\
         line3\n"
    );
    assert!(textdiff::contains_merge_marker(text.as_bytes()));
}

#[test]
fn scenario_6_shortest_path_across_merges() {
    let mut cx = Context::create_in_memory().unwrap();
    // History 1 -> 2 -> 3 -> 4 -> 5 plus merge edge 3 -> 5, built from
    // real artifacts.
    let mut rids = Vec::new();
    let mut uuids: Vec<String> = Vec::new();
    for i in 0..5u32 {
        let parents: Vec<&str> = match i {
            0 => vec![],
            4 => vec![uuids[3].as_str(), uuids[2].as_str()], // 5 merges 3 into 4
            _ => vec![uuids[i as usize - 1].as_str()],
        };
        let mut d = checkin(&format!("c{}", i + 1), i + 1, &[], &parents);
        let rid = cx.save_deck(&mut d, false).unwrap();
        rids.push(rid);
        uuids.push(d.uuid.clone().unwrap());
    }

    let direct = cx.shortest_path(rids[0], rids[4], true, false).unwrap().unwrap();
    let got: Vec<Rid> = direct.steps().iter().map(|s| s.rid).collect();
    assert_eq!(got, vec![rids[0], rids[1], rids[2], rids[3], rids[4]]);

    let merged = cx.shortest_path(rids[0], rids[4], false, false).unwrap().unwrap();
    let got: Vec<Rid> = merged.steps().iter().map(|s| s.rid).collect();
    assert_eq!(got, vec![rids[0], rids[1], rids[2], rids[4]]);
}

#[test]
fn leaf_invariant_holds_after_each_commit() {
    let mut cx = Context::create_in_memory().unwrap();
    let mut root = root_checkin(1);
    let r1 = cx.save_deck(&mut root, false).unwrap();
    let u1 = root.uuid.clone().unwrap();

    let mut c2 = checkin("second", 2, &[], &[&u1]);
    let r2 = cx.save_deck(&mut c2, false).unwrap();
    let u2 = c2.uuid.clone().unwrap();

    // Fork: two children of r2 on the same branch; both are leaves.
    let mut c3 = checkin("third", 3, &[], &[&u2]);
    let r3 = cx.save_deck(&mut c3, false).unwrap();
    let mut c4 = checkin("fourth", 4, &[], &[&u2]);
    let r4 = cx.save_deck(&mut c4, false).unwrap();

    let leaves = cx.leaves().unwrap();
    assert_eq!(leaves, vec![r3, r4]);
    assert!(!leaves.contains(&r1));

    // Rebuild from first principles and compare.
    let incremental = leaves;
    cx.leaves_rebuild().unwrap();
    assert_eq!(cx.leaves().unwrap(), incremental);
}

#[test]
fn propagating_branch_tag_reaches_new_children() {
    let mut cx = Context::create_in_memory().unwrap();
    let mut root = root_checkin(1);
    let r1 = cx.save_deck(&mut root, false).unwrap();
    let u1 = root.uuid.clone().unwrap();
    let mut child = checkin("on trunk", 2, &[], &[&u1]);
    let r2 = cx.save_deck(&mut child, false).unwrap();

    assert_eq!(cx.branch_of(r2).unwrap(), "trunk");
    // The child's branch tag is a propagated copy (srcid=0), not a
    // direct application.
    let srcid: i64 = cx
        .connection()
        .query_row(
            "SELECT srcid FROM tagxref WHERE rid=?1 AND tagid=?2",
            rusqlite::params![r2, TAGID_BRANCH],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(srcid, 0);
    assert_eq!(cx.branch_of(r1).unwrap(), "trunk");
}

#[test]
fn wiki_and_control_artifacts_crosslink() {
    let mut cx = Context::create_in_memory().unwrap();
    let mut w = Deck::new(ArtifactType::Wiki);
    w.set_mtime(julian(1)).unwrap();
    w.set_wiki_name("Home Page").unwrap();
    w.set_user("editor").unwrap();
    w.set_body("welcome\n").unwrap();
    let w_rid = cx.save_deck(&mut w, false).unwrap();

    let (ty, comment): (String, String) = cx
        .connection()
        .query_row(
            "SELECT type, comment FROM event WHERE objid=?1",
            [w_rid],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(ty, "w");
    assert!(comment.contains("Home Page"));
    assert!(tagxref_row(&cx, w_rid, "wiki-Home Page").is_some());

    // Tag the wiki artifact via a control artifact.
    let ctl = cx
        .tag_rid(TagType::Add, w_rid, "sym-reviewed", None, "qa", Some(julian(2)))
        .unwrap();
    assert_ne!(ctl, w_rid);
    assert_eq!(tagxref_row(&cx, w_rid, "sym-reviewed"), Some((1, None)));
}

#[test]
fn delta_manifest_latch_and_file_merge() {
    let mut cx = Context::create_in_memory().unwrap();
    let f1 = cx.content_put(b"one\n").unwrap();
    let f2 = cx.content_put(b"two\n").unwrap();
    let u_f1 = cx.hash_for_rid(f1).unwrap().unwrap();
    let u_f2 = cx.hash_for_rid(f2).unwrap().unwrap();

    let mut base = checkin(
        "baseline",
        1,
        &[("a.txt", u_f1.as_str()), ("b.txt", u_f1.as_str())],
        &[],
    );
    let base_rid = cx.save_deck(&mut base, false).unwrap();
    let base_uuid = base.uuid.clone().unwrap();
    assert!(!cx.seen_delta_manifest().unwrap());

    // Delta manifest: change a.txt, drop b.txt.
    let mut d = Deck::new(ArtifactType::Checkin);
    d.set_baseline(&base_uuid).unwrap();
    d.set_comment("delta over baseline").unwrap();
    d.set_mtime(julian(2)).unwrap();
    d.set_user("dev").unwrap();
    d.add_file("a.txt", Some(&u_f2), deck::FilePerm::Regular, None).unwrap();
    d.add_file("b.txt", None, deck::FilePerm::Regular, None).unwrap();
    d.add_parent(&base_uuid).unwrap();
    let d_rid = cx.save_deck(&mut d, false).unwrap();

    assert!(cx.seen_delta_manifest().unwrap());

    // mlink of the delta manifest: a.txt edited, b.txt deleted.
    let rows: Vec<(i64, i64, String)> = {
        let conn = cx.connection();
        let mut stmt = conn
            .prepare(
                "SELECT fid, pid, name FROM mlink, filename \
                 WHERE mid=?1 AND mlink.fnid=filename.fnid ORDER BY name",
            )
            .unwrap();
        let r = stmt
            .query_map([d_rid], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap();
        r.collect::<Result<_, _>>().unwrap()
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], (f2, f1, "a.txt".into()));
    assert_eq!(rows[1], (0, f1, "b.txt".into()));
    let _ = base_rid;
}

#[test]
fn rename_tracking_via_mlink() {
    let mut cx = Context::create_in_memory().unwrap();
    let f1 = cx.content_put(b"body\n").unwrap();
    let u_f1 = cx.hash_for_rid(f1).unwrap().unwrap();

    let mut base = checkin("add old name", 1, &[("old.txt", u_f1.as_str())], &[]);
    let r1 = cx.save_deck(&mut base, false).unwrap();
    let u1 = base.uuid.clone().unwrap();

    let mut renamed = Deck::new(ArtifactType::Checkin);
    renamed.set_comment("rename").unwrap();
    renamed.set_mtime(julian(2)).unwrap();
    renamed.set_user("dev").unwrap();
    renamed
        .add_file("new.txt", Some(&u_f1), deck::FilePerm::Regular, Some("old.txt"))
        .unwrap();
    renamed.add_parent(&u1).unwrap();
    let r2 = cx.save_deck(&mut renamed, false).unwrap();

    let changes = cx.find_filename_changes(r1, r2, false).unwrap();
    assert_eq!(changes.len(), 1);
    let (orig, new) = changes[0];
    let name_of = |fnid: i64| -> String {
        cx.connection()
            .query_row("SELECT name FROM filename WHERE fnid=?1", [fnid], |r| r.get(0))
            .unwrap()
    };
    assert_eq!(name_of(orig), "old.txt");
    assert_eq!(name_of(new), "new.txt");
}
