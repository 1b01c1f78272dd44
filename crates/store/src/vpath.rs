use crate::bag::IdBag;
use crate::{Context, Error, Result, Rid};

/// One node of a computed path through the checkin DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    pub rid: Rid,
    /// True when the edge into this node was followed parent-to-child;
    /// false when it was traversed against the arrow (possible unless the
    /// search was one-way).
    pub from_is_parent: bool,
}

/// Shortest path between two checkins, ordered start to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first(&self) -> Option<&PathStep> {
        self.steps.first()
    }

    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// The node halfway along, or None for paths shorter than two steps.
    pub fn midpoint(&self) -> Option<&PathStep> {
        if self.steps.len() < 2 {
            return None;
        }
        self.steps.get(self.steps.len() - 1 - self.steps.len() / 2)
    }
}

/// Search-tree node. Links are arena indices; `peer` chains the nodes of
/// one breadth-first generation, `from` points at the node this one was
/// discovered through, and `to` is filled in by the final reverse pass.
#[derive(Clone, Copy)]
struct Node {
    rid: Rid,
    from: Option<u32>,
    from_is_parent: bool,
    peer: Option<u32>,
    to: Option<u32>,
}

struct SearchState {
    nodes: Vec<Node>,
    seen: IdBag,
    current: Option<u32>,
}

impl SearchState {
    fn new_node(&mut self, rid: Rid, from: Option<u32>, is_parent: bool) -> Option<u32> {
        if !self.seen.insert(rid) {
            return None;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(Node {
            rid,
            from,
            from_is_parent: from.is_some() && is_parent,
            peer: self.current,
            to: None,
        });
        self.current = Some(id);
        Some(id)
    }

    /// Relink `to` pointers from start to `end`, then collect the ordered
    /// steps.
    fn reverse_into_path(mut self, end: u32) -> Path {
        let mut cursor = end;
        while let Some(from) = self.nodes[cursor as usize].from {
            self.nodes[from as usize].to = Some(cursor);
            cursor = from;
        }
        self.nodes[end as usize].to = None;

        let mut steps = Vec::new();
        let mut walk = Some(cursor);
        while let Some(i) = walk {
            let n = &self.nodes[i as usize];
            steps.push(PathStep {
                rid: n.rid,
                from_is_parent: n.from_is_parent,
            });
            walk = n.to;
        }
        Path { steps }
    }
}

impl Context {
    /// Find a shortest path from `from` to `to` through `plink` edges.
    ///
    /// A bidirectional sweep: each generation expands every frontier node
    /// to its children and (unless `one_way`) its parents. `direct_only`
    /// restricts the walk to primary edges, excluding merge parents.
    /// Returns `None` when the two checkins are unconnected.
    pub fn shortest_path(
        &mut self,
        from: Rid,
        to: Rid,
        direct_only: bool,
        one_way: bool,
    ) -> Result<Option<Path>> {
        if from <= 0 {
            return Err(Error::Range(format!("invalid 'from' RID: {from}")));
        }
        if to <= 0 {
            return Err(Error::Range(format!("invalid 'to' RID: {to}")));
        }

        let mut state = SearchState {
            nodes: Vec::new(),
            seen: IdBag::new(),
            current: None,
        };
        let start = state.new_node(from, None, false).expect("first insert");
        if from == to {
            return Ok(Some(state.reverse_into_path(start)));
        }

        let sql = match (one_way, direct_only) {
            (true, true) => "SELECT cid, 1 FROM plink WHERE pid=?1 AND isprim",
            (true, false) => "SELECT cid, 1 FROM plink WHERE pid=?1",
            (false, true) => {
                "SELECT cid, 1 FROM plink WHERE pid=?1 AND isprim \
                 UNION ALL \
                 SELECT pid, 0 FROM plink WHERE cid=?1 AND isprim"
            }
            (false, false) => {
                "SELECT cid, 1 FROM plink WHERE pid=?1 \
                 UNION ALL \
                 SELECT pid, 0 FROM plink WHERE cid=?1"
            }
        };

        while state.current.is_some() {
            let mut prev = state.current.take();
            while let Some(p) = prev {
                let p_rid = state.nodes[p as usize].rid;
                let edges: Vec<(Rid, bool)> = {
                    let mut stmt = self.db.conn.prepare_cached(sql)?;
                    let rows = stmt.query_map([p_rid], |r| {
                        Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)? != 0))
                    })?;
                    rows.collect::<std::result::Result<_, _>>()?
                };
                for (rid, is_parent) in edges {
                    if state.seen.contains(rid) {
                        continue;
                    }
                    let node = state
                        .new_node(rid, Some(p), is_parent)
                        .expect("seen-check precedes insert");
                    if rid == to {
                        return Ok(Some(state.reverse_into_path(node)));
                    }
                }
                prev = state.nodes[p as usize].peer;
            }
        }
        Ok(None)
    }

    /// Compute the filename-id renames along the path `from` -> `to`:
    /// pairs of (original name id, final name id). `rev_ok` permits the
    /// path to traverse edges child-to-parent.
    pub fn find_filename_changes(
        &mut self,
        from: Rid,
        to: Rid,
        rev_ok: bool,
    ) -> Result<Vec<(i64, i64)>> {
        if from <= 0 || to <= 0 {
            return Err(Error::Range(format!("invalid RID pair ({from}, {to})")));
        }
        if from == to {
            return Ok(Vec::new());
        }
        let path = match self.shortest_path(from, to, true, !rev_ok)? {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };

        // Running rename chains: (orig, cur, new) name ids.
        let mut all: Vec<(i64, i64, i64)> = Vec::new();
        let steps = path.steps();
        for (i, step) in steps.iter().enumerate() {
            let next_is_parent = steps.get(i + 1).map(|s| s.from_is_parent).unwrap_or(true);
            if !step.from_is_parent && next_is_parent {
                // This node's parent is not on the path; its mlink rows
                // describe an unrelated edge.
                continue;
            }
            let rows: Vec<(i64, i64)> = {
                let mut stmt = self.db.conn.prepare_cached(
                    "SELECT pfnid, fnid FROM mlink \
                     WHERE mid=?1 AND (pfnid>0 OR fid=0) \
                     ORDER BY pfnid",
                )?;
                let rows = stmt
                    .query_map([step.rid], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?;
                rows.collect::<std::result::Result<_, _>>()?
            };
            for (mut pfnid, mut fnid) in rows {
                if pfnid == 0 {
                    pfnid = fnid;
                    fnid = 0;
                }
                if !step.from_is_parent {
                    std::mem::swap(&mut fnid, &mut pfnid);
                }
                match all.iter_mut().find(|(_, cur, _)| *cur == pfnid) {
                    Some(chng) => chng.2 = fnid,
                    None if fnid > 0 => all.push((pfnid, pfnid, fnid)),
                    None => {}
                }
            }
            for chng in &mut all {
                chng.1 = chng.2;
            }
        }

        Ok(all
            .into_iter()
            .filter(|&(orig, _, new)| orig != 0 && new != 0)
            .map(|(orig, _, new)| (orig, new))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rusqlite::params;

    /// Seed a synthetic DAG by direct plink/blob inserts.
    fn seed(cx: &mut Context, edges: &[(Rid, Rid, bool)]) {
        let max = edges.iter().flat_map(|&(p, c, _)| [p, c]).max().unwrap();
        for rid in 1..=max {
            cx.db
                .exec(
                    "INSERT OR IGNORE INTO blob(rid, uuid, size, content) \
                     VALUES(?1, printf('%040d', ?1), 0, zeroblob(0))",
                    [rid],
                )
                .unwrap();
        }
        for &(pid, cid, isprim) in edges {
            cx.db
                .exec(
                    "INSERT INTO plink(pid, cid, isprim, mtime) VALUES(?1, ?2, ?3, ?2)",
                    params![pid, cid, isprim],
                )
                .unwrap();
        }
    }

    fn rids(path: &Path) -> Vec<Rid> {
        path.steps().iter().map(|s| s.rid).collect()
    }

    #[test]
    fn shortest_path_prefers_merge_edges_unless_direct_only() {
        let mut cx = Context::create_in_memory().unwrap();
        // Linear 1->2->3->4->5 plus merge edge 3->5.
        seed(
            &mut cx,
            &[(1, 2, true), (2, 3, true), (3, 4, true), (4, 5, true), (3, 5, false)],
        );
        let direct = cx.shortest_path(1, 5, true, false).unwrap().unwrap();
        assert_eq!(rids(&direct), vec![1, 2, 3, 4, 5]);
        let any = cx.shortest_path(1, 5, false, false).unwrap().unwrap();
        assert_eq!(rids(&any), vec![1, 2, 3, 5]);
    }

    #[test]
    fn one_way_refuses_to_climb() {
        let mut cx = Context::create_in_memory().unwrap();
        // A fork: 1->2, 1->3. Reaching 3 from 2 requires going up.
        seed(&mut cx, &[(1, 2, true), (1, 3, true)]);
        assert!(cx.shortest_path(2, 3, true, true).unwrap().is_none());
        let p = cx.shortest_path(2, 3, true, false).unwrap().unwrap();
        assert_eq!(rids(&p), vec![2, 1, 3]);
        assert!(!p.steps()[1].from_is_parent);
    }

    #[test]
    fn trivial_and_invalid_inputs() {
        let mut cx = Context::create_in_memory().unwrap();
        seed(&mut cx, &[(1, 2, true)]);
        let p = cx.shortest_path(2, 2, false, false).unwrap().unwrap();
        assert_eq!(rids(&p), vec![2]);
        assert!(matches!(cx.shortest_path(0, 2, false, false), Err(Error::Range(_))));
        assert!(matches!(cx.shortest_path(1, -3, false, false), Err(Error::Range(_))));
    }

    #[test]
    fn midpoint_lands_in_the_middle() {
        let mut cx = Context::create_in_memory().unwrap();
        seed(&mut cx, &[(1, 2, true), (2, 3, true), (3, 4, true), (4, 5, true)]);
        let p = cx.shortest_path(1, 5, true, true).unwrap().unwrap();
        assert_eq!(p.midpoint().unwrap().rid, 3);
    }

    #[test]
    fn filename_changes_track_renames_along_path() {
        let mut cx = Context::create_in_memory().unwrap();
        seed(&mut cx, &[(1, 2, true), (2, 3, true)]);
        for (fnid, name) in [(1, "old.txt"), (2, "mid.txt"), (3, "new.txt")] {
            cx.db
                .exec("INSERT INTO filename(fnid, name) VALUES(?1, ?2)", params![fnid, name])
                .unwrap();
        }
        // Checkin 2 renames old.txt -> mid.txt; checkin 3 renames
        // mid.txt -> new.txt.
        cx.db
            .exec(
                "INSERT INTO mlink(mid, fid, pid, fnid, pfnid, mperm) VALUES(2, 91, 90, 2, 1, 0)",
                [],
            )
            .unwrap();
        cx.db
            .exec(
                "INSERT INTO mlink(mid, fid, pid, fnid, pfnid, mperm) VALUES(3, 92, 91, 3, 2, 0)",
                [],
            )
            .unwrap();
        let changes = cx.find_filename_changes(1, 3, false).unwrap();
        assert_eq!(changes, vec![(1, 3)]);
    }
}
