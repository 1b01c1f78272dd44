use super::raw::DiffContext;
use super::{DiffFlags, Edit, Result};

/// Merge-conflict boundary markers. These exact byte sequences are part of
/// the on-disk contract with users' files and tooling and MUST NOT change.
pub const MERGE_MARKER_BEGIN: &str =
    "<<<<<<< BEGIN MERGE CONFLICT: local copy shown first <<<<<<<<<<<<<<<";
pub const MERGE_MARKER_PIVOT: &str =
    "||||||| COMMON ANCESTOR content follows ||||||||||||||||||||||||||||";
pub const MERGE_MARKER_OTHER: &str =
    "======= MERGED IN content follows ==================================";
pub const MERGE_MARKER_END: &str =
    ">>>>>>> END MERGE CONFLICT >>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>";

const MARKERS: [&str; 4] = [
    MERGE_MARKER_BEGIN,
    MERGE_MARKER_PIVOT,
    MERGE_MARKER_OTHER,
    MERGE_MARKER_END,
];

const UTF8_BOM: &[u8] = &[0xef, 0xbb, 0xbf];

/// A byte buffer consumed line by line.
struct LineCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(data: &'a [u8]) -> LineCursor<'a> {
        LineCursor { data, pos: 0 }
    }

    /// Advance past `n` lines, appending them to `out` when given.
    fn copy_lines(&mut self, n: usize, mut out: Option<&mut Vec<u8>>) {
        let start = self.pos;
        let mut taken = 0;
        while taken < n && self.pos < self.data.len() {
            match memchr::memchr(b'\n', &self.data[self.pos..]) {
                Some(i) => self.pos += i + 1,
                None => self.pos = self.data.len(),
            }
            taken += 1;
        }
        if let Some(out) = out.as_deref_mut() {
            out.extend_from_slice(&self.data[start..self.pos]);
        }
    }

    /// Compare the next `n` lines of two cursors without consuming them.
    fn same_lines(a: &LineCursor<'_>, b: &LineCursor<'_>, n: usize) -> bool {
        if n == 0 {
            return true;
        }
        let za = &a.data[a.pos..];
        let zb = &b.data[b.pos..];
        let mut remaining = n;
        let mut i = 0;
        loop {
            let ca = za.get(i).copied();
            let cb = zb.get(i).copied();
            if ca != cb {
                return false;
            }
            match ca {
                None => return true,
                Some(b'\n') => {
                    remaining -= 1;
                    if remaining == 0 {
                        return true;
                    }
                }
                Some(_) => {}
            }
            i += 1;
        }
    }
}

/// True if the triples at the head of both edit vectors describe the exact
/// same edit, inserted text included.
fn same_edit(c1: &[Edit], c2: &[Edit], v1: &LineCursor<'_>, v2: &LineCursor<'_>) -> bool {
    if c1[0].copy != c2[0].copy || c1[0].del != c2[0].del || c1[0].ins != c2[0].ins {
        return false;
    }
    LineCursor::same_lines(v1, v2, c1[0].ins)
}

/// Would advancing over `sz` pivot lines land inside a copy region of this
/// edit vector (true) or inside a delete (false)?
fn ends_at_copy(mut a_c: &[Edit], mut sz: usize) -> bool {
    while sz > 0 && !a_c.is_empty() && (a_c[0].copy > 0 || a_c[0].del > 0 || a_c[0].ins > 0) {
        if a_c[0].copy >= sz {
            return true;
        }
        sz -= a_c[0].copy;
        if a_c[0].del > sz {
            return false;
        }
        sz -= a_c[0].del;
        a_c = &a_c[1..];
    }
    true
}

/// Output the lines of one edited side that correspond to the next `sz`
/// lines of the pivot, consuming edit triples as they are exhausted.
/// Returns the new triple index.
fn output_one_side(
    out: &mut Vec<u8>,
    src: &mut LineCursor<'_>,
    a_c: &mut [Edit],
    mut i: usize,
    mut sz: usize,
) -> usize {
    while sz > 0 {
        if i >= a_c.len() || (a_c[i].copy == 0 && a_c[i].del == 0 && a_c[i].ins == 0) {
            break;
        }
        if a_c[i].copy >= sz {
            src.copy_lines(sz, Some(out));
            a_c[i].copy -= sz;
            break;
        }
        let (copy, ins) = (a_c[i].copy, a_c[i].ins);
        src.copy_lines(copy, Some(out));
        src.copy_lines(ins, Some(out));
        sz -= a_c[i].copy + a_c[i].del;
        i += 1;
    }
    i
}

/// True if `data` has CR/LF pairs within its first ten lines; enough to
/// classify a file without scanning all of it.
fn contains_crlf(data: &[u8]) -> bool {
    let mut lines = 0;
    let mut i = 1;
    while i < data.len() {
        if data[i - 1] == b'\r' && data[i] == b'\n' {
            return true;
        }
        while i < data.len() && data[i] != b'\n' {
            i += 1;
        }
        i += 1;
        lines += 1;
        if lines > 10 {
            break;
        }
    }
    false
}

fn ensure_line_end(out: &mut Vec<u8>, use_crlf: bool) {
    if !out.is_empty() && out.last() != Some(&b'\n') {
        if use_crlf {
            out.extend_from_slice(b"\r\n");
        } else {
            out.push(b'\n');
        }
    }
}

/// The outcome of a 3-way merge: the merged bytes and how many conflict
/// blocks they contain.
#[derive(Debug)]
pub struct Merge {
    pub bytes: Vec<u8>,
    pub conflicts: u32,
}

/// Merge `v1` and `v2`, both derived from the common ancestor `pivot`.
///
/// Regions edited on only one side take that side's edit; identical edits
/// on both sides are emitted once; overlapping, differing edits become a
/// conflict block bracketed by the four fixed marker lines. A leading
/// UTF-8 BOM survives when both sides carry one, and marker lines use
/// CRLF when both sides do.
pub fn merge3(pivot: &[u8], v1: &[u8], v2: &[u8]) -> Result<Merge> {
    let mut out = Vec::new();
    let mut n_conflict = 0u32;

    if v1.starts_with(UTF8_BOM) && v2.starts_with(UTF8_BOM) {
        out.extend_from_slice(UTF8_BOM);
    }
    let use_crlf = contains_crlf(v1) && contains_crlf(v2);

    // Edit vectors pivot=>v1 and pivot=>v2.
    let mut cx1 = DiffContext::new(pivot, v1, DiffFlags::default())?;
    cx1.diff_all();
    cx1.optimize();
    let mut cx2 = DiffContext::new(pivot, v2, DiffFlags::default())?;
    cx2.diff_all();
    cx2.optimize();
    let mut ac1 = cx1.edits;
    let mut ac2 = cx2.edits;

    let mut p_v1 = LineCursor::new(v1);
    let mut p_v2 = LineCursor::new(v2);
    let mut p_pivot = LineCursor::new(pivot);

    let limit1 = ac1.len();
    let limit2 = ac2.len();
    let mut i1 = 0usize;
    let mut i2 = 0usize;

    while i1 < limit1 && i2 < limit2 {
        if ac1[i1].copy > 0 && ac2[i2].copy > 0 {
            // Unchanged in both: emit from the pivot.
            let n_cpy = ac1[i1].copy.min(ac2[i2].copy);
            p_pivot.copy_lines(n_cpy, Some(&mut out));
            p_v1.copy_lines(n_cpy, None);
            p_v2.copy_lines(n_cpy, None);
            ac1[i1].copy -= n_cpy;
            ac2[i2].copy -= n_cpy;
        } else if ac1[i1].copy >= ac2[i2].del
            && ac1[i1].copy > 0
            && ac2[i2].del + ac2[i2].ins > 0
        {
            // V2 edits inside a region V1 left unchanged.
            let n_del = ac2[i2].del;
            let n_ins = ac2[i2].ins;
            p_pivot.copy_lines(n_del, None);
            p_v1.copy_lines(n_del, None);
            p_v2.copy_lines(n_ins, Some(&mut out));
            ac1[i1].copy -= n_del;
            i2 += 1;
        } else if ac2[i2].copy >= ac1[i1].del
            && ac2[i2].copy > 0
            && ac1[i1].del + ac1[i1].ins > 0
        {
            // V1 edits inside a region V2 left unchanged.
            let n_del = ac1[i1].del;
            let n_ins = ac1[i1].ins;
            p_pivot.copy_lines(n_del, None);
            p_v2.copy_lines(n_del, None);
            p_v1.copy_lines(n_ins, Some(&mut out));
            ac2[i2].copy -= n_del;
            i1 += 1;
        } else if same_edit(&ac1[i1..], &ac2[i2..], &p_v1, &p_v2) {
            // Both sides made the identical edit: emit it once.
            let n_del = ac1[i1].del;
            let n_ins = ac1[i1].ins;
            p_pivot.copy_lines(n_del, None);
            p_v1.copy_lines(n_ins, Some(&mut out));
            p_v2.copy_lines(n_ins, None);
            i1 += 1;
            i2 += 1;
        } else {
            // Different overlapping edits: a conflict. Grow the region
            // until both edit vectors land back on copies.
            let mut sz = 1usize;
            n_conflict += 1;
            while !ends_at_copy(&ac1[i1..], sz) || !ends_at_copy(&ac2[i2..], sz) {
                sz += 1;
            }
            ensure_line_end(&mut out, use_crlf);
            out.extend_from_slice(MERGE_MARKER_BEGIN.as_bytes());
            ensure_line_end(&mut out, use_crlf);
            i1 = output_one_side(&mut out, &mut p_v1, &mut ac1, i1, sz);
            ensure_line_end(&mut out, use_crlf);
            out.extend_from_slice(MERGE_MARKER_PIVOT.as_bytes());
            ensure_line_end(&mut out, use_crlf);
            p_pivot.copy_lines(sz, Some(&mut out));
            ensure_line_end(&mut out, use_crlf);
            out.extend_from_slice(MERGE_MARKER_OTHER.as_bytes());
            ensure_line_end(&mut out, use_crlf);
            i2 = output_one_side(&mut out, &mut p_v2, &mut ac2, i2, sz);
            ensure_line_end(&mut out, use_crlf);
            out.extend_from_slice(MERGE_MARKER_END.as_bytes());
            ensure_line_end(&mut out, use_crlf);
        }

        if i1 < limit1 && ac1[i1].copy == 0 && ac1[i1].del == 0 && ac1[i1].ins == 0 {
            i1 += 1;
        }
        if i2 < limit2 && ac2[i2].copy == 0 && ac2[i2].del == 0 && ac2[i2].ins == 0 {
            i2 += 1;
        }
    }

    // One vector may end while the other still holds a trailing insert.
    if i1 < limit1 && ac1[i1].ins > 0 {
        p_v1.copy_lines(ac1[i1].ins, Some(&mut out));
    } else if i2 < limit2 && ac2[i2].ins > 0 {
        p_v2.copy_lines(ac2[i2].ins, Some(&mut out));
    }

    Ok(Merge {
        bytes: out,
        conflicts: n_conflict,
    })
}

/// Report whether any of the four conflict markers appears on a line by
/// itself. Used to refuse commits of unresolved merges.
pub fn contains_merge_marker(data: &[u8]) -> bool {
    let len = MERGE_MARKER_BEGIN.len();
    if data.len() <= len {
        return false;
    }
    let n = data.len() - len + 1;
    let mut i = 0;
    while i < n {
        for marker in MARKERS {
            if data[i..].starts_with(marker.as_bytes())
                && (i + len == data.len() || data[i + len] == b'\n' || data[i + len] == b'\r')
            {
                return true;
            }
        }
        while i < n && data[i] != b'\n' {
            i += 1;
        }
        while i < n && (data[i] == b'\n' || data[i] == b'\r') {
            i += 1;
        }
    }
    false
}
