use super::dline::{same_dline, same_dline_ignore_allws, DLine, SameFn};
use super::{DiffFlags, Edit, Result};

/// Working state for computing a raw diff: both inputs broken into hashed
/// lines, plus the growing edit vector.
pub(crate) struct DiffContext<'a> {
    pub from: Vec<DLine<'a>>,
    pub to: Vec<DLine<'a>>,
    pub edits: Vec<Edit>,
    same: SameFn,
}

impl<'a> DiffContext<'a> {
    pub fn new(from: &'a [u8], to: &'a [u8], flags: DiffFlags) -> Result<DiffContext<'a>> {
        let same: SameFn = if flags.ignore_all_ws {
            same_dline_ignore_allws
        } else {
            same_dline
        };
        Ok(DiffContext {
            from: super::dline::break_into_lines(from, flags)?,
            to: super::dline::break_into_lines(to, flags)?,
            edits: Vec::new(),
            same,
        })
    }

    pub fn same(&self, a: &DLine<'_>, b: &DLine<'_>) -> bool {
        (self.same)(a, b)
    }

    /// Append a copy/delete/insert triple, merging with the tail where the
    /// tail leaves room (a zero-insert tail absorbs, a zero-copy head
    /// folds into a pending delete/insert pair).
    fn append_triple(&mut self, n_copy: usize, n_del: usize, n_ins: usize) {
        if let Some(last) = self.edits.last_mut() {
            if last.ins == 0 {
                if last.del == 0 {
                    last.copy += n_copy;
                    last.del += n_del;
                    last.ins += n_ins;
                    return;
                }
                if n_copy == 0 {
                    last.del += n_del;
                    last.ins += n_ins;
                    return;
                }
            }
            if n_copy == 0 && n_del == 0 {
                last.ins += n_ins;
                return;
            }
        }
        self.edits.push(Edit {
            copy: n_copy,
            del: n_del,
            ins: n_ins,
        });
    }

    /// Exhaustive O(N*N) longest-common-subsequence search, used when the
    /// hash heuristic finds nothing and the remaining window is small.
    fn optimal_lcs(
        &self,
        is1: usize,
        ie1: usize,
        is2: usize,
        ie2: usize,
    ) -> (usize, usize, usize, usize) {
        let mut mx_length = 0;
        let mut isx = is1;
        let mut isy = is2;
        let mut i = is1;
        while i + mx_length < ie1 {
            let mut j = is2;
            while j + mx_length < ie2 {
                if !self.same(&self.from[i], &self.to[j]) {
                    j += 1;
                    continue;
                }
                if mx_length > 0 && !self.same(&self.from[i + mx_length], &self.to[j + mx_length]) {
                    j += 1;
                    continue;
                }
                let mut k = 1;
                while i + k < ie1 && j + k < ie2 && self.same(&self.from[i + k], &self.to[j + k]) {
                    k += 1;
                }
                if k > mx_length {
                    isx = i;
                    isy = j;
                    mx_length = k;
                }
                j += 1;
            }
            i += 1;
        }
        (isx, isx + mx_length, isy, isy + mx_length)
    }

    /// Locate a block of common lines between `from[is1..ie1]` and
    /// `to[is2..ie2]`, preferring long blocks near the center of the span.
    ///
    /// This is an O(N) hash-bucket heuristic scored by
    /// `len*span - (skew + distance-from-center)`; it falls back to the
    /// exhaustive search when it finds nothing and `n1*n2 < 400`.
    fn longest_common_sequence(
        &self,
        is1: usize,
        ie1: usize,
        is2: usize,
        ie2: usize,
    ) -> (usize, usize, usize, usize) {
        let span = (ie1 - is1) + (ie2 - is2);
        let mut best_score: i64 = -10000;
        // Best match so far, and the previous (non-best) match used to
        // suppress rescanning inside an already-extended block.
        let (mut isxb, mut iexb, mut isyb, mut ieyb) = (is1, is1, is2, is2);
        let (mut iexp, mut isyp, mut ieyp) = (is1, is2, is2);
        let mid = (ie1 + is1) / 2;

        let n_to = self.to.len();
        for i in is1..ie1 {
            let mut limit = 0;
            let mut j = self.to[self.from[i].h as usize % n_to].i_hash as usize;
            while j > 0 && (j - 1 < is2 || j > ie2 || !self.same(&self.from[i], &self.to[j - 1])) {
                limit += 1;
                if limit > 10 {
                    j = 0;
                    break;
                }
                j = self.to[j - 1].i_next as usize;
            }
            if j == 0 {
                continue;
            }
            if i < iexb && j >= isyb && j < ieyb {
                continue;
            }
            if i < iexp && j >= isyp && j < ieyp {
                continue;
            }
            let mut isx = i;
            let mut isy = j - 1;
            let n = (isx - is1).min(isy - is2);
            let mut k = 0;
            while k < n && self.same(&self.from[isx - 1], &self.to[isy - 1]) {
                isx -= 1;
                isy -= 1;
                k += 1;
            }
            let mut iex = i + 1;
            let mut iey = j;
            let n = (ie1 - iex).min(ie2 - iey);
            let mut k = 0;
            while k < n && self.same(&self.from[iex], &self.to[iey]) {
                iex += 1;
                iey += 1;
                k += 1;
            }
            let skew = (isx - is1) as i64 - (isy - is2) as i64;
            let skew = skew.abs();
            let dist = ((isx + iex) / 2) as i64 - mid as i64;
            let dist = dist.abs();
            let score = (iex - isx) as i64 * span as i64 - (skew + dist);
            if score > best_score {
                best_score = score;
                isxb = isx;
                isyb = isy;
                iexb = iex;
                ieyb = iey;
            } else if iex > iexp {
                isyp = isy;
                iexp = iex;
                ieyp = iey;
            }
        }
        if isxb == iexb && ((ie1 - is1) as u64) * ((ie2 - is2) as u64) < 400 {
            self.optimal_lcs(is1, ie1, is2, ie2)
        } else {
            (isxb, iexb, isyb, ieyb)
        }
    }

    /// Divide-and-conquer step: find a common block near the middle, then
    /// recurse on the text before and after it.
    fn diff_step(&mut self, is1: usize, ie1: usize, is2: usize, ie2: usize) {
        if ie1 <= is1 {
            if ie2 > is2 {
                self.append_triple(0, 0, ie2 - is2);
            }
            return;
        }
        if ie2 <= is2 {
            self.append_triple(0, ie1 - is1, 0);
            return;
        }
        let (isx, iex, isy, iey) = self.longest_common_sequence(is1, ie1, is2, ie2);
        if iex > isx {
            self.diff_step(is1, isx, is2, isy);
            self.append_triple(iex - isx, 0, 0);
            self.diff_step(iex, ie1, iey, ie2);
        } else {
            // Nothing in common: delete everything then insert everything.
            self.append_triple(0, ie1 - is1, ie2 - is2);
        }
    }

    /// Compute the full edit vector. Common prefixes and suffixes are
    /// carved off before the divide-and-conquer walk. The result is not a
    /// minimal edit script, just one that reads well.
    pub fn diff_all(&mut self) {
        let mut ie1 = self.from.len();
        let mut ie2 = self.to.len();
        while ie1 > 0 && ie2 > 0 && self.same(&self.from[ie1 - 1], &self.to[ie2 - 1]) {
            ie1 -= 1;
            ie2 -= 1;
        }
        let mn_e = ie1.min(ie2);
        let mut is = 0;
        while is < mn_e && self.same(&self.from[is], &self.to[is]) {
            is += 1;
        }

        if is > 0 {
            self.append_triple(is, 0, 0);
        }
        self.diff_step(is, ie1, is, ie2);
        if ie1 < self.from.len() {
            self.append_triple(self.from.len() - ie1, 0, 0);
        }
    }

    /// Shift insert/delete block boundaries onto short (whitespace-ish)
    /// lines when doing so keeps line counts intact, so that hunks break
    /// at blank lines instead of mid-construct.
    pub fn optimize(&mut self) {
        let mut ln_from = 0usize;
        let mut ln_to = 0usize;
        for r in 0..self.edits.len() {
            let Edit { mut copy, del, ins } = self.edits[r];
            ln_from += copy;
            ln_to += copy;

            // Shift insertions toward the beginning of the file.
            while copy > 0 && del == 0 && ins > 0 && r + 1 < self.edits.len() {
                let top = &self.from[ln_from - 1];
                let btm = &self.to[ln_to + ins - 1];
                if !self.same(top, btm) {
                    break;
                }
                if self.from[ln_from].len() + btm.len() <= top.len() + self.to[ln_to + ins - 2].len() {
                    break;
                }
                ln_from -= 1;
                ln_to -= 1;
                self.edits[r].copy -= 1;
                self.edits[r + 1].copy += 1;
                copy -= 1;
            }

            // Shift insertions toward the end of the file.
            while r + 1 < self.edits.len() && self.edits[r + 1].copy > 0 && del == 0 && ins > 0 {
                let top = &self.to[ln_to];
                let btm = &self.to[ln_to + ins];
                if !self.same(top, btm) {
                    break;
                }
                if top.len() + self.to[ln_to + ins - 1].len() <= self.to[ln_to + 1].len() + btm.len() {
                    break;
                }
                ln_from += 1;
                ln_to += 1;
                self.edits[r].copy += 1;
                self.edits[r + 1].copy -= 1;
                copy += 1;
            }

            // Shift deletions toward the beginning of the file.
            while copy > 0 && del > 0 && ins == 0 && r + 1 < self.edits.len() {
                let top = &self.from[ln_from - 1];
                let btm = &self.from[ln_from + del - 1];
                if !self.same(top, btm) {
                    break;
                }
                if self.from[ln_from].len() + btm.len() <= top.len() + self.from[ln_from + del - 2].len() {
                    break;
                }
                ln_from -= 1;
                ln_to -= 1;
                self.edits[r].copy -= 1;
                self.edits[r + 1].copy += 1;
                copy -= 1;
            }

            // Shift deletions toward the end of the file.
            while r + 1 < self.edits.len() && self.edits[r + 1].copy > 0 && del > 0 && ins == 0 {
                let top = &self.from[ln_from];
                let btm = &self.from[ln_from + del];
                if !self.same(top, btm) {
                    break;
                }
                if top.len() + self.from[ln_from + del - 1].len() <= top.len() + btm.len() {
                    break;
                }
                ln_from += 1;
                ln_to += 1;
                self.edits[r].copy += 1;
                self.edits[r + 1].copy -= 1;
                copy += 1;
            }

            ln_from += self.edits[r].del;
            ln_to += self.edits[r].ins;
        }
    }
}
