//! Line-oriented text diff and 3-way merge.
//!
//! Inputs are hashed line by line, diffed with a divide-and-conquer
//! longest-common-sequence heuristic, and rendered as raw edit triples,
//! context diffs (plain, HTML, or ANSI color), or side-by-side columns.
//! The same raw triples drive [`merge3`].

mod dline;
mod merge;
mod raw;
mod render;
mod sbs;

pub use merge::{
    contains_merge_marker, merge3, Merge, MERGE_MARKER_BEGIN, MERGE_MARKER_END,
    MERGE_MARKER_OTHER, MERGE_MARKER_PIVOT,
};
pub use render::{RenderOptions, Style};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The input contains a NUL byte or a line over 8191 bytes and is
    /// treated as binary rather than line-diffable text.
    #[error("input is binary and cannot be diffed by line")]
    Binary,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Flags adjusting line hashing and equality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffFlags {
    /// Ignore trailing whitespace when comparing lines.
    pub ignore_eol_ws: bool,
    /// Ignore all whitespace when comparing lines.
    pub ignore_all_ws: bool,
    /// Strip a trailing CR from each line before anything else.
    pub strip_eol_cr: bool,
}

/// One copy/delete/insert step of a raw diff: `copy` lines shared by both
/// sides, then `del` lines only in the old text, then `ins` lines only in
/// the new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub copy: usize,
    pub del: usize,
    pub ins: usize,
}

/// A computed line diff between two texts, ready for rendering.
pub struct Diff<'a> {
    cx: raw::DiffContext<'a>,
}

impl<'a> Diff<'a> {
    /// Diff `from` against `to`. Edit boundaries are shifted onto
    /// whitespace-ish lines for readability; the raw triples still satisfy
    /// the count invariants.
    pub fn compute(from: &'a [u8], to: &'a [u8], flags: DiffFlags) -> Result<Diff<'a>> {
        let mut cx = raw::DiffContext::new(from, to, flags)?;
        cx.diff_all();
        cx.optimize();
        Ok(Diff { cx })
    }

    /// The raw copy/delete/insert vector.
    pub fn edits(&self) -> &[Edit] {
        &self.cx.edits
    }

    /// Render as a context diff with `@@` hunk headers.
    pub fn unified(&self, opts: &RenderOptions) -> String {
        render::context_diff(&self.cx, opts)
    }

    /// Render as aligned side-by-side columns.
    pub fn side_by_side(&self, opts: &RenderOptions) -> String {
        sbs::sbs_diff(&self.cx, opts)
    }
}

/// Compute just the raw edit triples of `from` vs `to`.
pub fn diff_raw(from: &[u8], to: &[u8], flags: DiffFlags) -> Result<Vec<Edit>> {
    Ok(Diff::compute(from, to, flags)?.cx.edits)
}

#[cfg(test)]
mod test {
    use super::*;

    const FROM: &[u8] = b"one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten\n";
    const TO: &[u8] = b"one\ntwo\n3\nfour\nfive\nsix\nseven\neight\nNINE\nten\n";

    #[test]
    fn triple_sums_account_for_both_sides() {
        let edits = diff_raw(FROM, TO, DiffFlags::default()).unwrap();
        let from_lines: usize = edits.iter().map(|e| e.copy + e.del).sum();
        let to_lines: usize = edits.iter().map(|e| e.copy + e.ins).sum();
        assert_eq!(from_lines, 10);
        assert_eq!(to_lines, 10);
    }

    #[test]
    fn unified_rendering() {
        let diff = Diff::compute(FROM, TO, DiffFlags::default()).unwrap();
        insta::assert_snapshot!(diff.unified(&RenderOptions { context: 2, ..Default::default() }), @r###"
        @@ -1,5 +1,5 @@
         one
         two
        -three
        +3
         four
         five
        @@ -7,4 +7,4 @@
         seven
         eight
        -nine
        +NINE
         ten
        "###);
    }

    #[test]
    fn identical_inputs_have_no_rendered_diff() {
        let diff = Diff::compute(FROM, FROM, DiffFlags::default()).unwrap();
        assert_eq!(diff.unified(&RenderOptions::default()), "");
    }

    #[test]
    fn empty_versus_content() {
        let edits = diff_raw(b"", b"a\nb\n", DiffFlags::default()).unwrap();
        assert_eq!(edits, vec![Edit { copy: 0, del: 0, ins: 2 }]);

        let edits = diff_raw(b"a\nb\n", b"", DiffFlags::default()).unwrap();
        assert_eq!(edits, vec![Edit { copy: 0, del: 2, ins: 0 }]);
    }

    #[test]
    fn binary_input_is_rejected() {
        assert_eq!(diff_raw(b"a\0b\n", b"a\n", DiffFlags::default()), Err(Error::Binary));
    }

    #[test]
    fn whitespace_flags_suppress_noise() {
        let edits = diff_raw(b"fn main() {\n", b"fn main() {   \n", DiffFlags {
            ignore_eol_ws: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(edits, vec![Edit { copy: 1, del: 0, ins: 0 }]);
    }

    #[test]
    fn side_by_side_pairs_changed_lines() {
        let diff = Diff::compute(b"alpha\nbeta\ngamma\n", b"alpha\nBETA\ngamma\n", DiffFlags::default()).unwrap();
        let sbs = diff.side_by_side(&RenderOptions { context: 1, width: 10, ..Default::default() });
        assert!(sbs.contains(" | "), "changed line should align as a pair:\n{sbs}");
        assert!(sbs.contains("beta"));
        assert!(sbs.contains("BETA"));
    }

    #[test]
    fn merge_scenario_with_conflict() {
        let pivot = b"line1\nline2\nline3\n";
        let v1 = b"line1\nLINE2A\nline3\n";
        let v2 = b"line1\nLINE2B\nline3\n";
        let merged = merge3(pivot, v1, v2).unwrap();
        assert_eq!(merged.conflicts, 1);
        let expect = "line1\n\
            <<<<<<< BEGIN MERGE CONFLICT: local copy shown first <<<<<<<<<<<<<<<\n\
            LINE2A\n\
            ||||||| COMMON ANCESTOR content follows ||||||||||||||||||||||||||||\n\
            line2\n\
            ======= MERGED IN content follows ==================================\n\
            LINE2B\n\
            >>>>>>> END MERGE CONFLICT >>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>\n\
            line3\n";
        assert_eq!(String::from_utf8(merged.bytes).unwrap(), expect);
        assert!(contains_merge_marker(expect.as_bytes()));
    }

    #[test]
    fn merge_is_idempotent() {
        let pivot = b"a\nb\nc\n";
        let v = b"a\nB\nc\n";
        let merged = merge3(pivot, v, v).unwrap();
        assert_eq!(merged.conflicts, 0);
        assert_eq!(merged.bytes, v);
    }

    #[test]
    fn merge_takes_the_only_edited_side() {
        let pivot = b"a\nb\nc\n";
        let v1 = b"a\nB\nc\n";
        let merged = merge3(pivot, v1, pivot).unwrap();
        assert_eq!(merged.conflicts, 0);
        assert_eq!(merged.bytes, v1);

        let merged = merge3(pivot, pivot, v1).unwrap();
        assert_eq!(merged.conflicts, 0);
        assert_eq!(merged.bytes, v1);
    }

    #[test]
    fn merge_preserves_bom_and_crlf() {
        let pivot = b"\xef\xbb\xbfa\r\nb\r\nc\r\n";
        let v1 = b"\xef\xbb\xbfA1\r\nb\r\nc\r\n";
        let v2 = b"\xef\xbb\xbfA2\r\nb\r\nc\r\n";
        let merged = merge3(pivot, v1, v2).unwrap();
        assert_eq!(merged.conflicts, 1);
        assert!(merged.bytes.starts_with(b"\xef\xbb\xbf"));
        let text = String::from_utf8(merged.bytes).unwrap();
        assert!(text.contains(&format!("{MERGE_MARKER_BEGIN}\r\n")));
    }

    #[test]
    fn marker_must_sit_on_its_own_line() {
        let embedded = format!("prefix {MERGE_MARKER_BEGIN}\nrest\n");
        assert!(!contains_merge_marker(embedded.as_bytes()));
        let alone = format!("{MERGE_MARKER_END}\n");
        assert!(contains_merge_marker(alone.as_bytes()));
    }
}
