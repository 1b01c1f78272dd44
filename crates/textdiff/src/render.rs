use super::dline::DLine;
use super::raw::DiffContext;
use super::Edit;
use std::fmt::Write;

/// Output styling for rendered diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    #[default]
    Plain,
    Html,
    Ansi,
}

/// Options controlling rendered (non-raw) diff output.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Lines of context around each change block.
    pub context: usize,
    /// Prefix each line with its old/new line numbers.
    pub line_numbers: bool,
    pub style: Style,
    /// Column width for side-by-side output.
    pub width: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            context: 5,
            line_numbers: false,
            style: Style::Plain,
            width: 80,
        }
    }
}

const ANSI_ADD: &str = "\x1b[32m";
const ANSI_RM: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

fn htmlize(out: &mut String, z: &[u8]) {
    for &c in z {
        match c {
            b'<' => out.push_str("&lt;"),
            b'>' => out.push_str("&gt;"),
            b'&' => out.push_str("&amp;"),
            b'"' => out.push_str("&quot;"),
            _ => out.push(c as char),
        }
    }
}

fn append_line(out: &mut String, prefix: char, line: &DLine<'_>, opts: &RenderOptions) {
    let ansi = match (opts.style, prefix) {
        (Style::Ansi, '+') => Some(ANSI_ADD),
        (Style::Ansi, '-') => Some(ANSI_RM),
        _ => None,
    };
    if let Some(color) = ansi {
        out.push_str(color);
    }
    out.push(prefix);
    if opts.style == Style::Html {
        match prefix {
            '+' => out.push_str("<span class=\"diff-add\">"),
            '-' => out.push_str("<span class=\"diff-rm\">"),
            _ => {}
        }
        htmlize(out, line.z);
        if prefix != ' ' {
            out.push_str("</span>");
        }
    } else {
        out.push_str(&String::from_utf8_lossy(line.z));
    }
    if ansi.is_some() {
        out.push_str(ANSI_RESET);
    }
    out.push('\n');
}

fn append_lineno(out: &mut String, ln_a: usize, ln_b: usize, opts: &RenderOptions) {
    if opts.style == Style::Html {
        out.push_str("<span class=\"diff-lineno\">");
    }
    if ln_a > 0 {
        write!(out, "{:6} ", ln_a).unwrap();
    } else {
        out.push_str("       ");
    }
    if ln_b > 0 {
        write!(out, "{:6}  ", ln_b).unwrap();
    } else {
        out.push_str("        ");
    }
    if opts.style == Style::Html {
        out.push_str("</span>");
    }
}

/// Render a context diff (`@@ -a,na +b,nb @@` hunks).
pub(crate) fn context_diff(cx: &DiffContext<'_>, opts: &RenderOptions) -> String {
    let a_lines = &cx.from;
    let b_lines = &cx.to;
    let r: &[Edit] = &cx.edits;
    let n_context = opts.context;
    let mut out = String::new();

    let mut a = 0usize; // Next line of a_lines
    let mut b = 0usize; // Next line of b_lines
    let mut show_divider = false;

    // Trailing all-copy triples never render.
    let mut mxr = r.len();
    while mxr > 0 && r[mxr - 1].del == 0 && r[mxr - 1].ins == 0 {
        mxr -= 1;
    }

    let mut ri = 0usize;
    while ri < mxr {
        // Gather triples whose separating copies are small enough to share
        // one block.
        let mut nr = 1;
        while ri + nr < mxr && r[ri + nr].copy > 0 && r[ri + nr].copy < n_context * 2 {
            nr += 1;
        }

        // Lines of each side shown in this block.
        let (mut na, mut nb, skip);
        if r[ri].copy > n_context {
            na = n_context;
            nb = n_context;
            skip = r[ri].copy - n_context;
        } else {
            na = r[ri].copy;
            nb = r[ri].copy;
            skip = 0;
        }
        for i in 0..nr {
            na += r[ri + i].del;
            nb += r[ri + i].ins;
        }
        let trailing = if ri + nr < r.len() { r[ri + nr].copy } else { 0 };
        let trailing = trailing.min(n_context);
        na += trailing;
        nb += trailing;
        for i in 1..nr {
            na += r[ri + i].copy;
            nb += r[ri + i].copy;
        }

        if opts.line_numbers {
            if !show_divider {
                show_divider = true;
            } else if opts.style == Style::Html {
                out.push_str("<span class=\"diff-hr\">");
                out.push_str(&".".repeat(80));
                out.push_str("</span>\n");
            } else {
                out.push_str(&".".repeat(80));
                out.push('\n');
            }
        } else {
            if opts.style == Style::Html {
                out.push_str("<span class=\"diff-lineno\">");
            }
            // A hunk against an empty side must say 0,0 or patch(1) gets
            // confused.
            write!(
                out,
                "@@ -{},{} +{},{} @@",
                if na > 0 { a + skip + 1 } else { 0 },
                na,
                if nb > 0 { b + skip + 1 } else { 0 },
                nb,
            )
            .unwrap();
            if opts.style == Style::Html {
                out.push_str("</span>");
            }
            out.push('\n');
        }

        // Initial common area.
        a += skip;
        b += skip;
        let m = r[ri].copy - skip;
        for j in 0..m {
            if opts.line_numbers {
                append_lineno(&mut out, a + j + 1, b + j + 1, opts);
            }
            append_line(&mut out, ' ', &a_lines[a + j], opts);
        }
        a += m;
        b += m;

        // The differences themselves, interleaved with interior context.
        for i in 0..nr {
            for j in 0..r[ri + i].del {
                if opts.line_numbers {
                    append_lineno(&mut out, a + j + 1, 0, opts);
                }
                append_line(&mut out, '-', &a_lines[a + j], opts);
            }
            a += r[ri + i].del;
            for j in 0..r[ri + i].ins {
                if opts.line_numbers {
                    append_lineno(&mut out, 0, b + j + 1, opts);
                }
                append_line(&mut out, '+', &b_lines[b + j], opts);
            }
            b += r[ri + i].ins;
            if i < nr - 1 {
                let m = r[ri + i + 1].copy;
                for j in 0..m {
                    if opts.line_numbers {
                        append_lineno(&mut out, a + j + 1, b + j + 1, opts);
                    }
                    append_line(&mut out, ' ', &a_lines[a + j], opts);
                }
                a += m;
                b += m;
            }
        }

        // Final common area.
        for j in 0..trailing {
            if opts.line_numbers {
                append_lineno(&mut out, a + j + 1, b + j + 1, opts);
            }
            append_line(&mut out, ' ', &a_lines[a + j], opts);
        }

        ri += nr;
    }
    out
}
