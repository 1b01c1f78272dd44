use super::fossilize::fossilize;
use super::matrix::rule_for;
use super::time::julian_to_iso8601;
use super::{Deck, Error, FilePerm, Result};
use std::fmt::Write;

/// Bitmask of card letters present on `d`.
pub(crate) fn present_cards(d: &Deck) -> u32 {
    let mut mask = 0u32;
    let mut set = |letter: u8, present: bool| {
        if present {
            mask |= 1 << (letter - b'A');
        }
    };
    set(b'A', d.a.is_some());
    set(b'B', d.b.is_some());
    set(b'C', d.c.is_some());
    set(b'D', d.d.is_some());
    set(b'E', d.e.is_some());
    set(b'F', !d.f.is_empty());
    set(b'G', d.g.is_some());
    set(b'H', d.h.is_some());
    set(b'I', d.i.is_some());
    set(b'J', !d.j.is_empty());
    set(b'K', d.k.is_some());
    set(b'L', d.l.is_some());
    set(b'M', !d.m.is_empty());
    set(b'N', d.n.is_some());
    set(b'P', !d.p.is_empty());
    set(b'Q', !d.q.is_empty());
    set(b'R', d.r.is_some());
    set(b'T', !d.t.is_empty());
    set(b'U', d.u.is_some());
    set(b'W', d.w.is_some());
    mask
}

/// Check `d` against its type's {required, optional, forbidden} card
/// matrix.
pub(crate) fn validate(d: &Deck) -> Result<()> {
    let rule = rule_for(d.ty);
    let present = present_cards(d);
    let missing = rule.required & !present;
    if missing != 0 {
        let letter = (b'A' + missing.trailing_zeros() as u8) as char;
        return Err(Error::Malformed(format!(
            "{:?} artifact is missing its {letter} card",
            d.ty
        )));
    }
    let illegal = present & !(rule.required | rule.optional);
    if illegal != 0 {
        let letter = (b'A' + illegal.trailing_zeros() as u8) as char;
        return Err(Error::CardForbidden { letter, ty: d.ty });
    }
    Ok(())
}

fn push_fossilized(out: &mut String, field: &str) {
    fossilize(field, out);
}

impl Deck {
    /// Bring multi-valued cards into canonical order. Called by
    /// [`Deck::serialize`]; harmless to call again.
    pub fn unshuffle(&mut self) {
        self.f.sort_by(|a, b| a.name.cmp(&b.name));
        self.m.sort();
        self.j.sort_by(|a, b| a.field.cmp(&b.field));
        self.q.sort_by(|a, b| a.target.cmp(&b.target));
        self.t.sort_by(|a, b| {
            (a.name.as_str(), a.uuid.as_deref().unwrap_or(""))
                .cmp(&(b.name.as_str(), b.uuid.as_deref().unwrap_or("")))
        });
    }

    /// Produce the canonical byte form: cards in ascending letter order,
    /// fields fossilized, closed by the Z card. Output is stable; the
    /// same deck always yields byte-identical results.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        self.unshuffle();
        validate(self)?;

        let mut out = String::new();
        if let Some(a) = &self.a {
            out.push_str("A ");
            push_fossilized(&mut out, &a.filename);
            out.push(' ');
            push_fossilized(&mut out, &a.target);
            if let Some(src) = &a.src {
                out.push(' ');
                out.push_str(src);
            }
            out.push('\n');
        }
        if let Some(b) = &self.b {
            writeln!(out, "B {b}").unwrap();
        }
        if let Some(c) = &self.c {
            out.push_str("C ");
            push_fossilized(&mut out, c);
            out.push('\n');
        }
        if let Some(d) = self.d {
            writeln!(out, "D {}", julian_to_iso8601(d)).unwrap();
        }
        if let Some((time, id)) = &self.e {
            writeln!(out, "E {} {id}", julian_to_iso8601(*time)).unwrap();
        }
        let mut prior = None::<&str>;
        for fc in &self.f {
            if prior == Some(fc.name.as_str()) {
                return Err(Error::Malformed(format!("duplicated F card: {:?}", fc.name)));
            }
            prior = Some(fc.name.as_str());
            out.push_str("F ");
            push_fossilized(&mut out, &fc.name);
            if let Some(uuid) = &fc.uuid {
                out.push(' ');
                out.push_str(uuid);
                let perm = match fc.perm {
                    FilePerm::Exe => Some("x"),
                    FilePerm::Link => Some("l"),
                    // "w" is a placeholder so a prior-name can follow.
                    FilePerm::Regular => fc.prior_name.as_ref().map(|_| "w"),
                };
                if let Some(perm) = perm {
                    out.push(' ');
                    out.push_str(perm);
                }
                if let Some(prior_name) = &fc.prior_name {
                    out.push(' ');
                    push_fossilized(&mut out, prior_name);
                }
            } else if self.b.is_none() {
                return Err(Error::Malformed(format!(
                    "F card without hash outside a delta manifest: {:?}",
                    fc.name
                )));
            }
            out.push('\n');
        }
        if let Some(g) = &self.g {
            writeln!(out, "G {g}").unwrap();
        }
        if let Some(h) = &self.h {
            out.push_str("H ");
            push_fossilized(&mut out, h);
            out.push('\n');
        }
        if let Some(i) = &self.i {
            writeln!(out, "I {i}").unwrap();
        }
        for j in &self.j {
            out.push_str("J ");
            if j.append {
                out.push('+');
            }
            out.push_str(&j.field);
            if let Some(value) = &j.value {
                out.push(' ');
                push_fossilized(&mut out, value);
            }
            out.push('\n');
        }
        if let Some(k) = &self.k {
            writeln!(out, "K {k}").unwrap();
        }
        if let Some(l) = &self.l {
            out.push_str("L ");
            push_fossilized(&mut out, l);
            out.push('\n');
        }
        for m in &self.m {
            writeln!(out, "M {m}").unwrap();
        }
        if let Some(n) = &self.n {
            writeln!(out, "N {n}").unwrap();
        }
        if !self.p.is_empty() {
            out.push('P');
            for p in &self.p {
                out.push(' ');
                out.push_str(p);
            }
            out.push('\n');
        }
        for q in &self.q {
            out.push_str("Q ");
            out.push(if q.is_backout { '-' } else { '+' });
            out.push_str(&q.target);
            if let Some(baseline) = &q.baseline {
                out.push(' ');
                out.push_str(baseline);
            }
            out.push('\n');
        }
        if let Some(r) = &self.r {
            writeln!(out, "R {r}").unwrap();
        }
        for t in &self.t {
            out.push_str("T ");
            out.push(t.tag_type.sigil());
            push_fossilized(&mut out, &t.name);
            out.push(' ');
            match &t.uuid {
                Some(uuid) => out.push_str(uuid),
                None => out.push('*'),
            }
            if let Some(value) = &t.value {
                out.push(' ');
                push_fossilized(&mut out, value);
            }
            out.push('\n');
        }
        if let Some(u) = &self.u {
            out.push_str("U ");
            push_fossilized(&mut out, u);
            out.push('\n');
        }
        if let Some(w) = &self.w {
            writeln!(out, "W {}", w.len()).unwrap();
            out.push_str(w);
            out.push('\n');
        }

        let mut bytes = out.into_bytes();
        if bytes.is_empty() {
            return Err(Error::Malformed("artifact has no cards".into()));
        }
        let digest = md5::compute(&bytes);
        bytes.extend_from_slice(format!("Z {digest:x}\n").as_bytes());
        Ok(bytes)
    }
}
