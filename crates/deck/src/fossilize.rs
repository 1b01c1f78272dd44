//! The "fossilize" escaping applied to free-form card fields: NUL, the
//! whitespace family, and backslash become two-character backslash
//! sequences so that fields never contain literal separators.

/// Escape `input` into `out`.
pub fn fossilize(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ' ' => out.push_str("\\s"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            _ => out.push(c),
        }
    }
}

/// Inverse of [`fossilize`]. Unknown escapes pass the escaped byte
/// through, matching the historical decoder.
pub fn defossilize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('s') => out.push(' '),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('v') => out.push('\x0b'),
            Some('f') => out.push('\x0c'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(s: &str) -> String {
        let mut enc = String::new();
        fossilize(s, &mut enc);
        defossilize(&enc)
    }

    #[test]
    fn escapes_whitespace_family() {
        let mut enc = String::new();
        fossilize("a b\tc\nd\\e", &mut enc);
        assert_eq!(enc, "a\\sb\\tc\\nd\\\\e");
    }

    #[test]
    fn round_trips() {
        for s in ["", "plain", "two words", "tabs\tand\nnewlines", "tricky \\s literal", "\r\x0b\x0c"] {
            assert_eq!(round_trip(s), s);
        }
    }

    #[test]
    fn unknown_escape_passes_through() {
        assert_eq!(defossilize("a\\qb"), "aqb");
    }
}
