use super::fossilize::defossilize;
use super::matrix::is_repeatable;
use super::serialize::validate;
use super::time::iso8601_to_julian;
use super::{ArtifactType, Deck, Error, FCard, FilePerm, JCard, QCard, Result, TCard, TagType};

/// `"Z " + 32 hex + "\n"`.
const Z_CARD_LEN: usize = 35;

fn malformed(msg: impl Into<String>) -> Error {
    Error::Malformed(msg.into())
}

/// Quick test: does `bytes` end with a well-formed Z card whose MD5
/// matches the preceding bytes? Anything that fails this is ordinary
/// content, not a structural artifact.
pub fn verify_z_card(bytes: &[u8]) -> bool {
    if bytes.len() < Z_CARD_LEN + 4 || bytes[bytes.len() - 1] != b'\n' {
        return false;
    }
    let z_start = bytes.len() - Z_CARD_LEN;
    if bytes[z_start] != b'Z' || bytes[z_start + 1] != b' ' {
        return false;
    }
    if z_start > 0 && bytes[z_start - 1] != b'\n' {
        return false;
    }
    let hex = &bytes[z_start + 2..bytes.len() - 1];
    if !hex.iter().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
        return false;
    }
    let digest = md5::compute(&bytes[..z_start]);
    format!("{digest:x}").as_bytes() == hex
}

fn field_str(raw: &[u8]) -> Result<&str> {
    std::str::from_utf8(raw).map_err(|_| malformed("card field is not UTF-8"))
}

fn parse_hash(raw: &[u8]) -> Result<String> {
    let s = field_str(raw)?;
    if !super::is_hash(s) {
        return Err(malformed(format!("malformed hash: {s:?}")));
    }
    Ok(s.to_owned())
}

fn parse_time(raw: &[u8]) -> Result<f64> {
    iso8601_to_julian(field_str(raw)?)
}

fn text_field(raw: &[u8]) -> Result<String> {
    Ok(defossilize(field_str(raw)?))
}

/// Split a card's field area on single spaces. Empty fields (leading,
/// trailing, or doubled separators) are malformed.
fn split_fields(line: &[u8]) -> Result<Vec<&[u8]>> {
    let mut fields = Vec::new();
    for f in line.split(|&c| c == b' ') {
        if f.is_empty() {
            return Err(malformed("empty card field"));
        }
        fields.push(f);
    }
    Ok(fields)
}

fn classify(d: &Deck) -> Result<ArtifactType> {
    if d.l.is_some() {
        return Ok(ArtifactType::Wiki);
    }
    if d.e.is_some() {
        return Ok(ArtifactType::Technote);
    }
    if d.g.is_some() || d.h.is_some() || d.i.is_some() {
        return Ok(ArtifactType::ForumPost);
    }
    if d.k.is_some() || !d.j.is_empty() {
        return Ok(ArtifactType::TicketChange);
    }
    if !d.m.is_empty() {
        return Ok(ArtifactType::Cluster);
    }
    if d.a.is_some() {
        return Ok(ArtifactType::Attachment);
    }
    if d.b.is_some() || !d.f.is_empty() || !d.q.is_empty() || d.r.is_some() || d.c.is_some() {
        return Ok(ArtifactType::Checkin);
    }
    if !d.t.is_empty() {
        // Control artifacts may only carry explicitly-targeted tags; a
        // self-targeted tag implies a checkin, which needs its C card.
        if d.t.iter().any(|t| t.uuid.is_none()) {
            return Err(malformed("self-targeted T card outside a checkin"));
        }
        return Ok(ArtifactType::Control);
    }
    Err(malformed("artifact matches no known type"))
}

/// Parse the canonical byte form of a structural artifact into a deck.
///
/// Single pass, left to right, one card per line. Enforces ascending card
/// order, per-letter cardinality, hash well-formedness, F/T/M sort order,
/// and the subtype card matrix. The Z card is verified first; bytes that
/// fail it yield [`Error::NotAnArtifact`] so the caller can treat them as
/// opaque content.
pub fn parse(bytes: &[u8]) -> Result<Deck> {
    if !verify_z_card(bytes) {
        return Err(Error::NotAnArtifact);
    }
    let data = &bytes[..bytes.len() - Z_CARD_LEN];

    // Filled in permissively, classified and validated at the end.
    let mut d = Deck::new(ArtifactType::Checkin);
    let mut prev_letter = 0u8;
    let mut pos = 0usize;

    while pos < data.len() {
        let letter = data[pos];
        if !letter.is_ascii_uppercase() || data.get(pos + 1) != Some(&b' ') {
            return Err(malformed(format!("unreadable card at byte offset {pos}")));
        }
        if letter < prev_letter {
            return Err(malformed(format!("{} card out of order", letter as char)));
        }
        if letter == prev_letter && !is_repeatable(letter) {
            return Err(malformed(format!("duplicate {} card", letter as char)));
        }
        prev_letter = letter;

        let eol = memchr::memchr(b'\n', &data[pos..])
            .ok_or_else(|| malformed("unterminated card"))?;
        let line = &data[pos + 2..pos + eol];
        pos += eol + 1;

        let fields = split_fields(line)?;
        match letter {
            b'A' => {
                if fields.len() < 2 || fields.len() > 3 {
                    return Err(malformed("A card requires 2 or 3 fields"));
                }
                d.a = Some(super::ACard {
                    filename: text_field(fields[0])?,
                    target: text_field(fields[1])?,
                    src: fields.get(2).map(|f| parse_hash(f)).transpose()?,
                });
            }
            b'B' => {
                let [uuid] = fields.as_slice() else {
                    return Err(malformed("B card requires exactly 1 field"));
                };
                d.b = Some(parse_hash(uuid)?);
            }
            b'C' => {
                let [comment] = fields.as_slice() else {
                    return Err(malformed("C card requires exactly 1 field"));
                };
                d.c = Some(text_field(comment)?);
            }
            b'D' => {
                let [time] = fields.as_slice() else {
                    return Err(malformed("D card requires exactly 1 field"));
                };
                d.d = Some(parse_time(time)?);
            }
            b'E' => {
                let [time, id] = fields.as_slice() else {
                    return Err(malformed("E card requires exactly 2 fields"));
                };
                d.e = Some((parse_time(time)?, parse_hash(id)?));
            }
            b'F' => {
                if fields.is_empty() || fields.len() > 4 {
                    return Err(malformed("F card requires 1 to 4 fields"));
                }
                let name = text_field(fields[0])?;
                if let Some(last) = d.f.last() {
                    if last.name.as_bytes() >= name.as_bytes() {
                        return Err(malformed(format!("F card out of order: {name:?}")));
                    }
                }
                let uuid = fields.get(1).map(|f| parse_hash(f)).transpose()?;
                let perm = match fields.get(2).copied() {
                    None | Some(b"w") => FilePerm::Regular,
                    Some(b"x") => FilePerm::Exe,
                    Some(b"l") => FilePerm::Link,
                    Some(other) => {
                        return Err(malformed(format!(
                            "unknown F-card permission: {:?}",
                            String::from_utf8_lossy(other)
                        )))
                    }
                };
                let prior_name = fields.get(3).map(|f| text_field(f)).transpose()?;
                d.f.push(FCard { name, uuid, perm, prior_name });
            }
            b'G' => {
                let [uuid] = fields.as_slice() else {
                    return Err(malformed("G card requires exactly 1 field"));
                };
                d.g = Some(parse_hash(uuid)?);
            }
            b'H' => {
                let [title] = fields.as_slice() else {
                    return Err(malformed("H card requires exactly 1 field"));
                };
                d.h = Some(text_field(title)?);
            }
            b'I' => {
                let [uuid] = fields.as_slice() else {
                    return Err(malformed("I card requires exactly 1 field"));
                };
                d.i = Some(parse_hash(uuid)?);
            }
            b'J' => {
                if fields.is_empty() || fields.len() > 2 {
                    return Err(malformed("J card requires 1 or 2 fields"));
                }
                let raw = field_str(fields[0])?;
                let (append, field) = match raw.strip_prefix('+') {
                    Some(rest) => (true, rest),
                    None => (false, raw),
                };
                if field.is_empty() {
                    return Err(malformed("empty J-card field name"));
                }
                d.j.push(JCard {
                    append,
                    field: field.to_owned(),
                    value: fields.get(1).map(|f| text_field(f)).transpose()?,
                });
            }
            b'K' => {
                let [uuid] = fields.as_slice() else {
                    return Err(malformed("K card requires exactly 1 field"));
                };
                d.k = Some(parse_hash(uuid)?);
            }
            b'L' => {
                let [name] = fields.as_slice() else {
                    return Err(malformed("L card requires exactly 1 field"));
                };
                d.l = Some(text_field(name)?);
            }
            b'M' => {
                let [uuid] = fields.as_slice() else {
                    return Err(malformed("M card requires exactly 1 field"));
                };
                let uuid = parse_hash(uuid)?;
                if let Some(last) = d.m.last() {
                    if last.as_str() >= uuid.as_str() {
                        return Err(malformed("M card out of order"));
                    }
                }
                d.m.push(uuid);
            }
            b'N' => {
                let [mimetype] = fields.as_slice() else {
                    return Err(malformed("N card requires exactly 1 field"));
                };
                d.n = Some(field_str(mimetype)?.to_owned());
            }
            b'P' => {
                for f in &fields {
                    d.p.push(parse_hash(f)?);
                }
            }
            b'Q' => {
                if fields.is_empty() || fields.len() > 2 {
                    return Err(malformed("Q card requires 1 or 2 fields"));
                }
                let (sigil, target) = fields[0].split_first().unwrap();
                let is_backout = match sigil {
                    b'+' => false,
                    b'-' => true,
                    _ => return Err(malformed("Q card must begin with + or -")),
                };
                d.q.push(QCard {
                    is_backout,
                    target: parse_hash(target)?,
                    baseline: fields.get(1).map(|f| parse_hash(f)).transpose()?,
                });
            }
            b'R' => {
                let [md5] = fields.as_slice() else {
                    return Err(malformed("R card requires exactly 1 field"));
                };
                let md5 = field_str(md5)?;
                if md5.len() != 32 || !md5.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
                    return Err(malformed("malformed R-card checksum"));
                }
                d.r = Some(md5.to_owned());
            }
            b'T' => {
                if fields.len() < 2 || fields.len() > 3 {
                    return Err(malformed("T card requires 2 or 3 fields"));
                }
                let (sigil, name) = fields[0].split_first().unwrap();
                let tag_type = TagType::from_sigil(*sigil)
                    .ok_or_else(|| malformed("T card must begin with +, - or *"))?;
                let name = defossilize(field_str(name)?);
                if name.is_empty() {
                    return Err(malformed("empty tag name in T card"));
                }
                let uuid = if fields[1] == b"*" {
                    None
                } else {
                    Some(parse_hash(fields[1])?)
                };
                if let Some(last) = d.t.last() {
                    let last_key = (last.name.as_str(), last.uuid.as_deref().unwrap_or(""));
                    let key = (name.as_str(), uuid.as_deref().unwrap_or(""));
                    if last_key > key {
                        return Err(malformed(format!("T card out of order: {name:?}")));
                    }
                }
                d.t.push(TCard {
                    tag_type,
                    uuid,
                    name,
                    value: fields.get(2).map(|f| text_field(f)).transpose()?,
                });
            }
            b'U' => {
                let [user] = fields.as_slice() else {
                    return Err(malformed("U card requires exactly 1 field"));
                };
                d.u = Some(text_field(user)?);
            }
            b'W' => {
                let [len] = fields.as_slice() else {
                    return Err(malformed("W card requires exactly 1 field"));
                };
                let n: usize = field_str(len)?
                    .parse()
                    .map_err(|_| malformed("malformed W-card length"))?;
                let body = pos
                    .checked_add(n)
                    .and_then(|end| data.get(pos..end))
                    .ok_or_else(|| malformed("W-card body extends past end of artifact"))?;
                d.w = Some(
                    String::from_utf8(body.to_vec())
                        .map_err(|_| malformed("W-card body is not UTF-8"))?,
                );
                if data.get(pos + n) != Some(&b'\n') {
                    return Err(malformed("W-card body not terminated by newline"));
                }
                pos += n + 1;
            }
            _ => {
                return Err(malformed(format!("unknown card letter {}", letter as char)));
            }
        }
    }

    d.ty = classify(&d)?;
    validate(&d)?;
    if d.b.is_none() {
        if let Some(fc) = d.f.iter().find(|fc| fc.uuid.is_none()) {
            return Err(malformed(format!(
                "F card without hash outside a delta manifest: {:?}",
                fc.name
            )));
        }
    }
    Ok(d)
}
