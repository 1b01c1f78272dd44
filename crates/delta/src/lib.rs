//! Binary delta codec.
//!
//! A delta encodes how to reconstruct a `target` byte sequence from a
//! `source` sequence. The wire format is a line-oriented mix of text and
//! raw bytes: a base-64 target-size header terminated by `\n`, a run of
//! copy (`N@M,`) and literal-insert (`N:bytes`) commands, and a trailing
//! additive checksum command (`N;`). The format is a peer-to-peer wire
//! protocol and must not change.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("delta: {0}")]
    InvalidTerminator(&'static str),
    #[error("delta: unknown delta operator")]
    InvalidOperator,
    #[error("delta: generated size does not match predicted size")]
    SizeMismatch,
    #[error("delta: bad checksum")]
    ChecksumMismatch,
    #[error("delta: {0}")]
    Range(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Whether `apply` validates the trailing checksum command.
///
/// Structural corruption (truncation, bad sizes) is caught either way;
/// disabling the check trades detection of bit flips inside literal runs
/// for a little speed on hot paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyChecksum {
    #[default]
    Yes,
    No,
}

/// Width of the rolling-hash window. The matcher only works if this is a
/// power of two.
const NHASH: usize = 16;

/// Upper bound on collision-chain probes per landmark lookup.
const PROBE_LIMIT: u32 = 250;

/// Rolling hash over a 16-byte window: `a` is the byte sum, `b` the
/// position-weighted sum, both mod 2^16.
struct RollingHash {
    a: u16,
    b: u16,
    i: usize,
    z: [u8; NHASH],
}

impl RollingHash {
    fn init(window: &[u8]) -> RollingHash {
        let mut a = 0u16;
        let mut b = 0u16;
        let mut z = [0u8; NHASH];
        z.copy_from_slice(&window[..NHASH]);
        for &c in &z {
            a = a.wrapping_add(c as u16);
            b = b.wrapping_add(a);
        }
        RollingHash { a, b, i: 0, z }
    }

    fn next(&mut self, c: u8) {
        let old = self.z[self.i] as u16;
        self.z[self.i] = c;
        self.i = (self.i + 1) & (NHASH - 1);
        self.a = self.a.wrapping_sub(old).wrapping_add(c as u16);
        self.b = self
            .b
            .wrapping_sub((NHASH as u16).wrapping_mul(old))
            .wrapping_add(self.a);
    }

    fn value(&self) -> u32 {
        self.a as u32 | ((self.b as u32) << 16)
    }
}

/// Hash of one 16-byte window, equivalent to `RollingHash::init().value()`.
fn hash_once(z: &[u8]) -> u32 {
    let mut a = 0u16;
    let mut b = 0u16;
    for &c in &z[..NHASH] {
        a = a.wrapping_add(c as u16);
        b = b.wrapping_add(a);
    }
    a as u32 | ((b as u32) << 16)
}

const DIGITS: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";

/// Value of each ASCII byte as a base-64 digit, or -1.
static DIGIT_VALUE: [i8; 128] = {
    let mut t = [-1i8; 128];
    let mut i = 0;
    while i < 64 {
        t[DIGITS[i] as usize] = i as i8;
        i += 1;
    }
    t
};

fn put_int(mut v: u64, out: &mut Vec<u8>) {
    if v == 0 {
        out.push(b'0');
        return;
    }
    let mut buf = [0u8; 12];
    let mut n = 0;
    while v > 0 {
        buf[n] = DIGITS[(v & 0x3f) as usize];
        v >>= 6;
        n += 1;
    }
    out.extend(buf[..n].iter().rev());
}

/// Parse a base-64 integer at `z[*pos]`, advancing `*pos` past it.
fn get_int(z: &[u8], pos: &mut usize) -> u64 {
    let mut v = 0u64;
    while *pos < z.len() {
        let c = z[*pos];
        let d = if c < 0x80 { DIGIT_VALUE[c as usize] } else { -1 };
        if d < 0 {
            break;
        }
        v = (v << 6) + d as u64;
        *pos += 1;
    }
    v
}

/// Number of base-64 digits needed to encode `v`.
fn digit_count(v: u64) -> u64 {
    let mut i = 1;
    let mut x = 64u64;
    while v >= x {
        i += 1;
        x = match x.checked_shl(6) {
            Some(x) => x,
            None => return i,
        };
    }
    i
}

/// 32-bit additive checksum over `z`, four interleaved lanes folded at the
/// end. Part of the wire format.
pub fn checksum(z: &[u8]) -> u32 {
    let mut sum0 = 0u32;
    let mut sum1 = 0u32;
    let mut sum2 = 0u32;
    let mut sum3 = 0u32;
    let mut chunks = z.chunks_exact(16);
    for c in &mut chunks {
        sum0 = sum0.wrapping_add(c[0] as u32 + c[4] as u32 + c[8] as u32 + c[12] as u32);
        sum1 = sum1.wrapping_add(c[1] as u32 + c[5] as u32 + c[9] as u32 + c[13] as u32);
        sum2 = sum2.wrapping_add(c[2] as u32 + c[6] as u32 + c[10] as u32 + c[14] as u32);
        sum3 = sum3.wrapping_add(c[3] as u32 + c[7] as u32 + c[11] as u32 + c[15] as u32);
    }
    let mut rest = chunks.remainder();
    let mut four = rest.chunks_exact(4);
    for c in &mut four {
        sum0 = sum0.wrapping_add(c[0] as u32);
        sum1 = sum1.wrapping_add(c[1] as u32);
        sum2 = sum2.wrapping_add(c[2] as u32);
        sum3 = sum3.wrapping_add(c[3] as u32);
    }
    rest = four.remainder();
    sum3 = sum3
        .wrapping_add(sum2 << 8)
        .wrapping_add(sum1 << 16)
        .wrapping_add(sum0 << 24);
    if rest.len() >= 3 {
        sum3 = sum3.wrapping_add((rest[2] as u32) << 8);
    }
    if rest.len() >= 2 {
        sum3 = sum3.wrapping_add((rest[1] as u32) << 16);
    }
    if !rest.is_empty() {
        sum3 = sum3.wrapping_add((rest[0] as u32) << 24);
    }
    sum3
}

/// Create a delta that rebuilds `target` from `source`.
///
/// 16-byte-aligned windows of `source` are indexed by rolling hash; for
/// each position of `target` the longest hash-anchored match (extended in
/// both directions) is emitted as a copy command when it beats the cost of
/// encoding it, otherwise bytes accumulate into literal inserts. When the
/// source is too small to ever match, the whole target is one literal.
pub fn create(source: &[u8], target: &[u8]) -> Vec<u8> {
    let len_src = source.len();
    let len_out = target.len();
    let mut out = Vec::with_capacity(len_out / 2 + 64);

    put_int(len_out as u64, &mut out);
    out.push(b'\n');

    if len_src <= NHASH {
        put_int(len_out as u64, &mut out);
        out.push(b':');
        out.extend_from_slice(target);
        put_int(checksum(target) as u64, &mut out);
        out.push(b';');
        return out;
    }

    // Landmark index over the source: primary table plus collision chains,
    // both storing window ordinals (-1 = empty).
    let n_hash = len_src / NHASH;
    let mut landmark = vec![-1i64; n_hash];
    let mut collide = vec![-1i64; n_hash];
    let mut i = 0;
    while i < len_src - NHASH {
        let hv = (hash_once(&source[i..]) as usize) % n_hash;
        collide[i / NHASH] = landmark[hv];
        landmark[hv] = (i / NHASH) as i64;
        i += NHASH;
    }

    let mut base = 0usize;
    let mut last_read: i64 = -1;
    while base + NHASH < len_out {
        let mut h = RollingHash::init(&target[base..]);
        let mut i = 0usize;
        let mut best_cnt: i64 = 0;
        let mut best_ofst: i64 = 0;
        let mut best_litsz: i64 = 0;
        loop {
            let hv = (h.value() as usize) % n_hash;
            let mut i_block = landmark[hv];
            let mut limit = PROBE_LIMIT;
            while i_block >= 0 && limit > 0 {
                limit -= 1;
                // Anchor a candidate match at source window i_block and
                // target offset base+i, then extend it both directions.
                let i_src = i_block * NHASH as i64;
                let mut x = i_src;
                let mut y = (base + i) as i64;
                let limit_x = if len_src as i64 - i_src <= len_out as i64 - y {
                    len_src as i64
                } else {
                    i_src + len_out as i64 - y
                };
                while x < limit_x && source[x as usize] == target[y as usize] {
                    x += 1;
                    y += 1;
                }
                let j = x - i_src - 1;

                let mut k: i64 = 1;
                while k < i_src && k <= i as i64 {
                    if source[(i_src - k) as usize] != target[base + i - k as usize] {
                        break;
                    }
                    k += 1;
                }
                k -= 1;

                let ofst = i_src - k;
                let cnt = j + k + 1;
                let litsz = i as i64 - k;
                // Overhead of encoding the insert+copy pair, sans the
                // insert payload itself.
                let sz = digit_count(litsz.max(0) as u64)
                    + digit_count(cnt.max(0) as u64)
                    + digit_count(ofst.max(0) as u64)
                    + 3;
                if cnt >= sz as i64 && cnt > best_cnt {
                    best_cnt = cnt;
                    best_ofst = ofst;
                    best_litsz = litsz;
                }
                i_block = collide[i_block as usize];
            }

            if best_cnt > 0 {
                if best_litsz > 0 {
                    put_int(best_litsz as u64, &mut out);
                    out.push(b':');
                    out.extend_from_slice(&target[base..base + best_litsz as usize]);
                    base += best_litsz as usize;
                }
                base += best_cnt as usize;
                put_int(best_cnt as u64, &mut out);
                out.push(b'@');
                put_int(best_ofst as u64, &mut out);
                out.push(b',');
                if best_ofst + best_cnt - 1 > last_read {
                    last_read = best_ofst + best_cnt - 1;
                }
                break;
            }

            if base + i + NHASH >= len_out {
                // No match found before end of target: literal for the rest.
                put_int((len_out - base) as u64, &mut out);
                out.push(b':');
                out.extend_from_slice(&target[base..]);
                base = len_out;
                break;
            }

            h.next(target[base + i + NHASH]);
            i += 1;
        }
    }

    if base < len_out {
        put_int((len_out - base) as u64, &mut out);
        out.push(b':');
        out.extend_from_slice(&target[base..]);
    }
    put_int(checksum(target) as u64, &mut out);
    out.push(b';');
    out
}

/// Size of the output that applying `delta` would produce, read from the
/// delta header without applying anything.
pub fn applied_size(delta: &[u8]) -> Result<usize> {
    if delta.len() < 2 {
        return Err(Error::Range("delta too short to carry a header"));
    }
    let mut pos = 0;
    let size = get_int(delta, &mut pos);
    if pos >= delta.len() || delta[pos] != b'\n' {
        return Err(Error::InvalidTerminator("size integer not terminated by \\n"));
    }
    Ok(size as usize)
}

/// Apply `delta` to `source`, producing the target bytes.
///
/// Every copy is bounds-checked against the source and the running output
/// total against the declared target size, so a corrupt delta cannot read
/// or produce out of bounds.
pub fn apply(source: &[u8], delta: &[u8], verify: VerifyChecksum) -> Result<Vec<u8>> {
    let mut pos = 0usize;
    let limit = get_int(delta, &mut pos) as usize;
    if pos >= delta.len() || delta[pos] != b'\n' {
        return Err(Error::InvalidTerminator("size integer not terminated by \\n"));
    }
    pos += 1;

    let mut out = Vec::with_capacity(limit);
    while pos < delta.len() {
        let cnt = get_int(delta, &mut pos) as usize;
        let op = match delta.get(pos) {
            Some(&op) => op,
            None => break,
        };
        match op {
            b'@' => {
                pos += 1;
                let ofst = get_int(delta, &mut pos) as usize;
                if pos < delta.len() && delta[pos] != b',' {
                    return Err(Error::InvalidTerminator("copy command not terminated by ','"));
                }
                pos += 1;
                if out.len() + cnt > limit {
                    return Err(Error::Range("copy exceeds output file size"));
                }
                if ofst + cnt > source.len() {
                    return Err(Error::Range("copy extends past end of input"));
                }
                out.extend_from_slice(&source[ofst..ofst + cnt]);
            }
            b':' => {
                pos += 1;
                if out.len() + cnt > limit {
                    return Err(Error::Range("insert command gives an output larger than predicted"));
                }
                if cnt > delta.len() - pos {
                    return Err(Error::Range("insert count exceeds size of delta"));
                }
                out.extend_from_slice(&delta[pos..pos + cnt]);
                pos += cnt;
            }
            b';' => {
                if verify == VerifyChecksum::Yes && cnt as u32 != checksum(&out) {
                    return Err(Error::ChecksumMismatch);
                }
                if out.len() != limit {
                    return Err(Error::SizeMismatch);
                }
                return Ok(out);
            }
            _ => return Err(Error::InvalidOperator),
        }
    }
    Err(Error::InvalidTerminator("unterminated delta"))
}
