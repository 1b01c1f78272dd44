use crate::{Error, Result};
use std::io::{Read, Write};

/// Growable byte buffer with a read cursor, the workhorse of blob and
/// artifact handling. [`Read`] consumes from the cursor; [`Write`]
/// appends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    cursor: usize,
}

/// Origin for [`Buffer::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    Set,
    Cur,
    End,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Buffer {
        Buffer { data, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// Truncate or zero-extend to exactly `n` bytes. The cursor is clamped
    /// back into range.
    pub fn resize(&mut self, n: usize) {
        self.data.resize(n, 0);
        self.cursor = self.cursor.min(n);
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Reset to empty without releasing capacity.
    pub fn reuse(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Take the bytes out, leaving an empty buffer behind.
    pub fn take(&mut self) -> Vec<u8> {
        self.cursor = 0;
        std::mem::take(&mut self.data)
    }

    pub fn swap(&mut self, other: &mut Buffer) {
        std::mem::swap(self, other);
    }

    /// Move the read cursor. The result is always clamped to
    /// `[0, len]`; the clamped position is returned.
    pub fn seek(&mut self, offset: i64, whence: Seek) -> usize {
        let base = match whence {
            Seek::Set => 0i64,
            Seek::Cur => self.cursor as i64,
            Seek::End => self.data.len() as i64,
        };
        let pos = base.saturating_add(offset).clamp(0, self.data.len() as i64);
        self.cursor = pos as usize;
        self.cursor
    }

    pub fn tell(&self) -> usize {
        self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Read everything from `src` into this buffer, replacing its
    /// contents.
    pub fn fill_from(&mut self, src: &mut impl Read) -> Result<usize> {
        self.reuse();
        let n = src.read_to_end(&mut self.data)?;
        Ok(n)
    }

    /// Compare the remaining (cursor-onward) bytes of two buffers.
    pub fn compare_stream(&self, other: &Buffer) -> std::cmp::Ordering {
        self.data[self.cursor..].cmp(&other.data[other.cursor..])
    }
}

impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (&self.data[self.cursor..]).read(buf)?;
        self.cursor += n;
        Ok(n)
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Write for Buffer {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.data.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Compress `data` with zlib (level 9) behind a 4-byte big-endian
/// uncompressed-length prefix, the storage form of every full blob.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let n = data.len() as u32;
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    out.extend_from_slice(&n.to_be_bytes());
    let mut enc = flate2::write::ZlibEncoder::new(out, flate2::Compression::best());
    enc.write_all(data).expect("writing to a Vec cannot fail");
    enc.finish().expect("writing to a Vec cannot fail")
}

/// Uncompressed size a [`compress`]ed block declares, without inflating
/// it.
pub fn uncompressed_size(data: &[u8]) -> Option<usize> {
    if !is_compressed(data) {
        return None;
    }
    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize)
}

/// Inflate a block produced by [`compress`]. The declared length prefix
/// must match the inflated size exactly.
pub fn uncompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() <= 4 {
        return Err(Error::Range("compressed block shorter than its header".into()));
    }
    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let mut out = Vec::with_capacity(declared);
    let mut dec = flate2::read::ZlibDecoder::new(&data[4..]);
    dec.read_to_end(&mut out)?;
    if out.len() != declared {
        return Err(Error::Checksum(format!(
            "compressed block declares {declared} bytes but inflates to {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Heuristic: do these bytes look like a length-prefixed zlib block?
///
/// Checks bytes [4..6] against every 2-byte zlib stream header valid for
/// 8 KiB windows. The full table matters: one historical artifact (a tcl
/// commit) carries a stream whose header defeats the obvious
/// `78 9c`-style check, so this exact set must be preserved.
pub fn is_compressed(data: &[u8]) -> bool {
    if data.len() < 6 {
        return false;
    }
    let head = u16::from_be_bytes([data[4], data[5]]);
    matches!(
        head,
        0x083c | 0x087a | 0x08b8 | 0x08f6
            | 0x1838 | 0x1876 | 0x18b4 | 0x1872
            | 0x2834 | 0x2872 | 0x28b0 | 0x28ee
            | 0x3830 | 0x386e | 0x38ac | 0x38ea
            | 0x482c | 0x486a | 0x48a8 | 0x48e6
            | 0x5828 | 0x5866 | 0x58a4 | 0x58e2
            | 0x6824 | 0x6862 | 0x68bf | 0x68fd
            | 0x7801 | 0x785e | 0x789c | 0x78da
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compress_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, \
                     the quick brown fox jumps over the lazy dog"
            .to_vec();
        let z = compress(&data);
        assert!(is_compressed(&z));
        assert_eq!(uncompressed_size(&z), Some(data.len()));
        assert_eq!(uncompress(&z).unwrap(), data);
    }

    #[test]
    fn empty_round_trip() {
        let z = compress(b"");
        assert_eq!(uncompress(&z).unwrap(), b"");
    }

    #[test]
    fn corrupt_length_prefix_is_caught() {
        let mut z = compress(b"some bytes worth compressing");
        z[3] = z[3].wrapping_add(1);
        assert!(uncompress(&z).is_err());
    }

    #[test]
    fn plain_bytes_are_not_compressed() {
        assert!(!is_compressed(b"hello plain world"));
        assert!(!is_compressed(b"tiny"));
    }

    #[test]
    fn seek_clamps_to_contents() {
        let mut b = Buffer::from_vec(b"0123456789".to_vec());
        assert_eq!(b.seek(4, Seek::Set), 4);
        assert_eq!(b.tell(), 4);
        assert_eq!(b.seek(-100, Seek::Cur), 0);
        assert_eq!(b.seek(100, Seek::End), 10);
        assert_eq!(b.seek(-3, Seek::End), 7);
        b.rewind();
        assert_eq!(b.tell(), 0);
    }

    #[test]
    fn read_consumes_from_cursor() {
        use std::io::Read;
        let mut b = Buffer::from_vec(b"abcdef".to_vec());
        b.seek(2, Seek::Set);
        let mut out = String::new();
        b.read_to_string(&mut out).unwrap();
        assert_eq!(out, "cdef");
        assert_eq!(b.tell(), 6);
    }

    #[test]
    fn take_transfers_ownership() {
        let mut b = Buffer::from_vec(vec![1, 2, 3]);
        let v = Buffer::take(&mut b);
        assert_eq!(v, vec![1, 2, 3]);
        assert!(b.is_empty());
    }
}
