//! Content digests used to verify transfers end to end.
//!
//! Both peers hash file content with the same 128-bit MD5 digest. The
//! [`DigestAccumulator`] is fed incrementally and knows nothing about where the
//! bytes come from, so the sender can hash a file before streaming it while the
//! receiver hashes bytes as they are forwarded to disk through a
//! [`HashingWriter`].
use std::io::{self, Read, Write};

use md5::{Digest, Md5};

/// Length in bytes of a finalized digest.
pub const DIGEST_SIZE: usize = 16;

/// Append-only digest state.
#[derive(Clone, Default)]
pub struct DigestAccumulator {
    hasher: Md5,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> Vec<u8> {
        self.hasher.finalize().to_vec()
    }
}

/// Compares two digests byte for byte.
///
/// Operands that are not exactly [`DIGEST_SIZE`] bytes long never match.
pub fn verify(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == DIGEST_SIZE && actual.len() == DIGEST_SIZE && expected == actual
}

/// Reads `reader` to its end and returns the digest of everything read.
pub fn digest_reader<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut writer = HashingWriter::new(io::sink());
    io::copy(reader, &mut writer)?;
    Ok(writer.finalize())
}

/// Writer adapter that hashes every byte accepted by the inner writer.
pub struct HashingWriter<W: Write> {
    inner: W,
    digest: DigestAccumulator,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: DigestAccumulator::new(),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        self.digest.finalize()
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        // only what the inner writer took counts
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn digest_known_vectors() {
        assert_eq!(
            hex::encode(DigestAccumulator::new().finalize()),
            "d41d8cd98f00b204e9800998ecf8427e"
        );

        let mut digest = DigestAccumulator::new();
        digest.update(b"abc");
        assert_eq!(
            hex::encode(digest.finalize()),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn digest_is_incremental() {
        let mut whole = DigestAccumulator::new();
        whole.update(b"hello world");

        let mut parts = DigestAccumulator::new();
        parts.update(b"hello");
        parts.update(b" ");
        parts.update(b"world");

        assert_eq!(whole.finalize(), parts.finalize());
    }

    #[test]
    fn verify_requires_equal_fixed_length() {
        let a = vec![7u8; DIGEST_SIZE];
        let mut b = a.clone();

        assert!(verify(&a, &b));
        b[DIGEST_SIZE - 1] ^= 1;
        assert!(!verify(&a, &b));
        assert!(!verify(&a[..4], &a[..4]));
        assert!(!verify(&[], &[]));
    }

    #[test]
    fn hashing_writer_forwards_and_hashes() {
        let mut out = Vec::new();
        let mut writer = HashingWriter::new(&mut out);
        writer.write_all(b"abc").unwrap();
        let digest = writer.finalize();

        assert_eq!(out, b"abc");
        assert_eq!(digest, digest_reader(&mut Cursor::new(b"abc")).unwrap());
    }
}
