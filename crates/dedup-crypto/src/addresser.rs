use std::io::{self, Read, Seek, SeekFrom};

use dedup_types::Digest;

/// Result of addressing a byte stream: its digest and exact length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Addressed {
    pub digest: Digest,
    /// Number of bytes fed into the hash.
    pub size: u64,
}

/// Incremental hashing state for one object.
///
/// Bytes must be fed in the order they appear in the object. The context
/// counts what it consumed so the final size always matches the digest.
#[derive(Clone, Debug, Default)]
pub struct AddressingContext {
    hasher: blake3::Hasher,
    consumed: u64,
}

impl AddressingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next contiguous chunk of the object.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.consumed += chunk.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Finalize into a digest. Consumes the context.
    pub fn finish(self) -> Addressed {
        Addressed {
            digest: Digest::from_hash(*self.hasher.finalize().as_bytes()),
            size: self.consumed,
        }
    }
}

/// BLAKE3 content addresser.
///
/// Computes the [`Digest`] of an object's full byte content without ever
/// holding the whole object in memory: readers are consumed in fixed-size
/// chunks. The digest is a pure function of the byte sequence, so equal
/// digests stand in for byte-for-byte equality.
#[derive(Clone, Copy, Debug)]
pub struct ContentAddresser {
    chunk_size: usize,
}

impl ContentAddresser {
    /// Default read size when streaming from a reader (64 KiB).
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub const fn new() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Use a custom read size for the reader-based helpers.
    pub const fn with_chunk_size(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 { 1 } else { chunk_size };
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Start a fresh hashing context.
    pub fn begin(&self) -> AddressingContext {
        AddressingContext::new()
    }

    /// Feed a chunk into `context`.
    pub fn update(&self, context: &mut AddressingContext, chunk: &[u8]) {
        context.update(chunk);
    }

    /// Finalize `context` into its digest and size.
    pub fn finish(&self, context: AddressingContext) -> Addressed {
        context.finish()
    }

    /// Address an in-memory buffer.
    pub fn digest_bytes(&self, data: &[u8]) -> Addressed {
        let mut ctx = self.begin();
        ctx.update(data);
        ctx.finish()
    }

    /// Address everything `reader` yields, reading `chunk_size` bytes at a time.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> io::Result<Addressed> {
        let mut ctx = self.begin();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            ctx.update(&buf[..n]);
        }
        Ok(ctx.finish())
    }

    /// Address a seekable source from its start, then rewind it to the start.
    ///
    /// After this returns `Ok`, the same source can be handed to the store and
    /// the bytes it yields are exactly the bytes that were hashed.
    pub fn digest_seekable<R: Read + Seek>(&self, source: &mut R) -> io::Result<Addressed> {
        source.seek(SeekFrom::Start(0))?;
        let addressed = self.digest_reader(&mut *source)?;
        source.seek(SeekFrom::Start(0))?;
        Ok(addressed)
    }

    /// Check that `data` addresses to `expected`.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.digest_bytes(data).digest == *expected
    }
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self::new()
    }
}

/// `Read` adapter that hashes every byte passing through it.
///
/// Used to re-address content while it is being copied somewhere else, so
/// verification costs no extra read pass.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    context: AddressingContext,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            context: AddressingContext::new(),
        }
    }

    /// Bytes read through the adapter so far.
    pub fn consumed(&self) -> u64 {
        self.context.consumed()
    }

    /// Digest of everything read so far, and the inner reader.
    pub fn finish(self) -> (Addressed, R) {
        (self.context.finish(), self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.context.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ADDRESSER: ContentAddresser = ContentAddresser::new();

    #[test]
    fn digest_is_deterministic() {
        let a = ADDRESSER.digest_bytes(b"hello world");
        let b = ADDRESSER.digest_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn matches_plain_blake3() {
        let addressed = ADDRESSER.digest_bytes(b"hello");
        assert_eq!(addressed.digest.as_bytes(), blake3::hash(b"hello").as_bytes());
        assert_eq!(addressed.size, 5);
    }

    #[test]
    fn different_content_different_digest() {
        let a = ADDRESSER.digest_bytes(b"hello");
        let b = ADDRESSER.digest_bytes(b"hellp");
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut ctx = ADDRESSER.begin();
        ADDRESSER.update(&mut ctx, b"hel");
        ADDRESSER.update(&mut ctx, b"lo wor");
        ADDRESSER.update(&mut ctx, b"ld");
        assert_eq!(ctx.consumed(), 11);
        assert_eq!(ADDRESSER.finish(ctx), ADDRESSER.digest_bytes(b"hello world"));
    }

    #[test]
    fn reader_with_small_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let addresser = ContentAddresser::with_chunk_size(7);
        let streamed = addresser.digest_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, ADDRESSER.digest_bytes(&data));
        assert_eq!(streamed.size, 10_000);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        assert_eq!(ContentAddresser::with_chunk_size(0).chunk_size(), 1);
    }

    #[test]
    fn seekable_rewinds_to_start() {
        let mut cursor = Cursor::new(b"rewind me".to_vec());
        cursor.set_position(3);
        let addressed = ADDRESSER.digest_seekable(&mut cursor).unwrap();
        assert_eq!(addressed, ADDRESSER.digest_bytes(b"rewind me"));
        assert_eq!(cursor.position(), 0);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"rewind me");
    }

    #[test]
    fn verify_detects_tampering() {
        let digest = ADDRESSER.digest_bytes(b"original").digest;
        assert!(ADDRESSER.verify(b"original", &digest));
        assert!(!ADDRESSER.verify(b"tampered", &digest));
    }

    #[test]
    fn hashing_reader_passes_bytes_through() {
        let mut reader = HashingReader::new(Cursor::new(b"pass-through".to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"pass-through");
        assert_eq!(reader.consumed(), 12);

        let (addressed, _) = reader.finish();
        assert_eq!(addressed, ADDRESSER.digest_bytes(b"pass-through"));
    }

    #[test]
    fn empty_input_has_zero_size() {
        let addressed = ADDRESSER.digest_reader(io::empty()).unwrap();
        assert_eq!(addressed.size, 0);
    }
}
