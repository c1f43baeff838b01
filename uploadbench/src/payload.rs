//! A lazily generated upload payload of a fixed total length.
//!
//! [`LargeStream`] hands out random bytes in chunks until it has produced exactly the number of
//! bytes it was constructed with. It never holds more than one chunk worth of data in memory: a
//! single random buffer is generated up front and reused for every chunk that fits into it. The
//! buffer only grows when a larger chunk is requested.

use std::{fmt, io};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Size of the random buffer a [`LargeStream`] starts out with.
pub const DEFAULT_BUFFER_LEN: usize = 1024 * 1024;

/// The outcome of a single [`LargeStream::read`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// A chunk of payload bytes. More data may follow.
    Data(Bytes),
    /// The stream is exhausted. Every subsequent read returns this as well.
    Eof,
}

impl Chunk {
    /// Returns the contained bytes, or `None` at the end of the stream.
    pub fn into_data(self) -> Option<Bytes> {
        match self {
            Chunk::Data(bytes) => Some(bytes),
            Chunk::Eof => None,
        }
    }

    /// Returns `true` if this marks the end of the stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, Chunk::Eof)
    }
}

/// A single-use source of `total_len` random bytes, produced on demand.
///
/// The contents are random filler. Consecutive chunks may share the same underlying buffer, so
/// the payload is not suitable for anything that inspects the data.
pub struct LargeStream {
    total_len: u64,
    remaining: u64,
    buffer: Bytes,
    rng: SmallRng,
}

impl LargeStream {
    /// Creates a stream of `total_len` bytes with a [`DEFAULT_BUFFER_LEN`] sized buffer.
    pub fn new(total_len: u64) -> Self {
        Self::with_buffer_len(total_len, DEFAULT_BUFFER_LEN)
    }

    /// Creates a stream of `total_len` bytes with a custom initial buffer size.
    ///
    /// The buffer is at least one byte large, so that reads without a size hint always make
    /// progress.
    pub fn with_buffer_len(total_len: u64, buffer_len: usize) -> Self {
        Self::with_seed(total_len, buffer_len, rand::random())
    }

    /// Creates a stream whose contents are derived from the given `seed`.
    pub fn with_seed(total_len: u64, buffer_len: usize, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let buffer = random_bytes(&mut rng, buffer_len.max(1));

        Self {
            total_len,
            remaining: total_len,
            buffer,
            rng,
        }
    }

    /// Reads the next chunk.
    ///
    /// The chunk is `size_hint` bytes long, or as large as the current buffer if no hint is given,
    /// but never longer than the number of remaining bytes. Requesting more than the current
    /// buffer capacity regenerates the buffer at the requested size.
    pub fn read(&mut self, size_hint: Option<usize>) -> Chunk {
        if self.remaining == 0 {
            return Chunk::Eof;
        }

        let requested = size_hint.unwrap_or(self.buffer.len());
        let len = match usize::try_from(self.remaining) {
            Ok(remaining) => requested.min(remaining),
            Err(_) => requested,
        };

        if len > self.buffer.len() {
            self.buffer = random_bytes(&mut self.rng, len);
        }

        self.remaining -= len as u64;
        Chunk::Data(self.buffer.slice(..len))
    }

    /// The number of bytes that have not been read yet.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// The total number of bytes this stream produces.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// The current size of the internal random buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns an iterator over the remaining chunks.
    ///
    /// A `size_hint` of zero is treated like no hint at all, since it would never reach the end.
    pub fn chunks(self, size_hint: Option<usize>) -> Chunks {
        Chunks {
            source: self,
            size_hint: size_hint.filter(|&len| len > 0),
        }
    }

    /// Converts this source into a byte stream that HTTP clients can pull from incrementally.
    pub fn into_stream(
        self,
        size_hint: Option<usize>,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
        stream::iter(self.chunks(size_hint).map(Ok))
    }
}

impl fmt::Debug for LargeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeStream")
            .field("total_len", &self.total_len)
            .field("remaining", &self.remaining)
            .field("capacity", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl io::Read for LargeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match LargeStream::read(self, Some(buf.len())) {
            Chunk::Data(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Chunk::Eof => Ok(0),
        }
    }
}

/// Iterator over the chunks of a [`LargeStream`], created by [`LargeStream::chunks`].
#[derive(Debug)]
pub struct Chunks {
    source: LargeStream,
    size_hint: Option<usize>,
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.source.read(self.size_hint).into_data()
    }
}

fn random_bytes(rng: &mut SmallRng, len: usize) -> Bytes {
    let mut buffer = vec![0; len];
    rng.fill_bytes(&mut buffer);
    buffer.into()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use futures_util::TryStreamExt;

    use super::*;

    fn drain(mut source: LargeStream, size_hint: Option<usize>) -> u64 {
        let mut total = 0;
        while let Chunk::Data(bytes) = source.read(size_hint) {
            total += bytes.len() as u64;
        }
        assert_eq!(source.remaining(), 0);
        total
    }

    #[test]
    fn default_buffer_then_remainder() {
        let mut source = LargeStream::new(1024 * 1024 + 10);

        let first = source.read(None).into_data().unwrap();
        assert_eq!(first.len(), 1024 * 1024);
        assert_eq!(source.remaining(), 10);

        let second = source.read(None).into_data().unwrap();
        assert_eq!(second.len(), 10);
        assert_eq!(source.remaining(), 0);

        assert!(source.read(None).is_eof());
    }

    #[test]
    fn empty_stream_is_immediately_exhausted() {
        let mut source = LargeStream::new(0);
        assert_eq!(source.read(None), Chunk::Eof);
        assert_eq!(source.read(Some(100)), Chunk::Eof);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn chunk_lengths_sum_to_total() {
        for total in [0, 1, 7, 4096, 100_000] {
            for hint in [None, Some(1), Some(333), Some(4096), Some(1 << 20)] {
                let source = LargeStream::with_buffer_len(total, 512);
                assert_eq!(drain(source, hint), total, "total={total} hint={hint:?}");
            }
        }
    }

    #[test]
    fn eof_is_sticky() {
        let mut source = LargeStream::with_buffer_len(5, 2);
        assert_eq!(drain_by_ref(&mut source), 5);
        for _ in 0..3 {
            assert!(source.read(Some(10)).is_eof());
        }
    }

    fn drain_by_ref(source: &mut LargeStream) -> u64 {
        let mut total = 0;
        while let Some(bytes) = source.read(None).into_data() {
            total += bytes.len() as u64;
        }
        total
    }

    #[test]
    fn remaining_tracks_cumulative_reads() {
        let total = 10_000;
        let mut source = LargeStream::with_buffer_len(total, 64);
        let mut yielded = 0;

        for hint in [1, 100, 17, 5000, 64, 9999, 3] {
            if let Chunk::Data(bytes) = source.read(Some(hint)) {
                yielded += bytes.len() as u64;
            }
            assert_eq!(source.remaining(), total - yielded);
        }
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn buffer_grows_monotonically() {
        let mut source = LargeStream::with_buffer_len(1 << 20, 16);
        assert_eq!(source.capacity(), 16);

        source.read(Some(1000));
        assert_eq!(source.capacity(), 1000);

        source.read(Some(10));
        assert_eq!(source.capacity(), 1000);

        source.read(None);
        assert_eq!(source.capacity(), 1000);

        source.read(Some(4000));
        assert_eq!(source.capacity(), 4000);
    }

    #[test]
    fn no_growth_past_remaining() {
        let mut source = LargeStream::with_buffer_len(100, 16);
        let chunk = source.read(Some(1 << 20)).into_data().unwrap();
        assert_eq!(chunk.len(), 100);
        assert_eq!(source.capacity(), 100);
    }

    #[test]
    fn zero_hint_yields_empty_chunk() {
        let mut source = LargeStream::new(10);
        assert_eq!(source.read(Some(0)), Chunk::Data(Bytes::new()));
        assert_eq!(source.remaining(), 10);
    }

    #[test]
    fn seeded_streams_are_deterministic() {
        let mut a = LargeStream::with_seed(64, 64, 42);
        let mut b = LargeStream::with_seed(64, 64, 42);
        assert_eq!(a.read(None), b.read(None));
    }

    #[test]
    fn io_read_fills_buffers() {
        let mut source = LargeStream::with_buffer_len(3000, 128);
        let mut contents = Vec::new();
        source.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len(), 3000);
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn stream_yields_all_bytes() {
        let stream = LargeStream::with_buffer_len(10_000, 1000).into_stream(Some(0));
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 10_000);
    }
}
