use std::io::Read;

use log::debug;

use crate::buf::fill_buf;
use crate::error::Error;
use crate::hash::{tree_hash, Digest};

/// Leaf size of the service tree hash, fixed by the service.
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub const DEFAULT_CHUNKS_PER_PART: u32 = 32;

// Service bounds a part to 4GiB
const MAX_CHUNKS_PER_PART: u32 = 4096;

/// How many chunks make up one uploaded part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    chunks_per_part: u32,
}

impl PartLayout {
    pub fn new(chunks_per_part: u32) -> Result<Self, Error> {
        if !chunks_per_part.is_power_of_two() || chunks_per_part > MAX_CHUNKS_PER_PART {
            return Err(Error::InvalidPartSize(chunks_per_part));
        }
        Ok(PartLayout { chunks_per_part })
    }

    pub fn chunks_per_part(&self) -> usize {
        self.chunks_per_part as usize
    }

    /// Part size declared when the upload is initiated.
    pub fn part_size(&self) -> u64 {
        CHUNK_SIZE as u64 * self.chunks_per_part as u64
    }
}

impl Default for PartLayout {
    fn default() -> Self {
        PartLayout {
            chunks_per_part: DEFAULT_CHUNKS_PER_PART,
        }
    }
}

/// Splits a reader into `CHUNK_SIZE` chunks, the last one possibly short.
pub struct Chunks<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> Chunks<R> {
    pub fn new(reader: R) -> Self {
        Chunks {
            inner: reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut chunk = vec![0u8; CHUNK_SIZE];
        match fill_buf(&mut self.inner, &mut chunk) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(len) => {
                chunk.truncate(len);
                Some(Ok(chunk))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One uploadable slice of the archive.
#[derive(Debug)]
pub struct Part {
    pub checksum: Digest,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Done,
    // A read error leaves the digest list truncated
    Failed,
}

/// Groups chunks into parts, tree hashing each part and remembering the
/// part digests for the whole-archive checksum.
pub struct TreeHashReader<R: Read> {
    chunks: Chunks<R>,
    layout: PartLayout,
    digests: Vec<Digest>,
    state: State,
}

impl<R: Read> TreeHashReader<R> {
    pub fn new(reader: R, layout: PartLayout) -> Self {
        TreeHashReader {
            chunks: Chunks::new(reader),
            layout,
            digests: Vec::new(),
            state: State::Reading,
        }
    }

    /// Number of parts produced so far.
    pub fn parts_read(&self) -> usize {
        self.digests.len()
    }

    /// Tree hash of the whole archive, only available once every part has
    /// been read and the source ended cleanly.
    pub fn archive_checksum(&self) -> Result<Digest, Error> {
        match self.state {
            State::Done => Ok(tree_hash(&self.digests)),
            State::Reading | State::Failed => Err(Error::PartsPending),
        }
    }

    fn next_part(&mut self) -> Result<Option<Part>, Error> {
        let mut data = Vec::new();
        let mut leaves = Vec::with_capacity(self.layout.chunks_per_part());

        while leaves.len() < self.layout.chunks_per_part() {
            match self.chunks.next() {
                Some(chunk) => {
                    let chunk = chunk?;
                    leaves.push(Digest::of(&chunk));
                    if data.is_empty() {
                        data = chunk;
                    } else {
                        data.extend_from_slice(&chunk);
                    }
                }
                None => {
                    self.state = State::Done;
                    break;
                }
            }
        }

        if leaves.is_empty() {
            return Ok(None);
        }

        let checksum = tree_hash(&leaves);
        debug!(
            "part {} - chunks: {}, len: {}, tree hash: {}",
            self.digests.len(),
            leaves.len(),
            data.len(),
            checksum
        );
        self.digests.push(checksum);

        Ok(Some(Part { checksum, data }))
    }
}

impl<R: Read> Iterator for TreeHashReader<R> {
    type Item = Result<Part, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != State::Reading {
            return None;
        }
        match self.next_part() {
            Ok(part) => part.map(Ok),
            Err(e) => {
                self.state = State::Failed;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn source(len: usize) -> Cursor<Vec<u8>> {
        Cursor::new((0..len).map(|i| (i % 253) as u8).collect())
    }

    fn chunk_lens(len: usize) -> Vec<usize> {
        Chunks::new(source(len))
            .map(|c| c.unwrap().len())
            .collect()
    }

    #[test]
    fn layout_bounds() {
        assert!(PartLayout::new(0).is_err());
        assert!(PartLayout::new(3).is_err());
        assert!(PartLayout::new(8192).is_err());
        assert_eq!(PartLayout::new(1).unwrap().part_size(), CHUNK_SIZE as u64);
        assert_eq!(PartLayout::new(4096).unwrap().part_size(), 4 << 30);
        assert_eq!(PartLayout::default().part_size(), 32 * 1024 * 1024);
    }

    #[test]
    fn empty_source_no_chunks() {
        assert!(chunk_lens(0).is_empty());
    }

    #[test]
    fn exact_chunk() {
        assert_eq!(chunk_lens(CHUNK_SIZE), vec![CHUNK_SIZE]);
    }

    #[test]
    fn chunk_plus_one() {
        assert_eq!(chunk_lens(CHUNK_SIZE + 1), vec![CHUNK_SIZE, 1]);
    }

    #[test]
    fn empty_source_no_parts() {
        let mut reader = TreeHashReader::new(source(0), PartLayout::default());

        assert!(reader.archive_checksum().is_err());
        assert!(reader.next().is_none());
        assert_eq!(reader.parts_read(), 0);
        assert_eq!(reader.archive_checksum().unwrap(), Digest::of(b""));
    }

    #[test]
    fn three_chunks_one_part() {
        let src = source(3 * CHUNK_SIZE);
        let data = src.get_ref().clone();
        let mut reader = TreeHashReader::new(src, PartLayout::default());

        let part = reader.next().unwrap().unwrap();
        assert!(reader.next().is_none());
        assert_eq!(part.data, data);

        let leaves: Vec<Digest> = data.chunks(CHUNK_SIZE).map(Digest::of).collect();
        assert_eq!(part.checksum, tree_hash(&leaves));
        assert_eq!(reader.archive_checksum().unwrap(), part.checksum);
    }

    #[test]
    fn single_short_chunk_is_its_own_leaf() {
        let mut reader = TreeHashReader::new(source(10), PartLayout::default());

        let part = reader.next().unwrap().unwrap();
        assert_eq!(part.checksum, Digest::of(&part.data));
    }

    #[test]
    fn checksum_pending_until_exhausted() {
        let layout = PartLayout::new(1).unwrap();
        let mut reader = TreeHashReader::new(source(2 * CHUNK_SIZE), layout);

        reader.next().unwrap().unwrap();
        assert!(matches!(reader.archive_checksum(), Err(Error::PartsPending)));
        reader.next().unwrap().unwrap();
        assert!(matches!(reader.archive_checksum(), Err(Error::PartsPending)));
        assert!(reader.next().is_none());
        assert!(reader.archive_checksum().is_ok());
    }

    #[test]
    fn part_digests_roll_up_to_chunk_tree() {
        // Power of two parts keep the part tree aligned with the chunk tree
        let src = source(5 * CHUNK_SIZE + 17);
        let data = src.get_ref().clone();
        let layout = PartLayout::new(2).unwrap();
        let mut reader = TreeHashReader::new(src, layout);

        let lens: Vec<usize> = reader.by_ref().map(|p| p.unwrap().data.len()).collect();
        assert_eq!(lens, vec![2 * CHUNK_SIZE, 2 * CHUNK_SIZE, CHUNK_SIZE + 17]);
        assert_eq!(reader.parts_read(), 3);

        let leaves: Vec<Digest> = data.chunks(CHUNK_SIZE).map(Digest::of).collect();
        assert_eq!(reader.archive_checksum().unwrap(), tree_hash(&leaves));
    }

    // Fails every read once `limit` bytes have been handed out
    struct FailAfter {
        inner: Cursor<Vec<u8>>,
        limit: usize,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let left = self.limit - self.inner.position() as usize;
            if left == 0 {
                return Err(std::io::Error::other("device went away"));
            }
            let n = buf.len().min(left);
            self.inner.read(&mut buf[..n])
        }
    }

    #[test]
    fn no_checksum_after_read_error() {
        let src = FailAfter {
            inner: source(3 * CHUNK_SIZE),
            limit: CHUNK_SIZE + 5,
        };
        let mut reader = TreeHashReader::new(src, PartLayout::new(1).unwrap());

        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
        assert_eq!(reader.parts_read(), 1);
        assert!(matches!(reader.archive_checksum(), Err(Error::PartsPending)));
    }

    #[test]
    fn exact_part_boundary() {
        let layout = PartLayout::new(2).unwrap();
        let mut reader = TreeHashReader::new(source(2 * CHUNK_SIZE), layout);

        assert_eq!(reader.next().unwrap().unwrap().data.len(), 2 * CHUNK_SIZE);
        assert!(reader.next().is_none());
        assert!(reader.archive_checksum().is_ok());
    }
}
