//! Lazy byte stream transforms.
//!
//! A transform wraps an inner [`Read`] and an [`Engine`], pulling plaintext
//! from the inner reader a frame at a time, pushing it through the engine
//! and handing the engine output back to whoever reads the transform. The
//! engine is finished exactly once, when the inner reader runs dry, so any
//! residual output (compressor trailer, final padded cipher block) lands at
//! the end of the stream.
//!
//! Transforms stack: the archiver compresses first and encrypts second,
//! since ciphertext does not compress.
pub mod compress;
pub mod crypt;

use std::io::Read;

use crate::buf::{drain_into, fill_buf};

// 64Kb frame pulled from the inner reader per engine update
const FRAME_SIZE: usize = 64 * 1024;

/// The stateful half of a transform.
pub trait Engine {
    fn update(&mut self, data: &[u8], out: &mut Vec<u8>) -> std::io::Result<()>;
    fn finish(&mut self, out: &mut Vec<u8>) -> std::io::Result<()>;
}

/// A transform that can describe itself in the archive description.
pub trait Transform: Read {
    fn tag(&self) -> String;
}

pub struct Transformer<R, E> {
    reader: R,
    engine: E,
    in_buf: Box<[u8]>,
    out_buf: Vec<u8>,
    finished: bool,
}

impl<R: Read, E: Engine> Transformer<R, E> {
    pub fn new(reader: R, engine: E) -> Self {
        Transformer {
            reader,
            engine,
            in_buf: vec![0u8; FRAME_SIZE].into_boxed_slice(),
            out_buf: Vec::with_capacity(FRAME_SIZE),
            finished: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<R: Read, E: Engine> Read for Transformer<R, E> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        transform_read(
            &mut self.reader,
            &mut self.engine,
            &mut self.in_buf,
            &mut self.out_buf,
            &mut self.finished,
            buf,
        )
    }
}

fn transform_read<R: Read, E: Engine>(
    data: &mut R,
    engine: &mut E,
    in_buf: &mut [u8],
    out_buf: &mut Vec<u8>,
    finished: &mut bool,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut buf_write: usize = 0;

    while buf_write < buf.len() {
        if !out_buf.is_empty() {
            buf_write += drain_into(out_buf, &mut buf[buf_write..]);
        } else if *finished {
            break;
        } else {
            match fill_buf(data, in_buf)? {
                0 => {
                    engine.finish(out_buf)?;
                    *finished = true;
                }
                len => engine.update(&in_buf[..len], out_buf)?,
            }
        }
    }

    Ok(buf_write)
}
