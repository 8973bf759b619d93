use std::cmp;
use std::io::{ErrorKind, Read};

/// Read from `data` until `buf` is full or the source is exhausted.
///
/// Returns the number of bytes placed in `buf`, a short count means the
/// source hit end-of-data.
pub fn fill_buf<R: Read + ?Sized>(data: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => break,
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok(buf_read)
}

/// Move as much of `pending` as fits into `buf`, front first.
pub fn drain_into(pending: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let split_at = cmp::min(pending.len(), buf.len());
    buf[..split_at].copy_from_slice(&pending[..split_at]);
    pending.drain(..split_at);

    split_at
}
