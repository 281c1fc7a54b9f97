//! Deadline-bounded reads into a frame buffer.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Growth step of read buffers.
pub const READ_CHUNK: usize = 8 * 1024;

/// Reads once from `reader` into `buf`, growing it when little spare
/// capacity is left.
///
/// Returns `Ok(None)` when `timeout` elapsed first. A zero timeout waits
/// indefinitely.
pub async fn read_with_deadline<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    timeout: Duration,
) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    if buf.capacity() - buf.len() < READ_CHUNK / 2 {
        buf.reserve(READ_CHUNK);
    }
    if timeout.is_zero() {
        return reader.read_buf(buf).await.map(Some);
    }
    match tokio::time::timeout(timeout, reader.read_buf(buf)).await {
        Ok(r) => r.map(Some),
        Err(_) => Ok(None),
    }
}
