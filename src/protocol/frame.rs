//! Splitting the inbound byte stream into length-prefixed frames

use crate::protocol::packet::HEADER_LENGTH;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_SIZE: usize = 4096;

/// Accumulates inbound bytes and yields complete frame bodies
///
/// Bytes are kept across calls, so a read that is abandoned by a timeout
/// never loses a partially received header or body.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Read until one complete frame body is available
    ///
    /// Returns `Ok(None)` when the peer closed the connection. Cancelling the
    /// returned future between reads is safe.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(body) = self.take_frame() {
                return Ok(Some(body));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!("Connection closed with {} unframed bytes", self.buffer.len());
                }
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.buffer.len() < HEADER_LENGTH {
                return None;
            }

            let len = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
            if self.buffer.len() < HEADER_LENGTH + len {
                return None;
            }

            let body = self.buffer[HEADER_LENGTH..HEADER_LENGTH + len].to_vec();
            self.buffer.drain(..HEADER_LENGTH + len);

            if !body.is_empty() {
                return Some(body);
            }
        }
    }
}
