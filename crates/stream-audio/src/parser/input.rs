//! Unconsumed bytes between parse calls, tracked with their absolute stream offset.

use bytes::{Buf, Bytes, BytesMut};

#[derive(Debug, Default)]
pub(crate) struct Input {
    buf: BytesMut,
    /// Absolute stream offset of `buf[0]`.
    offset: u64,
    /// Bytes still to discard from future chunks (a skip that ran past the buffer).
    pending_skip: u64,
}

impl Input {
    pub(crate) fn push(&mut self, mut chunk: &[u8]) {
        if self.pending_skip > 0 {
            let n = (self.pending_skip.min(chunk.len() as u64)) as usize;
            chunk = &chunk[n..];
            self.offset += n as u64;
            self.pending_skip -= n as u64;
        }
        self.buf.extend_from_slice(chunk);
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn peek(&self, n: usize) -> Option<&[u8]> {
        self.buf.get(..n)
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn advance(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        self.offset += n as u64;
    }

    /// Discard `n` bytes, including bytes that have not arrived yet.
    pub(crate) fn skip(&mut self, n: u64) {
        let now = n.min(self.buf.len() as u64);
        self.advance(now as usize);
        self.pending_skip += n - now;
    }

    pub(crate) fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.offset += n as u64;
        self.buf.split_to(n).freeze()
    }

    pub(crate) fn clear(&mut self) {
        self.advance(self.buf.len());
    }
}
