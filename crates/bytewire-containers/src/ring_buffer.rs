//! Bounded byte ring buffer
//!
//! The substrate for every other bytewire container. A fixed-capacity byte
//! queue with two I/O styles:
//!
//! 1. **Copy I/O** — `write`/`read`/`peek` move bytes through an internal
//!    two-segment copy that handles the wrap-around seam.
//! 2. **Linear I/O** — `linear_write_space`/`linear_read_space` hand out the
//!    largest contiguous slice on the respective side, so a caller can point
//!    `read(2)`/`recvfrom(2)` straight at the backing storage and then
//!    `commit` exactly the bytes the syscall produced.
//!
//! # Index discipline
//!
//! `read`, `write` and `len` satisfy `len == (write - read) mod capacity`
//! while `len < capacity`; the buffer is full exactly when `len == capacity`
//! and `read == write`. `available_to_write + available_to_read == capacity`
//! at all times.
//!
//! # Thread safety
//!
//! All state sits behind a single `Mutex`; every public operation locks it.
//! A linear-space guard *keeps holding* that lock, so the view can never be
//! invalidated by a concurrent operation — the borrow ends when the guard is
//! committed or dropped.

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Errors surfaced by ring buffer operations.
///
/// `Full` doubles as "not enough readable data" on the read side; the two
/// sides mirror each other (a read of `k` bytes needs `k` stored, a write of
/// `k` bytes needs `k` free).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Not enough free space to write, or not enough stored data to read.
    #[error("ring buffer capacity exceeded")]
    Full,
    /// A zero-length request.
    #[error("empty request on ring buffer")]
    Empty,
    /// A commit or resize that does not fit the current state.
    #[error("invalid size for ring buffer operation")]
    InvalidSize,
}

pub(crate) struct RingInner {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
    len: usize,
}

impl RingInner {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub(crate) fn available_to_read(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn available_to_write(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Copy `src` in at the write index. Caller has checked capacity.
    fn copy_in(&mut self, src: &[u8]) {
        let first = src.len().min(self.buf.len() - self.write);
        self.buf[self.write..self.write + first].copy_from_slice(&src[..first]);
        if src.len() > first {
            self.buf[..src.len() - first].copy_from_slice(&src[first..]);
        }
        self.write = (self.write + src.len()) % self.buf.len();
        self.len += src.len();
    }

    /// Two-segment copy of `dst.len()` stored bytes starting `offset` bytes
    /// past the read index. Indices are not moved. Caller has checked that
    /// `offset + dst.len() <= len`.
    pub(crate) fn copy_span(&self, offset: usize, dst: &mut [u8]) {
        let start = (self.read + offset) % self.buf.len();
        let dst_len = dst.len();
        let first = dst_len.min(self.buf.len() - start);
        dst[..first].copy_from_slice(&self.buf[start..start + first]);
        if dst_len > first {
            dst[first..].copy_from_slice(&self.buf[..dst_len - first]);
        }
    }

    pub(crate) fn commit_read(&mut self, n: usize) -> Result<(), RingError> {
        if n > self.len {
            return Err(RingError::InvalidSize);
        }
        self.read = (self.read + n) % self.buf.len();
        self.len -= n;
        Ok(())
    }

    pub(crate) fn commit_write(&mut self, n: usize) -> Result<(), RingError> {
        if n > self.available_to_write() {
            return Err(RingError::InvalidSize);
        }
        self.write = (self.write + n) % self.buf.len();
        self.len += n;
        Ok(())
    }

    /// First occurrence of `key` at or after `start`, both measured from the
    /// read index. Walks byte-by-byte with index-modulo addressing, so a key
    /// straddling the wrap-around seam is still found.
    pub(crate) fn find_key(&self, key: &[u8], start: usize) -> Option<usize> {
        if key.is_empty() || key.len() > self.len || start + key.len() > self.len {
            return None;
        }
        let cap = self.buf.len();
        'outer: for off in start..=(self.len - key.len()) {
            for (j, k) in key.iter().enumerate() {
                if self.buf[(self.read + off + j) % cap] != *k {
                    continue 'outer;
                }
            }
            return Some(off);
        }
        None
    }
}

/// A bounded, mutex-serialized byte queue.
pub struct RingBuffer {
    inner: Mutex<RingInner>,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner::new(capacity)),
        }
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, RingInner> {
        // A poisoned lock means a panic while holding it; the index state is
        // never left half-updated, so continuing is sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy all of `src` into the buffer, or nothing at all.
    ///
    /// Returns the byte count on success, `Full` when `src` does not fit,
    /// `Empty` when `src` has no bytes.
    pub fn write(&self, src: &[u8]) -> Result<usize, RingError> {
        if src.is_empty() {
            return Err(RingError::Empty);
        }
        let mut inner = self.lock();
        if src.len() > inner.available_to_write() {
            return Err(RingError::Full);
        }
        inner.copy_in(src);
        Ok(src.len())
    }

    /// Read exactly `dst.len()` bytes out of the buffer.
    ///
    /// `Full` when fewer bytes are stored than requested, `Empty` when `dst`
    /// has no room.
    pub fn read_into(&self, dst: &mut [u8]) -> Result<usize, RingError> {
        let mut inner = self.lock();
        Self::take(&mut inner, dst, true)?;
        Ok(dst.len())
    }

    /// Read exactly `n` bytes into a fresh vector.
    pub fn read(&self, n: usize) -> Result<Vec<u8>, RingError> {
        let mut inner = self.lock();
        let mut out = vec![0u8; n];
        Self::take(&mut inner, &mut out, true)?;
        Ok(out)
    }

    /// Same as [`read`](Self::read) but without moving the read index.
    pub fn peek(&self, n: usize) -> Result<Vec<u8>, RingError> {
        let mut inner = self.lock();
        let mut out = vec![0u8; n];
        Self::take(&mut inner, &mut out, false)?;
        Ok(out)
    }

    fn take(inner: &mut RingInner, dst: &mut [u8], consume: bool) -> Result<(), RingError> {
        if dst.is_empty() {
            return Err(RingError::Empty);
        }
        if dst.len() > inner.available_to_read() {
            return Err(RingError::Full);
        }
        inner.copy_span(0, dst);
        if consume {
            inner.commit_read(dst.len())?;
        }
        Ok(())
    }

    /// Borrow the largest contiguous writable slice.
    ///
    /// The guard holds the buffer lock until it is committed or dropped, so
    /// nothing can move the indices underneath the view. A zero-length view
    /// means the buffer is full.
    pub fn linear_write_space(&self) -> WriteSpace<'_> {
        WriteSpace { guard: self.lock() }
    }

    /// Borrow the largest contiguous readable slice. Read-side twin of
    /// [`linear_write_space`](Self::linear_write_space).
    pub fn linear_read_space(&self) -> ReadSpace<'_> {
        ReadSpace { guard: self.lock() }
    }

    /// Drop all stored bytes and reset both indices to zero.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.read = 0;
        inner.write = 0;
        inner.len = 0;
    }

    /// Change the capacity. Only legal while the buffer is empty; a resize
    /// with bytes in flight would scramble the wrap-around accounting.
    pub fn resize(&self, capacity: usize) -> Result<(), RingError> {
        let mut inner = self.lock();
        if inner.len != 0 {
            return Err(RingError::InvalidSize);
        }
        *inner = RingInner::new(capacity);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.lock().len == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.lock();
        inner.len == inner.capacity()
    }

    /// Stored bytes as a fraction of capacity.
    pub fn usage(&self) -> f32 {
        let inner = self.lock();
        inner.len as f32 / inner.capacity() as f32
    }

    pub fn available_to_write(&self) -> usize {
        self.lock().available_to_write()
    }

    pub fn available_to_read(&self) -> usize {
        self.lock().available_to_read()
    }

    /// Hex dump of the backing array with an `R/W/L` header, eight bytes per
    /// row. Diagnostic only; dumps raw storage, not logical order.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let inner = self.lock();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "ring [R:{:2} W:{:2} L:{:2} C:{:2}]",
            inner.read,
            inner.write,
            inner.len,
            inner.capacity()
        );
        for row in inner.buf.chunks(8) {
            for b in row {
                let _ = write!(out, "{:02x} ", b);
            }
            out.push('\n');
        }
        out
    }
}

/// Borrowed contiguous write view. Fill (a prefix of) the slice, then
/// [`commit`](WriteSpace::commit) the bytes actually produced; dropping the
/// guard without committing discards the view.
pub struct WriteSpace<'a> {
    guard: MutexGuard<'a, RingInner>,
}

impl WriteSpace<'_> {
    /// Contiguous writable length: `min(available_to_write, capacity - w)`.
    pub fn len(&self) -> usize {
        let cap = self.guard.capacity();
        self.guard.available_to_write().min(cap - self.guard.write)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let start = self.guard.write;
        let len = self.len();
        &mut self.guard.buf[start..start + len]
    }

    /// Raw pointer form of [`as_mut_slice`](Self::as_mut_slice), for handing
    /// to a syscall.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_mut_slice().as_mut_ptr()
    }

    /// Publish `n` bytes written through the view. `InvalidSize` when `n`
    /// exceeds the free space.
    pub fn commit(mut self, n: usize) -> Result<(), RingError> {
        self.guard.commit_write(n)
    }
}

/// Borrowed contiguous read view; mirror of [`WriteSpace`].
pub struct ReadSpace<'a> {
    guard: MutexGuard<'a, RingInner>,
}

impl ReadSpace<'_> {
    /// Contiguous readable length: `min(available_to_read, capacity - r)`.
    pub fn len(&self) -> usize {
        let cap = self.guard.capacity();
        self.guard.available_to_read().min(cap - self.guard.read)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        let start = self.guard.read;
        let len = self.len();
        &self.guard.buf[start..start + len]
    }

    /// Consume `n` bytes read through the view. `InvalidSize` when `n`
    /// exceeds the stored length.
    pub fn commit(mut self, n: usize) -> Result<(), RingError> {
        self.guard.commit_read(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_write_then_read_roundtrip() {
        let ring = RingBuffer::new(16);
        assert_eq!(ring.write(&[1, 2, 3, 4]), Ok(4));
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.read(4).unwrap(), vec![1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wrap_around_accounting() {
        // Capacity 5: write 5, read 3, write 3 (wraps), read 5 drains.
        let ring = RingBuffer::new(5);
        assert_eq!(ring.write(&[1, 2, 3, 4, 5]), Ok(5));
        assert!(ring.is_full());
        assert_eq!(ring.read(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(ring.write(&[6, 7, 8]), Ok(3));
        assert!(ring.is_full());
        assert_eq!(ring.read(5).unwrap(), vec![4, 5, 6, 7, 8]);
        assert!(ring.is_empty());
        // Drained buffer has r == w.
        let inner = ring.lock();
        assert_eq!(inner.read, inner.write);
    }

    #[test]
    fn test_error_kinds() {
        let ring = RingBuffer::new(4);
        assert_eq!(ring.write(&[]), Err(RingError::Empty));
        assert_eq!(ring.read(0), Err(RingError::Empty));
        assert_eq!(ring.write(&[0; 5]), Err(RingError::Full));
        ring.write(&[1, 2]).unwrap();
        assert_eq!(ring.read(3), Err(RingError::Full));
        assert_eq!(ring.peek(3), Err(RingError::Full));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let ring = RingBuffer::new(8);
        ring.write(&[9, 8, 7]).unwrap();
        assert_eq!(ring.peek(3).unwrap(), vec![9, 8, 7]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.read(3).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_linear_write_commit_matches_copy_write() {
        let a = RingBuffer::new(8);
        let b = RingBuffer::new(8);
        // Skew both so the linear space is shorter than the free space.
        for ring in [&a, &b] {
            ring.write(&[0; 6]).unwrap();
            ring.read(6).unwrap();
        }
        a.write(&[1, 2, 3, 4]).unwrap();

        let mut remaining: &[u8] = &[1, 2, 3, 4];
        while !remaining.is_empty() {
            let mut ws = b.linear_write_space();
            let n = ws.len().min(remaining.len());
            ws.as_mut_slice()[..n].copy_from_slice(&remaining[..n]);
            ws.commit(n).unwrap();
            remaining = &remaining[n..];
        }
        assert_eq!(a.read(4).unwrap(), b.read(4).unwrap());
    }

    #[test]
    fn test_linear_read_space_wraps_in_two_views() {
        let ring = RingBuffer::new(6);
        ring.write(&[0; 4]).unwrap();
        ring.read(4).unwrap();
        ring.write(&[1, 2, 3, 4]).unwrap(); // bytes 3,4 live before the seam

        let rs = ring.linear_read_space();
        assert_eq!(rs.as_slice(), &[1, 2]);
        rs.commit(2).unwrap();
        let rs = ring.linear_read_space();
        assert_eq!(rs.as_slice(), &[3, 4]);
    }

    #[test]
    fn test_commit_size_checked() {
        let ring = RingBuffer::new(4);
        let ws = ring.linear_write_space();
        assert_eq!(ws.commit(5), Err(RingError::InvalidSize));
        ring.write(&[1]).unwrap();
        let rs = ring.linear_read_space();
        assert_eq!(rs.commit(2), Err(RingError::InvalidSize));
    }

    #[test]
    fn test_dropped_view_discards() {
        let ring = RingBuffer::new(4);
        {
            let mut ws = ring.linear_write_space();
            ws.as_mut_slice()[0] = 42;
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_write_to_full_after_wrap() {
        let ring = RingBuffer::new(8);
        ring.write(&[0; 5]).unwrap();
        ring.read(5).unwrap();
        // r == w == 5; fill every free byte.
        let free = ring.available_to_write();
        ring.write(&vec![7u8; free]).unwrap();
        assert!(ring.is_full());
        let inner = ring.lock();
        assert_eq!(inner.read, inner.write);
    }

    #[test]
    fn test_clear_and_resize() {
        let ring = RingBuffer::new(4);
        ring.write(&[1, 2]).unwrap();
        assert_eq!(ring.resize(8), Err(RingError::InvalidSize));
        ring.clear();
        assert!(ring.is_empty());
        ring.resize(8).unwrap();
        assert_eq!(ring.capacity(), 8);
        ring.write(&[0; 8]).unwrap();
        assert!(ring.is_full());
    }

    #[test]
    fn test_usage_ratio() {
        let ring = RingBuffer::new(4);
        ring.write(&[1, 2]).unwrap();
        assert!((ring.usage() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_concurrent_writer_reader() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(RingBuffer::new(64));
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let writer = {
            let ring = Arc::clone(&ring);
            let payload = payload.clone();
            thread::spawn(move || {
                let mut sent = 0;
                while sent < payload.len() {
                    let chunk = (payload.len() - sent).min(16);
                    if ring.write(&payload[sent..sent + chunk]).is_ok() {
                        sent += chunk;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut got = Vec::with_capacity(payload.len());
        while got.len() < payload.len() {
            let n = ring.len().min(payload.len() - got.len());
            if n == 0 {
                thread::yield_now();
                continue;
            }
            got.extend(ring.read(n).unwrap());
        }
        writer.join().unwrap();
        assert_eq!(got, payload);
    }

    proptest! {
        /// Concatenated reads equal concatenated writes, for any chunking
        /// that respects capacity.
        #[test]
        fn prop_fifo_identity(data in proptest::collection::vec(any::<u8>(), 1..512),
                              chunk in 1usize..32) {
            let ring = RingBuffer::new(64);
            let mut out = Vec::with_capacity(data.len());
            for piece in data.chunks(chunk.min(64)) {
                ring.write(piece).unwrap();
                out.extend(ring.read(piece.len()).unwrap());
            }
            prop_assert_eq!(out, data);
        }

        /// The two availability counters always partition the capacity.
        #[test]
        fn prop_availability_partitions_capacity(ops in proptest::collection::vec((any::<bool>(), 1usize..16), 0..64)) {
            let ring = RingBuffer::new(32);
            for (is_write, n) in ops {
                if is_write {
                    let _ = ring.write(&vec![0xAB; n]);
                } else {
                    let _ = ring.read(n);
                }
                prop_assert_eq!(ring.available_to_read() + ring.available_to_write(), 32);
            }
        }

        /// Peek then read observe identical bytes.
        #[test]
        fn prop_peek_read_agree(data in proptest::collection::vec(any::<u8>(), 1..32)) {
            let ring = RingBuffer::new(32);
            ring.write(&data).unwrap();
            let peeked = ring.peek(data.len()).unwrap();
            let read = ring.read(data.len()).unwrap();
            prop_assert_eq!(peeked, read);
        }
    }
}
