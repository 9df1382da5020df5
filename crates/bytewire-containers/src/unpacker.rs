//! Frame extraction from a byte stream
//!
//! The unpacker owns a [`RingBuffer`] and scans it for frame boundaries.
//! Which boundaries exist is fixed at construction from the framing config:
//!
//! | Mode        | Present                              | Frame is |
//! |-------------|--------------------------------------|----------|
//! | `Head`      | head key only                        | one head occurrence up to (excluding) the next |
//! | `HeadTail`  | head + tail keys                     | head occurrence through the end of the next tail |
//! | `HeadTailCb`| both keys + length probe + validator | `head+data+tail` sized by the probe, tail at the probed offset, validator-approved |
//!
//! Emitted frames carry the delimiters, bit-exact as they were on the wire.
//! Partial frames stay buffered across calls, so a stream may be submitted
//! in arbitrary chunks — including chunks that split a delimiter across the
//! ring's wrap-around seam.
//!
//! In `Head` mode the trailing frame is never emitted: its end is only known
//! once the *next* head arrives. A producer that must drain the stream
//! appends one more head key as a sentinel.
//!
//! `HeadTailCb` resynchronizes after a malformed candidate by advancing one
//! byte and rescanning, so corrupt or hostile input cannot wedge the stream.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::ring_buffer::{RingBuffer, RingError, RingInner};

/// One extracted application frame, delimiters included.
pub type Frame = Vec<u8>;

/// Segment sizes reported by a length probe, anchored at a head occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub head_size: usize,
    pub data_size: usize,
    pub tail_size: usize,
}

impl FrameLayout {
    /// Total frame length. Saturates, so absurd probe output lands in the
    /// can-never-fit resynchronization path instead of overflowing.
    pub fn packet_size(&self) -> usize {
        self.head_size
            .saturating_add(self.data_size)
            .saturating_add(self.tail_size)
    }
}

/// Sizes a candidate frame from its leading bytes.
///
/// The slice holds everything buffered from the head occurrence onward;
/// return `None` when it is still too short to size the frame.
pub type LengthProbe = Arc<dyn Fn(&[u8]) -> Option<FrameLayout> + Send + Sync>;

/// Accepts or rejects a complete candidate frame.
pub type Validator = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Framing rules plus the capacity of the buffer behind them.
#[derive(Clone)]
pub struct FramingConfig {
    pub head_key: Vec<u8>,
    pub tail_key: Option<Vec<u8>>,
    pub length_probe: Option<LengthProbe>,
    pub validator: Option<Validator>,
    pub buffer_size: usize,
}

impl FramingConfig {
    /// Start from a head key and the default 1 KiB buffer.
    pub fn head(head_key: impl Into<Vec<u8>>) -> Self {
        Self {
            head_key: head_key.into(),
            tail_key: None,
            length_probe: None,
            validator: None,
            buffer_size: 1024,
        }
    }

    pub fn tail(mut self, tail_key: impl Into<Vec<u8>>) -> Self {
        self.tail_key = Some(tail_key.into());
        self
    }

    pub fn length_probe(
        mut self,
        probe: impl Fn(&[u8]) -> Option<FrameLayout> + Send + Sync + 'static,
    ) -> Self {
        self.length_probe = Some(Arc::new(probe));
        self
    }

    pub fn validator(mut self, validator: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

impl fmt::Debug for FramingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramingConfig")
            .field("head_key", &self.head_key)
            .field("tail_key", &self.tail_key)
            .field("length_probe", &self.length_probe.is_some())
            .field("validator", &self.validator.is_some())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// Extraction strategy, derived once from which config pieces are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackMode {
    Head,
    HeadTail,
    HeadTailCb,
    /// Unusable combination; every extract call errors.
    None,
}

#[derive(Debug, Error)]
pub enum UnpackError {
    /// The config did not resolve to a usable mode.
    #[error("framing config resolves to no usable mode")]
    Unconfigured,
    #[error(transparent)]
    Ring(#[from] RingError),
}

/// Byte-stream frame extractor over an owned ring buffer.
pub struct Unpacker {
    ring: RingBuffer,
    head_key: Vec<u8>,
    tail_key: Vec<u8>,
    length_probe: Option<LengthProbe>,
    validator: Option<Validator>,
    mode: UnpackMode,
}

impl Unpacker {
    pub fn new(config: FramingConfig) -> Self {
        let tail_key = config.tail_key.unwrap_or_default();
        let mode = match (
            !config.head_key.is_empty(),
            !tail_key.is_empty(),
            config.length_probe.is_some(),
            config.validator.is_some(),
        ) {
            (true, false, false, false) => UnpackMode::Head,
            (true, true, false, false) => UnpackMode::HeadTail,
            (true, true, true, true) => UnpackMode::HeadTailCb,
            _ => UnpackMode::None,
        };
        Self {
            ring: RingBuffer::new(config.buffer_size),
            head_key: config.head_key,
            tail_key,
            length_probe: config.length_probe,
            validator: config.validator,
            mode,
        }
    }

    pub fn mode(&self) -> UnpackMode {
        self.mode
    }

    /// The buffer bytes are staged in; exposed for the zero-copy fill path
    /// (`linear_write_space` + `commit`, then [`get`](Self::get)).
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Enqueue `bytes`, then extract every complete frame into `frames`
    /// (cleared first). Returns the number of bytes enqueued; a buffer
    /// that cannot take all of `bytes` rejects the whole submission.
    pub fn push_and_get(
        &self,
        bytes: &[u8],
        frames: &mut Vec<Frame>,
    ) -> Result<usize, UnpackError> {
        frames.clear();
        let written = self.ring.write(bytes).map_err(UnpackError::Ring)?;
        self.get(frames)?;
        Ok(written)
    }

    /// Extract every complete frame, appending to `frames`. Running out of
    /// bytes mid-frame is not an error; the partial frame waits for the
    /// next submission.
    pub fn get(&self, frames: &mut Vec<Frame>) -> Result<(), UnpackError> {
        let mut inner = self.ring.lock();
        match self.mode {
            UnpackMode::Head => self.extract_head(&mut inner, frames),
            UnpackMode::HeadTail => self.extract_head_tail(&mut inner, frames),
            UnpackMode::HeadTailCb => self.extract_head_tail_cb(&mut inner, frames),
            UnpackMode::None => return Err(UnpackError::Unconfigured),
        }
        Ok(())
    }

    /// First occurrence of `key` at or after `start_offset`, both relative
    /// to the read cursor. `None` when absent or the query is malformed
    /// (empty key, key longer than the readable region, start past the end).
    pub fn find_key(&self, key: &[u8], start_offset: usize) -> Option<usize> {
        self.ring.lock().find_key(key, start_offset)
    }

    /// Bytes before a located head can never belong to a frame; drop them
    /// so the cursor sits on the head. Returns false when no head exists in
    /// the readable region (a partial head at the end must stay buffered).
    fn seek_head(&self, inner: &mut RingInner) -> bool {
        match inner.find_key(&self.head_key, 0) {
            Some(0) => true,
            Some(garbage) => {
                let _ = inner.commit_read(garbage);
                true
            }
            None => false,
        }
    }

    fn emit(inner: &mut RingInner, len: usize, frames: &mut Vec<Frame>) {
        let mut frame = vec![0u8; len];
        inner.copy_span(0, &mut frame);
        let _ = inner.commit_read(len);
        frames.push(frame);
    }

    /// A frame ends where the next head begins.
    fn extract_head(&self, inner: &mut RingInner, frames: &mut Vec<Frame>) {
        while self.seek_head(inner) {
            let Some(next_head) = inner.find_key(&self.head_key, self.head_key.len()) else {
                // Trailing frame: end unknown until the next head arrives.
                break;
            };
            Self::emit(inner, next_head, frames);
        }
    }

    /// A frame ends with the next tail, tail included.
    fn extract_head_tail(&self, inner: &mut RingInner, frames: &mut Vec<Frame>) {
        while self.seek_head(inner) {
            let Some(tail) = inner.find_key(&self.tail_key, self.head_key.len()) else {
                break;
            };
            Self::emit(inner, tail + self.tail_key.len(), frames);
        }
    }

    /// Probe-sized frames with validation and one-byte resynchronization.
    fn extract_head_tail_cb(&self, inner: &mut RingInner, frames: &mut Vec<Frame>) {
        let probe = self.length_probe.as_ref().unwrap();
        let validator = self.validator.as_ref().unwrap();

        while self.seek_head(inner) {
            let readable = inner.available_to_read();
            let mut candidate = vec![0u8; readable];
            inner.copy_span(0, &mut candidate);

            let Some(layout) = probe(&candidate) else {
                // Too short to size; wait for more bytes.
                break;
            };
            let packet = layout.packet_size();

            // Sizes the keys cannot fit in, or a packet no buffer state can
            // ever hold, are malformed: skip one byte and rescan.
            if layout.head_size < self.head_key.len()
                || layout.tail_size < self.tail_key.len()
                || packet > inner.capacity()
            {
                let _ = inner.commit_read(1);
                continue;
            }
            if packet > readable {
                // Could still complete; leave the candidate buffered.
                break;
            }

            let tail_at = layout.head_size + layout.data_size;
            let tail_found =
                candidate[tail_at..tail_at + self.tail_key.len()] == self.tail_key[..];
            if !tail_found || !validator(&candidate[..packet]) {
                let _ = inner.commit_read(1);
                continue;
            }

            candidate.truncate(packet);
            frames.push(candidate);
            let _ = inner.commit_read(packet);
        }
    }
}
