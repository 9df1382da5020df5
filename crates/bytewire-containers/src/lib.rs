//! # bytewire-containers
//!
//! Byte containers underpinning the bytewire server framework:
//!
//! - [`RingBuffer`] — bounded, mutex-serialized byte queue with copy I/O and
//!   a linear-space/commit zero-copy path.
//! - [`ByteStream`] — typed push/pop of plain scalars over a ring buffer.
//! - [`Unpacker`] — delimiter- and probe-driven frame extraction with
//!   partial-frame resumption across submissions and wrap-arounds.

pub mod byte_stream;
pub mod ring_buffer;
pub mod unpacker;

pub use byte_stream::{ByteStream, ByteStreamError, Plain};
pub use ring_buffer::{ReadSpace, RingBuffer, RingError, WriteSpace};
pub use unpacker::{
    Frame, FrameLayout, FramingConfig, LengthProbe, UnpackError, UnpackMode, Unpacker, Validator,
};
