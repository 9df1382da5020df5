//! Net-layer error type
//!
//! Handler and reactor failures funnel into one enum so the reactor can
//! treat "anything unexpected out of a handler" as a teardown signal for
//! that fd alone.

use std::io;

use thiserror::Error;

use bytewire_containers::{RingError, UnpackError};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("buffer error: {0}")]
    Ring(#[from] RingError),
    #[error("framing error: {0}")]
    Unpack(#[from] UnpackError),
}
