//! Readiness event vocabulary
//!
//! The flag set mirrors what the kernel can report on a registered fd;
//! interest at registration time only uses the readable/writable bits.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;

/// Bit set of readiness conditions.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    pub const READABLE: EventFlags = EventFlags(1);
    pub const WRITABLE: EventFlags = EventFlags(1 << 1);
    pub const ERROR: EventFlags = EventFlags(1 << 2);
    pub const HANG_UP: EventFlags = EventFlags(1 << 3);

    #[inline]
    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: EventFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(EventFlags::READABLE) {
            names.push("READABLE");
        }
        if self.contains(EventFlags::WRITABLE) {
            names.push("WRITABLE");
        }
        if self.contains(EventFlags::ERROR) {
            names.push("ERROR");
        }
        if self.contains(EventFlags::HANG_UP) {
            names.push("HANG_UP");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "{}", names.join("|"))
    }
}

/// How the kernel reports readiness: once per transition, or for as long as
/// the condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Edge,
    Level,
}

/// One readiness report for one fd.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub flags: EventFlags,
}
