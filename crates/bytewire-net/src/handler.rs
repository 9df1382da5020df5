//! Per-fd protocol handlers
//!
//! A handler owns its fd's receive path: drain the socket into the
//! unpacker's ring through the linear-space/commit interface, pull out
//! complete frames, and hand them to the user callback — inline, or pushed
//! through the timer scheduler when the connection was configured for
//! deferred dispatch.
//!
//! The handler set is closed: TCP streams and UDP sockets. Both share the
//! same drain skeleton; they differ only in the receive syscall and in what
//! ends the fd's life (EOF exists for TCP, not for UDP).
//!
//! Lifecycle per fd: `Open` until an error, hang-up or EOF flips
//! `should_close`; the reactor then unregisters and closes the fd.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use bytewire_containers::{Frame, Unpacker};
use bytewire_logkit::{log_debug, log_info};
use bytewire_threading::TimerScheduler;

use crate::error::NetError;
use crate::event::{Event, EventFlags};

/// Receives every non-empty batch of decoded frames.
pub type ExecCallback = Arc<dyn Fn(&mut Vec<Frame>) + Send + Sync>;

/// Where decoded frames go: straight into the callback on the reactor
/// thread, or scheduled onto the worker pool after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Inline,
    Deferred(Duration),
}

/// Closed set of per-fd handlers dispatched by the reactor.
pub enum ProtocolHandler {
    Tcp(TcpHandler),
    Udp(UdpHandler),
}

impl ProtocolHandler {
    pub fn handle_event(
        &mut self,
        event: &Event,
        timer: Option<&Arc<TimerScheduler>>,
    ) -> Result<(), NetError> {
        match self {
            ProtocolHandler::Tcp(h) => h.handle_event(event, timer),
            ProtocolHandler::Udp(h) => h.handle_event(event, timer),
        }
    }

    pub fn should_close(&self) -> bool {
        match self {
            ProtocolHandler::Tcp(h) => h.should_close,
            ProtocolHandler::Udp(h) => h.should_close,
        }
    }
}

/// Outcome of one receive attempt against the ring's linear write space.
enum DrainStep {
    /// Bytes landed and were committed.
    Filled,
    /// Ring full; stop and let transport back-pressure throttle the peer.
    BufferFull,
    /// Orderly TCP shutdown from the peer.
    Eof,
    WouldBlock,
    Interrupted,
    Failed(io::Error),
}

pub struct TcpHandler {
    fd: RawFd,
    unpacker: Unpacker,
    callback: ExecCallback,
    dispatch: Dispatch,
    should_close: bool,
    frames: Vec<Frame>,
}

impl TcpHandler {
    pub fn new(fd: RawFd, unpacker: Unpacker, callback: ExecCallback, dispatch: Dispatch) -> Self {
        Self {
            fd,
            unpacker,
            callback,
            dispatch,
            should_close: false,
            frames: Vec::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_event(
        &mut self,
        event: &Event,
        timer: Option<&Arc<TimerScheduler>>,
    ) -> Result<(), NetError> {
        if event.flags.contains(EventFlags::ERROR) || event.flags.contains(EventFlags::HANG_UP) {
            self.should_close = true;
            return Ok(());
        }
        if !event.flags.contains(EventFlags::READABLE) {
            return Ok(());
        }

        // Edge-triggered drain: keep reading until the socket, or the ring,
        // has nothing more to give.
        loop {
            match self.fill_once()? {
                DrainStep::Filled => dispatch_frames(
                    &self.unpacker,
                    &mut self.frames,
                    &self.callback,
                    self.dispatch,
                    timer,
                ),
                DrainStep::BufferFull => break,
                DrainStep::WouldBlock => break,
                DrainStep::Interrupted => continue,
                DrainStep::Eof => {
                    log_info!("tcp fd={} closed by peer", self.fd);
                    self.should_close = true;
                    break;
                }
                DrainStep::Failed(err) => {
                    log_info!("tcp fd={} read failed: {err}", self.fd);
                    self.should_close = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn fill_once(&mut self) -> Result<DrainStep, NetError> {
        let mut space = self.unpacker.ring().linear_write_space();
        if space.is_empty() {
            return Ok(DrainStep::BufferFull);
        }
        let capacity = space.len();
        let got = unsafe {
            libc::read(
                self.fd,
                space.as_mut_ptr() as *mut libc::c_void,
                capacity,
            )
        };
        match got {
            0 => Ok(DrainStep::Eof),
            n if n > 0 => {
                space.commit(n as usize)?;
                Ok(DrainStep::Filled)
            }
            _ => Ok(classify_errno()),
        }
    }
}

pub struct UdpHandler {
    fd: RawFd,
    unpacker: Unpacker,
    callback: ExecCallback,
    dispatch: Dispatch,
    should_close: bool,
    frames: Vec<Frame>,
}

impl UdpHandler {
    pub fn new(fd: RawFd, unpacker: Unpacker, callback: ExecCallback, dispatch: Dispatch) -> Self {
        Self {
            fd,
            unpacker,
            callback,
            dispatch,
            should_close: false,
            frames: Vec::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_event(
        &mut self,
        event: &Event,
        timer: Option<&Arc<TimerScheduler>>,
    ) -> Result<(), NetError> {
        if event.flags.contains(EventFlags::ERROR) {
            self.should_close = true;
            return Ok(());
        }
        if !event.flags.contains(EventFlags::READABLE) {
            return Ok(());
        }

        // One datagram per iteration; the fd itself is long-lived.
        loop {
            match self.fill_once()? {
                DrainStep::Filled => dispatch_frames(
                    &self.unpacker,
                    &mut self.frames,
                    &self.callback,
                    self.dispatch,
                    timer,
                ),
                DrainStep::BufferFull => break,
                DrainStep::WouldBlock => break,
                DrainStep::Interrupted => continue,
                DrainStep::Eof => continue,
                DrainStep::Failed(err) => {
                    log_info!("udp fd={} recvfrom failed: {err}", self.fd);
                    self.should_close = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn fill_once(&mut self) -> Result<DrainStep, NetError> {
        let mut space = self.unpacker.ring().linear_write_space();
        if space.is_empty() {
            return Ok(DrainStep::BufferFull);
        }
        let capacity = space.len();
        let got = unsafe {
            libc::recvfrom(
                self.fd,
                space.as_mut_ptr() as *mut libc::c_void,
                capacity,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        match got {
            // recvfrom reports an empty datagram as zero; it is consumed.
            0 => Ok(DrainStep::Eof),
            n if n > 0 => {
                space.commit(n as usize)?;
                Ok(DrainStep::Filled)
            }
            _ => Ok(classify_errno()),
        }
    }
}

fn classify_errno() -> DrainStep {
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) => DrainStep::WouldBlock,
        Some(libc::EINTR) => DrainStep::Interrupted,
        _ => DrainStep::Failed(err),
    }
}

/// Extract whatever frames are now complete and route them. Unpacker
/// errors leave the stream alive; resynchronization happens inside the
/// extractor.
fn dispatch_frames(
    unpacker: &Unpacker,
    frames: &mut Vec<Frame>,
    callback: &ExecCallback,
    dispatch: Dispatch,
    timer: Option<&Arc<TimerScheduler>>,
) {
    frames.clear();
    if let Err(err) = unpacker.get(frames) {
        log_debug!("frame extraction failed: {err}");
        return;
    }
    if frames.is_empty() {
        return;
    }
    match (dispatch, timer) {
        (Dispatch::Deferred(delay), Some(timer)) => {
            let callback = Arc::clone(callback);
            let batch = mem::take(frames);
            timer.schedule_once(delay, move || {
                let mut batch = batch;
                callback(&mut batch);
            });
        }
        _ => callback(frames),
    }
}
