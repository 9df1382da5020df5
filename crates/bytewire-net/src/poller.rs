//! epoll-backed readiness object
//!
//! Thin, owning wrapper around an epoll instance: `add`/`del` manage the
//! interest list, `wait` blocks for events and translates the native bits
//! into [`EventFlags`]. Interrupted waits surface as
//! `ErrorKind::Interrupted` so the caller's loop can decide to retry.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::event::{Event, EventFlags, TriggerMode};

/// Owned epoll instance; the fd is closed on drop.
pub struct Poller {
    epoll_fd: RawFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epoll_fd })
    }

    /// Subscribe `fd` with the given interest; `Edge` adds `EPOLLET`.
    pub fn add(&self, fd: RawFd, interest: EventFlags, mode: TriggerMode) -> io::Result<()> {
        let mut events = 0u32;
        if interest.contains(EventFlags::READABLE) {
            events |= libc::EPOLLIN as u32;
        }
        if interest.contains(EventFlags::WRITABLE) {
            events |= libc::EPOLLOUT as u32;
        }
        if mode == TriggerMode::Edge {
            events |= libc::EPOLLET as u32;
        }
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Drop `fd` from the interest list.
    pub fn del(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll_fd,
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until ready fds exist (or `timeout` elapses; `None` waits
    /// indefinitely), collecting up to `max_events` into `out`. Returns the
    /// event count; zero means the timeout fired.
    pub fn wait(
        &self,
        out: &mut Vec<Event>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        out.clear();
        let max_events = max_events.max(1);
        let mut native = vec![libc::epoll_event { events: 0, u64: 0 }; max_events];
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let count = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                native.as_mut_ptr(),
                max_events as i32,
                timeout_ms,
            )
        };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        for native_ev in &native[..count as usize] {
            let mut flags = EventFlags::NONE;
            if native_ev.events & libc::EPOLLIN as u32 != 0 {
                flags |= EventFlags::READABLE;
            }
            if native_ev.events & libc::EPOLLOUT as u32 != 0 {
                flags |= EventFlags::WRITABLE;
            }
            if native_ev.events & libc::EPOLLERR as u32 != 0 {
                flags |= EventFlags::ERROR;
            }
            if native_ev.events & libc::EPOLLHUP as u32 != 0 {
                flags |= EventFlags::HANG_UP;
            }
            out.push(Event {
                fd: native_ev.u64 as RawFd,
                flags,
            });
        }
        Ok(count as usize)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll_fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe();
        poller.add(r, EventFlags::READABLE, TriggerMode::Level).unwrap();

        let mut events = Vec::new();
        let n = poller
            .wait(&mut events, 8, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
        assert!(events.is_empty());
        close(r);
        close(w);
    }

    #[test]
    fn test_readable_reported_then_removed() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe();
        poller.add(r, EventFlags::READABLE, TriggerMode::Level).unwrap();

        let payload = [1u8, 2, 3];
        let wrote =
            unsafe { libc::write(w, payload.as_ptr() as *const libc::c_void, payload.len()) };
        assert_eq!(wrote, 3);

        let mut events = Vec::new();
        let n = poller
            .wait(&mut events, 8, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].fd, r);
        assert!(events[0].flags.contains(EventFlags::READABLE));

        poller.del(r).unwrap();
        let n = poller
            .wait(&mut events, 8, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
        close(r);
        close(w);
    }

    #[test]
    fn test_hangup_on_peer_close() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe();
        poller.add(r, EventFlags::READABLE, TriggerMode::Level).unwrap();
        close(w);

        let mut events = Vec::new();
        poller
            .wait(&mut events, 8, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].flags.contains(EventFlags::HANG_UP));
        close(r);
    }

    #[test]
    fn test_edge_mode_reports_transition_once() {
        let poller = Poller::new().unwrap();
        let (r, w) = pipe();
        poller.add(r, EventFlags::READABLE, TriggerMode::Edge).unwrap();

        let payload = [9u8];
        unsafe { libc::write(w, payload.as_ptr() as *const libc::c_void, 1) };

        let mut events = Vec::new();
        let n = poller
            .wait(&mut events, 8, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(n, 1);
        // Unconsumed data, but no new transition: edge mode stays silent.
        let n = poller
            .wait(&mut events, 8, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
        close(r);
        close(w);
    }
}
