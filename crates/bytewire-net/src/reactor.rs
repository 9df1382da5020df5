//! Readiness reactor
//!
//! One thread, one epoll instance, one registry mapping fds to their
//! protocol handlers. The loop waits for readiness, routes listener events
//! into the accept storm and everything else into the owning handler, then
//! tears down any fd whose handler asked to close (or failed).
//!
//! Accepted connections get their handlers built automatically from the
//! reactor's [`ConnectionRecipe`]: framing rules for a fresh unpacker, the
//! user callback, and the dispatch path (inline or via the shared timer
//! scheduler).
//!
//! Error discipline: a handler failure costs that fd its registration,
//! never the loop. The only fatal condition is a readiness-wait failure
//! other than `EINTR`.

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytewire_containers::{FramingConfig, Unpacker};
use bytewire_logkit::{log_debug, log_error, log_info};
use bytewire_threading::TimerScheduler;

use crate::event::{EventFlags, TriggerMode};
use crate::handler::{Dispatch, ExecCallback, ProtocolHandler, TcpHandler};
use crate::poller::Poller;
use crate::socket;

/// How to outfit an accepted connection: unpacker construction rules, the
/// callback frames go to, and which dispatch path carries them.
#[derive(Clone)]
pub struct ConnectionRecipe {
    pub framing: FramingConfig,
    pub callback: ExecCallback,
    pub dispatch: Dispatch,
}

/// Cooperative stop switch for a running reactor.
///
/// The readiness wait blocks indefinitely, so the stop takes effect at the
/// next event (or signal) that wakes the loop.
#[derive(Clone)]
pub struct ReactorHandle {
    running: Arc<AtomicBool>,
}

impl ReactorHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct Reactor {
    poller: Poller,
    max_events: usize,
    handlers: HashMap<RawFd, ProtocolHandler>,
    listeners: HashSet<RawFd>,
    running: Arc<AtomicBool>,
    timer: Option<Arc<TimerScheduler>>,
    recipe: ConnectionRecipe,
}

impl Reactor {
    /// Create the readiness object. Failure here is fatal to startup and
    /// propagates.
    pub fn new(
        max_events: usize,
        recipe: ConnectionRecipe,
        timer: Option<Arc<TimerScheduler>>,
    ) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            max_events: max_events.max(1),
            handlers: HashMap::new(),
            listeners: HashSet::new(),
            running: Arc::new(AtomicBool::new(false)),
            timer,
            recipe,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Register an fd with its handler. The fd is made non-blocking and
    /// subscribed for readable events; from here on the reactor owns it and
    /// will close it exactly once, at unregistration.
    pub fn register(
        &mut self,
        fd: RawFd,
        handler: ProtocolHandler,
        mode: TriggerMode,
    ) -> io::Result<()> {
        socket::set_non_blocking(fd)?;
        self.poller.add(fd, EventFlags::READABLE, mode)?;
        self.handlers.insert(fd, handler);
        Ok(())
    }

    /// Register a listening socket. Readable events on it run the accept
    /// storm instead of a handler.
    pub fn register_listener(&mut self, fd: RawFd, mode: TriggerMode) -> io::Result<()> {
        socket::set_non_blocking(fd)?;
        self.poller.add(fd, EventFlags::READABLE, mode)?;
        self.listeners.insert(fd);
        Ok(())
    }

    /// Remove an fd from the poller and both registries, then close it.
    pub fn unregister(&mut self, fd: RawFd) {
        if let Err(err) = self.poller.del(fd) {
            log_debug!("epoll del fd={fd}: {err}");
        }
        self.handlers.remove(&fd);
        self.listeners.remove(&fd);
        socket::close_fd(fd);
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.handlers.contains_key(&fd) || self.listeners.contains(&fd)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Event loop. Runs until [`ReactorHandle::stop`] is observed, or the
    /// readiness wait fails with something other than `EINTR`.
    pub fn run(&mut self) -> io::Result<()> {
        self.running.store(true, Ordering::Release);
        let mut events = Vec::with_capacity(self.max_events);

        while self.running.load(Ordering::Acquire) {
            match self.poller.wait(&mut events, self.max_events, None) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log_error!("readiness wait failed: {err}");
                    return Err(err);
                }
            }

            for i in 0..events.len() {
                let event = events[i];
                if self.listeners.contains(&event.fd) {
                    self.accept_all(event.fd);
                    continue;
                }
                let close = match self.handlers.get_mut(&event.fd) {
                    Some(handler) => match handler.handle_event(&event, self.timer.as_ref()) {
                        Ok(()) => handler.should_close(),
                        Err(err) => {
                            log_info!("handler fd={} failed: {err}", event.fd);
                            true
                        }
                    },
                    None => {
                        // Stale event for an fd already torn down this pass.
                        log_debug!("event for unregistered fd={}", event.fd);
                        false
                    }
                };
                if close {
                    self.unregister(event.fd);
                }
            }
        }
        Ok(())
    }

    /// Accept until the listener would block; each new connection gets an
    /// unpacker from the recipe and an edge-triggered TCP handler. The
    /// listener itself stays registered no matter how the storm ends.
    fn accept_all(&mut self, listener: RawFd) {
        loop {
            let mut peer: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut peer_len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept4(
                    listener,
                    &mut peer as *mut libc::sockaddr_in as *mut libc::sockaddr,
                    &mut peer_len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) => break,
                    // Connection died between arrival and accept; keep going.
                    Some(libc::EINTR) | Some(libc::ECONNABORTED) => continue,
                    _ => {
                        log_info!("accept on fd={listener} failed: {err}");
                        break;
                    }
                }
            }

            log_info!(
                "accepted {}:{} (fd={fd})",
                std::net::Ipv4Addr::from(u32::from_be(peer.sin_addr.s_addr)),
                u16::from_be(peer.sin_port)
            );

            let handler = TcpHandler::new(
                fd,
                Unpacker::new(self.recipe.framing.clone()),
                Arc::clone(&self.recipe.callback),
                self.recipe.dispatch,
            );
            if let Err(err) = self.register(fd, ProtocolHandler::Tcp(handler), TriggerMode::Edge) {
                log_info!("register accepted fd={fd} failed: {err}");
                socket::close_fd(fd);
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let fds: Vec<RawFd> = self
            .handlers
            .keys()
            .copied()
            .chain(self.listeners.iter().copied())
            .collect();
        for fd in fds {
            self.unregister(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytewire_containers::Frame;
    use std::io::Write;
    use std::net::TcpStream;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn collector() -> (ExecCallback, Arc<Mutex<Vec<Frame>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&sink);
        let callback: ExecCallback = Arc::new(move |frames: &mut Vec<Frame>| {
            captured.lock().unwrap().append(frames);
        });
        (callback, sink)
    }

    fn recipe(callback: ExecCallback, dispatch: Dispatch) -> ConnectionRecipe {
        ConnectionRecipe {
            framing: FramingConfig::head([0x7, 0x9]).tail([0xE]).buffer_size(256),
            callback,
            dispatch,
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    /// Stop the loop and poke the listener so the blocked wait wakes up.
    fn stop_and_join(
        handle: ReactorHandle,
        port: u16,
        thread: thread::JoinHandle<Reactor>,
    ) -> Reactor {
        handle.stop();
        let _ = TcpStream::connect(("127.0.0.1", port));
        thread.join().unwrap()
    }

    fn spawn_reactor(
        recipe: ConnectionRecipe,
        timer: Option<Arc<TimerScheduler>>,
    ) -> (thread::JoinHandle<Reactor>, ReactorHandle, u16) {
        let listener = socket::make_tcp("127.0.0.1", 0, true, 64).unwrap();
        let port = socket::local_port(listener).unwrap();
        let mut reactor = Reactor::new(64, recipe, timer).unwrap();
        reactor.register_listener(listener, TriggerMode::Edge).unwrap();
        let handle = reactor.handle();
        let thread = thread::spawn(move || {
            let _ = reactor.run();
            reactor
        });
        // Let the loop enter its first wait.
        thread::sleep(Duration::from_millis(20));
        (thread, handle, port)
    }

    #[test]
    fn test_frame_then_eof_tears_down_connection() {
        let (callback, sink) = collector();
        let (thread, handle, port) = spawn_reactor(recipe(callback, Dispatch::Inline), None);

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&[0x7, 0x9, 1, 2, 3, 0xE]).unwrap();
        assert!(wait_for(
            || sink.lock().unwrap().len() == 1,
            Duration::from_secs(2)
        ));
        assert_eq!(*sink.lock().unwrap(), vec![vec![0x7, 0x9, 1, 2, 3, 0xE]]);

        // Stop first; the EOF event itself then wakes the blocked wait, the
        // loop tears the connection down and exits.
        handle.stop();
        drop(client);
        let reactor = thread.join().unwrap();
        assert_eq!(reactor.handler_count(), 0);
        assert_eq!(reactor.listeners.len(), 1);
    }

    #[test]
    fn test_accept_storm_keeps_listener() {
        let (callback, sink) = collector();
        let (thread, handle, port) = spawn_reactor(recipe(callback, Dispatch::Inline), None);

        let clients: Vec<TcpStream> = (0..5)
            .map(|i| {
                let mut c = TcpStream::connect(("127.0.0.1", port)).unwrap();
                c.write_all(&[0x7, 0x9, i, 0xE]).unwrap();
                c
            })
            .collect();

        assert!(wait_for(
            || sink.lock().unwrap().len() == 5,
            Duration::from_secs(2)
        ));
        drop(clients);

        let reactor = stop_and_join(handle, port, thread);
        assert_eq!(reactor.listeners.len(), 1);

        let mut tags: Vec<u8> = sink.lock().unwrap().iter().map(|f| f[2]).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_deferred_dispatch_through_timer() {
        let pool = Arc::new(bytewire_threading::ThreadPool::new(2));
        let timer = Arc::new(TimerScheduler::new(pool));
        timer.start();

        let (callback, sink) = collector();
        let (thread, handle, port) = spawn_reactor(
            recipe(callback, Dispatch::Deferred(Duration::from_millis(5))),
            Some(Arc::clone(&timer)),
        );

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&[0x7, 0x9, 0x55, 0xE]).unwrap();
        assert!(wait_for(
            || !sink.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        ));
        assert_eq!(*sink.lock().unwrap(), vec![vec![0x7, 0x9, 0x55, 0xE]]);

        drop(client);
        stop_and_join(handle, port, thread);
        timer.stop();
    }

    #[test]
    fn test_udp_socket_in_reactor() {
        let (callback, sink) = collector();

        let udp_fd = socket::make_udp("127.0.0.1", 0, true).unwrap();
        let udp_port = socket::local_port(udp_fd).unwrap();

        let mut reactor =
            Reactor::new(64, recipe(Arc::clone(&callback), Dispatch::Inline), None).unwrap();
        let udp = crate::handler::UdpHandler::new(
            udp_fd,
            Unpacker::new(FramingConfig::head([0x7, 0x9]).tail([0xE]).buffer_size(256)),
            callback,
            Dispatch::Inline,
        );
        reactor
            .register(udp_fd, ProtocolHandler::Udp(udp), TriggerMode::Edge)
            .unwrap();
        let handle = reactor.handle();
        let thread = thread::spawn(move || {
            let _ = reactor.run();
            reactor
        });
        thread::sleep(Duration::from_millis(20));

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .send_to(&[0x7, 0x9, 0xBE, 0xEF, 0xE], ("127.0.0.1", udp_port))
            .unwrap();
        assert!(wait_for(
            || !sink.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        ));
        assert_eq!(
            *sink.lock().unwrap(),
            vec![vec![0x7, 0x9, 0xBE, 0xEF, 0xE]]
        );

        handle.stop();
        // Wake the loop with another datagram.
        let _ = client.send_to(&[0x0], ("127.0.0.1", udp_port));
        let reactor = thread.join().unwrap();
        // Datagram errors never tear the long-lived fd down.
        assert!(reactor.is_registered(udp_fd));
    }
}
