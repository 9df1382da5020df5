//! # bytewire-net
//!
//! The I/O layer of the bytewire framework:
//!
//! - [`Poller`] — epoll-backed readiness object (the abstract
//!   create/add/del/wait surface).
//! - [`socket`] — raw-fd TCP/UDP constructors with address-reuse and
//!   non-blocking setup.
//! - [`ProtocolHandler`] — closed TCP/UDP handler set draining sockets into
//!   per-connection unpackers.
//! - [`Reactor`] — the event loop tying fds, handlers, the accept storm and
//!   the shared timer scheduler together.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod error;
        pub mod event;
        pub mod handler;
        pub mod poller;
        pub mod reactor;
        pub mod socket;

        pub use error::NetError;
        pub use event::{Event, EventFlags, TriggerMode};
        pub use handler::{Dispatch, ExecCallback, ProtocolHandler, TcpHandler, UdpHandler};
        pub use poller::Poller;
        pub use reactor::{ConnectionRecipe, Reactor, ReactorHandle};
    } else {
        compile_error!("bytewire-net drives epoll and requires Linux");
    }
}
