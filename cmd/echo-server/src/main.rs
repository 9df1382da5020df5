//! Framed echo server
//!
//! Accepts TCP connections and a UDP socket on the same port, reassembles
//! head/tail-delimited frames ([0x07,0x09] ... [0x0E]) and prints each one.
//! Frames arriving over TCP are dispatched through the timer scheduler and
//! worker pool; UDP frames are handled inline on the reactor thread.
//!
//! Usage:
//!     cargo run -p echo-server -- [port] [defer_ms]
//!
//! Test with:
//!     printf '\x07\x09hello\x0e' | nc -q1 localhost 9420
//!     printf '\x07\x09dgram\x0e' | nc -u -q1 localhost 9420
//!
//! Logging is configured from ./configs/log_config.ini (relative to the
//! working directory); missing config falls back to sane defaults.

use std::sync::Arc;
use std::time::Duration;

use bytewire_containers::{Frame, FramingConfig, Unpacker};
use bytewire_logkit::{log_error, log_frames, log_info, log_msg};
use bytewire_net::{
    socket, ConnectionRecipe, Dispatch, ExecCallback, ProtocolHandler, Reactor, TriggerMode,
    UdpHandler,
};
use bytewire_threading::{ThreadPool, TimerScheduler};

const CONFIG_PATH: &str = "./configs/log_config.ini";
const DEFAULT_PORT: u16 = 9420;

fn main() {
    if let Err(err) = bytewire_logkit::init(CONFIG_PATH) {
        eprintln!("logger init failed: {err}");
    }

    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .and_then(|a| a.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let defer_ms: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(10);

    if let Err(err) = serve(port, defer_ms) {
        log_error!("server failed: {err}");
        std::process::exit(1);
    }

    bytewire_logkit::shutdown();
}

fn serve(port: u16, defer_ms: u64) -> std::io::Result<()> {
    let pool = Arc::new(ThreadPool::default());
    let timer = Arc::new(TimerScheduler::new(Arc::clone(&pool)));
    timer.start();

    let framing = FramingConfig::head([0x07, 0x09]).tail([0x0E]).buffer_size(4096);
    let callback: ExecCallback = Arc::new(|frames: &mut Vec<Frame>| {
        log_msg!("received {} frame(s)", frames.len());
        log_frames!(frames);
    });

    let recipe = ConnectionRecipe {
        framing: framing.clone(),
        callback: Arc::clone(&callback),
        dispatch: Dispatch::Deferred(Duration::from_millis(defer_ms)),
    };

    let mut reactor = Reactor::new(64, recipe, Some(Arc::clone(&timer)))?;

    let tcp_fd = socket::make_tcp("", port, true, 128)?;
    reactor.register_listener(tcp_fd, TriggerMode::Edge)?;
    log_info!("tcp listener on *:{port} (fd={tcp_fd})");

    let udp_fd = socket::make_udp("", port, true)?;
    let udp = UdpHandler::new(
        udp_fd,
        Unpacker::new(framing),
        callback,
        Dispatch::Inline,
    );
    reactor.register(udp_fd, ProtocolHandler::Udp(udp), TriggerMode::Edge)?;
    log_info!("udp socket on *:{port} (fd={udp_fd})");

    let result = reactor.run();
    timer.stop();
    result
}
