//! Framed traffic generator
//!
//! Opens N concurrent TCP connections to a bytewire server and pushes M
//! frames down each, deliberately splitting writes at awkward offsets so
//! the receiver's partial-frame resumption gets exercised, not just the
//! happy path. Optionally sprays the same frames over UDP.
//!
//! Usage:
//!     cargo run -p flood -- [host] [port] [conns] [frames_per_conn] [--udp]
//!
//! Example:
//!     cargo run -p flood -- 127.0.0.1 9420 32 10000
//!
//! Frames use the demo framing: head 0x07 0x09, tail 0x0E.

use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::thread;
use std::time::Instant;

const HEAD: [u8; 2] = [0x07, 0x09];
const TAIL: u8 = 0x0E;

fn frame(seq: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&HEAD);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(b"payload");
    out.push(TAIL);
    out
}

fn main() {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let port: u16 = args.next().and_then(|a| a.parse().ok()).unwrap_or(9420);
    let conns: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(8);
    let per_conn: u32 = args.next().and_then(|a| a.parse().ok()).unwrap_or(1000);
    let udp = args.next().as_deref() == Some("--udp");

    let started = Instant::now();
    let total_frames = if udp {
        run_udp(&host, port, conns, per_conn)
    } else {
        run_tcp(&host, port, conns, per_conn)
    };
    let elapsed = started.elapsed();

    println!(
        "sent {total_frames} frames over {conns} {} in {:.3}s ({:.0} frames/s)",
        if udp { "udp sockets" } else { "connections" },
        elapsed.as_secs_f64(),
        total_frames as f64 / elapsed.as_secs_f64().max(1e-9)
    );
}

fn run_tcp(host: &str, port: u16, conns: usize, per_conn: u32) -> u64 {
    let workers: Vec<_> = (0..conns)
        .map(|worker| {
            let host = host.to_string();
            thread::Builder::new()
                .name(format!("flood-{worker}"))
                .spawn(move || {
                    let mut stream = match TcpStream::connect((host.as_str(), port)) {
                        Ok(s) => s,
                        Err(err) => {
                            eprintln!("flood-{worker}: connect failed: {err}");
                            return 0u64;
                        }
                    };
                    let mut sent = 0u64;
                    let mut pending: Vec<u8> = Vec::new();
                    for seq in 0..per_conn {
                        pending.extend_from_slice(&frame(seq));
                        // Hold back a tail-straddling sliver on every other
                        // frame so delimiters cross write boundaries.
                        let keep = if seq % 2 == 0 { 0 } else { pending.len().min(3) };
                        let cut = pending.len() - keep;
                        if stream.write_all(&pending[..cut]).is_err() {
                            return sent;
                        }
                        pending.drain(..cut);
                        sent += 1;
                    }
                    if !pending.is_empty() {
                        let _ = stream.write_all(&pending);
                    }
                    let _ = stream.flush();
                    sent
                })
                .expect("failed to spawn flood thread")
        })
        .collect();

    workers.into_iter().map(|w| w.join().unwrap_or(0)).sum()
}

fn run_udp(host: &str, port: u16, sockets: usize, per_socket: u32) -> u64 {
    let workers: Vec<_> = (0..sockets)
        .map(|worker| {
            let host = host.to_string();
            thread::Builder::new()
                .name(format!("flood-{worker}"))
                .spawn(move || {
                    let socket = match UdpSocket::bind("0.0.0.0:0") {
                        Ok(s) => s,
                        Err(err) => {
                            eprintln!("flood-{worker}: bind failed: {err}");
                            return 0u64;
                        }
                    };
                    let mut sent = 0u64;
                    for seq in 0..per_socket {
                        if socket
                            .send_to(&frame(seq), (host.as_str(), port))
                            .is_err()
                        {
                            break;
                        }
                        sent += 1;
                    }
                    sent
                })
                .expect("failed to spawn flood thread")
        })
        .collect();

    workers.into_iter().map(|w| w.join().unwrap_or(0)).sum()
}
