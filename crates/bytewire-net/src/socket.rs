//! Socket creation helpers
//!
//! Raw-fd constructors for the two transports the framework serves.
//! Both enable `SO_REUSEADDR`, bind, and hand back the bare descriptor;
//! ownership (and the eventual `close`) belongs to whoever registers the
//! fd with the reactor.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

/// Create a TCP socket bound to `ip:port`. An empty string or `"*"` binds
/// `INADDR_ANY`; `listen_backlog > 0` also puts the socket into listening
/// state.
pub fn make_tcp(ip: &str, port: u16, non_block: bool, listen_backlog: i32) -> io::Result<RawFd> {
    let fd = bound_socket(libc::SOCK_STREAM, ip, port, non_block)?;
    if listen_backlog > 0 {
        let rc = unsafe { libc::listen(fd, listen_backlog) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
    }
    Ok(fd)
}

/// Create a UDP socket bound to `ip:port`. Address rules as
/// [`make_tcp`]; datagram sockets never listen.
pub fn make_udp(ip: &str, port: u16, non_block: bool) -> io::Result<RawFd> {
    bound_socket(libc::SOCK_DGRAM, ip, port, non_block)
}

fn bound_socket(sock_type: libc::c_int, ip: &str, port: u16, non_block: bool) -> io::Result<RawFd> {
    let mut flags = sock_type | libc::SOCK_CLOEXEC;
    if non_block {
        flags |= libc::SOCK_NONBLOCK;
    }
    let fd = unsafe { libc::socket(libc::AF_INET, flags, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let enable: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &enable as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let addr = match sockaddr_for(ip, port) {
        Ok(addr) => addr,
        Err(err) => {
            unsafe { libc::close(fd) };
            return Err(err);
        }
    };
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    Ok(fd)
}

fn sockaddr_for(ip: &str, port: u16) -> io::Result<libc::sockaddr_in> {
    let host = if ip.is_empty() || ip == "*" {
        Ipv4Addr::UNSPECIFIED
    } else {
        ip.parse::<Ipv4Addr>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("bad ip {ip:?}")))?
    };
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = u32::from(host).to_be();
    Ok(addr)
}

/// Flip `O_NONBLOCK` on an existing fd.
pub fn set_non_blocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Port the fd is actually bound to; resolves a port-0 bind.
pub fn local_port(fd: RawFd) -> io::Result<u16> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockname(
            fd,
            &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(u16::from_be(addr.sin_port))
}

pub fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_listener_accepts() {
        let fd = make_tcp("127.0.0.1", 0, true, 16).unwrap();
        let port = local_port(fd).unwrap();
        assert_ne!(port, 0);
        // Kernel accepts connections once listen() has run.
        std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        close_fd(fd);
    }

    #[test]
    fn test_udp_bind_and_port() {
        let fd = make_udp("", 0, true).unwrap();
        assert_ne!(local_port(fd).unwrap(), 0);
        close_fd(fd);
    }

    #[test]
    fn test_wildcard_spellings_bind_any() {
        for ip in ["", "*"] {
            let fd = make_udp(ip, 0, false).unwrap();
            close_fd(fd);
        }
    }

    #[test]
    fn test_bad_ip_rejected() {
        let err = make_tcp("not-an-ip", 0, true, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_non_blocking_flag() {
        let fd = make_tcp("127.0.0.1", 0, false, 0).unwrap();
        let before = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_eq!(before & libc::O_NONBLOCK, 0);
        set_non_blocking(fd).unwrap();
        let after = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_ne!(after & libc::O_NONBLOCK, 0);
        close_fd(fd);
    }
}
