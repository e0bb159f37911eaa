//! Local port allocation
//!
//! Both functions are point-in-time probes: the port is released before
//! returning, so another process may claim it before the tunnel binds.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Ask the OS for a free port on the loopback interface
pub fn allocate_ephemeral() -> io::Result<u16> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Check whether `port` can currently be bound on the loopback interface.
///
/// Any bind error (in use, privileged, invalid) reports false.
pub fn is_available(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_ephemeral_returns_bindable_port() {
        let port = allocate_ephemeral().unwrap();
        assert_ne!(port, 0);
        assert!(is_available(port));
    }

    #[test]
    fn test_held_port_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_available(port));

        drop(listener);
        assert!(is_available(port));
    }

    #[test]
    fn test_port_zero_is_unavailable() {
        assert!(!is_available(0));
    }
}
