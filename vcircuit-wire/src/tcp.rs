//! TCP socket tuning for daemon connections.
//!
//! # Safety
//!
//! Borrowing the raw descriptor into a `socket2::Socket` requires unsafe;
//! the socket is forgotten afterwards so the descriptor stays owned by the
//! compio stream.

#![allow(unsafe_code)]

use std::io;

/// Disable Nagle's algorithm on a daemon connection.
///
/// Request/reply traffic is dominated by small frames, so latency matters
/// more than packet efficiency.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &compio::net::TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let sock = unsafe { socket2::Socket::from_raw_fd(stream.as_raw_fd()) };
        let result = sock.set_nodelay(true);
        std::mem::forget(sock);
        result
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let sock = unsafe { socket2::Socket::from_raw_socket(stream.as_raw_socket()) };
        let result = sock.set_nodelay(true);
        std::mem::forget(sock);
        result
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}
