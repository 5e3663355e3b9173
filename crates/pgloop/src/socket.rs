//! Socket readiness probing.
//!
//! [`check`] is the single source of truth for "may I call into the client
//! library without blocking": a zero-timeout `poll(2)` of the connection's
//! descriptor, re-evaluated immediately before every library call that could
//! block. [`wait`] is the blocking variant and is only reached from
//! [`Connection::wait`](crate::Connection::wait).

use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness of a connection's socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStatus {
    /// A read would not block
    pub read_ready: bool,
    /// A write would not block
    pub write_ready: bool,
    /// The descriptor is absent, invalid, or reported error/hangup; no
    /// further I/O should be attempted. The owning state machine still asks
    /// the client library for the precise failure reason.
    pub failed: bool,
}

impl SocketStatus {
    const FAILED: SocketStatus = SocketStatus {
        read_ready: false,
        write_ready: false,
        failed: true,
    };
}

/// Zero-timeout readiness probe.
pub fn check(fd: Option<RawFd>) -> SocketStatus {
    poll_fd(fd, true, true, Some(Duration::ZERO))
}

/// Blocking readiness wait; `timeout: None` waits without a deadline.
///
/// Returns the observed status; on timeout all flags are clear.
pub fn wait(fd: Option<RawFd>, read: bool, write: bool, timeout: Option<Duration>) -> SocketStatus {
    poll_fd(fd, read, write, timeout)
}

fn poll_fd(fd: Option<RawFd>, read: bool, write: bool, timeout: Option<Duration>) -> SocketStatus {
    let Some(fd) = fd else {
        return SocketStatus::FAILED;
    };
    if fd < 0 {
        return SocketStatus::FAILED;
    }

    let mut events: libc::c_short = 0;
    if read {
        events |= libc::POLLIN;
    }
    if write {
        events |= libc::POLLOUT;
    }

    let mut fds = [libc::pollfd {
        fd,
        events,
        revents: 0,
    }];
    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(t) => libc::c_int::try_from(t.as_millis()).unwrap_or(libc::c_int::MAX),
    };

    // SAFETY: `fds` outlives the call and `nfds` matches its length.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
    if rc < 0 {
        return SocketStatus::FAILED;
    }

    let revents = fds[0].revents;
    SocketStatus {
        read_ready: revents & libc::POLLIN != 0,
        write_ready: revents & libc::POLLOUT != 0,
        failed: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn missing_descriptor_fails_without_polling() {
        assert!(check(None).failed);
        assert!(check(Some(-1)).failed);
        assert!(wait(None, true, true, None).failed);
    }

    #[test]
    fn idle_stream_is_writable_but_not_readable() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let status = check(Some(a.as_raw_fd()));
        assert!(status.write_ready);
        assert!(!status.read_ready);
        assert!(!status.failed);
    }

    #[test]
    fn buffered_data_reports_readable() {
        let (a, mut b) = UnixStream::pair().expect("socketpair");
        b.write_all(b"x").expect("write");
        let status = check(Some(a.as_raw_fd()));
        assert!(status.read_ready);
        assert!(!status.failed);
    }

    #[test]
    fn hangup_reports_failed() {
        let (a, b) = UnixStream::pair().expect("socketpair");
        drop(b);
        let status = check(Some(a.as_raw_fd()));
        assert!(status.failed);
    }

    #[test]
    fn wait_honours_the_timeout() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let status = wait(
            Some(a.as_raw_fd()),
            true,
            false,
            Some(Duration::from_millis(10)),
        );
        assert!(!status.read_ready);
        assert!(!status.failed);
    }
}
