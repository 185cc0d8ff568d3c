//! Bounded readiness wait over the two classifier pipes.

use std::io;
use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Length of one wait slice in milliseconds.
pub const WAIT_SLICE_MS: u16 = 1000;

/// Which pipe ends may be serviced without blocking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// The outbound pipe accepts a write (or has failed and will report it).
    pub writable: bool,
    /// The inbound pipe has data or has reached end-of-stream.
    pub readable: bool,
}

impl Readiness {
    /// Returns true if neither end became ready within the slice.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        !self.writable && !self.readable
    }
}

/// Waits up to one slice for the outbound pipe to accept data and/or the
/// inbound pipe to have data.
///
/// Hang-up and error conditions count as ready so the caller's next read or
/// write observes them. An interrupted wait reports nothing ready.
///
/// # Errors
///
/// Returns the OS error if the wait itself fails.
pub fn wait(
    outbound: Option<BorrowedFd<'_>>,
    inbound: Option<BorrowedFd<'_>>,
    slice: PollTimeout,
) -> io::Result<Readiness> {
    let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(2);
    if let Some(fd) = outbound {
        fds.push(PollFd::new(fd, PollFlags::POLLOUT));
    }
    if let Some(fd) = inbound {
        fds.push(PollFd::new(fd, PollFlags::POLLIN));
    }
    if fds.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no descriptors to wait on",
        ));
    }

    match poll(&mut fds, slice) {
        Ok(0) | Err(Errno::EINTR) => return Ok(Readiness::default()),
        Ok(_) => {}
        Err(errno) => return Err(errno.into()),
    }

    let fired = |fd: &PollFd<'_>, wanted: PollFlags| {
        fd.revents()
            .is_some_and(|r| r.intersects(wanted | PollFlags::POLLHUP | PollFlags::POLLERR))
    };

    let mut ready = Readiness::default();
    let mut slots = fds.iter();
    if outbound.is_some() {
        ready.writable = slots.next().is_some_and(|fd| fired(fd, PollFlags::POLLOUT));
    }
    if inbound.is_some() {
        ready.readable = slots.next().is_some_and(|fd| fired(fd, PollFlags::POLLIN));
    }
    tracing::trace!(?ready, "poll returned");
    Ok(ready)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[test]
    fn test_empty_pipe_is_writable_not_readable() {
        let (reader, writer) = std::io::pipe().unwrap();
        let ready = wait(Some(writer.as_fd()), Some(reader.as_fd()), PollTimeout::ZERO).unwrap();
        assert!(ready.writable);
        assert!(!ready.readable);
    }

    #[test]
    fn test_data_is_readable() {
        let (reader, mut writer) = std::io::pipe().unwrap();
        writer.write_all(b"x").unwrap();
        let ready = wait(None, Some(reader.as_fd()), PollTimeout::ZERO).unwrap();
        assert!(ready.readable);
    }

    #[test]
    fn test_hangup_is_readable() {
        let (reader, writer) = std::io::pipe().unwrap();
        drop(writer);
        let ready = wait(None, Some(reader.as_fd()), PollTimeout::ZERO).unwrap();
        assert!(ready.readable);
    }

    #[test]
    fn test_timeout_is_idle() {
        let (reader, _writer) = std::io::pipe().unwrap();
        let ready = wait(None, Some(reader.as_fd()), PollTimeout::from(10u8)).unwrap();
        assert!(ready.is_idle());
    }

    #[test]
    fn test_nothing_to_wait_on() {
        assert!(wait(None, None, PollTimeout::ZERO).is_err());
    }
}
