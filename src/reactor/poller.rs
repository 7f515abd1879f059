//! Thin wrapper over `epoll(7)`.
//!
//! Every descriptor is attached once in edge-triggered mode with no interest,
//! then armed per operation with `EPOLLONESHOT`. The kernel disarms the
//! descriptor after each delivery, so at most one notification is queued per
//! arming.

use crate::error::{Error, Result};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLET, EPOLLIN, EPOLLONESHOT,
    EPOLLOUT, epoll_event,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readiness conditions an operation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        read: true,
        write: false,
    };

    pub const WRITABLE: Self = Self {
        read: false,
        write: true,
    };

    fn bits(self) -> u32 {
        let mut bits = 0;

        if self.read {
            bits |= EPOLLIN as u32;
        }

        if self.write {
            bits |= EPOLLOUT as u32;
        }

        bits
    }
}

pub(crate) struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    pub(crate) fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os("epoll_create1"));
        }

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn add(&self, fd: RawFd) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, EPOLLET as u32, 0)
    }

    pub(crate) fn arm_oneshot(&self, fd: RawFd, interest: Interest, token: u64) -> Result<()> {
        let flags = interest.bits() | EPOLLET as u32 | EPOLLONESHOT as u32;

        self.ctl(EPOLL_CTL_MOD, fd, flags, token)
    }

    /// Removes `fd` from the interest list. A descriptor that was never
    /// attached is not an error.
    pub(crate) fn delete(&self, fd: RawFd) -> Result<()> {
        match self.ctl(EPOLL_CTL_DEL, fd, 0, 0) {
            Err(Error::Sys { source, .. }) if source.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }

    /// Blocks until at least one descriptor is ready or `timeout` elapses.
    /// `None` waits indefinitely. An interrupted wait reports zero events.
    pub(crate) fn wait(
        &self,
        events: &mut Vec<epoll_event>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let timeout_ms = match timeout {
            Some(duration) => duration.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        events.clear();

        let ret = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                events.capacity() as i32,
                timeout_ms,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }

            return Err(Error::Sys {
                call: "epoll_wait",
                source: err,
            });
        }

        // SAFETY: epoll_wait initialised the first `ret` entries.
        unsafe { events.set_len(ret as usize) };

        Ok(ret as usize)
    }

    fn ctl(&self, op: i32, fd: RawFd, flags: u32, token: u64) -> Result<()> {
        let mut event = epoll_event {
            events: flags,
            u64: token,
        };

        let ret = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(Error::Sys {
                call: "epoll_ctl",
                source: io::Error::last_os_error(),
            });
        }

        Ok(())
    }
}
