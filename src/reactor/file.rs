//! Non-blocking descriptor wrapper driven by the reactor.
//!
//! Every asynchronous operation first tries the syscall. If it completes,
//! including an end-of-stream read, the continuation runs synchronously. If
//! the kernel reports `EAGAIN`, the operation moves its arguments into a
//! retry continuation and arms the descriptor for one readable event. The
//! retry repeats the syscall before trusting the notification, which keeps
//! edge-triggered readiness from being lost.

use crate::error::{Error, Result};
use crate::reactor::{Callback, Interest, Reactor};

use bytes::BytesMut;
use libc::{
    AF_INET, AF_INET6, ECONNABORTED, EPROTO, F_GETFL, F_SETFL, O_NONBLOCK, POLLOUT, SOCK_CLOEXEC,
    SOCK_NONBLOCK, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t,
};
use std::cell::Cell;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use tracing::{debug, trace};

/// Synchronous completions allowed to nest before an operation is handed to
/// the reactor instead. Re-arming a oneshot registration on a descriptor
/// that is already ready delivers an event on the next wake cycle.
const MAX_INLINE_COMPLETIONS: u32 = 32;

/// Outcome of [`AsyncFile::async_read`]. The buffer handed to the read is
/// always given back; on success the first `n` bytes hold the data.
#[derive(Debug)]
pub struct ReadCompletion {
    pub buffer: BytesMut,
    pub result: Result<usize>,
}

/// A connection produced by [`AsyncFile::async_accept`]. The descriptor is
/// already non-blocking and close-on-exec.
#[derive(Debug)]
pub struct Accepted {
    pub fd: OwnedFd,
    pub peer: SocketAddr,
}

pub struct AsyncFile {
    fd: OwnedFd,
    reactor: Rc<Reactor>,
    closed: Cell<bool>,
    inline_depth: Cell<u32>,
}

impl AsyncFile {
    /// Switches `fd` to non-blocking mode and attaches it to `reactor`.
    pub fn wrap(fd: OwnedFd, reactor: Rc<Reactor>) -> Result<Rc<Self>> {
        set_nonblocking(fd.as_raw_fd())?;
        reactor.attach(fd.as_raw_fd())?;

        Ok(Rc::new(Self {
            fd,
            reactor,
            closed: Cell::new(false),
            inline_depth: Cell::new(0),
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Reads into `buffer`, resuming `callback` with the byte count. Zero
    /// means the peer closed its end.
    pub fn async_read(self: &Rc<Self>, mut buffer: BytesMut, callback: Callback<ReadCompletion>) {
        if self.closed.get() {
            return callback.call(ReadCompletion {
                buffer,
                result: Err(Error::Closed),
            });
        }

        if self.inline_depth.get() >= MAX_INLINE_COMPLETIONS {
            return self.suspend_read(buffer, callback);
        }

        let capacity = buffer.capacity();
        if buffer.len() < capacity {
            buffer.resize(capacity, 0);
        }

        loop {
            let ret = unsafe { libc::read(self.fd(), buffer.as_mut_ptr().cast(), buffer.len()) };

            if ret >= 0 {
                trace!(fd = self.fd(), bytes = ret, "read");
                return self.complete_inline(|| {
                    callback.call(ReadCompletion {
                        buffer,
                        result: Ok(ret as usize),
                    })
                });
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return self.suspend_read(buffer, callback),
                _ => {
                    return callback.call(ReadCompletion {
                        buffer,
                        result: Err(Error::from_io("read", err)),
                    });
                }
            }
        }
    }

    /// Accepts one pending connection, resuming `callback` with it.
    pub fn async_accept(self: &Rc<Self>, callback: Callback<Result<Accepted>>) {
        if self.closed.get() {
            return callback.call(Err(Error::Closed));
        }

        if self.inline_depth.get() >= MAX_INLINE_COMPLETIONS {
            return self.suspend_accept(callback);
        }

        loop {
            let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
            let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

            let ret = unsafe {
                libc::accept4(
                    self.fd(),
                    &mut storage as *mut sockaddr_storage as *mut sockaddr,
                    &mut length,
                    SOCK_NONBLOCK | SOCK_CLOEXEC,
                )
            };

            if ret >= 0 {
                let accepted = Accepted {
                    fd: unsafe { OwnedFd::from_raw_fd(ret) },
                    peer: storage_to_socketaddr(&storage),
                };
                return self.complete_inline(|| callback.call(Ok(accepted)));
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return self.suspend_accept(callback),
                _ if matches!(err.raw_os_error(), Some(ECONNABORTED) | Some(EPROTO)) => {
                    debug!(fd = self.fd(), error = %err, "aborted handshake, accepting again");
                    continue;
                }
                _ => return callback.call(Err(Error::from_io("accept4", err))),
            }
        }
    }

    /// Writes all of `buffer`, blocking on `poll` when the socket buffer is
    /// full. A broken pipe or reset comes back as [`Error::PeerReset`].
    pub fn sync_write(&self, mut buffer: &[u8]) -> Result<usize> {
        if self.closed.get() {
            return Err(Error::Closed);
        }

        let total = buffer.len();

        while !buffer.is_empty() {
            let ret = unsafe { libc::write(self.fd(), buffer.as_ptr().cast(), buffer.len()) };

            if ret >= 0 {
                buffer = &buffer[ret as usize..];
                continue;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => self.wait_writable()?,
                _ => return Err(Error::from_io("write", err)),
            }
        }

        Ok(total)
    }

    /// Half-closes the write side: the peer sees end-of-stream once the data
    /// already written is delivered, while reads keep working.
    pub fn shutdown_write(&self) -> Result<()> {
        if self.closed.get() {
            return Err(Error::Closed);
        }

        if unsafe { libc::shutdown(self.fd(), libc::SHUT_WR) } < 0 {
            return Err(Error::last_os("shutdown"));
        }

        Ok(())
    }

    /// Deregisters the descriptor, dropping any pending continuation. The
    /// descriptor itself closes when the last handle goes away.
    pub fn close(&self) -> Result<()> {
        if self.closed.replace(true) {
            return Ok(());
        }

        self.reactor.deregister(self.fd())
    }

    fn suspend_read(self: &Rc<Self>, buffer: BytesMut, callback: Callback<ReadCompletion>) {
        let file = Rc::clone(self);

        let resume = Callback::new(move |ready: Result<()>| match ready {
            Ok(()) => file.async_read(buffer, callback),
            Err(err) => callback.call(ReadCompletion {
                buffer,
                result: Err(err),
            }),
        });

        self.reactor
            .register_interest(self.fd(), Interest::READABLE, resume);
    }

    fn suspend_accept(self: &Rc<Self>, callback: Callback<Result<Accepted>>) {
        let file = Rc::clone(self);

        let resume = Callback::new(move |ready: Result<()>| match ready {
            Ok(()) => file.async_accept(callback),
            Err(err) => callback.call(Err(err)),
        });

        self.reactor
            .register_interest(self.fd(), Interest::READABLE, resume);
    }

    fn complete_inline(&self, complete: impl FnOnce()) {
        self.inline_depth.set(self.inline_depth.get() + 1);
        complete();
        self.inline_depth.set(self.inline_depth.get() - 1);
    }

    fn wait_writable(&self) -> Result<()> {
        let mut poll_fd = libc::pollfd {
            fd: self.fd(),
            events: POLLOUT,
            revents: 0,
        };

        loop {
            let ret = unsafe { libc::poll(&mut poll_fd, 1, -1) };
            if ret >= 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(Error::from_io("poll", err));
            }
        }
    }
}

impl Drop for AsyncFile {
    fn drop(&mut self) {
        if !self.closed.get() {
            let _ = self.reactor.deregister(self.fd());
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(Error::last_os("fcntl"));
    }

    if unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(Error::last_os("fcntl"));
    }

    Ok(())
}

fn storage_to_socketaddr(storage: &sockaddr_storage) -> SocketAddr {
    match storage.ss_family as i32 {
        AF_INET => {
            let address = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(address.sin_addr.s_addr));

            SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(address.sin_port)))
        }
        AF_INET6 => {
            let address = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(address.sin6_addr.s6_addr);

            SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(address.sin6_port),
                address.sin6_flowinfo,
                address.sin6_scope_id,
            ))
        }
        _ => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
    }
}
