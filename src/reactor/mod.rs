//! Single-threaded, edge-triggered I/O reactor.
//!
//! This module provides the event loop that every socket in the server is
//! driven by:
//! - [`callback`]: single-shot continuations resumed when an event fires
//! - [`poller`]: `epoll` wrapper and the [`Interest`] type
//! - [`file`]: [`AsyncFile`], the non-blocking descriptor wrapper
//!
//! The reactor owns at most one pending continuation per descriptor. The
//! kernel only ever sees an opaque token (`generation << 32 | fd`); on
//! delivery the continuation is moved out of the registry and invoked, so it
//! can neither leak nor run twice. A continuation may re-arm its own
//! descriptor before returning, which is how multi-step operations chain
//! across wake cycles.
//!
//! # Example
//!
//! ```no_run
//! use edgeserve::reactor::{Callback, Interest, Reactor};
//!
//! # fn demo(fd: std::os::fd::RawFd) -> edgeserve::Result<()> {
//! let reactor = Reactor::new(64)?;
//! reactor.attach(fd)?;
//! reactor.register_interest(fd, Interest::READABLE, Callback::new(|ready: edgeserve::Result<()>| {
//!     println!("descriptor ready: {:?}", ready.is_ok());
//! }));
//! reactor.run_forever()?;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod file;
pub mod poller;

pub use callback::Callback;
pub use file::{Accepted, AsyncFile, ReadCompletion};
pub use poller::Interest;

use crate::error::{Error, Result};
use poller::Poller;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Continuation stored by the reactor. It receives `Err` only when arming
/// the descriptor failed.
pub type Wakeup = Callback<Result<()>>;

struct Registration {
    generation: u32,
    callback: Wakeup,
}

struct Registry {
    pending: HashMap<RawFd, Registration>,
    next_generation: u32,
}

pub struct Reactor {
    poller: Poller,
    registry: RefCell<Registry>,
    events: RefCell<Vec<libc::epoll_event>>,
    stopped: Cell<bool>,
    failure: RefCell<Option<Error>>,
}

impl Reactor {
    /// Creates a reactor that collects at most `max_events` readiness
    /// notifications per wake cycle.
    pub fn new(max_events: usize) -> Result<Rc<Self>> {
        let poller = Poller::new()?;

        Ok(Rc::new(Self {
            poller,
            registry: RefCell::new(Registry {
                pending: HashMap::new(),
                next_generation: 1,
            }),
            events: RefCell::new(Vec::with_capacity(max_events.max(1))),
            stopped: Cell::new(false),
            failure: RefCell::new(None),
        }))
    }

    /// Adds `fd` to the interest list in edge-triggered mode. Nothing is
    /// delivered for it until [`register_interest`](Self::register_interest)
    /// arms it.
    pub fn attach(&self, fd: RawFd) -> Result<()> {
        self.poller.add(fd)
    }

    /// Arms `fd` for a single notification and stores `callback` until it
    /// fires. Any continuation already pending for `fd` is replaced and
    /// dropped. If arming fails, `callback` runs immediately with the error.
    pub fn register_interest(&self, fd: RawFd, interest: Interest, callback: Wakeup) {
        let generation = {
            let mut registry = self.registry.borrow_mut();
            let generation = registry.next_generation;
            registry.next_generation = generation.wrapping_add(1).max(1);
            generation
        };

        let replaced = self.registry.borrow_mut().pending.insert(
            fd,
            Registration {
                generation,
                callback,
            },
        );
        drop(replaced);

        if let Err(err) = self.poller.arm_oneshot(fd, interest, token(fd, generation)) {
            let registration = self.registry.borrow_mut().pending.remove(&fd);
            if let Some(registration) = registration {
                registration.callback.call(Err(err));
            }
            return;
        }

        trace!(fd, generation, "armed");
    }

    /// Removes `fd` from the poller and drops its pending continuation
    /// without running it. Must happen before `fd` is closed.
    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let pending = self.registry.borrow_mut().pending.remove(&fd);
        let result = self.poller.delete(fd);

        drop(pending);
        result
    }

    /// Runs one wake cycle: waits for readiness (up to `timeout`, forever if
    /// `None`) and resumes the continuation of every ready descriptor.
    /// Returns how many continuations ran.
    pub fn turn(&self, timeout: Option<Duration>) -> Result<usize> {
        let tokens: Vec<u64> = {
            let mut events = self.events.borrow_mut();
            self.poller.wait(&mut events, timeout)?;
            events.iter().map(|event| event.u64).collect()
        };

        let mut dispatched = 0;

        for token in tokens {
            let (fd, generation) = split_token(token);

            let registration = {
                let mut registry = self.registry.borrow_mut();
                match registry.pending.get(&fd) {
                    Some(pending) if pending.generation == generation => {
                        registry.pending.remove(&fd)
                    }
                    _ => None,
                }
            };

            match registration {
                Some(registration) => {
                    registration.callback.call(Ok(()));
                    dispatched += 1;
                }
                None => trace!(fd, generation, "stale event skipped"),
            }
        }

        Ok(dispatched)
    }

    /// Drives the loop until [`stop`](Self::stop) is called, a fatal error is
    /// recorded with [`fail`](Self::fail), or nothing is left to wait for.
    pub fn run_forever(&self) -> Result<()> {
        loop {
            if let Some(err) = self.failure.borrow_mut().take() {
                return Err(err);
            }

            if self.stopped.get() {
                debug!("reactor stopped");
                return Ok(());
            }

            if self.pending() == 0 {
                debug!("no pending registrations, reactor idle");
                return Ok(());
            }

            self.turn(None)?;
        }
    }

    pub fn stop(&self) {
        self.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Records a process-fatal error; `run_forever` returns it after the
    /// current wake cycle.
    pub fn fail(&self, err: Error) {
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    /// Number of armed registrations.
    pub fn pending(&self) -> usize {
        self.registry.borrow().pending.len()
    }

    /// Deregisters every descriptor and drops all pending continuations,
    /// releasing whatever they captured, then stops the loop.
    pub fn shutdown(&self) {
        let drained: Vec<(RawFd, Registration)> =
            self.registry.borrow_mut().pending.drain().collect();

        for (fd, _) in &drained {
            let _ = self.poller.delete(*fd);
        }

        drop(drained);
        self.stopped.set(true);
    }
}

fn token(fd: RawFd, generation: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(fd as u32)
}

fn split_token(token: u64) -> (RawFd, u32) {
    ((token & 0xffff_ffff) as u32 as RawFd, (token >> 32) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_fd_and_generation() {
        let (fd, generation) = split_token(token(17, 9));

        assert_eq!(fd, 17);
        assert_eq!(generation, 9);
    }

    #[test]
    fn attach_time_token_never_matches_a_registration() {
        // attach() stores token 0, generations start at 1
        let (_, generation) = split_token(0);
        assert_eq!(generation, 0);
    }
}
