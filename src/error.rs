//! Error taxonomy shared by the reactor, the async file wrapper and the
//! connection layer.
//!
//! Would-block conditions never show up here: `AsyncFile` re-arms the
//! reactor for them. Malformed HTTP never shows up here either, the parser
//! degrades to empty fields instead.

use libc::{ECONNRESET, EPIPE};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Any descriptor or syscall failure that is not a peer reset.
    #[error("{call} failed: {source}")]
    Sys {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// The peer reset the connection or closed it under a pending write.
    #[error("{call}: connection reset by peer")]
    PeerReset { call: &'static str },

    #[error("operation on a closed file")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classifies the current `errno` for the syscall named by `call`.
    pub fn last_os(call: &'static str) -> Self {
        Self::from_io(call, io::Error::last_os_error())
    }

    pub fn from_io(call: &'static str, source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(ECONNRESET) | Some(EPIPE) => Error::PeerReset { call },
            _ => Error::Sys { call, source },
        }
    }

    pub fn is_peer_reset(&self) -> bool {
        matches!(self, Error::PeerReset { .. })
    }
}
