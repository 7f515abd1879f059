//! edgeserve - single-threaded HTTP/1.1 server on an edge-triggered epoll reactor
//!
//! Core library for the reactor, the HTTP layer and the server glue.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod reactor;
pub mod server;

pub use error::{Error, Result};
pub use server::Server;
