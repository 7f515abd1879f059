//! HTTP/1.1 on top of the reactor.
//!
//! - `parser`: incremental header and request parsing
//! - `request` / `response`: the values handed to and returned by a responder
//! - `writer`: response serialization into one outbound buffer
//! - `connection`: the per-socket state machine
//!
//! ```text
//!   accept ──► Reading ──(request complete)──► Writing
//!                │  ▲                            │
//!                │  └──────── keep-alive ────────┤
//!                │                               ▼
//!                │   EOF / error / Connection: close ─► Closed
//!                │                                        ▲
//!                └─(413 / 431)─► Draining ──(EOF / limit)─┘
//! ```
//!
//! A rejected connection half-closes after its response and discards input
//! until the peer's EOF, so the peer receives a FIN rather than a reset.
//!
//! `Closed` is terminal: the connection leaves the server's slab and its
//! descriptor is deregistered before being released.

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
