//! Server assembly: the reactor, the live connections and the listeners.
//!
//! - [`listener`]: accept loop spawning one connection handler per socket
//! - [`resolve`]: host/service resolution and listening sockets
//! - [`slab`]: generational storage keyed by [`ConnectionId`]
//!
//! A [`Server`] is single-threaded. Continuations capture an `Rc` to the
//! shared state plus a [`ConnectionId`], never a reference to the connection
//! itself, so a closed connection is simply an id that no longer resolves.

pub mod listener;
pub mod resolve;
pub mod slab;

pub use slab::ConnectionId;

use crate::app;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::reactor::Reactor;
use listener::Listener;
use slab::Slab;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use tracing::{info, warn};

/// Turns a complete request into the response sent back.
pub type Responder = Rc<dyn Fn(&Request) -> Response>;

pub(crate) struct Shared {
    pub(crate) reactor: Rc<Reactor>,
    pub(crate) config: ServerConfig,
    pub(crate) connections: RefCell<Slab<Connection>>,
    pub(crate) listeners: RefCell<Vec<Listener>>,
    pub(crate) responder: Responder,
}

pub struct Server {
    shared: Rc<Shared>,
}

impl Server {
    /// Creates a server answering every request with the demo echo page.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_responder(config, app::echo_page)
    }

    /// Creates a server answering through `responder`. Fails with
    /// [`Error::Config`] when `config` does not validate.
    pub fn with_responder<F>(config: ServerConfig, responder: F) -> Result<Self>
    where
        F: Fn(&Request) -> Response + 'static,
    {
        config.validate()?;
        let reactor = Reactor::new(config.max_events)?;

        Ok(Self {
            shared: Rc::new(Shared {
                reactor,
                config,
                connections: RefCell::new(Slab::new()),
                listeners: RefCell::new(Vec::new()),
                responder: Rc::new(responder),
            }),
        })
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        &self.shared.reactor
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Listens on the configured host and port.
    pub fn listen(&self) -> Result<SocketAddr> {
        let ServerConfig { host, port, .. } = &self.shared.config;
        self.listen_on(host, port)
    }

    /// Resolves `host`/`service` and listens on the first candidate that
    /// binds. Returns the bound address.
    pub fn listen_on(&self, host: &str, service: &str) -> Result<SocketAddr> {
        let mut last_error = None;

        for candidate in resolve::resolve(host, service)? {
            match resolve::bind_and_listen(candidate) {
                Ok((fd, local)) => {
                    listener::start(&self.shared, fd, local)?;
                    info!("Listening on {}", local);
                    return Ok(local);
                }
                Err(err) => {
                    warn!(address = %candidate, error = %err, "bind failed, trying next candidate");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Config(format!("nothing to bind for {host}"))))
    }

    /// Runs the event loop until it is stopped or a listener fails.
    pub fn run(&self) -> Result<()> {
        self.shared.reactor.run_forever()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.borrow().len()
    }

    /// Closes every connection and listener and stops the reactor.
    pub fn shutdown(&self) {
        let connections = self.shared.connections.borrow_mut().drain();
        for (_, connection) in connections {
            connection.close();
        }

        let listeners: Vec<Listener> = self.shared.listeners.borrow_mut().drain(..).collect();
        for listener in listeners {
            listener.close();
        }

        self.shared.reactor.shutdown();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
