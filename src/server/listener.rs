use crate::error::Result;
use crate::http::connection;
use crate::reactor::{Accepted, AsyncFile, Callback};
use crate::server::Shared;

use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use tracing::{debug, error, warn};

/// A bound, listening socket and the address it is bound to.
pub(crate) struct Listener {
    file: Rc<AsyncFile>,
    local: SocketAddr,
}

impl Listener {
    pub(crate) fn close(&self) {
        if let Err(err) = self.file.close() {
            warn!(address = %self.local, error = %err, "closing listener");
        }
    }
}

/// Wraps the listening descriptor and starts accepting on it.
pub(crate) fn start(shared: &Rc<Shared>, fd: OwnedFd, local: SocketAddr) -> Result<()> {
    let file = AsyncFile::wrap(fd, Rc::clone(&shared.reactor))?;

    shared.listeners.borrow_mut().push(Listener {
        file: Rc::clone(&file),
        local,
    });

    accept_next(Rc::clone(shared), file);
    Ok(())
}

fn accept_next(shared: Rc<Shared>, file: Rc<AsyncFile>) {
    let listener = Rc::clone(&file);

    file.async_accept(Callback::new(move |accepted: Result<Accepted>| {
        match accepted {
            Ok(Accepted { fd, peer }) => {
                debug!(%peer, "Accepted connection");
                if let Err(err) = connection::spawn(&shared, fd, peer) {
                    warn!(%peer, error = %err, "could not set up connection");
                }
            }
            Err(err) => {
                if listener.is_closed() {
                    return;
                }

                error!(fd = listener.fd(), error = %err, "accept failed, stopping server");
                shared.reactor.fail(err);
                let _ = listener.close();
                return;
            }
        }

        accept_next(shared, listener);
    }));
}
