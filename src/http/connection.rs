use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::parser::RequestParser;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::reactor::{AsyncFile, Callback, ReadCompletion};
use crate::server::{ConnectionId, Shared};

use bytes::BytesMut;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// Request bytes a rejected connection discards while waiting for the peer
/// to finish sending.
const DRAIN_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Reading,
    Writing,
    /// Rejected: the response went out and the write side is shut down.
    /// Input is read and discarded until the peer's EOF.
    Draining,
    Closed,
}

/// Per-connection state, owned by the server's connection slab.
pub(crate) struct Connection {
    file: Rc<AsyncFile>,
    peer: SocketAddr,
    state: ConnectionState,
    /// `None` while a read owns the buffer.
    buffer: Option<BytesMut>,
    parser: RequestParser,
    served: u64,
}

/// What the connection does after a chunk went through the parser.
enum Next {
    Read,
    Respond(Request),
    Reject(StatusCode),
}

impl Connection {
    fn new(file: Rc<AsyncFile>, peer: SocketAddr, buffer_size: usize) -> Self {
        Self {
            file,
            peer,
            state: ConnectionState::Reading,
            buffer: Some(BytesMut::with_capacity(buffer_size)),
            parser: RequestParser::new(),
            served: 0,
        }
    }

    fn next(&mut self, config: &ServerConfig) -> Next {
        // Header section still incomplete
        if !self.parser.header_finished() {
            if self.parser.header_bytes() > config.max_header_bytes {
                return Next::Reject(StatusCode::RequestHeaderFieldsTooLarge);
            }
            return Next::Read;
        }

        if self.parser.content_length() > config.max_body_bytes {
            return Next::Reject(StatusCode::PayloadTooLarge);
        }

        // Body still incomplete
        if !self.parser.request_finished() {
            return Next::Read;
        }

        // Fresh parser for the next request on this connection
        match std::mem::take(&mut self.parser).into_request() {
            Some(request) => Next::Respond(request),
            None => Next::Read,
        }
    }

    /// Terminal transition: deregisters the descriptor, dropping any pending
    /// continuation, and releases the connection.
    pub(crate) fn close(mut self) {
        debug!(fd = self.file.fd(), from = ?self.state, "closing");
        self.state = ConnectionState::Closed;

        if let Err(err) = self.file.close() {
            warn!(fd = self.file.fd(), error = %err, "deregistering connection");
        }
    }
}

/// Wraps an accepted socket, stores the connection and issues its first read.
pub(crate) fn spawn(shared: &Rc<Shared>, fd: OwnedFd, peer: SocketAddr) -> Result<ConnectionId> {
    let file = AsyncFile::wrap(fd, Rc::clone(&shared.reactor))?;
    let fd = file.fd();

    let connection = Connection::new(file, peer, shared.config.read_buffer_size);
    let id = shared.connections.borrow_mut().insert(connection);

    info!(connection = %id, fd, %peer, "Connection opened");

    do_read(Rc::clone(shared), id);
    Ok(id)
}

/// Moves the connection into `state` and lends out its read buffer.
fn begin_read(
    shared: &Shared,
    id: ConnectionId,
    state: ConnectionState,
) -> Option<(Rc<AsyncFile>, BytesMut)> {
    let mut connections = shared.connections.borrow_mut();
    let connection = connections.get_mut(id)?;

    connection.state = state;
    let buffer = connection
        .buffer
        .take()
        .unwrap_or_else(|| BytesMut::with_capacity(shared.config.read_buffer_size));

    Some((Rc::clone(&connection.file), buffer))
}

fn give_back(shared: &Shared, id: ConnectionId, buffer: BytesMut) {
    if let Some(connection) = shared.connections.borrow_mut().get_mut(id) {
        connection.buffer = Some(buffer);
    }
}

fn do_read(shared: Rc<Shared>, id: ConnectionId) {
    let Some((file, buffer)) = begin_read(&shared, id, ConnectionState::Reading) else {
        return;
    };

    file.async_read(
        buffer,
        Callback::new(move |completion: ReadCompletion| on_read(shared, id, completion)),
    );
}

fn on_read(shared: Rc<Shared>, id: ConnectionId, completion: ReadCompletion) {
    let ReadCompletion { buffer, result } = completion;

    let read = match result {
        // Peer closed; nothing reaches the parser
        Ok(0) => {
            debug!(connection = %id, "peer closed the connection");
            return close(&shared, id);
        }
        Ok(read) => read,
        Err(err) if err.is_peer_reset() => {
            warn!(connection = %id, error = %err, "connection reset");
            return close(&shared, id);
        }
        Err(err) => {
            error!(connection = %id, error = %err, "read failed");
            return close(&shared, id);
        }
    };

    let next = {
        let mut connections = shared.connections.borrow_mut();
        let Some(connection) = connections.get_mut(id) else {
            return;
        };

        connection.parser.push_chunk(&buffer[..read]);
        connection.buffer = Some(buffer);

        debug!(connection = %id, bytes = read, "chunk parsed");
        connection.next(&shared.config)
    };

    match next {
        // Need more data
        Next::Read => do_read(shared, id),
        Next::Respond(request) => do_write(shared, id, request),
        Next::Reject(status) => reject(shared, id, status),
    }
}

/// Answers with `status`, then drains the rest of the request before the
/// terminal close.
fn reject(shared: Rc<Shared>, id: ConnectionId, status: StatusCode) {
    warn!(connection = %id, status = status.as_u16(), "rejecting request");

    if !reply(&shared, id, Response::status_page(status), false) {
        return close(&shared, id);
    }

    let Some(file) = shared
        .connections
        .borrow_mut()
        .get_mut(id)
        .map(|connection| Rc::clone(&connection.file))
    else {
        return;
    };

    // Closing with unread input would send RST and could discard the
    // response on the peer's side; a FIN goes out after the response instead.
    if let Err(err) = file.shutdown_write() {
        debug!(connection = %id, error = %err, "half-close failed");
        return close(&shared, id);
    }

    do_drain(shared, id, DRAIN_LIMIT);
}

fn do_drain(shared: Rc<Shared>, id: ConnectionId, budget: usize) {
    let Some((file, buffer)) = begin_read(&shared, id, ConnectionState::Draining) else {
        return;
    };

    file.async_read(
        buffer,
        Callback::new(move |completion: ReadCompletion| {
            on_drain(shared, id, budget, completion)
        }),
    );
}

fn on_drain(shared: Rc<Shared>, id: ConnectionId, budget: usize, completion: ReadCompletion) {
    let ReadCompletion { buffer, result } = completion;

    match result {
        Ok(0) => {
            debug!(connection = %id, "rejected request drained");
            close(&shared, id);
        }
        Ok(read) if read < budget => {
            give_back(&shared, id, buffer);
            do_drain(shared, id, budget - read);
        }
        Ok(_) => {
            warn!(connection = %id, limit = DRAIN_LIMIT, "drain limit reached");
            close(&shared, id);
        }
        Err(err) => {
            debug!(connection = %id, error = %err, "drain ended");
            close(&shared, id);
        }
    }
}

fn do_write(shared: Rc<Shared>, id: ConnectionId, request: Request) {
    let keep_alive = request.keep_alive();
    debug!(
        connection = %id,
        method = %request.method,
        target = %request.target,
        "request complete"
    );

    let response = (shared.responder)(&request);

    if !reply(&shared, id, response, keep_alive) {
        return close(&shared, id);
    }

    // Same connection, next request
    if keep_alive {
        do_read(shared, id);
    } else {
        close(&shared, id);
    }
}

/// Writes `response` with the fixed header set. Returns false when the
/// transport failed and the connection has to go.
fn reply(shared: &Shared, id: ConnectionId, response: Response, keep_alive: bool) -> bool {
    let (file, peer) = {
        let mut connections = shared.connections.borrow_mut();
        let Some(connection) = connections.get_mut(id) else {
            return false;
        };

        connection.state = ConnectionState::Writing;
        connection.served += 1;
        (Rc::clone(&connection.file), connection.peer)
    };

    let response = finalize(response, &shared.config.server_name, keep_alive);
    let bytes = ResponseWriter::serialize(&response);

    // Blocks on POLLOUT if the socket buffer fills up
    match file.sync_write(&bytes) {
        Ok(written) => {
            debug!(connection = %id, %peer, bytes = written, status = response.status.as_u16(), "Responded");
            true
        }
        Err(err) if err.is_peer_reset() => {
            warn!(connection = %id, %peer, error = %err, "peer went away mid-response");
            false
        }
        Err(err) => {
            error!(connection = %id, %peer, error = %err, "write failed");
            false
        }
    }
}

/// Puts `Server`, `Content-Type`, `Connection` and `Content-Length` first,
/// in that order, followed by whatever else the responder set.
fn finalize(response: Response, server_name: &str, keep_alive: bool) -> Response {
    let content_type = response
        .header("Content-Type")
        .unwrap_or("text/plain")
        .to_string();

    let mut builder = ResponseBuilder::new(response.status)
        .header("Server", server_name)
        .header("Content-Type", content_type)
        .header("Connection", if keep_alive { "keep-alive" } else { "close" })
        .header("Content-Length", response.body.len().to_string());

    for (key, value) in response.headers {
        if !is_fixed_header(&key) {
            builder = builder.header(key, value);
        }
    }

    builder.body(response.body).build()
}

fn is_fixed_header(key: &str) -> bool {
    ["Server", "Content-Type", "Connection", "Content-Length"]
        .iter()
        .any(|fixed| fixed.eq_ignore_ascii_case(key))
}

fn close(shared: &Shared, id: ConnectionId) {
    let removed = shared.connections.borrow_mut().remove(id);
    let Some(connection) = removed else {
        return;
    };

    info!(
        connection = %id,
        peer = %connection.peer,
        served = connection.served,
        "Connection closed"
    );
    connection.close();
}
