use edgeserve::config::ServerConfig;
use edgeserve::http::response::Response;
use edgeserve::{Error, Server};
use std::cell::Cell;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Starts a server on an ephemeral loopback port in its own thread.
fn spawn_server(config: ServerConfig, echo: bool) -> SocketAddr {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let server = if echo {
            Server::new(config).unwrap()
        } else {
            Server::with_responder(config, |_| Response::ok("")).unwrap()
        };

        let local = server.listen_on("127.0.0.1", "0").unwrap();
        tx.send(local).unwrap();
        server.run().unwrap();
    });

    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

fn connect(address: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(address).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Reads one response: the head as text and exactly `Content-Length` body
/// bytes.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0, "connection closed inside the response head");
        head.push(byte[0]);
    }

    let head = String::from_utf8(head).unwrap();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|value| value.trim().parse().unwrap())
        .unwrap_or(0);

    let mut body = vec![0; length];
    stream.read_exact(&mut body).unwrap();

    (head, body)
}

fn assert_closed_by_server(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

/// Turns the reactor of a server living on this thread until `done` holds.
fn turn_until(server: &Server, done: impl Fn(&Server) -> bool) {
    for _ in 0..100 {
        if done(server) {
            return;
        }
        server
            .reactor()
            .turn(Some(Duration::from_millis(50)))
            .unwrap();
    }
    assert!(done(server), "server never reached the expected state");
}

#[test]
fn test_get_without_body_gets_the_empty_notice() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let (head, body) = read_response(&mut stream);

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Server: edgeserve\r\n"));
    assert!(head.contains("Content-Type: text/html;charset=utf-8\r\n"));
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("Your request was empty"));
}

#[test]
fn test_post_body_is_echoed() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);

    stream
        .write_all(b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
        .unwrap();
    let (head, body) = read_response(&mut stream);

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("Your request was: [hello]"));
}

#[test]
fn test_empty_response_declares_zero_length() {
    let address = spawn_server(ServerConfig::default(), false);
    let mut stream = connect(address);

    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    let (head, body) = read_response(&mut stream);

    assert!(head.contains("Content-Length: 0\r\n"));
    assert!(head.contains("Content-Type: text/plain\r\n"));
    assert!(body.is_empty());
}

#[test]
fn test_keep_alive_serves_several_requests() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);

    for word in ["one", "two", "three"] {
        let request = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            word.len(),
            word
        );
        stream.write_all(request.as_bytes()).unwrap();

        let (_, body) = read_response(&mut stream);
        assert!(String::from_utf8_lossy(&body).contains(&format!("[{word}]")));
    }
}

#[test]
fn test_fragmented_request_is_reassembled() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);
    stream.set_nodelay(true).unwrap();

    let fragments: [&[u8]; 5] = [
        b"POST / HT",
        b"TP/1.1\r\nContent-Len",
        b"gth: 11\r\n\r",
        b"\nhello ",
        b"world",
    ];
    for fragment in fragments {
        stream.write_all(fragment).unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("[hello world]"));
}

#[test]
fn test_body_larger_than_read_buffer() {
    let config = ServerConfig {
        read_buffer_size: 16,
        ..ServerConfig::default()
    };
    let address = spawn_server(config, true);
    let mut stream = connect(address);

    let payload = "x".repeat(5000);
    let request = format!(
        "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
        payload.len(),
        payload
    );
    stream.write_all(request.as_bytes()).unwrap();

    let (_, body) = read_response(&mut stream);
    assert!(String::from_utf8_lossy(&body).contains(&format!("[{payload}]")));
}

#[test]
fn test_connection_close_is_honoured() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);

    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (head, _) = read_response(&mut stream);

    assert!(head.contains("Connection: close\r\n"));
    assert_closed_by_server(&mut stream);
}

#[test]
fn test_http10_closes_after_response() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);

    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut stream);

    assert!(head.contains("Connection: close\r\n"));
    assert_closed_by_server(&mut stream);
}

#[test]
fn test_oversized_header_is_rejected() {
    let config = ServerConfig {
        max_header_bytes: 128,
        ..ServerConfig::default()
    };
    let address = spawn_server(config, true);
    let mut stream = connect(address);

    let request = format!("GET / HTTP/1.1\r\nX-Filler: {}\r\n", "a".repeat(300));
    stream.write_all(request.as_bytes()).unwrap();

    let (head, _) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_closed_by_server(&mut stream);
}

#[test]
fn test_oversized_body_is_rejected() {
    let config = ServerConfig {
        max_body_bytes: 100,
        ..ServerConfig::default()
    };
    let address = spawn_server(config, true);
    let mut stream = connect(address);

    stream
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 1000000\r\n\r\n")
        .unwrap();

    let (head, _) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
}

#[test]
fn test_rejected_body_ends_with_orderly_close() {
    let config = ServerConfig {
        max_body_bytes: 100,
        ..ServerConfig::default()
    };
    let address = spawn_server(config, true);
    let mut stream = connect(address);

    let body = vec![b'z'; 64 * 1024];
    let mut request = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    request.extend_from_slice(&body);
    stream.write_all(&request).unwrap();
    thread::sleep(Duration::from_millis(50));

    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert_eq!(body, b"413 Payload Too Large");
    assert_closed_by_server(&mut stream);
}

#[test]
fn test_peer_eof_releases_the_connection_without_responding() {
    let responses = Rc::new(Cell::new(0));
    let counter = Rc::clone(&responses);
    let server = Server::with_responder(ServerConfig::default(), move |_| {
        counter.set(counter.get() + 1);
        Response::ok("")
    })
    .unwrap();

    let address = server.listen_on("127.0.0.1", "0").unwrap();
    assert_eq!(server.reactor().pending(), 1);

    let client = TcpStream::connect(address).unwrap();
    turn_until(&server, |server| server.connection_count() == 1);
    // The listener and the connection's read are both armed.
    assert_eq!(server.reactor().pending(), 2);

    drop(client);
    turn_until(&server, |server| server.connection_count() == 0);

    assert_eq!(server.reactor().pending(), 1);
    assert_eq!(responses.get(), 0);
}

#[test]
fn test_server_rejects_unusable_config() {
    let zero_buffer = ServerConfig {
        read_buffer_size: 0,
        ..ServerConfig::default()
    };
    assert!(matches!(Server::new(zero_buffer), Err(Error::Config(_))));

    let zero_events = ServerConfig {
        max_events: 0,
        ..ServerConfig::default()
    };
    assert!(matches!(
        Server::with_responder(zero_events, |_| Response::ok("")),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_malformed_request_line_still_gets_an_answer() {
    let address = spawn_server(ServerConfig::default(), true);
    let mut stream = connect(address);

    stream.write_all(b"GARBAGE\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut stream);

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn test_abandoned_client_does_not_disturb_others() {
    let address = spawn_server(ServerConfig::default(), true);

    let mut quitter = connect(address);
    quitter.write_all(b"POST / HTTP/1.1\r\nContent-Le").unwrap();
    quitter.shutdown(Shutdown::Both).unwrap();
    drop(quitter);

    let mut idle = connect(address);
    let mut active = connect(address);

    active
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nok")
        .unwrap();
    let (_, body) = read_response(&mut active);
    assert!(String::from_utf8_lossy(&body).contains("[ok]"));

    idle.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut idle);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
}
