//! Incremental HTTP/1.1 message parsing.
//!
//! [`HeaderParser`] accepts the header section in arbitrarily fragmented
//! chunks and only re-scans the three bytes preceding each new chunk when
//! looking for the `\r\n\r\n` terminator, so a terminator split across chunk
//! boundaries is still found exactly once. [`RequestParser`] layers the
//! `Content-Length` body on top of it.
//!
//! Malformed input never fails: a broken headline yields empty parts and
//! header lines without `": "` are skipped.

use crate::http::request::Request;

use bytes::Bytes;
use std::collections::HashMap;

const TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Default, Clone)]
pub struct HeaderParser {
    raw: Vec<u8>,
    headline: String,
    headers: HashMap<String, String>,
    over_read: Vec<u8>,
    finished: bool,
}

impl HeaderParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the header section.
    ///
    /// # Panics
    ///
    /// Panics when called after the header section completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        assert!(
            !self.finished,
            "push_chunk called after the header section completed"
        );

        // Look for the separator, starting where a split one could begin
        let scan_from = self.raw.len().saturating_sub(TERMINATOR.len() - 1);
        self.raw.extend_from_slice(chunk);

        if let Some(offset) = find_terminator(&self.raw[scan_from..]) {
            let end = scan_from + offset;

            // Whatever followed the separator belongs to the body
            self.over_read = self.raw.split_off(end + TERMINATOR.len());
            self.raw.truncate(end);
            self.finished = true;
            self.parse_header();
        }
    }

    pub fn header_finished(&self) -> bool {
        self.finished
    }

    /// First line of the message, without its line break.
    pub fn headline(&self) -> &str {
        &self.headline
    }

    /// Header fields keyed by lower-cased name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Accumulated header bytes. Once finished, this is the header section
    /// without its terminator.
    pub fn raw_header(&self) -> &[u8] {
        &self.raw
    }

    /// Bytes that followed the terminator in the completing chunk.
    pub fn over_read(&self) -> &[u8] {
        &self.over_read
    }

    fn parse_header(&mut self) {
        let header = String::from_utf8_lossy(&self.raw);
        let mut lines = header.split("\r\n");

        // Request or status line
        self.headline = lines.next().unwrap_or_default().to_string();

        // Headers; lines without ": " are dropped
        for line in lines {
            if let Some((key, value)) = line.split_once(": ") {
                self.headers
                    .insert(key.to_ascii_lowercase(), value.to_string());
            }
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

/// Declared body length; absent or unparsable means no body.
pub fn content_length(headers: &HashMap<String, String>) -> usize {
    headers
        .get("content-length")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Splits a headline on its first two spaces. Missing parts are empty.
pub fn split_headline(line: &str) -> (&str, &str, &str) {
    let mut parts = line.splitn(3, ' ');

    (
        parts.next().unwrap_or(""),
        parts.next().unwrap_or(""),
        parts.next().unwrap_or(""),
    )
}

/// `GET / HTTP/1.1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn parse(line: &str) -> Self {
        let (method, target, version) = split_headline(line);

        Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
        }
    }
}

/// `HTTP/1.1 200 OK`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status: String,
    pub reason: String,
}

impl StatusLine {
    pub fn parse(line: &str) -> Self {
        let (version, status, reason) = split_headline(line);

        Self {
            version: version.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status.parse().ok()
    }
}

/// Request parser: the header section, then exactly `Content-Length` body
/// bytes gathered across as many chunks as it takes.
#[derive(Debug, Default)]
pub struct RequestParser {
    header: HeaderParser,
    body: Vec<u8>,
    content_length: usize,
    body_finished: bool,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next chunk read from the connection. Bytes beyond the
    /// declared body length are discarded.
    ///
    /// # Panics
    ///
    /// Panics when called after the request completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        assert!(
            !self.body_finished,
            "push_chunk called after the request completed"
        );

        // Header section
        if !self.header.header_finished() {
            self.header.push_chunk(chunk);

            if self.header.header_finished() {
                self.content_length = content_length(self.header.headers());
                let over_read = self.header.over_read().to_vec();
                self.append_body(&over_read);
            }

            return;
        }

        // Body
        self.append_body(chunk);
    }

    fn append_body(&mut self, chunk: &[u8]) {
        let remaining = self.content_length - self.body.len();
        let take = chunk.len().min(remaining);

        self.body.extend_from_slice(&chunk[..take]);

        if self.body.len() == self.content_length {
            self.body_finished = true;
        }
    }

    pub fn header_finished(&self) -> bool {
        self.header.header_finished()
    }

    pub fn body_finished(&self) -> bool {
        self.body_finished
    }

    /// True once the header section and the declared body are both in.
    pub fn request_finished(&self) -> bool {
        self.header.header_finished() && self.body_finished
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Size of the buffered, still incomplete header section.
    pub fn header_bytes(&self) -> usize {
        self.header.raw_header().len()
    }

    pub fn headline(&self) -> &str {
        self.header.headline()
    }

    pub fn request_line(&self) -> RequestLine {
        RequestLine::parse(self.header.headline())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        self.header.headers()
    }

    pub fn raw_header(&self) -> &[u8] {
        self.header.raw_header()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the parser into the request it parsed, or `None` while the
    /// request is still incomplete.
    pub fn into_request(self) -> Option<Request> {
        if !self.request_finished() {
            return None;
        }

        let RequestLine {
            method,
            target,
            version,
        } = RequestLine::parse(self.header.headline());

        Some(Request {
            method,
            target,
            version,
            headers: self.header.headers,
            body: Bytes::from(self.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_only_in_last_three_bytes_plus_chunk_is_found() {
        let mut parser = HeaderParser::new();

        parser.push_chunk(b"GET / HTTP/1.1\r\nHost: x\r\n\r");
        assert!(!parser.header_finished());

        parser.push_chunk(b"\nbody");
        assert!(parser.header_finished());
        assert_eq!(parser.headline(), "GET / HTTP/1.1");
        assert_eq!(parser.over_read(), b"body");
    }

    #[test]
    fn raw_header_excludes_the_terminator() {
        let mut parser = HeaderParser::new();
        parser.push_chunk(b"GET / HTTP/1.1\r\nA: b\r\n\r\n");

        assert_eq!(parser.raw_header(), b"GET / HTTP/1.1\r\nA: b");
    }

    #[test]
    #[should_panic(expected = "after the header section completed")]
    fn pushing_after_completion_panics() {
        let mut parser = HeaderParser::new();
        parser.push_chunk(b"GET / HTTP/1.1\r\n\r\n");
        parser.push_chunk(b"more");
    }

    #[test]
    fn split_headline_fills_missing_parts_with_empty_strings() {
        assert_eq!(split_headline("GET"), ("GET", "", ""));
        assert_eq!(split_headline("GET /"), ("GET", "/", ""));
        assert_eq!(split_headline(""), ("", "", ""));
        assert_eq!(
            split_headline("HTTP/1.1 404 Not Found"),
            ("HTTP/1.1", "404", "Not Found")
        );
    }

    #[test]
    fn body_gathers_across_chunks_and_drops_excess() {
        let mut parser = RequestParser::new();
        parser.push_chunk(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe");
        assert!(parser.header_finished());
        assert!(!parser.request_finished());

        parser.push_chunk(b"llo!!");
        assert!(parser.request_finished());
        assert_eq!(parser.body(), b"hello");
    }
}
