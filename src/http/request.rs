use bytes::Bytes;
use std::collections::HashMap;

/// A fully received HTTP request.
///
/// Produced by [`RequestParser::into_request`](crate::http::parser::RequestParser::into_request)
/// once the header section and the declared body are complete.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Request method as sent (e.g., "GET")
    pub method: String,
    /// Request target (e.g., "/index.html?q=1")
    pub target: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Header fields keyed by lower-cased name
    pub headers: HashMap<String, String>,
    /// Exactly `Content-Length` bytes of body
    pub body: Bytes,
}

impl Request {
    /// Retrieves a header value. The name is lower-cased before the lookup,
    /// so any casing works.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Declared Content-Length, 0 if missing or not a number.
    pub fn content_length(&self) -> usize {
        crate::http::parser::content_length(&self.headers)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// `Connection: close` always closes. HTTP/1.0 closes unless the client
    /// asked for `keep-alive`. Anything else keeps the connection open.
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(value) if value.eq_ignore_ascii_case("close") => false,
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }
}
