use bytes::Bytes;

/// Statuses a responder or the connection layer can answer with. The
/// connection itself only produces 413 and 431; everything else comes from
/// the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    /// Declared body exceeds `max_body_bytes`.
    PayloadTooLarge,
    /// Header section exceeds `max_header_bytes`.
    RequestHeaderFieldsTooLarge,
    InternalServerError,
}

impl StatusCode {
    const fn line(self) -> (u16, &'static str) {
        match self {
            StatusCode::Ok => (200, "OK"),
            StatusCode::BadRequest => (400, "Bad Request"),
            StatusCode::NotFound => (404, "Not Found"),
            StatusCode::PayloadTooLarge => (413, "Payload Too Large"),
            StatusCode::RequestHeaderFieldsTooLarge => (431, "Request Header Fields Too Large"),
            StatusCode::InternalServerError => (500, "Internal Server Error"),
        }
    }

    /// ```
    /// # use edgeserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::RequestHeaderFieldsTooLarge.as_u16(), 431);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.line().0
    }

    /// Reason phrase sent on the status line.
    ///
    /// ```
    /// # use edgeserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::PayloadTooLarge.reason_phrase(), "Payload Too Large");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        self.line().1
    }
}

/// A response as handed back by a responder. Headers keep insertion order,
/// which is the order they go on the wire.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// ```
/// # use edgeserve::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .body("hi")
///     .build();
///
/// assert_eq!(response.header("content-length"), Some("2"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header, replacing an existing one with the same name
    /// (compared case-insensitively) in place.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends `Content-Length` for the body unless one was set explicitly.
    pub fn build(mut self) -> Response {
        if find_header(&self.headers, "Content-Length").is_none() {
            self.headers
                .push(("Content-Length".to_string(), self.body.len().to_string()));
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// `200 OK` carrying `body`.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    /// Plain-text page naming the status, e.g. `413 Payload Too Large`.
    pub fn status_page(status: StatusCode) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(format!("{} {}", status.as_u16(), status.reason_phrase()))
            .build()
    }

    /// Looks up a header by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        find_header(&self.headers, key)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn set_header(headers: &mut Vec<(String, String)>, key: String, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
        Some(entry) => entry.1 = value,
        None => headers.push((key, value)),
    }
}
