use bytes::{BufMut, BytesMut};

use crate::http::response::{Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Accumulates a response head (status line, header lines, blank line) and
/// body into one outbound buffer.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    buffer: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_header(&mut self, status: StatusCode) {
        let status_line = format!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            status.as_u16(),
            status.reason_phrase()
        );
        self.buffer.put_slice(status_line.as_bytes());
    }

    pub fn write_header(&mut self, key: &str, value: &str) {
        self.buffer.put_slice(key.as_bytes());
        self.buffer.put_slice(b": ");
        self.buffer.put_slice(value.as_bytes());
        self.buffer.put_slice(b"\r\n");
    }

    pub fn end_header(&mut self) {
        self.buffer.put_slice(b"\r\n");
    }

    pub fn write_body(&mut self, body: &[u8]) {
        self.buffer.put_slice(body);
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }

    /// Serializes `response` as it goes on the wire.
    pub fn serialize(response: &Response) -> BytesMut {
        let mut writer = Self::new();

        writer.begin_header(response.status);
        for (key, value) in &response.headers {
            writer.write_header(key, value);
        }
        writer.end_header();
        writer.write_body(&response.body);

        writer.into_buffer()
    }
}
