//! Demo responder: echoes the request body back inside an HTML snippet.

use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub fn echo_page(request: &Request) -> Response {
    let body = if request.body.is_empty() {
        "<font color=\"red\"><b>Your request was empty</b></font>".to_string()
    } else {
        format!(
            "<font color=\"red\"><b>Your request was: [{}]</b></font>",
            String::from_utf8_lossy(&request.body)
        )
    };

    ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/html;charset=utf-8")
        .body(body)
        .build()
}
