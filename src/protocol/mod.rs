//! Request/response framing for the container engine's line-based protocol.
//!
//! A request is a single line; a response is a status line, headers, a blank
//! line and the body. This module is the only place protocol-level failures
//! are turned into domain-level failures.

pub mod demux;
mod error;

pub use error::{Error, Result};

/// The header/body delimiter of the wire protocol.
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Builds a single request line for the engine's control protocol.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     guestmon::protocol::build_request("GET", "/events"),
///     "GET /events HTTP/1.0\r\n\r\n"
/// );
/// ```
pub fn build_request(method: &str, path: &str) -> String {
    format!("{method} {path} HTTP/1.0\r\n\r\n")
}

/// A response split into its status code and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    /// Splits raw response bytes at the blank-line delimiter and parses the
    /// status code out of the first header line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeaderSeparator`] when no blank line is
    /// present, or [`Error::MalformedStatusLine`] when the status line does
    /// not carry a numeric code in its second field.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let header_end = raw
            .windows(HEADER_END.len())
            .position(|window| window == HEADER_END)
            .ok_or(Error::MissingHeaderSeparator)?;
        let header = &raw[..header_end];
        let body = raw[header_end + HEADER_END.len()..].to_vec();

        let status_line = header
            .split(|&b| b == b'\r')
            .next()
            .unwrap_or_default()
            .to_vec();
        let status_line = String::from_utf8(status_line)
            .map_err(|err| Error::MalformedStatusLine(err.to_string()))?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::MalformedStatusLine(status_line.clone()))?;

        Ok(Self { status, body })
    }

    /// Classifies the response: 2xx passes the body through, anything else
    /// becomes a typed [`Error::Status`] carrying a human title/detail pair.
    pub fn into_success_body(self) -> Result<Vec<u8>> {
        if (200..300).contains(&self.status) {
            return Ok(self.body);
        }

        let mut detail = String::from_utf8_lossy(&self.body).trim().to_owned();
        if detail.is_empty() {
            detail = match self.status {
                // 304 has no body and is quite common
                304 => "The requested operation is currently not possible. Please try again later."
                    .to_owned(),
                _ => "The requested operation failed.".to_owned(),
            };
        }
        detail.push_str(&format!(" ({})", self.status));
        let (title, detail) = match detail.split_once(':') {
            Some((title, detail)) => (title.to_owned(), detail.trim_start().to_owned()),
            None => ("Container management error".to_owned(), detail),
        };

        Err(Error::Status {
            code: self.status,
            title,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_terminated_request_line() {
        assert_eq!(
            build_request("POST", "/containers/abc/start"),
            "POST /containers/abc/start HTTP/1.0\r\n\r\n"
        );
    }

    #[test]
    fn parses_status_and_body() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":true}";
        let response = Response::parse(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{\"ok\":true}");
        assert_eq!(response.into_success_body().unwrap(), b"{\"ok\":true}");
    }

    #[test]
    fn error_on_missing_separator() {
        let err = Response::parse(b"HTTP/1.0 200 OK\r\n").unwrap_err();
        assert!(matches!(err, Error::MissingHeaderSeparator));
    }

    #[test]
    fn error_on_malformed_status_line() {
        let err = Response::parse(b"garbage\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::MalformedStatusLine(_)));
    }

    #[test]
    fn non_2xx_splits_title_on_first_colon() {
        let raw = b"HTTP/1.0 500 Internal Server Error\r\n\r\nEngine error: no such container";
        let err = Response::parse(raw).unwrap().into_success_body().unwrap_err();
        match err {
            Error::Status {
                code,
                title,
                detail,
            } => {
                assert_eq!(code, 500);
                assert_eq!(title, "Engine error");
                assert_eq!(detail, "no such container (500)");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn status_304_gets_a_fixed_fallback_body() {
        let raw = b"HTTP/1.0 304 Not Modified\r\n\r\n";
        let err = Response::parse(raw).unwrap().into_success_body().unwrap_err();
        match err {
            Error::Status { code, detail, .. } => {
                assert_eq!(code, 304);
                assert!(detail.contains("not possible"));
                assert!(detail.ends_with("(304)"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn other_non_2xx_without_body_gets_generic_fallback() {
        let raw = b"HTTP/1.0 404 Not Found\r\n\r\n";
        let err = Response::parse(raw).unwrap().into_success_body().unwrap_err();
        match err {
            Error::Status { detail, .. } => {
                assert_eq!(detail, "The requested operation failed. (404)");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }
}
