//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Tolerant HTTP/1.1 message parser.
//!
//! [`HttpParser`] splits a raw byte buffer on the first CRLFCRLF boundary,
//! parses the request or status line, and on demand builds a
//! case-insensitive header map with `Content-Length` extraction. It never
//! owns the buffer: callers keep the bytes and ask for the body as a slice,
//! so streaming reassembly can reuse one growing buffer.
//!
//! The parser is deliberately forgiving. Header lines tolerate whitespace
//! around the colon, values may contain further colons or be empty, and a
//! malformed first line leaves `method`/`uri` unset instead of failing —
//! completeness detection still works so the connection can drain the
//! garbage and move on.

use std::collections::HashMap;

/// Incremental HTTP/1.1 request/response parser.
///
/// # Examples
///
/// ```rust
/// use srmp::codec::HttpParser;
///
/// let raw = b"GET /user/get?id=5 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let mut parser = HttpParser::new();
/// assert!(parser.read(raw));
/// assert_eq!(parser.method.as_deref(), Some("GET"));
/// assert_eq!(parser.uri.as_deref(), Some("/user/get?id=5"));
///
/// parser.parse_headers(raw);
/// assert_eq!(parser.header("host"), Some("localhost"));
/// ```
#[derive(Debug, Default)]
pub struct HttpParser {
    /// Request method (`GET`, `POST`, ...). `None` on responses or a
    /// malformed first line.
    pub method: Option<String>,
    /// Request URI including any query string.
    pub uri: Option<String>,
    /// Protocol version token (`HTTP/1.1`).
    pub version: Option<String>,
    /// Status code, when the message is a response.
    pub status: Option<u16>,
    /// `Content-Length`, populated by [`parse_headers`](Self::parse_headers).
    pub content_length: Option<usize>,
    headers: HashMap<String, String>,
    header_end: usize,
}

impl HttpParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `data` into header and body and parses the first line.
    ///
    /// Returns `false` when no CRLFCRLF boundary exists yet — the caller
    /// should buffer more bytes and try again. A malformed first line still
    /// returns `true` with `method`/`uri`/`status` left unset.
    pub fn read(&mut self, data: &[u8]) -> bool {
        let Some(boundary) = find_crlfcrlf(data) else {
            return false;
        };
        self.header_end = boundary + 4;

        let head = &data[..boundary];
        let first_line_end = find_crlf(head).unwrap_or(head.len());
        if let Ok(line) = std::str::from_utf8(&head[..first_line_end]) {
            self.parse_first_line(line);
        }
        true
    }

    fn parse_first_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("HTTP/") {
            // status line: HTTP/1.1 200 OK
            let mut parts = rest.split_whitespace();
            let version = parts.next();
            let code = parts.next().and_then(|c| c.parse::<u16>().ok());
            if let (Some(version), Some(code)) = (version, code) {
                self.version = Some(format!("HTTP/{version}"));
                self.status = Some(code);
            }
            return;
        }
        // request line: METHOD SP URI SP VERSION
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(uri), Some(version)) if parts.next().is_none() => {
                self.method = Some(method.to_owned());
                self.uri = Some(uri.to_owned());
                self.version = Some(version.to_owned());
            }
            _ => {
                // malformed; leave everything unset
            }
        }
    }

    /// Builds the case-insensitive header map and extracts `Content-Length`.
    ///
    /// Call after [`read`](Self::read) has returned `true`. Lines without a
    /// colon are skipped; keys are lowercased; values are trimmed but
    /// otherwise untouched, so embedded colons survive.
    pub fn parse_headers(&mut self, data: &[u8]) {
        if self.header_end < 4 {
            return;
        }
        let head = &data[..self.header_end - 4];
        let start = find_crlf(head).map_or(head.len(), |i| i + 2);
        for line in head[start.min(head.len())..].split(|&b| b == b'\n') {
            let line = match std::str::from_utf8(line) {
                Ok(text) => text.trim_end_matches('\r'),
                Err(_) => continue,
            };
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            self.headers.insert(key, value.trim().to_owned());
        }
        self.content_length = self
            .headers
            .get("content-length")
            .and_then(|v| v.parse().ok());
    }

    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the body slice of `data`.
    #[must_use]
    pub fn body<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        data.get(self.header_end..).unwrap_or(&[])
    }

    /// Total message length once headers are parsed: header bytes plus
    /// `Content-Length` (zero when absent).
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.header_end + self.content_length.unwrap_or(0)
    }

    /// Returns `true` once `data` holds the complete message.
    #[must_use]
    pub fn is_complete(&self, data: &[u8]) -> bool {
        self.header_end > 0 && data.len() >= self.total_len()
    }
}

fn find_crlfcrlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let raw = b"GET /user/get?id=5 HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut parser = HttpParser::new();
        assert!(parser.read(raw));
        assert_eq!(parser.method.as_deref(), Some("GET"));
        assert_eq!(parser.uri.as_deref(), Some("/user/get?id=5"));
        assert_eq!(parser.version.as_deref(), Some("HTTP/1.1"));
        assert!(parser.status.is_none());
    }

    #[test]
    fn test_status_line() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\n";
        let mut parser = HttpParser::new();
        assert!(parser.read(raw));
        assert_eq!(parser.status, Some(404));
        assert!(parser.method.is_none());
    }

    #[test]
    fn test_incomplete_headers() {
        let mut parser = HttpParser::new();
        assert!(!parser.read(b"GET / HTTP/1.1\r\nHost: h\r\n"));
    }

    #[test]
    fn test_malformed_request_line_is_graceful() {
        let raw = b"NONSENSE\r\nHost: h\r\n\r\n";
        let mut parser = HttpParser::new();
        assert!(parser.read(raw));
        assert!(parser.method.is_none());
        assert!(parser.uri.is_none());
        // headers still parse
        parser.parse_headers(raw);
        assert_eq!(parser.header("host"), Some("h"));
    }

    #[test]
    fn test_header_whitespace_and_colons() {
        let raw = b"GET / HTTP/1.1\r\nAuthorization :  Bearer a:b:c \r\nEmpty:\r\n\r\n";
        let mut parser = HttpParser::new();
        assert!(parser.read(raw));
        parser.parse_headers(raw);
        assert_eq!(parser.header("authorization"), Some("Bearer a:b:c"));
        assert_eq!(parser.header("empty"), Some(""));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let raw = b"GET / HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n";
        let mut parser = HttpParser::new();
        parser.read(raw);
        parser.parse_headers(raw);
        assert_eq!(parser.header("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn test_content_length_and_completeness() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        let mut parser = HttpParser::new();
        assert!(parser.read(raw));
        parser.parse_headers(raw);
        assert_eq!(parser.content_length, Some(5));
        assert!(!parser.is_complete(raw));

        let full = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut parser = HttpParser::new();
        parser.read(full);
        parser.parse_headers(full);
        assert!(parser.is_complete(full));
        assert_eq!(parser.body(full), b"hello");
    }

    #[test]
    fn test_no_content_length_body_is_empty_message() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let mut parser = HttpParser::new();
        parser.read(raw);
        parser.parse_headers(raw);
        assert!(parser.is_complete(raw));
        assert_eq!(parser.total_len(), raw.len());
    }
}
