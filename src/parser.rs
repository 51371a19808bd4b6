// src/parser.rs
use std::collections::VecDeque;

use thiserror::Error;

use crate::headers::HeaderSpan;
use crate::ring::RingBuf;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Unknown,
}

impl Default for Method {
    fn default() -> Self {
        Method::Unknown
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid request line")]
    InvalidRequest,
    #[error("invalid header")]
    InvalidHeader,
}

/// Outcome of a parse attempt that did not fail. `Again` means the input
/// ran out mid-element; state is saved and the next call resumes where this
/// one stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Complete,
    Again,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LineState {
    #[default]
    Start,
    Method,
    SpacesBeforeUri,
    AfterSlashInUri,
    Http,
    HttpH,
    HttpHt,
    HttpHtt,
    HttpHttp,
    FirstMajorDigit,
    MajorDigit,
    FirstMinorDigit,
    MinorDigit,
    SpacesAfterDigit,
    AlmostDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum HeaderState {
    #[default]
    Start,
    Key,
    SpacesBeforeColon,
    SpacesAfterColon,
    Value,
    Cr,
    CrLf,
    CrLfCr,
}

/// Resumable byte-at-a-time parser for the request line and header block.
///
/// All marks are absolute offsets into the connection's ring buffer, never
/// slices: the ring may wrap and refill between calls, and offsets survive
/// that where borrowed slices could not.
#[derive(Debug, Default)]
pub struct Parser {
    line_state: LineState,
    header_state: HeaderState,

    pub request_start: usize,
    pub method: Method,
    pub uri_start: usize,
    pub uri_end: usize,
    pub request_end: Option<usize>,
    pub http_major: u32,
    pub http_minor: u32,

    key_start: usize,
    key_end: usize,
    value_start: usize,
    value_end: usize,
}

impl Parser {
    /// Clear all state for the next request on a keep-alive connection.
    pub fn reset(&mut self) {
        *self = Parser::default();
    }

    /// Parse `METHOD SP* URI SP+ "HTTP/" MAJOR "." MINOR (SP* (CR LF | LF))`.
    ///
    /// Consumes every byte it scans; on `Complete` the ring cursor sits past
    /// the line terminator and the state is reset for the header phase.
    pub fn parse_request_line(&mut self, ring: &mut RingBuf) -> Result<ParseStatus, ParseError> {
        let mut state = self.line_state;
        let mut pi = ring.pos();
        let mut done = false;

        while pi < ring.last() {
            let ch = ring.at(pi);

            match state {
                LineState::Start => {
                    self.request_start = pi;
                    // Tolerate blank lines before the request.
                    if ch != CR && ch != LF {
                        if !(ch.is_ascii_uppercase() || ch == b'_') {
                            return Err(ParseError::InvalidMethod);
                        }
                        state = LineState::Method;
                    }
                }

                LineState::Method => {
                    if ch == b' ' {
                        let start = self.request_start;
                        self.method = match pi - start {
                            3 if ring.range_eq(start, pi, b"GET") => Method::Get,
                            4 if ring.range_eq(start, pi, b"POST") => Method::Post,
                            4 if ring.range_eq(start, pi, b"HEAD") => Method::Head,
                            _ => Method::Unknown,
                        };
                        state = LineState::SpacesBeforeUri;
                    } else if !(ch.is_ascii_uppercase() || ch == b'_') {
                        return Err(ParseError::InvalidMethod);
                    }
                }

                LineState::SpacesBeforeUri => match ch {
                    b'/' => {
                        self.uri_start = pi;
                        state = LineState::AfterSlashInUri;
                    }
                    b' ' => {}
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::AfterSlashInUri => {
                    if ch == b' ' {
                        self.uri_end = pi;
                        state = LineState::Http;
                    }
                }

                LineState::Http => match ch {
                    b' ' => {}
                    b'H' => state = LineState::HttpH,
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::HttpH => match ch {
                    b'T' => state = LineState::HttpHt,
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::HttpHt => match ch {
                    b'T' => state = LineState::HttpHtt,
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::HttpHtt => match ch {
                    b'P' => state = LineState::HttpHttp,
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::HttpHttp => match ch {
                    b'/' => state = LineState::FirstMajorDigit,
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::FirstMajorDigit => {
                    if !(b'1'..=b'9').contains(&ch) {
                        return Err(ParseError::InvalidRequest);
                    }
                    self.http_major = (ch - b'0') as u32;
                    state = LineState::MajorDigit;
                }

                LineState::MajorDigit => {
                    if ch == b'.' {
                        state = LineState::FirstMinorDigit;
                    } else if ch.is_ascii_digit() {
                        self.http_major = self.http_major * 10 + (ch - b'0') as u32;
                    } else {
                        return Err(ParseError::InvalidRequest);
                    }
                }

                LineState::FirstMinorDigit => {
                    if !ch.is_ascii_digit() {
                        return Err(ParseError::InvalidRequest);
                    }
                    self.http_minor = (ch - b'0') as u32;
                    state = LineState::MinorDigit;
                }

                LineState::MinorDigit => match ch {
                    CR => state = LineState::AlmostDone,
                    LF => done = true,
                    b' ' => state = LineState::SpacesAfterDigit,
                    _ if ch.is_ascii_digit() => {
                        self.http_minor = self.http_minor * 10 + (ch - b'0') as u32;
                    }
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::SpacesAfterDigit => match ch {
                    b' ' => {}
                    CR => state = LineState::AlmostDone,
                    LF => done = true,
                    _ => return Err(ParseError::InvalidRequest),
                },

                LineState::AlmostDone => {
                    self.request_end = Some(pi - 1);
                    if ch != LF {
                        return Err(ParseError::InvalidRequest);
                    }
                    done = true;
                }
            }

            pi += 1;
            if done {
                break;
            }
        }

        if !done {
            // Out of input; save the cursor and state for the next call.
            ring.consume_to(pi);
            self.line_state = state;
            return Ok(ParseStatus::Again);
        }

        ring.consume_to(pi);
        if self.request_end.is_none() {
            self.request_end = Some(pi - 1);
        }
        self.line_state = LineState::Start;
        Ok(ParseStatus::Complete)
    }

    /// Parse `KEY SP* ":" SP* VALUE (CR? LF)` lines until the blank line
    /// ending the header block. Completed headers are appended to `headers`
    /// in insertion order.
    pub fn parse_headers(
        &mut self,
        ring: &mut RingBuf,
        headers: &mut VecDeque<HeaderSpan>,
    ) -> Result<ParseStatus, ParseError> {
        let mut state = self.header_state;
        let mut pi = ring.pos();
        let mut done = false;

        while pi < ring.last() {
            let ch = ring.at(pi);

            match state {
                HeaderState::Start => match ch {
                    // A blank line right away ends an empty header block.
                    CR => state = HeaderState::CrLfCr,
                    LF => done = true,
                    _ => {
                        self.key_start = pi;
                        state = HeaderState::Key;
                    }
                },

                HeaderState::Key => {
                    if ch == b' ' {
                        self.key_end = pi;
                        state = HeaderState::SpacesBeforeColon;
                    } else if ch == b':' {
                        self.key_end = pi;
                        state = HeaderState::SpacesAfterColon;
                    }
                }

                HeaderState::SpacesBeforeColon => match ch {
                    b' ' => {}
                    b':' => state = HeaderState::SpacesAfterColon,
                    _ => return Err(ParseError::InvalidHeader),
                },

                HeaderState::SpacesAfterColon => {
                    if ch != b' ' {
                        self.value_start = pi;
                        state = HeaderState::Value;
                    }
                }

                HeaderState::Value => {
                    if ch == CR {
                        self.value_end = pi;
                        state = HeaderState::Cr;
                    } else if ch == LF {
                        // A bare LF terminates the line as well.
                        self.value_end = pi;
                        headers.push_back(self.current_header());
                        state = HeaderState::CrLf;
                    }
                }

                HeaderState::Cr => {
                    if ch != LF {
                        return Err(ParseError::InvalidHeader);
                    }
                    headers.push_back(self.current_header());
                    state = HeaderState::CrLf;
                }

                HeaderState::CrLf => {
                    if ch == CR {
                        state = HeaderState::CrLfCr;
                    } else {
                        self.key_start = pi;
                        state = HeaderState::Key;
                    }
                }

                HeaderState::CrLfCr => {
                    if ch != LF {
                        return Err(ParseError::InvalidHeader);
                    }
                    done = true;
                }
            }

            pi += 1;
            if done {
                break;
            }
        }

        if !done {
            ring.consume_to(pi);
            self.header_state = state;
            return Ok(ParseStatus::Again);
        }

        ring.consume_to(pi);
        self.header_state = HeaderState::Start;
        Ok(ParseStatus::Complete)
    }

    fn current_header(&self) -> HeaderSpan {
        HeaderSpan {
            key_start: self.key_start,
            key_end: self.key_end,
            value_start: self.value_start,
            value_end: self.value_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(ring: &mut RingBuf, mut data: &[u8]) {
        while !data.is_empty() {
            let span = ring.writable();
            let n = span.len().min(data.len());
            assert!(n > 0, "ring full");
            span[..n].copy_from_slice(&data[..n]);
            ring.commit(n);
            data = &data[n..];
        }
    }

    #[test]
    fn parses_basic_request_line() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        feed(&mut ring, b"GET /some/path HTTP/1.1\r\n");

        let status = parser.parse_request_line(&mut ring).unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(parser.method, Method::Get);
        assert_eq!(
            ring.copy_range(parser.uri_start, parser.uri_end),
            b"/some/path"
        );
        assert_eq!(parser.http_major, 1);
        assert_eq!(parser.http_minor, 1);
        assert_eq!(ring.pos(), 25);
    }

    #[test]
    fn resumes_across_arbitrary_splits() {
        let request = b"POST /x HTTP/1.0\r\n";
        for split in 1..request.len() - 1 {
            let mut ring = RingBuf::new();
            let mut parser = Parser::default();

            feed(&mut ring, &request[..split]);
            assert_eq!(
                parser.parse_request_line(&mut ring).unwrap(),
                ParseStatus::Again
            );

            feed(&mut ring, &request[split..]);
            assert_eq!(
                parser.parse_request_line(&mut ring).unwrap(),
                ParseStatus::Complete
            );
            assert_eq!(parser.method, Method::Post);
            assert_eq!(parser.http_minor, 0);
        }
    }

    #[test]
    fn rejects_lowercase_method() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        feed(&mut ring, b"get / HTTP/1.1\r\n");
        assert_eq!(
            parser.parse_request_line(&mut ring),
            Err(ParseError::InvalidMethod)
        );
    }

    #[test]
    fn unrecognized_method_is_unknown() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        feed(&mut ring, b"DELETE /x HTTP/1.1\r\n");
        assert_eq!(
            parser.parse_request_line(&mut ring).unwrap(),
            ParseStatus::Complete
        );
        assert_eq!(parser.method, Method::Unknown);
    }

    #[test]
    fn zero_new_bytes_stays_again() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        feed(&mut ring, b"GET /inco");

        for _ in 0..3 {
            assert_eq!(
                parser.parse_request_line(&mut ring).unwrap(),
                ParseStatus::Again
            );
            assert_eq!(ring.pos(), 9);
        }
    }

    #[test]
    fn parses_headers_including_bare_lf_lines() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        let mut headers = VecDeque::new();
        feed(&mut ring, b"Host: example\nConnection: keep-alive\r\n\r\n");

        let status = parser.parse_headers(&mut ring, &mut headers).unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(headers.len(), 2);

        let h = &headers[0];
        assert_eq!(ring.copy_range(h.key_start, h.key_end), b"Host");
        assert_eq!(ring.copy_range(h.value_start, h.value_end), b"example");

        let h = &headers[1];
        assert_eq!(ring.copy_range(h.key_start, h.key_end), b"Connection");
        assert_eq!(ring.copy_range(h.value_start, h.value_end), b"keep-alive");
    }

    #[test]
    fn header_block_alone_terminates() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        let mut headers = VecDeque::new();
        feed(&mut ring, b"\r\n");

        assert_eq!(
            parser.parse_headers(&mut ring, &mut headers).unwrap(),
            ParseStatus::Complete
        );
        assert!(headers.is_empty());
    }

    #[test]
    fn rejects_garbage_after_header_cr() {
        let mut ring = RingBuf::new();
        let mut parser = Parser::default();
        let mut headers = VecDeque::new();
        feed(&mut ring, b"Key: value\rX");

        assert_eq!(
            parser.parse_headers(&mut ring, &mut headers),
            Err(ParseError::InvalidHeader)
        );
    }
}
