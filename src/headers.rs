// src/headers.rs
use std::collections::VecDeque;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::response::{ResponseMeta, Status, HTTP_DATE_FORMAT};
use crate::ring::RingBuf;

/// One parsed header: key/value byte ranges into the connection's ring.
/// Spans are only meaningful until the request cycle is reset.
#[derive(Debug, Clone, Copy)]
pub struct HeaderSpan {
    pub key_start: usize,
    pub key_end: usize,
    pub value_start: usize,
    pub value_end: usize,
}

type HeaderHandler = fn(&mut ResponseMeta, &[u8]);

fn ignore(_out: &mut ResponseMeta, _value: &[u8]) {}

fn connection(out: &mut ResponseMeta, value: &[u8]) {
    if value.eq_ignore_ascii_case(b"keep-alive") {
        out.keep_alive = true;
    }
}

/// `If-Modified-Since: <RFC 1123 date>`, compared against the file mtime
/// on whole seconds. Unparseable or ambiguous dates are treated as absent.
fn if_modified_since(out: &mut ResponseMeta, value: &[u8]) {
    let text = match std::str::from_utf8(value) {
        Ok(t) => t,
        Err(_) => return,
    };
    let naive = match NaiveDateTime::parse_from_str(text, HTTP_DATE_FORMAT) {
        Ok(t) => t,
        Err(_) => return,
    };
    if let Some(client_time) = Local.from_local_datetime(&naive).single() {
        if client_time.timestamp() == out.mtime {
            out.modified = false;
            out.status = Status::NotModified;
        }
    }
}

/// Dispatch table; names match ASCII case-insensitively, headers without an
/// entry are ignored.
const HANDLERS: &[(&str, HeaderHandler)] = &[
    ("Host", ignore),
    ("Connection", connection),
    ("If-Modified-Since", if_modified_since),
];

/// Run every queued header through its handler, draining the queue in
/// insertion order. The queue is empty when this returns.
pub fn dispatch(headers: &mut VecDeque<HeaderSpan>, ring: &RingBuf, out: &mut ResponseMeta) {
    while let Some(h) = headers.pop_front() {
        let key = ring.copy_range(h.key_start, h.key_end);
        let value = ring.copy_range(h.value_start, h.value_end);
        for &(name, handler) in HANDLERS {
            if key.eq_ignore_ascii_case(name.as_bytes()) {
                handler(out, &value);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseStatus, Parser};
    use crate::response::format_http_date;

    fn parse_block(block: &[u8]) -> (RingBuf, VecDeque<HeaderSpan>) {
        let mut ring = RingBuf::new();
        let span = ring.writable();
        span[..block.len()].copy_from_slice(block);
        ring.commit(block.len());

        let mut parser = Parser::default();
        let mut headers = VecDeque::new();
        assert_eq!(
            parser.parse_headers(&mut ring, &mut headers).unwrap(),
            ParseStatus::Complete
        );
        (ring, headers)
    }

    #[test]
    fn keep_alive_matches_case_insensitively() {
        let (ring, mut headers) = parse_block(b"Connection: KEEP-Alive\r\n\r\n");
        let mut out = ResponseMeta::new();
        dispatch(&mut headers, &ring, &mut out);
        assert!(out.keep_alive);
        assert!(headers.is_empty());
    }

    #[test]
    fn other_connection_values_do_not_enable_keep_alive() {
        let (ring, mut headers) = parse_block(b"Connection: close\r\n\r\n");
        let mut out = ResponseMeta::new();
        dispatch(&mut headers, &ring, &mut out);
        assert!(!out.keep_alive);
    }

    #[test]
    fn if_modified_since_equal_mtime_turns_304() {
        let mtime = 1_700_000_000;
        let date = format_http_date(mtime).unwrap();
        let block = format!("If-Modified-Since: {}\r\n\r\n", date);
        let (ring, mut headers) = parse_block(block.as_bytes());

        let mut out = ResponseMeta::new();
        out.mtime = mtime;
        dispatch(&mut headers, &ring, &mut out);
        assert!(!out.modified);
        assert_eq!(out.status, Status::NotModified);
    }

    #[test]
    fn if_modified_since_one_second_earlier_stays_200() {
        let mtime = 1_700_000_000;
        let date = format_http_date(mtime - 1).unwrap();
        let block = format!("If-Modified-Since: {}\r\n\r\n", date);
        let (ring, mut headers) = parse_block(block.as_bytes());

        let mut out = ResponseMeta::new();
        out.mtime = mtime;
        dispatch(&mut headers, &ring, &mut out);
        assert!(out.modified);
        assert_eq!(out.status, Status::Ok);
    }

    #[test]
    fn unparseable_dates_are_ignored() {
        let (ring, mut headers) = parse_block(b"If-Modified-Since: yesterday-ish\r\n\r\n");
        let mut out = ResponseMeta::new();
        out.mtime = 1_700_000_000;
        dispatch(&mut headers, &ring, &mut out);
        assert!(out.modified);
    }

    #[test]
    fn unknown_headers_are_drained_and_ignored() {
        let (ring, mut headers) =
            parse_block(b"Host: example.com\r\nX-Custom: anything\r\n\r\n");
        let mut out = ResponseMeta::new();
        dispatch(&mut headers, &ring, &mut out);
        assert!(headers.is_empty());
        assert!(out.modified);
        assert!(!out.keep_alive);
        assert_eq!(out.status, Status::Ok);
    }
}
