// src/conn.rs
use std::collections::VecDeque;
use std::os::unix::fs::MetadataExt;

use libc::c_int;
use tracing::{debug, error, info};

use crate::headers::{self, HeaderSpan};
use crate::parser::{ParseStatus, Parser};
use crate::response::{self, ResponseMeta, Status};
use crate::ring::{RingBuf, MAX_BUF};
use crate::syscalls;
use crate::timer::TimerHandle;

/// Verdict of one driver run. The reactor applies it: re-arm the one-shot
/// registration plus a fresh idle timer, or tear the connection down.
#[derive(Debug)]
pub enum Drive {
    Rearm,
    Close,
}

/// One client connection: the socket, its read ring, the resumable parser,
/// and the queue of headers parsed but not yet dispatched.
pub struct Conn {
    /// Client socket, or the free-list next index while the slot is vacant.
    pub fd: c_int,
    pub active: bool,
    ring: RingBuf,
    parser: Parser,
    headers: VecDeque<HeaderSpan>,
    /// `ring.pos()` at the start of the current request cycle. The bytes
    /// from here to `last` carry every mark the parser holds, so a single
    /// request's head section must stay under `MAX_BUF`.
    request_origin: usize,
    pub timer: Option<TimerHandle>,
}

impl Conn {
    /// A vacant slot, linked into the slab free list.
    pub fn vacant(next_free: c_int) -> Self {
        Self {
            fd: next_free,
            active: false,
            ring: RingBuf::new(),
            parser: Parser::default(),
            headers: VecDeque::new(),
            request_origin: 0,
            timer: None,
        }
    }

    /// Take over the slot for a freshly accepted socket.
    pub fn open(&mut self, fd: c_int) {
        self.fd = fd;
        self.active = true;
        self.ring.reset();
        self.parser.reset();
        self.headers.clear();
        self.request_origin = 0;
        self.timer = None;
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Service one readiness notification: drain the socket, feeding the
    /// parsers and answering every complete request, until read would block.
    pub fn drive(&mut self, web_root: &str) -> Drive {
        let fd = self.fd;
        loop {
            let span = self.ring.writable();
            let n = match syscalls::read(fd, span) {
                Ok(0) => {
                    debug!(fd, "peer closed connection");
                    return Drive::Close;
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(fd, error = %e, "read failed");
                    return Drive::Close;
                }
            };
            self.ring.commit(n);
            // The marks the parser holds all point at bytes of the current
            // request; a head section that can't fit in the ring would start
            // overwriting them.
            assert!(
                self.ring.last() - self.request_origin < MAX_BUF,
                "request buffer overflow"
            );

            match self.parser.parse_request_line(&mut self.ring) {
                Ok(ParseStatus::Complete) => {}
                Ok(ParseStatus::Again) => continue,
                Err(e) => {
                    error!(fd, error = %e, "bad request line");
                    return Drive::Close;
                }
            }

            match self.parser.parse_headers(&mut self.ring, &mut self.headers) {
                Ok(ParseStatus::Complete) => {}
                Ok(ParseStatus::Again) => continue,
                Err(e) => {
                    error!(fd, error = %e, "bad header");
                    return Drive::Close;
                }
            }

            if !self.respond(web_root) {
                return Drive::Close;
            }
        }
        Drive::Rearm
    }

    /// Answer the request just parsed. Returns false when the connection
    /// must close (write failure or no keep-alive).
    fn respond(&mut self, web_root: &str) -> bool {
        let fd = self.fd;
        let uri = self.ring.copy_range(self.parser.uri_start, self.parser.uri_end);

        let filename = match response::resolve_uri(web_root, &uri) {
            Some(f) => f,
            None => {
                let shown = String::from_utf8_lossy(&uri).into_owned();
                error!(fd, uri = %shown, "unresolvable uri");
                let sent =
                    response::send_error(fd, &shown, Status::NotFound, "Can't find the file");
                self.finish_cycle();
                return sent.is_ok();
            }
        };

        let meta = match std::fs::metadata(&filename) {
            Ok(m) => m,
            Err(_) => {
                let sent =
                    response::send_error(fd, &filename, Status::NotFound, "Can't find the file");
                self.finish_cycle();
                return sent.is_ok();
            }
        };

        if !meta.is_file() || meta.mode() & 0o400 == 0 {
            let sent =
                response::send_error(fd, &filename, Status::Forbidden, "Can't read the file");
            self.finish_cycle();
            return sent.is_ok();
        }

        let mut out = ResponseMeta::new();
        out.mtime = meta.mtime();

        headers::dispatch(&mut self.headers, &self.ring, &mut out);
        assert!(
            self.headers.is_empty(),
            "header queue must drain before the response"
        );

        if let Err(e) = response::serve_static(fd, &filename, meta.len(), &out) {
            error!(fd, error = %e, "response write failed");
            return false;
        }
        info!(
            fd,
            status = out.status.code(),
            file = %filename,
            keep_alive = out.keep_alive,
            "request served"
        );

        if !out.keep_alive {
            debug!(fd, "no keep-alive, closing after response");
            return false;
        }
        self.finish_cycle();
        true
    }

    /// Begin the next request cycle on a surviving connection. Pipelined
    /// bytes already buffered stay in place; only the parse bookkeeping
    /// starts over.
    fn finish_cycle(&mut self) {
        self.parser.reset();
        self.headers.clear();
        self.request_origin = self.ring.pos();
    }
}
