// src/response.rs
use std::fs::File;
use std::io;

use chrono::{Local, TimeZone};
use libc::c_int;
use memmap2::Mmap;

use crate::syscalls;
use crate::timer::TIMEOUT_DEFAULT;

pub const SERVER_NAME: &str = "etude";

/// RFC 1123 date layout used for `Last-Modified` and `If-Modified-Since`.
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// URIs at or past this length are rejected before any resolution work.
const MAX_URI_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotModified,
    Forbidden,
    NotFound,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotModified => 304,
            Status::Forbidden => 403,
            Status::NotFound => 404,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotModified => "Not Modified",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
        }
    }
}

/// Per-request response state, populated by the header handlers and
/// consumed by the sender. Lives for exactly one request cycle.
#[derive(Debug)]
pub struct ResponseMeta {
    pub status: Status,
    pub mtime: i64,
    pub keep_alive: bool,
    pub modified: bool,
}

impl ResponseMeta {
    pub fn new() -> Self {
        Self {
            status: Status::Ok,
            mtime: 0,
            keep_alive: false,
            modified: true,
        }
    }
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self::new()
    }
}

const MIME: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".pdf", "application/pdf"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".css", "text/css"),
];

/// Content type from the last `.` of the path; `text/plain` when in doubt.
fn mime_type(filename: &str) -> &'static str {
    if let Some(dot) = filename.rfind('.') {
        let ext = &filename[dot..];
        for &(suffix, value) in MIME {
            if suffix == ext {
                return value;
            }
        }
    }
    "text/plain"
}

pub fn format_http_date(epoch_secs: i64) -> Option<String> {
    Local
        .timestamp_opt(epoch_secs, 0)
        .single()
        .map(|dt| dt.format(HTTP_DATE_FORMAT).to_string())
}

/// Map a request URI to a path under the web root.
///
/// Oversized or non-UTF-8 URIs resolve to nothing (the caller answers 404).
/// Query strings are dropped, directory URIs get `index.html` appended, and
/// an extensionless final component is treated as a directory.
pub fn resolve_uri(web_root: &str, uri: &[u8]) -> Option<String> {
    if uri.len() >= MAX_URI_LEN {
        return None;
    }
    let uri = std::str::from_utf8(uri).ok()?;

    let path = match uri.find('?') {
        Some(q) => &uri[..q],
        None => uri,
    };

    let mut filename = format!("{}{}", web_root, path);

    let last_comp = filename.rsplit('/').next().unwrap_or("");
    if !last_comp.contains('.') && !filename.ends_with('/') {
        filename.push('/');
    }
    if filename.ends_with('/') {
        filename.push_str("index.html");
    }

    Some(filename)
}

/// Write all of `buf`, retrying short writes. EINTR is resumable; every
/// other error (EAGAIN included) aborts the response.
pub fn write_fully(fd: c_int, buf: &[u8]) -> io::Result<()> {
    let mut off = 0;
    while off < buf.len() {
        match syscalls::write(fd, &buf[off..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Send the response headers and, unless the file is unmodified, the
/// memory-mapped body. The mapping lives only for the duration of the send.
pub fn serve_static(fd: c_int, filename: &str, filesize: u64, out: &ResponseMeta) -> io::Result<()> {
    let mut header = format!(
        "HTTP/1.1 {} {}\r\n",
        out.status.code(),
        out.status.reason()
    );

    if out.keep_alive {
        header.push_str("Connection: keep-alive\r\n");
        header.push_str(&format!("Keep-Alive: timeout={}\r\n", TIMEOUT_DEFAULT));
    }

    if out.modified {
        header.push_str(&format!("Content-type: {}\r\n", mime_type(filename)));
        header.push_str(&format!("Content-length: {}\r\n", filesize));
        if let Some(date) = format_http_date(out.mtime) {
            header.push_str(&format!("Last-Modified: {}\r\n", date));
        }
    }

    header.push_str(&format!("Server: {}\r\n\r\n", SERVER_NAME));
    write_fully(fd, header.as_bytes())?;

    if !out.modified || filesize == 0 {
        return Ok(());
    }

    let file = File::open(filename)?;
    let map = unsafe { Mmap::map(&file)? };
    write_fully(fd, &map)
}

/// Synchronous HTTP error response with a minimal HTML body.
pub fn send_error(fd: c_int, cause: &str, status: Status, longmsg: &str) -> io::Result<()> {
    let body = format!(
        "<html><title>Server Error</title><body>\n{} {}\n<p>{}: {}\n</p><hr><em>{}</em>\n</body></html>",
        status.code(),
        status.reason(),
        longmsg,
        cause,
        SERVER_NAME
    );
    let header = format!(
        "HTTP/1.1 {} {}\r\nServer: {}\r\nContent-type: text/html\r\nConnection: close\r\nContent-length: {}\r\n\r\n",
        status.code(),
        status.reason(),
        SERVER_NAME,
        body.len()
    );

    write_fully(fd, header.as_bytes())?;
    write_fully(fd, body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_table_lookup() {
        assert_eq!(mime_type("/www/a.css"), "text/css");
        assert_eq!(mime_type("/www/index.html"), "text/html");
        assert_eq!(mime_type("/www/img.jpg"), "image/jpeg");
        assert_eq!(mime_type("/www/noext"), "text/plain");
        assert_eq!(mime_type("/www/archive.zip"), "text/plain");
    }

    #[test]
    fn root_uri_resolves_to_index() {
        assert_eq!(
            resolve_uri("./www", b"/").as_deref(),
            Some("./www/index.html")
        );
    }

    #[test]
    fn file_uri_passes_through() {
        assert_eq!(
            resolve_uri("./www", b"/a.css").as_deref(),
            Some("./www/a.css")
        );
    }

    #[test]
    fn extensionless_uri_is_a_directory() {
        assert_eq!(
            resolve_uri("./www", b"/docs").as_deref(),
            Some("./www/docs/index.html")
        );
    }

    #[test]
    fn query_string_is_stripped() {
        assert_eq!(
            resolve_uri("./www", b"/a.css?v=3").as_deref(),
            Some("./www/a.css")
        );
    }

    #[test]
    fn uri_length_boundary() {
        let mut uri = vec![b'/'];
        uri.extend(std::iter::repeat(b'a').take(254));
        assert_eq!(uri.len(), 255);
        assert!(resolve_uri("./www", &uri).is_some());

        uri.push(b'a');
        assert_eq!(uri.len(), 256);
        assert!(resolve_uri("./www", &uri).is_none());
    }

    #[test]
    fn non_utf8_uri_is_rejected() {
        assert!(resolve_uri("./www", &[b'/', 0xff, 0xfe]).is_none());
    }
}
