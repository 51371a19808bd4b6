use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Central error type for server bootstrap and the reactor loop.
///
/// Per-connection failures (peer resets, malformed requests) never surface
/// here; the driver handles them by closing the one connection involved.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("web root {0:?} is not a directory")]
    WebRoot(PathBuf),
}

pub type ServerResult<T> = Result<T, ServerError>;
