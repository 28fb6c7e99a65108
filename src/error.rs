use std::io;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`KvsError`]
pub type Result<T> = std::result::Result<T, KvsError>;

/// The Error variants used by the server, the client and the job pipeline.
/// It wraps any lower level errors from the std library and third party crates.
#[derive(Error, Debug)]
pub enum KvsError {
    /// variant for errors caused from file or pipe IO
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// variant for errors returned by system calls made through `nix`
    #[error("system error: {0}")]
    Nix(#[from] nix::Error),

    /// variant for invalid command line arguments or job file commands
    #[error("parsing error: {0}")]
    Parsing(String),

    /// variant for malformed messages received on a pipe
    #[error("protocol error: {0}")]
    Protocol(String),

    /// the admission queue was closed while a request was being handed over
    #[error("the admission queue is closed")]
    QueueClosed,

    /// a generic error described by a string
    #[error("{0}")]
    StringErr(String),
}
