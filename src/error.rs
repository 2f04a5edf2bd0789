//! Error types shared across the session pipeline.
//!
//! Every error here is connection-scoped: a failure terminates the affected
//! session (or drops the affected connection) and never the whole server.

use std::io;
use thiserror::Error;

/// Errors raised by the named-pipe transport to the session manager.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer failed after part of a buffer was written. Partial writes
    /// themselves are retried until the buffer is complete.
    #[error("short I/O: {written} of {expected} bytes")]
    ShortIo { written: usize, expected: usize },

    #[error("timed out after {timeout_ms} ms waiting for pipe {name}")]
    ConnectTimeout { name: String, timeout_ms: u64 },

    #[error("failed to connect to pipe {name}: {source}")]
    ConnectFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("pipe closed by peer")]
    Closed,

    #[error("pipe I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Classification of worker-thread creation failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    #[error("invalid attributes for worker thread (EINVAL)")]
    InvalidArgument,
    #[error("not enough resources to start worker thread (EAGAIN)")]
    ResourceExhausted,
    #[error("invalid permissions for worker thread (EPERM)")]
    PermissionDenied,
    #[error("unknown error starting worker thread")]
    Unknown,
}

impl ThreadError {
    /// Maps the error returned by `std::thread::Builder::spawn` onto the
    /// pthread failure classes.
    pub fn classify(err: &io::Error) -> Self {
        use nix::errno::Errno;

        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EINVAL) => ThreadError::InvalidArgument,
            Some(Errno::EAGAIN) => ThreadError::ResourceExhausted,
            Some(Errno::EPERM) => ThreadError::PermissionDenied,
            _ => match err.kind() {
                io::ErrorKind::InvalidInput => ThreadError::InvalidArgument,
                io::ErrorKind::OutOfMemory | io::ErrorKind::WouldBlock => {
                    ThreadError::ResourceExhausted
                }
                io::ErrorKind::PermissionDenied => ThreadError::PermissionDenied,
                _ => ThreadError::Unknown,
            },
        }
    }
}

/// The only failure the cache engine reports.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },
}

/// Malformed frames on the session-manager channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcError {
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("unknown message type {0}")]
    UnknownType(u32),
    #[error("truncated {0} payload")]
    Truncated(&'static str),
    #[error("payload is not valid UTF-8")]
    InvalidString,
}

/// Errors that move a session into `Terminating`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("session manager: {0}")]
    Ipc(#[from] IpcError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error("module {name}: {message}")]
    Module { name: String, message: String },

    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error("client link: {0}")]
    Client(#[source] io::Error),

    #[error("client disconnected")]
    ClientClosed,

    #[error("invalid drawing request: {0}")]
    InvalidDraw(String),

    #[error("wait failed: {0}")]
    Wait(#[from] nix::errno::Errno),
}

impl SessionError {
    pub fn module(name: impl Into<String>, message: impl Into<String>) -> Self {
        SessionError::Module {
            name: name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
