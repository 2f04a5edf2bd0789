//! Named-pipe transport to the session manager.
//!
//! A pipe named `FreeRDS_<session>_<endpoint>` is backed by a Unix domain
//! socket file inside the pipe directory.

use log::{debug, info, warn};
use std::fs;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Default directory holding the pipe socket files.
pub const PIPE_DIR: &str = "/tmp/.pipe";

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

const CONNECT_RETRY: Duration = Duration::from_millis(20);

pub fn pipe_name(session_id: u32, endpoint: &str) -> String {
    format!("FreeRDS_{}_{}", session_id, endpoint)
}

pub fn pipe_path(dir: &Path, session_id: u32, endpoint: &str) -> PathBuf {
    dir.join(pipe_name(session_id, endpoint))
}

/// Removes the socket file of the pipe if it exists. Returns whether a file
/// was removed.
pub fn clean(dir: &Path, session_id: u32, endpoint: &str) -> bool {
    let path = pipe_path(dir, session_id, endpoint);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!("removed pipe file {}", path.display());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("failed to remove pipe file {}: {}", path.display(), e);
            false
        }
    }
}

/// Reads whatever is available, at least one byte. A zero-byte read means
/// the peer closed the pipe.
pub fn read_available<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize, TransportError> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        match reader.read(buf) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes the whole buffer, retrying partial and interrupted writes.
pub fn write_fully<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<(), TransportError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(TransportError::ShortIo {
                    written,
                    expected: buf.len(),
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) if written > 0 => {
                warn!("pipe write failed after {} of {} bytes: {}", written, buf.len(), e);
                return Err(TransportError::ShortIo {
                    written,
                    expected: buf.len(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct NamedPipe {
    stream: UnixStream,
    name: String,
}

impl NamedPipe {
    /// Connects to the pipe, waiting up to `timeout` for it to appear.
    ///
    /// A socket file that refuses the first attempt is left over from an
    /// earlier session manager; it is removed and the wait continues for
    /// a new one. A live endpoint is connected exactly once.
    ///
    /// # Returns
    ///
    /// The connected pipe, `ConnectTimeout` when no session manager
    /// listened in time, or `ConnectFailed` for any other connect error.
    pub fn connect(
        dir: &Path,
        session_id: u32,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let name = pipe_name(session_id, endpoint);
        let path = dir.join(&name);
        let deadline = Instant::now() + timeout;
        let mut first_attempt = true;
        loop {
            match UnixStream::connect(&path) {
                Ok(stream) => {
                    info!("connected to pipe {}", path.display());
                    return Ok(Self { stream, name });
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    // later refusals may come from a manager that has bound
                    // but not yet listened, so only the first one is stale
                    if first_attempt && e.kind() == io::ErrorKind::ConnectionRefused {
                        info!("removing stale pipe file {}", path.display());
                        clean(dir, session_id, endpoint);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::ConnectTimeout {
                            name,
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    thread::sleep(CONNECT_RETRY.min(deadline - now));
                }
                Err(source) => return Err(TransportError::ConnectFailed { name, source }),
            }
            first_attempt = false;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        read_available(&mut self.stream, buf)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        write_fully(&mut self.stream, buf)
    }
}

impl AsFd for NamedPipe {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    /// Accepts at most `chunk` bytes per call and fails after `fail_after`
    /// bytes when set.
    struct Choppy {
        out: Vec<u8>,
        chunk: usize,
        fail_after: Option<usize>,
    }

    impl Write for Choppy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.fail_after {
                if self.out.len() >= limit {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
                }
            }
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_writes_complete() {
        let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        let mut w = Choppy { out: Vec::new(), chunk: 7, fail_after: None };
        write_fully(&mut w, &data).unwrap();
        assert_eq!(w.out, data);
    }

    #[test]
    fn failing_write_reports_failure() {
        let mut w = Choppy { out: Vec::new(), chunk: 100, fail_after: Some(300) };
        let err = write_fully(&mut w, &[0u8; 1000]).unwrap_err();
        assert!(matches!(err, TransportError::ShortIo { written: 300, expected: 1000 }));

        let mut w = Choppy { out: Vec::new(), chunk: 100, fail_after: Some(0) };
        assert!(matches!(write_fully(&mut w, &[0u8; 10]), Err(TransportError::Io(_))));
    }

    #[test]
    fn zero_byte_read_is_a_closed_pipe() {
        let mut empty: &[u8] = &[];
        assert!(matches!(read_available(&mut empty, &mut [0u8; 8]), Err(TransportError::Closed)));

        let mut some: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 8];
        assert_eq!(read_available(&mut some, &mut buf).unwrap(), 3);
    }

    #[test]
    fn clean_reports_whether_a_file_was_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FreeRDS_5_rdp");
        fs::write(&path, b"").unwrap();

        assert!(clean(dir.path(), 5, "rdp"));
        assert!(!path.exists());
        assert!(!clean(dir.path(), 5, "rdp"));
    }

    #[test]
    fn live_manager_sees_exactly_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let listener = UnixListener::bind(pipe_path(dir.path(), 2, "rdp")).unwrap();
        listener.set_nonblocking(true).unwrap();

        let _pipe = NamedPipe::connect(dir.path(), 2, "rdp", Duration::from_secs(1)).unwrap();
        assert!(listener.accept().is_ok());
        let second = listener.accept().unwrap_err();
        assert_eq!(second.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn stale_socket_file_is_replaced_by_a_new_manager() {
        let dir = tempfile::tempdir().unwrap();
        let path = pipe_path(dir.path(), 4, "rdp");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let server = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            // binding fails with AddrInUse unless the stale file is gone
            let listener = UnixListener::bind(&path).unwrap();
            listener.accept().unwrap();
        });
        NamedPipe::connect(dir.path(), 4, "rdp", Duration::from_secs(5)).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn connect_times_out_when_nobody_listens() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = NamedPipe::connect(dir.path(), 9, "rdp", Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout { timeout_ms: 60, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn connect_waits_for_a_late_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = pipe_path(dir.path(), 3, "rdp");
        let server = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let listener = UnixListener::bind(&path).unwrap();
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"hello").unwrap();
        });

        let mut pipe = NamedPipe::connect(dir.path(), 3, "rdp", Duration::from_secs(5)).unwrap();
        assert_eq!(pipe.name(), "FreeRDS_3_rdp");
        let mut buf = [0u8; 16];
        let n = pipe.read(&mut buf).unwrap();
        assert!(n >= 1 && n <= 5);
        server.join().unwrap();
    }
}
