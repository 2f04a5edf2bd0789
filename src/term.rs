//! Process-wide termination event.
//!
//! Set once, never cleared. Session loops wait on its descriptor next to
//! their other wait objects; the async listener subscribes to a broadcast.

use log::info;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    /// Becomes readable once set. Nothing drains it, so it stays readable.
    reader: UnixStream,
    writer: UnixStream,
    notify: broadcast::Sender<()>,
}

#[derive(Debug, Clone)]
pub struct TermEvent {
    inner: Arc<Inner>,
}

impl TermEvent {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        let (notify, _) = broadcast::channel(4);
        Ok(Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                reader,
                writer,
                notify,
            }),
        })
    }

    pub fn set(&self) {
        if self.inner.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("termination requested");
        // The flag is authoritative; the byte only wakes pollers.
        let _ = (&self.inner.writer).write(&[1]);
        let _ = self.inner.notify.send(());
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Subscribe before checking [`is_set`](Self::is_set) so a concurrent
    /// `set` is never missed.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.notify.subscribe()
    }
}

impl AsFd for TermEvent {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.reader.as_fd()
    }
}
