//! The client link.
//!
//! Everything between the TCP socket and the session (capability exchange,
//! PDU encoding, compression of the wire format) lives behind
//! [`ClientLink`]. The session only hands it [`Order`]s and takes decoded
//! [`InputEvent`]s back.
//!
//! [`LineClient`] is a plain-text link: one command per input line, one
//! order summary per output line. The server binary uses it so a session
//! can be driven with `nc`.

use log::{debug, warn};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use crate::cache::CacheConfig;
use crate::error::{Result, SessionError};
use crate::orders::{Order, UpdateSink};
use crate::region::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Mouse { flags: u16, x: i32, y: i32 },
    Key { flags: u16, scan_code: u8 },
    Sync { flags: u32 },
    /// The client finished processing every update up to `frame_id`.
    FrameAck { frame_id: u32 },
    Refresh(Rect),
    Quit,
}

pub trait ClientLink: UpdateSink + Send {
    /// Readable when [`poll_input`](Self::poll_input) has something to do.
    fn wait_fd(&self) -> BorrowedFd<'_>;

    /// Reads what is available and returns the decoded events.
    fn poll_input(&mut self) -> Result<Vec<InputEvent>>;

    /// Cache sizes from the client's capabilities, if it sent any.
    fn cache_config(&self) -> Option<CacheConfig> {
        None
    }

    /// Bitmap keys the client kept from earlier sessions.
    fn persistent_keys(&self) -> Vec<u64> {
        Vec::new()
    }
}

impl UpdateSink for Box<dyn ClientLink> {
    fn send(&mut self, order: Order) -> Result<()> {
        (**self).send(order)
    }
}

const READ_CHUNK: usize = 4096;
const MAX_LINE: usize = 1024;

pub struct LineClient<S> {
    stream: S,
    pending: Vec<u8>,
}

impl<S: Read + Write + AsFd + Send> LineClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    fn parse_line(line: &str) -> Option<InputEvent> {
        let mut words = line.split_whitespace();
        let command = words.next()?;
        let args: Vec<i64> = words.map(parse_number).collect::<Option<_>>()?;
        let event = match (command, args.as_slice()) {
            ("mouse", &[flags, x, y]) => InputEvent::Mouse {
                flags: u16::try_from(flags).ok()?,
                x: i32::try_from(x).ok()?,
                y: i32::try_from(y).ok()?,
            },
            ("key", &[flags, scan_code]) => InputEvent::Key {
                flags: u16::try_from(flags).ok()?,
                scan_code: u8::try_from(scan_code).ok()?,
            },
            ("sync", &[flags]) => InputEvent::Sync {
                flags: u32::try_from(flags).ok()?,
            },
            ("ack", &[frame_id]) => InputEvent::FrameAck {
                frame_id: u32::try_from(frame_id).ok()?,
            },
            ("refresh", &[x, y, w, h]) => InputEvent::Refresh(Rect::from_xywh(
                i32::try_from(x).ok()?,
                i32::try_from(y).ok()?,
                i32::try_from(w).ok()?,
                i32::try_from(h).ok()?,
            )),
            ("quit", &[]) => InputEvent::Quit,
            _ => return None,
        };
        Some(event)
    }
}

fn parse_number(word: &str) -> Option<i64> {
    match word.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => word.parse().ok(),
    }
}

impl<S: Read + Write + AsFd + Send> UpdateSink for LineClient<S> {
    fn send(&mut self, order: Order) -> Result<()> {
        writeln!(self.stream, "{}", order.summary()).map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => SessionError::ClientClosed,
            _ => SessionError::Client(e),
        })
    }
}

impl<S: Read + Write + AsFd + Send> ClientLink for LineClient<S> {
    fn wait_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    fn poll_input(&mut self) -> Result<Vec<InputEvent>> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.stream.read(&mut chunk) {
            Ok(0) => return Err(SessionError::ClientClosed),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return Ok(Vec::new())
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Err(SessionError::ClientClosed),
            Err(e) => return Err(SessionError::Client(e)),
        };
        self.pending.extend_from_slice(&chunk[..n]);

        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match Self::parse_line(text) {
                Some(event) => events.push(event),
                None => warn!("ignoring client line {:?}", text),
            }
        }
        if self.pending.len() > MAX_LINE {
            warn!("discarding {} bytes of unterminated client input", self.pending.len());
            self.pending.clear();
        }
        debug!("client sent {} events", events.len());
        Ok(events)
    }
}
