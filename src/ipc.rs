//! Session-manager message framing.
//!
//! Every frame is an 8-byte header, message type then payload length (both
//! u32 little-endian), followed by the payload. Strings inside payloads are
//! length-prefixed UTF-8.

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Cursor, Read};

use crate::error::IpcError;

pub const HEADER_LEN: usize = 8;
pub const MAX_FRAME_LEN: usize = 1 << 20;

pub const MSG_HEARTBEAT: u32 = 1;
pub const MSG_LOGOFF: u32 = 2;
pub const MSG_SET_PARAM: u32 = 3;
pub const MSG_SESSION_CHANGE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    Heartbeat,
    Logoff,
    SetParam { name: String, value: String },
    SessionChange { kind: u32, param: u32 },
}

impl IpcMessage {
    pub fn msg_type(&self) -> u32 {
        match self {
            IpcMessage::Heartbeat => MSG_HEARTBEAT,
            IpcMessage::Logoff => MSG_LOGOFF,
            IpcMessage::SetParam { .. } => MSG_SET_PARAM,
            IpcMessage::SessionChange { .. } => MSG_SESSION_CHANGE,
        }
    }

    /// Serializes the message into one frame.
    ///
    /// # Returns
    ///
    /// The header and payload, or [`IpcError::FrameTooLarge`] when the
    /// payload would exceed [`MAX_FRAME_LEN`] and the peer would refuse it.
    pub fn encode(&self) -> Result<Bytes, IpcError> {
        let mut payload = BytesMut::new();
        match self {
            IpcMessage::Heartbeat | IpcMessage::Logoff => {}
            IpcMessage::SetParam { name, value } => {
                put_string(&mut payload, name)?;
                put_string(&mut payload, value)?;
            }
            IpcMessage::SessionChange { kind, param } => {
                payload.put_u32_le(*kind);
                payload.put_u32_le(*param);
            }
        }
        if payload.len() > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge(payload.len()));
        }
        let len = u32::try_from(payload.len()).map_err(|_| IpcError::FrameTooLarge(payload.len()))?;
        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u32_le(self.msg_type());
        frame.put_u32_le(len);
        frame.extend_from_slice(&payload);
        Ok(frame.freeze())
    }

    fn decode(msg_type: u32, payload: &[u8]) -> Result<Self, IpcError> {
        let mut cursor = Cursor::new(payload);
        match msg_type {
            MSG_HEARTBEAT => Ok(IpcMessage::Heartbeat),
            MSG_LOGOFF => Ok(IpcMessage::Logoff),
            MSG_SET_PARAM => Ok(IpcMessage::SetParam {
                name: read_string(&mut cursor)?,
                value: read_string(&mut cursor)?,
            }),
            MSG_SESSION_CHANGE => {
                let kind = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| IpcError::Truncated("session change"))?;
                let param = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| IpcError::Truncated("session change"))?;
                Ok(IpcMessage::SessionChange { kind, param })
            }
            other => Err(IpcError::UnknownType(other)),
        }
    }
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), IpcError> {
    if s.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(s.len()));
    }
    let len = u32::try_from(s.len()).map_err(|_| IpcError::FrameTooLarge(s.len()))?;
    buf.put_u32_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, IpcError> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| IpcError::Truncated("string length"))? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(IpcError::Truncated("string"));
    }
    let mut raw = vec![0u8; len];
    cursor
        .read_exact(&mut raw)
        .map_err(|_| IpcError::Truncated("string"))?;
    String::from_utf8(raw).map_err(|_| IpcError::InvalidString)
}

/// Reassembles frames from reads of arbitrary size.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete message, or `None` until more bytes arrive.
    pub fn next_message(&mut self) -> Result<Option<IpcMessage>, IpcError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &self.buf[..HEADER_LEN];
        let msg_type = header.get_u32_le();
        let len = header.get_u32_le() as usize;
        if len > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge(len));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len);
        IpcMessage::decode(msg_type, &payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_reads_are_reassembled() {
        let frame = IpcMessage::SetParam {
            name: "username".into(),
            value: "alice".into(),
        }
        .encode()
        .unwrap();
        let mut decoder = MessageDecoder::new();
        decoder.push(&frame[..3]);
        assert_eq!(decoder.next_message(), Ok(None));
        decoder.push(&frame[3..11]);
        assert_eq!(decoder.next_message(), Ok(None));
        decoder.push(&frame[11..]);
        decoder.push(&IpcMessage::Logoff.encode().unwrap());

        assert_eq!(
            decoder.next_message(),
            Ok(Some(IpcMessage::SetParam {
                name: "username".into(),
                value: "alice".into()
            }))
        );
        assert_eq!(decoder.next_message(), Ok(Some(IpcMessage::Logoff)));
        assert_eq!(decoder.next_message(), Ok(None));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut decoder = MessageDecoder::new();
        let mut frame = BytesMut::new();
        frame.put_u32_le(99);
        frame.put_u32_le(0);
        decoder.push(&frame);
        assert_eq!(decoder.next_message(), Err(IpcError::UnknownType(99)));

        let mut frame = BytesMut::new();
        frame.put_u32_le(MSG_SET_PARAM);
        frame.put_u32_le(4);
        frame.put_u32_le(50);
        decoder.push(&frame);
        assert!(matches!(decoder.next_message(), Err(IpcError::Truncated(_))));

        let mut frame = BytesMut::new();
        frame.put_u32_le(MSG_HEARTBEAT);
        frame.put_u32_le(u32::MAX);
        decoder.push(&frame);
        assert!(matches!(decoder.next_message(), Err(IpcError::FrameTooLarge(_))));
    }

    #[test]
    fn oversized_messages_are_not_encoded() {
        let huge = IpcMessage::SetParam {
            name: "blob".into(),
            value: "x".repeat(MAX_FRAME_LEN),
        };
        assert!(matches!(huge.encode(), Err(IpcError::FrameTooLarge(_))));

        // the limit covers the payload, not the header
        let fits = IpcMessage::SetParam {
            name: String::new(),
            value: "x".repeat(MAX_FRAME_LEN - 8),
        };
        let frame = fits.encode().unwrap();
        assert_eq!(frame.len(), HEADER_LEN + MAX_FRAME_LEN);
        let mut decoder = MessageDecoder::new();
        decoder.push(&frame);
        assert_eq!(decoder.next_message(), Ok(Some(fits)));
    }
}
