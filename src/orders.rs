//! Drawing orders handed to the client link.
//!
//! These are the protocol-level updates the session produces. Encoding them
//! into client PDUs belongs to the client link; this module only decides
//! *what* is sent, including whether a cache entry travels with its content
//! or as a bare index.

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::warn;
use std::io::Write;

use crate::cache::{Bitmap, BrushPattern, FontChar, Palette, PointerItem};
use crate::error::Result;
use crate::region::Rect;

/// How a cached bitmap's pixels travel to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitmapPayload {
    Raw(Bitmap),
    /// zlib-compressed pixel rows plus the geometry needed to expand them.
    Zlib {
        width: u16,
        height: u16,
        bpp: u8,
        data: Bytes,
    },
}

impl BitmapPayload {
    /// Compresses `bitmap` unless compression is disabled. Falls back to the
    /// raw pixels if the encoder fails or does not save space.
    pub fn encode(bitmap: &Bitmap, compression_disabled: bool) -> Self {
        if compression_disabled {
            return BitmapPayload::Raw(bitmap.clone());
        }
        match compress(&bitmap.data) {
            Ok(data) if data.len() < bitmap.data.len() => BitmapPayload::Zlib {
                width: bitmap.width,
                height: bitmap.height,
                bpp: bitmap.bpp,
                data,
            },
            Ok(_) => BitmapPayload::Raw(bitmap.clone()),
            Err(e) => {
                warn!("bitmap compression failed: {}, sending raw pixels", e);
                BitmapPayload::Raw(bitmap.clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BitmapPayload::Raw(bitmap) => bitmap.data.len(),
            BitmapPayload::Zlib { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compress(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = ZlibEncoder::new(BytesMut::new().writer(), Compression::fast());
    encoder.write_all(data)?;
    Ok(encoder.finish()?.into_inner().freeze())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pen {
    pub style: u8,
    pub width: u8,
    pub color: u32,
}

/// A brush as referenced by pattern orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrushRef {
    pub x_origin: i32,
    pub y_origin: i32,
    pub style: u8,
    /// Brush cache index for pattern brushes.
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    BeginUpdate,
    EndUpdate,
    /// Bounds applied to subsequent primary orders (`None` = whole target).
    Bounds(Option<Rect>),
    OpaqueRect {
        rect: Rect,
        color: u32,
    },
    ScreenBlt {
        rect: Rect,
        src_x: i32,
        src_y: i32,
        rop: u8,
    },
    PatBlt {
        rect: Rect,
        rop: u8,
        fg_color: u32,
        bg_color: u32,
        brush: Option<BrushRef>,
    },
    LineTo {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        rop: u8,
        pen: Pen,
        bg_color: u32,
    },
    CacheBitmap {
        tier: usize,
        index: usize,
        payload: BitmapPayload,
    },
    MemBlt {
        tier: usize,
        index: usize,
        rect: Rect,
        src_x: i32,
        src_y: i32,
        rop: u8,
    },
    CachePalette {
        index: usize,
        colors: Box<Palette>,
    },
    CacheGlyph {
        font: usize,
        character: usize,
        glyph: FontChar,
    },
    GlyphIndex {
        font: usize,
        flags: u32,
        mix_mode: u8,
        fg_color: u32,
        bg_color: u32,
        clip: Rect,
        opaque: Rect,
        x: i32,
        y: i32,
        data: Vec<u8>,
    },
    CacheBrush {
        index: usize,
        pattern: BrushPattern,
    },
    CachePointer {
        index: usize,
        pointer: PointerItem,
    },
    SetPointer {
        index: usize,
    },
    CreateOffscreen {
        id: usize,
        width: u16,
        height: u16,
        delete_list: Vec<usize>,
    },
    /// `None` switches back to the primary screen.
    SwitchSurface {
        id: Option<usize>,
    },
    OffscreenBlt {
        id: usize,
        rect: Rect,
        src_x: i32,
        src_y: i32,
    },
    Bell,
    Reset {
        width: u16,
        height: u16,
        bpp: u8,
    },
}

impl Order {
    /// A one-line description for logs and the debug client link.
    pub fn summary(&self) -> String {
        match self {
            Order::BeginUpdate => "begin".to_string(),
            Order::EndUpdate => "end".to_string(),
            Order::Bounds(None) => "bounds none".to_string(),
            Order::Bounds(Some(r)) => format!("bounds {} {} {} {}", r.left, r.top, r.right, r.bottom),
            Order::OpaqueRect { rect, color } => format!(
                "opaque {} {} {} {} {:06x}",
                rect.left, rect.top, rect.width(), rect.height(), color
            ),
            Order::ScreenBlt { rect, src_x, src_y, .. } => format!(
                "scrblt {} {} {} {} from {} {}",
                rect.left, rect.top, rect.width(), rect.height(), src_x, src_y
            ),
            Order::PatBlt { rect, rop, .. } => format!(
                "patblt {} {} {} {} rop {:02x}",
                rect.left, rect.top, rect.width(), rect.height(), rop
            ),
            Order::LineTo { x1, y1, x2, y2, .. } => format!("line {} {} {} {}", x1, y1, x2, y2),
            Order::CacheBitmap { tier, index, payload } => {
                format!("cache-bitmap {} {} ({} bytes)", tier, index, payload.len())
            }
            Order::MemBlt { tier, index, rect, .. } => format!(
                "memblt {} {} at {} {} {} {}",
                tier, index, rect.left, rect.top, rect.width(), rect.height()
            ),
            Order::CachePalette { index, .. } => format!("cache-palette {}", index),
            Order::CacheGlyph { font, character, .. } => format!("cache-glyph {} {}", font, character),
            Order::GlyphIndex { font, data, x, y, .. } => {
                format!("text font {} at {} {} ({} glyphs)", font, x, y, data.len())
            }
            Order::CacheBrush { index, .. } => format!("cache-brush {}", index),
            Order::CachePointer { index, .. } => format!("cache-pointer {}", index),
            Order::SetPointer { index } => format!("pointer {}", index),
            Order::CreateOffscreen { id, width, height, delete_list } => format!(
                "create-surface {} {}x{} (deleting {:?})",
                id, width, height, delete_list
            ),
            Order::SwitchSurface { id: None } => "switch-surface screen".to_string(),
            Order::SwitchSurface { id: Some(id) } => format!("switch-surface {}", id),
            Order::OffscreenBlt { id, rect, .. } => format!(
                "surface-blt {} at {} {} {} {}",
                id, rect.left, rect.top, rect.width(), rect.height()
            ),
            Order::Bell => "bell".to_string(),
            Order::Reset { width, height, bpp } => format!("reset {}x{}x{}", width, height, bpp),
        }
    }
}

/// Consumer of the orders a session produces.
pub trait UpdateSink {
    fn send(&mut self, order: Order) -> Result<()>;
}

impl UpdateSink for Vec<Order> {
    fn send(&mut self, order: Order) -> Result<()> {
        self.push(order);
        Ok(())
    }
}
