//! The server side of the module interface.
//!
//! A module draws by calling into [`Server`]. Each call is clipped to the
//! visible part of the current target, resolved against the session cache
//! and turned into [`Order`]s. Content travels to the client only when the
//! cache did not already hold it.

use log::{debug, info, warn};

use crate::cache::bitmap::bytes_per_pixel;
use crate::cache::{Bitmap, BrushPattern, FontChar, GlyphIndex, Palette, PointerItem, POINTER_SIZE};
use crate::error::{Result, SessionError};
use crate::orders::{BitmapPayload, BrushRef, Order, Pen, UpdateSink};
use crate::region::{Rect, Region};
use crate::term::TermEvent;
use crate::wm::WindowManager;

/// SRCCOPY.
pub const ROP_COPY: u8 = 0xcc;

/// Side of the cells `paint_rect` splits bitmaps into before caching.
pub const TILE_SIZE: usize = 64;

const BRUSH_STYLE_PATTERN: u8 = 3;

/// Drawing state that persists between bridge calls.
#[derive(Debug, Clone)]
pub struct BridgeState {
    update_depth: u32,
    bpp: u8,
    fg_color: u32,
    bg_color: u32,
    opcode: u8,
    mix_mode: u8,
    pen: Pen,
    brush: Option<BrushRef>,
    clip: Option<Rect>,
    surface: Option<usize>,
    messages: Vec<String>,
}

impl BridgeState {
    pub fn new(bpp: u8) -> Self {
        Self {
            update_depth: 0,
            bpp,
            fg_color: 0,
            bg_color: 0,
            opcode: ROP_COPY,
            mix_mode: 0,
            pen: Pen::default(),
            brush: None,
            clip: None,
            surface: None,
            messages: Vec::new(),
        }
    }

    pub fn in_update(&self) -> bool {
        self.update_depth > 0
    }

    /// The offscreen surface being drawn to, `None` for the screen.
    pub fn surface(&self) -> Option<usize> {
        self.surface
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

pub struct Server<'a> {
    wm: &'a mut WindowManager,
    state: &'a mut BridgeState,
    sink: &'a mut dyn UpdateSink,
    term: &'a TermEvent,
}

impl<'a> Server<'a> {
    pub fn new(
        wm: &'a mut WindowManager,
        state: &'a mut BridgeState,
        sink: &'a mut dyn UpdateSink,
        term: &'a TermEvent,
    ) -> Self {
        Self { wm, state, sink, term }
    }

    pub fn wm(&self) -> &WindowManager {
        &*self.wm
    }

    pub fn begin_update(&mut self) -> Result<()> {
        self.state.update_depth += 1;
        if self.state.update_depth == 1 {
            self.sink.send(Order::BeginUpdate)?;
        }
        Ok(())
    }

    pub fn end_update(&mut self) -> Result<()> {
        match self.state.update_depth {
            0 => {
                warn!("end_update without matching begin_update");
                Ok(())
            }
            1 => {
                self.state.update_depth = 0;
                self.sink.send(Order::EndUpdate)
            }
            _ => {
                self.state.update_depth -= 1;
                Ok(())
            }
        }
    }

    /// Runs `f` inside an update bracket. Nested inside an explicit bracket
    /// this adds nothing.
    fn with_update(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.begin_update()?;
        let result = f(self);
        let end = self.end_update();
        result.and(end)
    }

    /// The parts of `rect` that drawing to the current target may touch.
    fn clip_region(&self, rect: Rect) -> Region {
        let mut region = match self.state.surface {
            Some(id) => match self.wm.cache().offscreen().get(id) {
                Ok(item) => {
                    let mut region = Region::from_rect(rect);
                    region.intersect_rect(&Rect::from_xywh(
                        0,
                        0,
                        i32::from(item.width),
                        i32::from(item.height),
                    ));
                    region
                }
                Err(_) => Region::new(),
            },
            None => self.wm.visible_region(self.wm.screen(), rect, true),
        };
        if let Some(clip) = &self.state.clip {
            region.intersect_rect(clip);
        }
        region
    }

    fn reference_surface(&mut self) -> Result<()> {
        if let Some(id) = self.state.surface {
            self.wm.cache_mut().offscreen_mut().reference(id)?;
        }
        Ok(())
    }

    /// Fills a rectangle with the foreground color, or with the current
    /// brush when the opcode is not a plain copy.
    pub fn opaque_rect(&mut self, x: i32, y: i32, cx: i32, cy: i32) -> Result<()> {
        let region = self.clip_region(Rect::from_xywh(x, y, cx, cy));
        if region.is_empty() {
            return Ok(());
        }
        self.with_update(|s| {
            for &rect in region.rects() {
                let order = if s.state.opcode == ROP_COPY && s.state.brush.is_none() {
                    Order::OpaqueRect { rect, color: s.state.fg_color }
                } else {
                    Order::PatBlt {
                        rect,
                        rop: s.state.opcode,
                        fg_color: s.state.fg_color,
                        bg_color: s.state.bg_color,
                        brush: s.state.brush,
                    }
                };
                s.sink.send(order)?;
            }
            s.reference_surface()
        })
    }

    /// Copies screen content from (`srcx`, `srcy`) to the rectangle.
    pub fn screen_blt(&mut self, x: i32, y: i32, cx: i32, cy: i32, srcx: i32, srcy: i32) -> Result<()> {
        let region = self.clip_region(Rect::from_xywh(x, y, cx, cy));
        if region.is_empty() {
            return Ok(());
        }
        self.with_update(|s| {
            for &rect in region.rects() {
                s.sink.send(Order::ScreenBlt {
                    rect,
                    src_x: srcx + rect.left - x,
                    src_y: srcy + rect.top - y,
                    rop: s.state.opcode,
                })?;
            }
            s.reference_surface()
        })
    }

    /// Paints part of a `width` x `height` image at the session depth. The
    /// destination is split into 64x64 cells, each cached on its own.
    #[allow(clippy::too_many_arguments)]
    pub fn paint_rect(
        &mut self,
        x: i32,
        y: i32,
        cx: i32,
        cy: i32,
        data: &[u8],
        width: i32,
        height: i32,
        srcx: i32,
        srcy: i32,
    ) -> Result<()> {
        let bpp = self.state.bpp;
        let bypp = bytes_per_pixel(bpp);
        if width <= 0 || height <= 0 {
            return Err(SessionError::InvalidDraw(format!("image size {}x{}", width, height)));
        }
        let needed = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(bypp))
            .ok_or_else(|| SessionError::InvalidDraw(format!("image size {}x{} overflows", width, height)))?;
        if data.len() < needed {
            return Err(SessionError::InvalidDraw(format!(
                "{} bytes of pixels for a {}x{}x{} image",
                data.len(),
                width,
                height,
                bpp
            )));
        }
        let region = self.clip_region(Rect::from_xywh(x, y, cx, cy));
        if region.is_empty() {
            return Ok(());
        }
        let image = Image { data, width, height, bypp };

        self.with_update(|s| {
            for ty in (0..cy.max(0)).step_by(TILE_SIZE) {
                for tx in (0..cx.max(0)).step_by(TILE_SIZE) {
                    let tile_size = TILE_SIZE as i32;
                    let cell = Rect::from_xywh(x + tx, y + ty, (cx - tx).min(tile_size), (cy - ty).min(tile_size));
                    let parts: Vec<Rect> = region.rects().iter().filter_map(|r| r.intersect(&cell)).collect();
                    if parts.is_empty() {
                        continue;
                    }
                    let tile = image.tile(srcx + tx, srcy + ty, cell.width(), cell.height(), bpp);
                    s.blit_tile(&tile, &cell, &parts)?;
                }
            }
            s.reference_surface()
        })
    }

    fn blit_tile(&mut self, tile: &Bitmap, cell: &Rect, parts: &[Rect]) -> Result<()> {
        let cached = self.wm.cache_mut().add_bitmap(tile);
        if !cached.hit {
            let compression_disabled = self.wm.cache().config().bitmap_compression_disabled;
            self.sink.send(Order::CacheBitmap {
                tier: cached.tier,
                index: cached.index,
                payload: BitmapPayload::encode(tile, compression_disabled),
            })?;
        }
        for &rect in parts {
            self.sink.send(Order::MemBlt {
                tier: cached.tier,
                index: cached.index,
                rect,
                src_x: rect.left - cell.left,
                src_y: rect.top - cell.top,
                rop: self.state.opcode,
            })?;
        }
        Ok(())
    }

    /// Caches a pointer image and makes it current.
    pub fn set_pointer(&mut self, hotspot_x: u16, hotspot_y: u16, bpp: u8, data: &[u8], mask: &[u8]) -> Result<()> {
        let pixels = POINTER_SIZE * POINTER_SIZE;
        if data.len() < pixels * bytes_per_pixel(bpp) || mask.len() < pixels / 8 {
            return Err(SessionError::InvalidDraw(format!(
                "pointer with {} data and {} mask bytes",
                data.len(),
                mask.len()
            )));
        }
        let pointer = PointerItem {
            hotspot_x,
            hotspot_y,
            bpp,
            data: data.to_vec(),
            mask: mask.to_vec(),
        };
        let index = self.wm.cache_mut().add_pointer(pointer.clone());
        self.sink.send(Order::CachePointer { index, pointer })?;
        self.sink.send(Order::SetPointer { index })
    }

    pub fn palette(&mut self, palette: &Palette) -> Result<()> {
        let index = self.wm.cache_mut().add_palette(palette);
        self.with_update(|s| {
            s.sink.send(Order::CachePalette {
                index,
                colors: Box::new(*palette),
            })
        })
    }

    /// Stores a glyph at the font slot the module chose.
    #[allow(clippy::too_many_arguments)]
    pub fn add_char(
        &mut self,
        font: usize,
        character: usize,
        offset: i16,
        baseline: i16,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<()> {
        let needed = usize::from(width).div_ceil(8) * usize::from(height);
        if data.len() < needed {
            return Err(SessionError::InvalidDraw(format!(
                "glyph {}x{} with {} bytes",
                width,
                height,
                data.len()
            )));
        }
        let glyph = FontChar {
            offset,
            baseline,
            width,
            height,
            data: data[..needed].to_vec(),
        };
        self.wm
            .cache_mut()
            .put_char(GlyphIndex { font, character }, glyph.clone())?;
        self.with_update(|s| s.sink.send(Order::CacheGlyph { font, character, glyph }))
    }

    /// Draws a run of cached glyphs with the current colors and mix mode.
    /// `data` holds the glyph indices.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_text(
        &mut self,
        font: usize,
        flags: u32,
        clip: Rect,
        opaque: Rect,
        x: i32,
        y: i32,
        data: &[u8],
    ) -> Result<()> {
        let region = self.clip_region(clip);
        if region.is_empty() {
            return Ok(());
        }
        self.with_update(|s| {
            for &piece in region.rects() {
                s.sink.send(Order::GlyphIndex {
                    font,
                    flags,
                    mix_mode: s.state.mix_mode,
                    fg_color: s.state.fg_color,
                    bg_color: s.state.bg_color,
                    clip: piece,
                    opaque: opaque.intersect(&piece).unwrap_or_default(),
                    x,
                    y,
                    data: data.to_vec(),
                })?;
            }
            s.reference_surface()
        })
    }

    pub fn set_brush(&mut self, x_origin: i32, y_origin: i32, style: u8, pattern: &BrushPattern) -> Result<()> {
        let index = if style == BRUSH_STYLE_PATTERN {
            let (index, hit) = self.wm.cache_mut().add_brush(pattern);
            if !hit {
                self.with_update(|s| {
                    s.sink.send(Order::CacheBrush {
                        index,
                        pattern: *pattern,
                    })
                })?;
            }
            Some(index)
        } else {
            None
        };
        self.state.brush = Some(BrushRef {
            x_origin,
            y_origin,
            style,
            index,
        });
        Ok(())
    }

    pub fn reset_brush(&mut self) {
        self.state.brush = None;
    }

    /// Restricts later drawing to a rectangle in surface coordinates.
    ///
    /// # Arguments
    ///
    /// * `x`, `y` - Top-left corner.
    /// * `cx`, `cy` - Width and height; edges stop at the `i32` limits.
    pub fn set_clip(&mut self, x: i32, y: i32, cx: i32, cy: i32) {
        self.state.clip = Some(Rect::from_xywh(x, y, cx, cy));
    }

    pub fn reset_clip(&mut self) {
        self.state.clip = None;
    }

    pub fn set_fgcolor(&mut self, color: u32) {
        self.state.fg_color = color;
    }

    pub fn set_bgcolor(&mut self, color: u32) {
        self.state.bg_color = color;
    }

    /// Sets the raster operation used by fills and pattern blits.
    pub fn set_opcode(&mut self, opcode: u8) {
        self.state.opcode = opcode;
    }

    /// Sets the background mix mode used by [`draw_text`](Self::draw_text):
    /// 0 for transparent, 1 for opaque.
    pub fn set_mixmode(&mut self, mix_mode: u8) {
        self.state.mix_mode = mix_mode;
    }

    /// Sets the pen for [`draw_line`](Self::draw_line). A width of 0 draws
    /// one pixel wide.
    pub fn set_pen(&mut self, style: u8, width: u8) {
        self.state.pen.style = style;
        self.state.pen.width = width;
    }

    /// Draws a line with the current pen in the foreground color.
    pub fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<()> {
        let grow = i32::from(self.state.pen.width.max(1));
        let bounds = Rect::new(
            x1.min(x2) - grow,
            y1.min(y2) - grow,
            x1.max(x2) + grow + 1,
            y1.max(y2) + grow + 1,
        );
        let region = self.clip_region(bounds);
        if region.is_empty() {
            return Ok(());
        }
        let pen = Pen {
            color: self.state.fg_color,
            ..self.state.pen
        };
        self.with_update(|s| {
            for &piece in region.rects() {
                s.sink.send(Order::Bounds(Some(piece)))?;
                s.sink.send(Order::LineTo {
                    x1,
                    y1,
                    x2,
                    y2,
                    rop: s.state.opcode,
                    pen,
                    bg_color: s.state.bg_color,
                })?;
            }
            s.sink.send(Order::Bounds(None))?;
            s.reference_surface()
        })
    }

    /// Creates offscreen surface `id`. Surfaces freed since the last create
    /// are announced to the client with it.
    pub fn create_os_surface(&mut self, id: usize, width: u16, height: u16) -> Result<()> {
        let offscreen = self.wm.cache_mut().offscreen_mut();
        offscreen.add(id, width, height)?;
        let delete_list = offscreen.take_delete_list();
        self.with_update(|s| {
            s.sink.send(Order::CreateOffscreen {
                id,
                width,
                height,
                delete_list,
            })
        })
    }

    /// Redirects drawing to surface `id`, or back to the screen for `None`.
    pub fn switch_os_surface(&mut self, id: Option<usize>) -> Result<()> {
        if let Some(id) = id {
            self.wm.cache().offscreen().get(id)?;
        }
        self.state.surface = id;
        self.with_update(|s| s.sink.send(Order::SwitchSurface { id }))
    }

    pub fn delete_os_surface(&mut self, id: usize) -> Result<()> {
        let freed = self.wm.cache_mut().offscreen_mut().remove(id)?;
        if !freed {
            debug!("delete of offscreen surface {} deferred", id);
        }
        if self.state.surface == Some(id) {
            self.switch_os_surface(None)?;
        }
        Ok(())
    }

    /// Copies from surface `id` at (`srcx`, `srcy`) to the rectangle.
    #[allow(clippy::too_many_arguments)]
    pub fn paint_rect_os(&mut self, x: i32, y: i32, cx: i32, cy: i32, id: usize, srcx: i32, srcy: i32) -> Result<()> {
        self.wm.cache_mut().offscreen_mut().reference(id)?;
        let region = self.clip_region(Rect::from_xywh(x, y, cx, cy));
        if region.is_empty() {
            return Ok(());
        }
        self.with_update(|s| {
            for &rect in region.rects() {
                s.sink.send(Order::OffscreenBlt {
                    id,
                    rect,
                    src_x: srcx + rect.left - x,
                    src_y: srcy + rect.top - y,
                })?;
            }
            s.reference_surface()
        })
    }

    pub fn bell_trigger(&mut self) -> Result<()> {
        self.sink.send(Order::Bell)
    }

    /// A status message from the module, shown in the log.
    pub fn msg(&mut self, text: &str, code: i32) {
        if code == 0 {
            info!("module: {}", text);
        } else {
            warn!("module ({}): {}", code, text);
        }
        self.state.messages.push(text.to_string());
    }

    pub fn is_term(&self) -> bool {
        self.term.is_set()
    }

    /// Starts over at a new desktop size: every cache is emptied and the
    /// drawing state returns to its defaults. The default cursors are sent
    /// again once the client has been told about the reset.
    pub fn reset(&mut self, width: u16, height: u16, bpp: u8) -> Result<()> {
        info!("resetting session to {}x{}x{}", width, height, bpp);
        self.wm.reset_cache();
        self.wm.resize(i32::from(width), i32::from(height));
        let messages = std::mem::take(&mut self.state.messages);
        *self.state = BridgeState {
            messages,
            ..BridgeState::new(bpp)
        };
        self.sink.send(Order::Reset { width, height, bpp })?;
        self.wm.send_static_pointers(&mut *self.sink)
    }
}

/// Borrowed source pixels of a `paint_rect` call.
struct Image<'d> {
    data: &'d [u8],
    width: i32,
    height: i32,
    bypp: usize,
}

impl Image<'_> {
    /// Cuts a `w` x `h` tile at (`sx`, `sy`). Pixels outside the image are
    /// left zero.
    fn tile(&self, sx: i32, sy: i32, w: i32, h: i32, bpp: u8) -> Bitmap {
        let (w_us, h_us) = (w.max(0) as usize, h.max(0) as usize);
        let mut out = vec![0u8; w_us * h_us * self.bypp];
        let col_start = sx.max(0);
        let col_end = (sx + w).min(self.width);
        if col_end > col_start {
            for row in 0..h {
                let src_row = sy + row;
                if src_row < 0 || src_row >= self.height {
                    continue;
                }
                let src = (src_row as usize * self.width as usize + col_start as usize) * self.bypp;
                let dst = (row as usize * w_us + (col_start - sx) as usize) * self.bypp;
                let len = (col_end - col_start) as usize * self.bypp;
                out[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
            }
        }
        Bitmap::new(w_us as u16, h_us as u16, bpp, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::CacheError;
    use crate::wm::Drawable;

    fn solid_image(width: usize, height: usize, pixel: u32) -> Vec<u8> {
        pixel.to_le_bytes().repeat(width * height)
    }

    fn count(orders: &[Order], pred: impl Fn(&Order) -> bool) -> usize {
        orders.iter().filter(|o| pred(o)).count()
    }

    struct Fixture {
        wm: WindowManager,
        state: BridgeState,
        sink: Vec<Order>,
        term: TermEvent,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                wm: WindowManager::new(800, 600, CacheConfig::default()),
                state: BridgeState::new(32),
                sink: Vec::new(),
                term: TermEvent::new().unwrap(),
            }
        }

        fn server(&mut self) -> Server<'_> {
            Server::new(&mut self.wm, &mut self.state, &mut self.sink, &self.term)
        }
    }

    #[test]
    fn repeated_paints_send_content_once() {
        let mut fx = Fixture::new();
        let image = solid_image(100, 70, 0x00ff_8800);
        fx.server().paint_rect(0, 0, 100, 70, &image, 100, 70, 0, 0).unwrap();
        assert_eq!(fx.sink.first(), Some(&Order::BeginUpdate));
        assert_eq!(fx.sink.last(), Some(&Order::EndUpdate));
        assert_eq!(count(&fx.sink, |o| matches!(o, Order::CacheBitmap { .. })), 4);
        assert_eq!(count(&fx.sink, |o| matches!(o, Order::MemBlt { .. })), 4);

        fx.sink.clear();
        fx.server().paint_rect(0, 0, 100, 70, &image, 100, 70, 0, 0).unwrap();
        assert_eq!(count(&fx.sink, |o| matches!(o, Order::CacheBitmap { .. })), 0);
        assert_eq!(count(&fx.sink, |o| matches!(o, Order::MemBlt { .. })), 4);
    }

    #[test]
    fn identical_cells_share_one_cache_entry() {
        let mut fx = Fixture::new();
        let image = solid_image(128, 64, 0x0010_2030);
        fx.server().paint_rect(10, 10, 128, 64, &image, 128, 64, 0, 0).unwrap();

        assert_eq!(count(&fx.sink, |o| matches!(o, Order::CacheBitmap { .. })), 1);
        let blits: Vec<_> = fx
            .sink
            .iter()
            .filter_map(|o| match o {
                Order::MemBlt { index, rect, .. } => Some((*index, *rect)),
                _ => None,
            })
            .collect();
        assert_eq!(blits.len(), 2);
        assert_eq!(blits[0].0, blits[1].0);
        assert_eq!(blits[1].1, Rect::from_xywh(74, 10, 64, 64));
    }

    #[test]
    fn drawing_outside_a_bracket_is_bracketed() {
        let mut fx = Fixture::new();
        fx.server().opaque_rect(0, 0, 10, 10).unwrap();
        assert_eq!(
            fx.sink,
            vec![
                Order::BeginUpdate,
                Order::OpaqueRect { rect: Rect::new(0, 0, 10, 10), color: 0 },
                Order::EndUpdate,
            ]
        );

        fx.sink.clear();
        let mut server = fx.server();
        server.begin_update().unwrap();
        server.set_fgcolor(0xff);
        server.opaque_rect(0, 0, 10, 10).unwrap();
        server.opaque_rect(20, 0, 10, 10).unwrap();
        server.end_update().unwrap();
        assert_eq!(count(&fx.sink, |o| *o == Order::BeginUpdate), 1);
        assert_eq!(count(&fx.sink, |o| *o == Order::EndUpdate), 1);
        assert!(!fx.state.in_update());
    }

    #[test]
    fn paints_skip_windows_above_the_screen() {
        let mut fx = Fixture::new();
        let screen = fx.wm.screen();
        fx.wm.add_child(screen, Drawable::window(0, 0, 50, 50)).unwrap();

        fx.server().opaque_rect(0, 0, 100, 100).unwrap();
        let mut painted = Region::new();
        for order in &fx.sink {
            if let Order::OpaqueRect { rect, .. } = order {
                assert!(!rect.overlaps(&Rect::new(0, 0, 50, 50)));
                painted.add_rect(*rect);
            }
        }
        assert_eq!(painted.area(), 100 * 100 - 50 * 50);
    }

    #[test]
    fn clip_rect_limits_output() {
        let mut fx = Fixture::new();
        let mut server = fx.server();
        server.set_clip(5, 5, 10, 10);
        server.screen_blt(0, 0, 100, 100, 200, 200).unwrap();
        server.reset_clip();
        assert!(fx.sink.contains(&Order::ScreenBlt {
            rect: Rect::new(5, 5, 15, 15),
            src_x: 205,
            src_y: 205,
            rop: ROP_COPY,
        }));
    }

    #[test]
    fn deleted_surfaces_are_announced_on_the_next_create() {
        let mut fx = Fixture::new();
        let mut server = fx.server();
        server.create_os_surface(5, 64, 64).unwrap();
        server.paint_rect_os(0, 0, 64, 64, 5, 0, 0).unwrap();
        server.delete_os_surface(5).unwrap();
        assert!(fx.wm.cache().offscreen().is_pending_delete(5));

        fx.wm.cache_mut().offscreen_mut().acknowledge();
        fx.sink.clear();
        fx.server().create_os_surface(6, 32, 32).unwrap();
        assert!(fx.sink.contains(&Order::CreateOffscreen {
            id: 6,
            width: 32,
            height: 32,
            delete_list: vec![5],
        }));
    }

    #[test]
    fn drawing_into_a_surface_is_clipped_to_it() {
        let mut fx = Fixture::new();
        let mut server = fx.server();
        server.create_os_surface(1, 20, 20).unwrap();
        server.switch_os_surface(Some(1)).unwrap();
        server.opaque_rect(10, 10, 100, 100).unwrap();
        assert!(fx.sink.contains(&Order::OpaqueRect { rect: Rect::new(10, 10, 20, 20), color: 0 }));
        assert_eq!(fx.wm.cache().offscreen().get(1).unwrap().in_flight, 1);
    }

    #[test]
    fn unknown_surfaces_are_rejected() {
        let mut fx = Fixture::new();
        let err = fx.server().switch_os_surface(Some(42)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Cache(CacheError::IndexOutOfRange { index: 42, .. })
        ));
        assert_eq!(fx.state.surface(), None);
    }

    #[test]
    fn brushes_are_cached_once() {
        let mut fx = Fixture::new();
        let pattern = [0x81; 8];
        let mut server = fx.server();
        server.set_brush(0, 0, BRUSH_STYLE_PATTERN, &pattern).unwrap();
        server.set_brush(4, 4, BRUSH_STYLE_PATTERN, &pattern).unwrap();
        server.set_opcode(0xf0);
        server.opaque_rect(0, 0, 8, 8).unwrap();
        assert_eq!(count(&fx.sink, |o| matches!(o, Order::CacheBrush { .. })), 1);
        assert!(fx.sink.iter().any(|o| matches!(
            o,
            Order::PatBlt { rop: 0xf0, brush: Some(BrushRef { index: Some(0), x_origin: 4, .. }), .. }
        )));
    }

    #[test]
    fn glyphs_and_text() {
        let mut fx = Fixture::new();
        let mut server = fx.server();
        server.add_char(2, 65, 0, -10, 8, 10, &[0xff; 10]).unwrap();
        assert!(server.add_char(2, 66, 0, -10, 16, 10, &[0xff; 10]).is_err());
        server.set_mixmode(1);
        server
            .draw_text(2, 0, Rect::new(0, 0, 100, 20), Rect::default(), 5, 15, &[65])
            .unwrap();
        assert!(fx.wm.cache().glyph(GlyphIndex { font: 2, character: 65 }).is_some());
        assert_eq!(count(&fx.sink, |o| matches!(o, Order::GlyphIndex { font: 2, mix_mode: 1, .. })), 1);
    }

    #[test]
    fn short_pixel_buffers_are_rejected() {
        let mut fx = Fixture::new();
        let err = fx.server().paint_rect(0, 0, 10, 10, &[0; 16], 10, 10, 0, 0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidDraw(_)));
        assert!(fx.sink.is_empty());
    }

    #[test]
    fn huge_image_dimensions_are_rejected() {
        let mut fx = Fixture::new();
        let err = fx
            .server()
            .paint_rect(0, 0, 10, 10, &[0; 16], i32::MAX, i32::MAX, 0, 0)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidDraw(_)));
        assert!(fx.sink.is_empty());
    }

    #[test]
    fn reset_empties_the_caches() {
        let mut fx = Fixture::new();
        let image = solid_image(16, 16, 1);
        let mut server = fx.server();
        server.paint_rect(0, 0, 16, 16, &image, 16, 16, 0, 0).unwrap();
        server.msg("hello", 0);
        server.reset(1024, 768, 16).unwrap();
        assert_eq!(fx.wm.cache().bitmap_count(0), 0);
        let reset = fx
            .sink
            .iter()
            .position(|o| *o == Order::Reset { width: 1024, height: 768, bpp: 16 })
            .unwrap();
        assert_eq!(fx.sink[reset + 1], Order::BeginUpdate);
        assert!(matches!(fx.sink[reset + 2], Order::CachePointer { index: 0, .. }));
        assert_eq!(fx.sink.last(), Some(&Order::EndUpdate));
        assert!(fx.wm.cache().pointer(1).is_some());
        assert_eq!(fx.state.messages(), &["hello".to_string()]);
        assert_eq!(fx.wm.screen_rect(fx.wm.screen()), Some(Rect::new(0, 0, 1024, 768)));
    }

    #[test]
    fn pointers_are_cached_and_selected() {
        let mut fx = Fixture::new();
        let data = vec![0u8; POINTER_SIZE * POINTER_SIZE * 3];
        let mask = vec![0xffu8; POINTER_SIZE * POINTER_SIZE / 8];
        fx.server().set_pointer(1, 1, 24, &data, &mask).unwrap();
        // slots below STATIC_POINTERS hold the default cursors
        assert!(matches!(fx.sink[0], Order::CachePointer { index: 2, .. }));
        assert_eq!(fx.sink[1], Order::SetPointer { index: 2 });
    }
}
