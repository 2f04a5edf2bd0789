//! A module that shows an empty patterned desktop.
//!
//! Useful for testing a client connection without a real backend: every
//! 64x64 cell of the desktop is the same tile, so after the first cell the
//! whole screen is drawn from the bitmap cache.

use log::{debug, info};
use std::collections::HashMap;

use crate::bridge::{Server, TILE_SIZE};
use crate::cache::bitmap::bytes_per_pixel;
use crate::error::{Result, SessionError};
use crate::module::{msg, Module};

const LIGHT: u8 = 0x5a;
const DARK: u8 = 0x3c;
const SUPPORTED_BPP: [u8; 5] = [8, 15, 16, 24, 32];

#[derive(Debug, Default)]
pub struct BlankModule {
    width: u16,
    height: u16,
    tile: Vec<u8>,
    params: HashMap<String, String>,
}

impl BlankModule {
    pub const NAME: &'static str = "blank";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn build_tile(bpp: u8) -> Vec<u8> {
        let bypp = bytes_per_pixel(bpp);
        let mut tile = Vec::with_capacity(TILE_SIZE * TILE_SIZE * bypp);
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                let shade = if (x / 8 + y / 8) % 2 == 0 { LIGHT } else { DARK };
                tile.extend(std::iter::repeat(shade).take(bypp));
            }
        }
        tile
    }

    /// Repaints the cells covering the given area inside one update
    /// bracket. The bracket is closed even when a cell fails to draw.
    fn paint(&self, server: &mut Server<'_>, x: i32, y: i32, cx: i32, cy: i32) -> Result<()> {
        server.begin_update()?;
        let result = self.paint_cells(server, x, y, cx, cy);
        let end = server.end_update();
        result.and(end)
    }

    fn paint_cells(&self, server: &mut Server<'_>, x: i32, y: i32, cx: i32, cy: i32) -> Result<()> {
        let tile = TILE_SIZE as i32;
        let right = x.saturating_add(cx).min(i32::from(self.width));
        let bottom = y.saturating_add(cy).min(i32::from(self.height));
        // snap to the tile grid so every cell is the identical bitmap
        let mut ty = y.max(0) / tile * tile;
        while ty < bottom {
            let mut tx = x.max(0) / tile * tile;
            while tx < right {
                let w = tile.min(i32::from(self.width) - tx);
                let h = tile.min(i32::from(self.height) - ty);
                server.paint_rect(tx, ty, w, h, &self.tile, tile, tile, 0, 0)?;
                tx += tile;
            }
            ty += tile;
        }
        Ok(())
    }
}

impl Module for BlankModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start(&mut self, _server: &mut Server<'_>, width: u16, height: u16, bpp: u8) -> Result<()> {
        info!("blank module starting at {}x{}x{}", width, height, bpp);
        if !SUPPORTED_BPP.contains(&bpp) {
            return Err(SessionError::module(Self::NAME, format!("unsupported color depth {}", bpp)));
        }
        self.width = width;
        self.height = height;
        self.tile = Self::build_tile(bpp);
        Ok(())
    }

    fn connect(&mut self, server: &mut Server<'_>) -> Result<()> {
        server.msg("blank desktop ready", 0);
        self.paint(server, 0, 0, self.width.into(), self.height.into())
    }

    fn event(&mut self, server: &mut Server<'_>, code: u32, p1: i64, p2: i64, p3: i64, p4: i64) -> Result<()> {
        match code {
            msg::INVALIDATE => {
                let clamp = |v: i64| v.clamp(0, i64::from(u16::MAX)) as i32;
                self.paint(server, clamp(p1), clamp(p2), clamp(p3), clamp(p4))
            }
            msg::KEYDOWN if p2 == 0xff1b => server.bell_trigger(),
            _ => Ok(()),
        }
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        debug!("blank module parameter {} = {}", name, value);
        self.params.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn session_change(&mut self, kind: u32, param: u32) -> Result<()> {
        debug!("blank module session change {} ({})", kind, param);
        Ok(())
    }

    fn end(&mut self) {
        debug!("blank module ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeState;
    use crate::cache::CacheConfig;
    use crate::orders::Order;
    use crate::term::TermEvent;
    use crate::wm::WindowManager;

    #[test]
    fn desktop_is_drawn_from_one_cached_tile() {
        let mut wm = WindowManager::new(256, 100, CacheConfig::default());
        let mut state = BridgeState::new(32);
        let mut sink: Vec<Order> = Vec::new();
        let term = TermEvent::new().unwrap();
        let mut module = BlankModule::new();
        {
            let mut server = Server::new(&mut wm, &mut state, &mut sink, &term);
            module.start(&mut server, 256, 100, 32).unwrap();
            module.connect(&mut server).unwrap();
        }

        let cached = sink.iter().filter(|o| matches!(o, Order::CacheBitmap { .. })).count();
        let blits = sink.iter().filter(|o| matches!(o, Order::MemBlt { .. })).count();
        // a full row of 64x64 cells plus a row of 64x36 cells
        assert_eq!(cached, 2);
        assert_eq!(blits, 8);
        assert_eq!(sink.iter().filter(|o| **o == Order::BeginUpdate).count(), 1);
        assert_eq!(state.messages(), &["blank desktop ready".to_string()]);
    }

    #[test]
    fn invalidate_repaints_from_cache_and_escape_rings() {
        let mut wm = WindowManager::new(128, 128, CacheConfig::default());
        let mut state = BridgeState::new(16);
        let mut sink: Vec<Order> = Vec::new();
        let term = TermEvent::new().unwrap();
        let mut module = BlankModule::new();
        let mut server = Server::new(&mut wm, &mut state, &mut sink, &term);
        module.start(&mut server, 128, 128, 16).unwrap();
        module.connect(&mut server).unwrap();
        module.event(&mut server, msg::INVALIDATE, 70, 70, 10, 10).unwrap();
        module.event(&mut server, msg::KEYDOWN, 0, 0xff1b, 1, 0).unwrap();
        module.set_param("username", "alice").unwrap();
        drop(server);

        assert!(sink.contains(&Order::Bell));
        assert_eq!(sink.iter().filter(|o| matches!(o, Order::CacheBitmap { .. })).count(), 1);
        assert_eq!(module.param("username"), Some("alice"));
    }

    #[test]
    fn failed_paint_still_closes_the_update() {
        let mut wm = WindowManager::new(128, 128, CacheConfig::default());
        let mut state = BridgeState::new(32);
        let mut sink: Vec<Order> = Vec::new();
        let term = TermEvent::new().unwrap();
        let mut module = BlankModule::new();
        let mut server = Server::new(&mut wm, &mut state, &mut sink, &term);
        module.start(&mut server, 128, 128, 32).unwrap();
        // a tile too short for a 64x64 cell makes paint_rect refuse it
        module.tile.truncate(16);

        let err = module.event(&mut server, msg::INVALIDATE, 0, 0, 128, 128).unwrap_err();
        assert!(matches!(err, SessionError::InvalidDraw(_)));
        drop(server);
        assert!(!state.in_update());
        assert_eq!(sink, vec![Order::BeginUpdate, Order::EndUpdate]);
    }

    #[test]
    fn unsupported_depth_is_a_module_error() {
        let mut wm = WindowManager::new(64, 64, CacheConfig::default());
        let mut state = BridgeState::new(12);
        let mut sink: Vec<Order> = Vec::new();
        let term = TermEvent::new().unwrap();
        let mut server = Server::new(&mut wm, &mut state, &mut sink, &term);
        let err = BlankModule::new().start(&mut server, 64, 64, 12).unwrap_err();
        assert!(matches!(err, SessionError::Module { ref name, .. } if name == "blank"));
    }
}
