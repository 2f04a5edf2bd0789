//! Per-session display-update caches.
//!
//! The tables mirror the caches the remote client keeps on its side: every
//! index handed out here is an index the client will resolve against its own
//! copy, so capacities are protocol constants and eviction must follow the
//! same deterministic rule on both ends.
//!
//! # Classes
//!
//! - **Bitmap tiers** and **brushes** deduplicate by content. A re-hit bumps
//!   the stamp and returns the existing index; a miss takes a free slot or
//!   evicts the entry with the smallest stamp in that class.
//! - **Palettes**, **glyphs** and **pointers** are direct-replace: every add
//!   takes the least recently stamped slot without searching. The first
//!   [`STATIC_POINTERS`] pointer slots hold the default cursors and are never
//!   handed out by [`Cache::add_pointer`].
//! - **Offscreen surfaces** are addressed by id, see [`offscreen`].
//!
//! A single stamp counter is shared by all classes so stamps form a total
//! order over every touch in the session.

pub mod bitmap;
pub mod offscreen;
pub(crate) mod slots;

use log::{debug, info};

pub use bitmap::{Bitmap, BitmapRef, TierConfig, BITMAP_TIERS, MAX_BITMAP_ENTRIES};
pub use offscreen::{OffscreenCache, OffscreenItem, OFFSCREEN_ENTRIES};

use crate::error::CacheError;
use bitmap::BitmapTier;
use slots::SlotTable;

pub const PALETTE_ENTRIES: usize = 6;
pub const FONT_COUNT: usize = 12;
pub const GLYPHS_PER_FONT: usize = 256;
pub const MAX_POINTER_ENTRIES: usize = 32;
pub const BRUSH_ENTRIES: usize = 64;

/// Side of a cached pointer image.
pub const POINTER_SIZE: usize = 32;
/// Pointer slot of the default arrow.
pub const POINTER_DEFAULT: usize = 0;
/// Pointer slot of the text I-beam.
pub const POINTER_TEXT: usize = 1;
/// Number of pointer slots reserved for the default cursors.
pub const STATIC_POINTERS: usize = 2;
/// Tier whose entries are pinned when the client persists bitmaps.
pub const PERSISTENT_TIER: usize = BITMAP_TIERS - 1;

/// Cache sizing negotiated from the client's capability sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub tiers: [TierConfig; BITMAP_TIERS],
    /// Whether the client persists bitmap cache entries between sessions.
    pub bitmap_persist_enable: bool,
    pub pointer_cache_entries: usize,
    pub bitmap_compression_disabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // Cell sizes of the 16x16, 32x32 and 64x64 tiers at 32 bpp.
        Self {
            tiers: [
                TierConfig { entries: 600, max_bytes: 16 * 16 * 4 },
                TierConfig { entries: 300, max_bytes: 32 * 32 * 4 },
                TierConfig { entries: 262, max_bytes: 64 * 64 * 4 },
            ],
            bitmap_persist_enable: false,
            pointer_cache_entries: MAX_POINTER_ENTRIES,
            bitmap_compression_disabled: false,
        }
    }
}

impl CacheConfig {
    /// Clamps every negotiated size into the range the protocol allows.
    pub fn validated(mut self) -> Self {
        for tier in &mut self.tiers {
            tier.entries = tier.entries.clamp(1, MAX_BITMAP_ENTRIES);
            tier.max_bytes = tier.max_bytes.max(1);
        }
        self.pointer_cache_entries = self
            .pointer_cache_entries
            .clamp(STATIC_POINTERS + 1, MAX_POINTER_ENTRIES);
        self
    }
}

/// 256-entry color table.
pub type Palette = [u32; 256];

/// One glyph of a client-side font.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontChar {
    pub offset: i16,
    pub baseline: i16,
    pub width: u16,
    pub height: u16,
    /// 1 bpp, rows padded to whole bytes.
    pub data: Vec<u8>,
}

/// Index of a glyph as `(font, character)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphIndex {
    pub font: usize,
    pub character: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerItem {
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    pub bpp: u8,
    /// `POINTER_SIZE`² pixels at `bpp`.
    pub data: Vec<u8>,
    /// 1 bpp AND mask.
    pub mask: Vec<u8>,
}

/// An 8x8 1 bpp brush pattern.
pub type BrushPattern = [u8; 8];

/// All caches of one session.
#[derive(Debug)]
pub struct Cache {
    config: CacheConfig,
    stamp: u64,
    palettes: SlotTable<Box<Palette>>,
    bitmaps: [BitmapTier; BITMAP_TIERS],
    glyphs: SlotTable<FontChar>,
    pointers: SlotTable<PointerItem>,
    brushes: SlotTable<BrushPattern>,
    offscreen: OffscreenCache,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        let config = config.validated();
        info!(
            "creating session cache: bitmap tiers {}/{}/{}, {} pointers, persistence {}",
            config.tiers[0].entries,
            config.tiers[1].entries,
            config.tiers[2].entries,
            config.pointer_cache_entries,
            config.bitmap_persist_enable
        );
        Self {
            stamp: 0,
            palettes: SlotTable::new(PALETTE_ENTRIES),
            bitmaps: config.tiers.map(BitmapTier::new),
            glyphs: SlotTable::new(FONT_COUNT * GLYPHS_PER_FONT),
            pointers: SlotTable::new(config.pointer_cache_entries),
            brushes: SlotTable::new(BRUSH_ENTRIES),
            offscreen: OffscreenCache::new(),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The most recently issued stamp.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    /// Drops every entry of every class. The stamp keeps counting so stamps
    /// stay monotonic for the whole session.
    pub fn reset(&mut self) {
        debug!("resetting all cache classes");
        self.palettes.clear();
        for tier in &mut self.bitmaps {
            tier.table.clear();
        }
        self.glyphs.clear();
        self.pointers.clear();
        self.brushes.clear();
        self.offscreen.clear();
    }

    pub fn add_palette(&mut self, palette: &Palette) -> usize {
        let stamp = self.next_stamp();
        let index = self.palettes.victim(|_| true);
        self.palettes.put(index, Box::new(*palette), stamp);
        index
    }

    pub fn palette(&self, index: usize) -> Option<&Palette> {
        self.palettes.get(index).map(|slot| &*slot.value)
    }

    /// Picks the tier for a bitmap of `bytes` bytes: the smallest tier that
    /// fits, the largest tier otherwise.
    pub fn tier_for(&self, bytes: usize) -> usize {
        self.config
            .tiers
            .iter()
            .position(|t| bytes <= t.max_bytes)
            .unwrap_or(BITMAP_TIERS - 1)
    }

    pub fn add_bitmap(&mut self, bitmap: &Bitmap) -> BitmapRef {
        let tier = self.tier_for(bitmap.byte_size());
        self.add_bitmap_to_tier(tier, bitmap)
    }

    pub fn add_bitmap_to_tier(&mut self, tier: usize, bitmap: &Bitmap) -> BitmapRef {
        let tier = tier.min(BITMAP_TIERS - 1);
        let stamp = self.next_stamp();
        let pin = self.config.bitmap_persist_enable && tier == PERSISTENT_TIER;
        self.bitmaps[tier].add(tier, bitmap, stamp, pin)
    }

    /// Restores keys the client persisted in an earlier session into the
    /// last tier. Returns how many keys were placed; does nothing when
    /// persistence is disabled.
    pub fn preload_persistent(&mut self, keys: &[u64]) -> usize {
        if !self.config.bitmap_persist_enable {
            return 0;
        }
        let tier = PERSISTENT_TIER;
        let mut placed = 0;
        for &key in keys {
            let stamp = self.next_stamp();
            if self.bitmaps[tier].preload(key, stamp).is_some() {
                placed += 1;
            }
        }
        info!("restored {} of {} persisted bitmap keys", placed, keys.len());
        placed
    }

    pub fn persistent_lookup(&self, key: u64) -> Option<BitmapRef> {
        self.bitmaps.iter().enumerate().find_map(|(tier, t)| {
            t.lookup_key(key).map(|index| BitmapRef { tier, index, hit: true })
        })
    }

    pub fn bitmap(&self, tier: usize, index: usize) -> Option<&Bitmap> {
        self.bitmaps
            .get(tier)?
            .table
            .get(index)?
            .value
            .bitmap
            .as_ref()
    }

    pub fn bitmap_stamp(&self, tier: usize, index: usize) -> Option<u64> {
        Some(self.bitmaps.get(tier)?.table.get(index)?.stamp)
    }

    pub fn bitmap_count(&self, tier: usize) -> usize {
        self.bitmaps.get(tier).map_or(0, |t| t.table.occupied())
    }

    pub fn bitmap_capacity(&self, tier: usize) -> usize {
        self.bitmaps.get(tier).map_or(0, |t| t.table.capacity())
    }

    /// Stores a glyph in the least recently used slot of any font.
    pub fn add_char(&mut self, glyph: FontChar) -> GlyphIndex {
        let stamp = self.next_stamp();
        let slot = self.glyphs.victim(|_| true);
        self.glyphs.put(slot, glyph, stamp);
        GlyphIndex {
            font: slot / GLYPHS_PER_FONT,
            character: slot % GLYPHS_PER_FONT,
        }
    }

    /// Stores a glyph at an index chosen by the module.
    pub fn put_char(&mut self, at: GlyphIndex, glyph: FontChar) -> Result<(), CacheError> {
        if at.font >= FONT_COUNT || at.character >= GLYPHS_PER_FONT {
            return Err(CacheError::IndexOutOfRange {
                index: at.font * GLYPHS_PER_FONT + at.character,
                capacity: FONT_COUNT * GLYPHS_PER_FONT,
            });
        }
        let stamp = self.next_stamp();
        self.glyphs.put(at.font * GLYPHS_PER_FONT + at.character, glyph, stamp);
        Ok(())
    }

    pub fn glyph(&self, at: GlyphIndex) -> Option<&FontChar> {
        if at.character >= GLYPHS_PER_FONT {
            return None;
        }
        self.glyphs
            .get(at.font * GLYPHS_PER_FONT + at.character)
            .map(|slot| &slot.value)
    }

    /// Caches a module-supplied pointer outside the static slots.
    ///
    /// # Returns
    ///
    /// The slot index the client must be told about.
    pub fn add_pointer(&mut self, pointer: PointerItem) -> usize {
        let stamp = self.next_stamp();
        let index = self.pointers.victim_from(STATIC_POINTERS);
        self.pointers.put(index, pointer, stamp);
        index
    }

    /// Installs a pointer at a fixed index, used for the default cursors.
    pub fn add_pointer_static(&mut self, pointer: PointerItem, index: usize) -> Result<(), CacheError> {
        let capacity = self.pointers.capacity();
        if index >= capacity {
            return Err(CacheError::IndexOutOfRange { index, capacity });
        }
        let stamp = self.next_stamp();
        self.pointers.put(index, pointer, stamp);
        Ok(())
    }

    pub fn pointer(&self, index: usize) -> Option<&PointerItem> {
        self.pointers.get(index).map(|slot| &slot.value)
    }

    /// Adds a brush pattern; returns its index and whether it was a hit.
    pub fn add_brush(&mut self, pattern: &BrushPattern) -> (usize, bool) {
        let stamp = self.next_stamp();
        if let Some(index) = self.brushes.position(|p| p == pattern) {
            self.brushes.touch(index, stamp);
            return (index, true);
        }
        let index = self.brushes.victim(|_| true);
        self.brushes.put(index, *pattern, stamp);
        (index, false)
    }

    pub fn brush_count(&self) -> usize {
        self.brushes.occupied()
    }

    pub fn offscreen(&self) -> &OffscreenCache {
        &self.offscreen
    }

    pub fn offscreen_mut(&mut self) -> &mut OffscreenCache {
        &mut self.offscreen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distinct_tile(seed: u32) -> Bitmap {
        let mut data = vec![0u8; 64 * 64 * 4];
        data[..4].copy_from_slice(&seed.to_le_bytes());
        Bitmap::new(64, 64, 32, data)
    }

    fn large_tier_config() -> CacheConfig {
        let mut config = CacheConfig::default();
        config.tiers[2].entries = 2000;
        config
    }

    #[test]
    fn overflowing_a_tier_reuses_the_oldest_index() {
        let mut cache = Cache::new(large_tier_config());

        let first = cache.add_bitmap(&distinct_tile(0));
        assert_eq!(first.tier, 2);
        assert!(!first.hit);
        for seed in 1..2000 {
            cache.add_bitmap(&distinct_tile(seed));
        }
        assert_eq!(cache.bitmap_count(2), 2000);

        let last_tile = distinct_tile(2000);
        let last = cache.add_bitmap(&last_tile);
        assert_eq!(cache.bitmap_count(2), 2000);
        assert_eq!(last.index, first.index);
        assert_eq!(cache.bitmap(2, first.index), Some(&last_tile));
    }

    #[test]
    fn re_adding_identical_content_is_a_hit() {
        let mut cache = Cache::new(CacheConfig::default());
        let tile = Bitmap::solid(32, 32, 32, 0x00c0_ffee);

        let first = cache.add_bitmap(&tile);
        let occupied = cache.bitmap_count(first.tier);
        let second = cache.add_bitmap(&tile.clone());

        assert!(second.hit);
        assert_eq!((second.tier, second.index), (first.tier, first.index));
        assert_eq!(cache.bitmap_count(first.tier), occupied);
    }

    #[test]
    fn stamps_increase_and_hits_refresh_recency() {
        let mut config = CacheConfig::default();
        config.tiers[0].entries = 3;
        let mut cache = Cache::new(config);
        let tiles: Vec<_> = (0..3u32).map(|i| Bitmap::solid(4, 4, 32, i)).collect();

        let mut last = cache.stamp();
        let mut refs = Vec::new();
        for tile in &tiles {
            refs.push(cache.add_bitmap(tile));
            assert!(cache.stamp() > last);
            last = cache.stamp();
        }

        // touch the oldest so the second entry becomes the victim
        cache.add_bitmap(&tiles[0]);
        assert!(cache.bitmap_stamp(0, refs[0].index) > cache.bitmap_stamp(0, refs[2].index));

        let newcomer = cache.add_bitmap(&Bitmap::solid(4, 4, 32, 99));
        assert_eq!(newcomer.index, refs[1].index);
        let min_remaining = [refs[0].index, refs[2].index]
            .iter()
            .filter_map(|&i| cache.bitmap_stamp(0, i))
            .min()
            .unwrap();
        assert!(min_remaining < cache.bitmap_stamp(0, newcomer.index).unwrap());
    }

    #[test]
    fn tiers_are_selected_by_size() {
        let cache = Cache::new(CacheConfig::default());
        assert_eq!(cache.tier_for(16 * 16 * 4), 0);
        assert_eq!(cache.tier_for(16 * 16 * 4 + 1), 1);
        assert_eq!(cache.tier_for(64 * 64 * 4), 2);
        assert_eq!(cache.tier_for(1 << 20), 2);
    }

    #[test]
    fn brushes_deduplicate() {
        let mut cache = Cache::new(CacheConfig::default());
        let pattern = [0xaa, 0x55, 0xaa, 0x55, 0xaa, 0x55, 0xaa, 0x55];
        assert_eq!(cache.add_brush(&pattern), (0, false));
        assert_eq!(cache.add_brush(&pattern), (0, true));
        assert_eq!(cache.add_brush(&[0; 8]), (1, false));
        assert_eq!(cache.brush_count(), 2);
    }

    #[test]
    fn palettes_rotate_without_searching() {
        let mut cache = Cache::new(CacheConfig::default());
        let palette = [0u32; 256];
        let indices: Vec<_> = (0..PALETTE_ENTRIES + 1)
            .map(|_| cache.add_palette(&palette))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn glyphs_fill_fonts_in_order_and_accept_fixed_slots() {
        let mut cache = Cache::new(CacheConfig::default());
        let at = cache.add_char(FontChar::default());
        assert_eq!(at, GlyphIndex { font: 0, character: 0 });

        let fixed = GlyphIndex { font: 3, character: 65 };
        let glyph = FontChar { width: 7, height: 9, ..FontChar::default() };
        cache.put_char(fixed, glyph.clone()).unwrap();
        assert_eq!(cache.glyph(fixed), Some(&glyph));
        assert!(cache.put_char(GlyphIndex { font: 12, character: 0 }, glyph).is_err());
    }

    #[test]
    fn pointer_static_slots_and_lru() {
        let mut config = CacheConfig::default();
        config.pointer_cache_entries = 3;
        let mut cache = Cache::new(config);
        let arrow = PointerItem {
            hotspot_x: 0,
            hotspot_y: 0,
            bpp: 24,
            data: vec![0; 32 * 32 * 3],
            mask: vec![0; 32 * 32 / 8],
        };
        cache.add_pointer_static(arrow.clone(), POINTER_DEFAULT).unwrap();
        cache.add_pointer_static(arrow.clone(), POINTER_TEXT).unwrap();
        assert_eq!(cache.add_pointer(arrow.clone()), 2);
        assert_eq!(cache.add_pointer(arrow.clone()), 2);
        assert!(cache.add_pointer_static(arrow, 3).is_err());
    }

    #[test]
    fn dynamic_pointers_never_evict_the_default_cursors() {
        let mut config = CacheConfig::default();
        config.pointer_cache_entries = 4;
        let mut cache = Cache::new(config.validated());
        let item = |hotspot_x| PointerItem {
            hotspot_x,
            hotspot_y: 0,
            bpp: 24,
            data: vec![0; 32 * 32 * 3],
            mask: vec![0; 32 * 32 / 8],
        };
        // dynamic adds fill the free slots above the reserved ones first
        assert_eq!(cache.add_pointer(item(1)), 2);
        assert_eq!(cache.add_pointer(item(2)), 3);
        assert_eq!(cache.add_pointer(item(3)), 2);
        assert_eq!(cache.add_pointer(item(4)), 3);
        assert!(cache.pointer(POINTER_DEFAULT).is_none());
        assert!(cache.pointer(POINTER_TEXT).is_none());
    }

    #[test]
    fn persistent_tier_inserts_are_pinned_when_enabled() {
        let pinned = |cache: &Cache, r: BitmapRef| {
            cache.bitmaps[r.tier].table.get(r.index).map(|slot| slot.value.persist)
        };

        let mut config = large_tier_config();
        config.bitmap_persist_enable = true;
        let mut cache = Cache::new(config);
        let kept = cache.add_bitmap_to_tier(PERSISTENT_TIER, &distinct_tile(1));
        let volatile = cache.add_bitmap_to_tier(0, &distinct_tile(2));
        assert_eq!(pinned(&cache, kept), Some(true));
        assert_eq!(pinned(&cache, volatile), Some(false));

        let mut cache = Cache::new(large_tier_config());
        let plain = cache.add_bitmap_to_tier(PERSISTENT_TIER, &distinct_tile(1));
        assert_eq!(pinned(&cache, plain), Some(false));
    }

    #[test]
    fn reset_clears_every_class() {
        let mut cache = Cache::new(CacheConfig::default());
        cache.add_bitmap(&Bitmap::solid(8, 8, 32, 1));
        cache.add_brush(&[1; 8]);
        cache.offscreen_mut().add(4, 10, 10).unwrap();
        let stamp = cache.stamp();

        cache.reset();
        assert_eq!(cache.bitmap_count(0), 0);
        assert_eq!(cache.brush_count(), 0);
        assert!(cache.offscreen().get(4).is_err());
        assert_eq!(cache.stamp(), stamp);
    }

    #[test]
    fn persistence_requires_the_flag() {
        let mut cache = Cache::new(CacheConfig::default());
        let key = Bitmap::solid(64, 64, 32, 5).persistent_key();
        assert_eq!(cache.preload_persistent(&[key]), 0);

        let mut config = CacheConfig::default();
        config.bitmap_persist_enable = true;
        let mut cache = Cache::new(config);
        assert_eq!(cache.preload_persistent(&[key]), 1);
        let found = cache.persistent_lookup(key).unwrap();
        assert_eq!(found.tier, 2);

        let hit = cache.add_bitmap(&Bitmap::solid(64, 64, 32, 5));
        assert!(hit.hit);
        assert_eq!(hit.index, found.index);
    }
}
