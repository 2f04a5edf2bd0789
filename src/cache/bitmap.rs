//! Bitmap cache tiers.
//!
//! Each tier deduplicates by content: a CRC-32 over the pixel data is used as
//! a cheap prefilter and a full comparison confirms the match, so two
//! different bitmaps can never share an index.

use flate2::Crc;
use log::debug;

use super::slots::SlotTable;

/// Number of bitmap tiers the protocol defines.
pub const BITMAP_TIERS: usize = 3;
/// Upper bound on entries per tier.
pub const MAX_BITMAP_ENTRIES: usize = 2000;

/// Uncompressed pixel data for one cacheable bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u16,
    pub height: u16,
    pub bpp: u8,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u16, height: u16, bpp: u8, data: Vec<u8>) -> Self {
        Self { width, height, bpp, data }
    }

    /// A bitmap filled with one repeated pixel value.
    pub fn solid(width: u16, height: u16, bpp: u8, pixel: u32) -> Self {
        let bytes = bytes_per_pixel(bpp);
        let px = &pixel.to_le_bytes()[..bytes];
        let data = px.repeat(usize::from(width) * usize::from(height));
        Self::new(width, height, bpp, data)
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn crc(&self) -> u32 {
        let mut crc = Crc::new();
        crc.update(&self.data);
        crc.sum()
    }

    /// Stable 64-bit key a client may persist across reconnects. The high
    /// word covers the pixels, the low word the geometry plus the pixels.
    pub fn persistent_key(&self) -> u64 {
        let pixels = self.crc();
        let mut crc = Crc::new();
        crc.update(&self.width.to_le_bytes());
        crc.update(&self.height.to_le_bytes());
        crc.update(&[self.bpp]);
        crc.update(&self.data);
        (u64::from(pixels) << 32) | u64::from(crc.sum())
    }
}

pub fn bytes_per_pixel(bpp: u8) -> usize {
    usize::from(bpp).div_ceil(8).max(1)
}

/// Sizing of one tier as negotiated from the client's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    /// Number of entries, clamped to [`MAX_BITMAP_ENTRIES`].
    pub entries: usize,
    /// Largest bitmap (in bytes) this tier accepts.
    pub max_bytes: usize,
}

/// Where a bitmap ended up and whether the client already holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapRef {
    pub tier: usize,
    pub index: usize,
    /// `true` when the content was already cached; only the reference needs
    /// to be sent.
    pub hit: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BitmapEntry {
    /// `None` for entries restored from the client's persisted key list:
    /// the client holds the pixels, the server only knows the key.
    pub bitmap: Option<Bitmap>,
    pub crc: u32,
    pub key: u64,
    /// Pinned entries survive the stamp-based eviction rule.
    pub persist: bool,
}

impl BitmapEntry {
    fn matches(&self, bitmap: &Bitmap, crc: u32, key: u64) -> bool {
        match &self.bitmap {
            Some(cached) => self.crc == crc && cached == bitmap,
            None => self.key == key,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BitmapTier {
    pub config: TierConfig,
    pub table: SlotTable<BitmapEntry>,
}

impl BitmapTier {
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            table: SlotTable::new(config.entries),
        }
    }

    /// Adds `bitmap`, deduplicating against occupied slots.
    ///
    /// # Arguments
    ///
    /// * `tier` - Index reported back in the returned reference.
    /// * `bitmap` - Pixels to cache.
    /// * `stamp` - Recency stamp for the touched or new slot.
    /// * `persist` - Pins a new entry so the stamp rule skips it.
    ///
    /// # Returns
    ///
    /// The slot holding the content and whether it was already there.
    pub fn add(&mut self, tier: usize, bitmap: &Bitmap, stamp: u64, persist: bool) -> BitmapRef {
        let crc = bitmap.crc();
        let key = bitmap.persistent_key();

        if let Some(index) = self.table.position(|e| e.matches(bitmap, crc, key)) {
            self.table.touch(index, stamp);
            return BitmapRef { tier, index, hit: true };
        }

        let index = self.table.victim(|e| !e.persist);
        let entry = BitmapEntry {
            bitmap: Some(bitmap.clone()),
            crc,
            key,
            persist,
        };
        if let Some(evicted) = self.table.put(index, entry, stamp) {
            debug!(
                "bitmap cache tier {} evicted index {} (key {:016x})",
                tier, index, evicted.key
            );
        }
        BitmapRef { tier, index, hit: false }
    }

    /// Seeds a slot from a key the client persisted in an earlier session.
    pub fn preload(&mut self, key: u64, stamp: u64) -> Option<usize> {
        if let Some(index) = self.table.position(|e| e.key == key) {
            return Some(index);
        }
        let index = self.table.victim(|e| !e.persist);
        if self.table.get(index).is_some_and(|slot| slot.value.persist) {
            // Every slot already holds a restored entry.
            return None;
        }
        let entry = BitmapEntry {
            bitmap: None,
            crc: 0,
            key,
            persist: true,
        };
        self.table.put(index, entry, stamp);
        Some(index)
    }

    pub fn lookup_key(&self, key: u64) -> Option<usize> {
        self.table.position(|e| e.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(entries: usize) -> BitmapTier {
        BitmapTier::new(TierConfig {
            entries,
            max_bytes: usize::MAX,
        })
    }

    #[test]
    fn same_crc_different_pixels_is_not_a_hit() {
        let mut t = tier(4);
        let a = Bitmap::new(2, 1, 8, vec![1, 2]);
        let b = Bitmap::new(1, 2, 8, vec![1, 2]);
        assert_eq!(a.crc(), b.crc());

        let ra = t.add(0, &a, 1, false);
        let rb = t.add(0, &b, 2, false);
        assert!(!rb.hit);
        assert_ne!(ra.index, rb.index);
        assert_ne!(a.persistent_key(), b.persistent_key());
    }

    #[test]
    fn restored_entries_are_pinned() {
        let mut t = tier(2);
        let restored = Bitmap::solid(4, 4, 32, 0x00ff_00ff);
        let slot = t.preload(restored.persistent_key(), 1).unwrap();

        let fresh = Bitmap::solid(4, 4, 32, 0x1111_1111);
        let other = Bitmap::solid(4, 4, 32, 0x2222_2222);
        let r1 = t.add(0, &fresh, 2, false);
        let r2 = t.add(0, &other, 3, false);
        assert_ne!(r1.index, slot);
        assert_eq!(r2.index, r1.index, "volatile entry evicted, pinned one kept");

        let hit = t.add(0, &restored, 4, false);
        assert!(hit.hit);
        assert_eq!(hit.index, slot);
    }

    #[test]
    fn pinned_inserts_outlive_newer_volatile_ones() {
        let mut t = tier(2);
        let pinned = t.add(0, &Bitmap::solid(4, 4, 32, 1), 1, true);
        let volatile = t.add(0, &Bitmap::solid(4, 4, 32, 2), 2, false);
        let next = t.add(0, &Bitmap::solid(4, 4, 32, 3), 3, false);
        assert_eq!(next.index, volatile.index);
        assert!(t.add(0, &Bitmap::solid(4, 4, 32, 1), 4, false).hit);
        assert_ne!(pinned.index, next.index);
    }

    #[test]
    fn solid_bitmap_layout() {
        let bmp = Bitmap::solid(2, 2, 16, 0xabcd);
        assert_eq!(bmp.data, vec![0xcd, 0xab, 0xcd, 0xab, 0xcd, 0xab, 0xcd, 0xab]);
        assert_eq!(bytes_per_pixel(15), 2);
        assert_eq!(bytes_per_pixel(24), 3);
    }
}
