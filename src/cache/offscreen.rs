//! Offscreen bitmap (surface) cache.
//!
//! Surfaces are addressed by the id the module picks. A surface that is the
//! source or target of a paint the client has not acknowledged yet cannot be
//! freed: its delete is parked on a pending list until [`OffscreenCache::acknowledge`].

use log::debug;

use crate::error::CacheError;

/// Number of offscreen surface ids.
pub const OFFSCREEN_ENTRIES: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffscreenItem {
    pub id: usize,
    pub width: u16,
    pub height: u16,
    /// Paints referencing this surface since the last acknowledgement.
    pub in_flight: u32,
}

#[derive(Debug, Clone)]
pub struct OffscreenCache {
    items: Vec<Option<OffscreenItem>>,
    /// Removed while referenced, still live until acknowledged.
    pending_delete: Vec<usize>,
    /// Freed ids the client has not been told about yet.
    delete_list: Vec<usize>,
}

impl Default for OffscreenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OffscreenCache {
    pub fn new() -> Self {
        let mut items = Vec::with_capacity(OFFSCREEN_ENTRIES);
        items.resize_with(OFFSCREEN_ENTRIES, || None);
        Self {
            items,
            pending_delete: Vec::new(),
            delete_list: Vec::new(),
        }
    }

    fn check(&self, id: usize) -> Result<(), CacheError> {
        if id < self.items.len() {
            Ok(())
        } else {
            Err(CacheError::IndexOutOfRange {
                index: id,
                capacity: self.items.len(),
            })
        }
    }

    /// Creates (or re-creates) surface `id`. Re-creating an id whose delete
    /// is still pending cancels that delete.
    pub fn add(&mut self, id: usize, width: u16, height: u16) -> Result<(), CacheError> {
        self.check(id)?;
        if let Some(pos) = self.pending_delete.iter().position(|&p| p == id) {
            debug!("offscreen surface {} re-created while delete pending", id);
            self.pending_delete.swap_remove(pos);
        }
        self.delete_list.retain(|&d| d != id);
        self.items[id] = Some(OffscreenItem {
            id,
            width,
            height,
            in_flight: 0,
        });
        Ok(())
    }

    pub fn get(&self, id: usize) -> Result<&OffscreenItem, CacheError> {
        self.check(id)?;
        self.items[id].as_ref().ok_or(CacheError::IndexOutOfRange {
            index: id,
            capacity: self.items.len(),
        })
    }

    /// Records that an in-flight paint uses surface `id`.
    pub fn reference(&mut self, id: usize) -> Result<(), CacheError> {
        self.check(id)?;
        match self.items[id].as_mut() {
            Some(item) => {
                item.in_flight += 1;
                Ok(())
            }
            None => Err(CacheError::IndexOutOfRange {
                index: id,
                capacity: self.items.len(),
            }),
        }
    }

    /// Removes surface `id`. Returns `true` if it was freed immediately and
    /// `false` if the delete was deferred (or the id was not allocated).
    pub fn remove(&mut self, id: usize) -> Result<bool, CacheError> {
        self.check(id)?;
        let Some(item) = self.items[id].as_ref() else {
            return Ok(false);
        };
        if item.in_flight > 0 {
            if !self.pending_delete.contains(&id) {
                self.pending_delete.push(id);
            }
            return Ok(false);
        }
        self.items[id] = None;
        self.delete_list.push(id);
        Ok(true)
    }

    pub fn is_pending_delete(&self, id: usize) -> bool {
        self.pending_delete.contains(&id)
    }

    /// The client acknowledged every outstanding paint: references drop to
    /// zero and deferred deletes are finalized. Returns the finalized ids.
    pub fn acknowledge(&mut self) -> Vec<usize> {
        for item in self.items.iter_mut().flatten() {
            item.in_flight = 0;
        }
        let finalized = std::mem::take(&mut self.pending_delete);
        for &id in &finalized {
            self.items[id] = None;
            self.delete_list.push(id);
        }
        finalized
    }

    /// Drains the ids the client must drop from its own surface cache.
    pub fn take_delete_list(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.delete_list)
    }

    pub fn occupied(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.items.iter_mut().for_each(|i| *i = None);
        self.pending_delete.clear();
        self.delete_list.clear();
    }
}
