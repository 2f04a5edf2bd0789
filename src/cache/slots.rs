//! Fixed-capacity slot arena shared by every cache class.

/// An occupied slot: the cached value and the stamp of its last touch.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    pub stamp: u64,
    pub value: T,
}

/// A table of `limit` slots. The limit is a protocol constant negotiated with
/// the client, so the table never grows past it.
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    slots: Vec<Option<Slot<T>>>,
}

impl<T> SlotTable<T> {
    /// Creates a table of `limit` empty slots.
    pub fn new(limit: usize) -> Self {
        let mut slots = Vec::with_capacity(limit);
        slots.resize_with(limit, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding a value.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn get(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot<T>> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Index of the first occupied slot whose value satisfies `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|slot| pred(&slot.value)))
    }

    /// Refreshes the recency of an occupied slot. Empty or out-of-range
    /// indices are ignored.
    pub fn touch(&mut self, index: usize, stamp: u64) {
        if let Some(slot) = self.get_mut(index) {
            slot.stamp = stamp;
        }
    }

    /// Picks the slot the next insertion goes to: the first free slot, else
    /// the evictable slot with the smallest stamp. When nothing is evictable
    /// the smallest stamp overall is used, so insertion always succeeds.
    pub fn victim(&self, mut evictable: impl FnMut(&T) -> bool) -> usize {
        if let Some(free) = self.slots.iter().position(Option::is_none) {
            return free;
        }
        self.oldest(&mut evictable)
            .or_else(|| self.oldest(|_| true))
            .unwrap_or(0)
    }

    /// Like [`victim`](Self::victim) with every value evictable, but never
    /// picks a slot below `first`.
    ///
    /// # Arguments
    ///
    /// * `first` - Lowest index that may be handed out.
    ///
    /// # Returns
    ///
    /// The first free slot at or above `first`, else the one there with the
    /// smallest stamp. Falls back to `first` itself when the table has no
    /// slot that high.
    pub fn victim_from(&self, first: usize) -> usize {
        let tail = self.slots.iter().enumerate().skip(first);
        if let Some((free, _)) = tail.clone().find(|(_, s)| s.is_none()) {
            return free;
        }
        tail.filter_map(|(i, s)| s.as_ref().map(|slot| (i, slot.stamp)))
            .min_by_key(|&(_, stamp)| stamp)
            .map_or(first, |(i, _)| i)
    }

    fn oldest(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.iter()
            .filter(|(_, slot)| pred(&slot.value))
            .min_by_key(|(_, slot)| slot.stamp)
            .map(|(i, _)| i)
    }

    /// Stores `value` at `index`.
    ///
    /// # Returns
    ///
    /// Whatever the slot held before, or `None` when it was empty or
    /// `index` is out of range (the value is dropped in that case).
    pub fn put(&mut self, index: usize, value: T, stamp: u64) -> Option<T> {
        let slot = self.slots.get_mut(index)?;
        slot.replace(Slot { stamp, value }).map(|old| old.value)
    }

    /// Empties every slot; the capacity is kept.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    fn iter(&self) -> impl Iterator<Item = (usize, &Slot<T>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|slot| (i, slot)))
    }
}
