//! Rectangle and rectangle-set geometry.
//!
//! Rectangles are half-open: `right` and `bottom` are exclusive, so two
//! rectangles that share a boundary edge do not overlap.

/// An axis-aligned, half-open rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Builds a rectangle from an origin and a size. Edges past the `i32`
    /// range stop at its limits.
    pub const fn from_xywh(x: i32, y: i32, cx: i32, cy: i32) -> Self {
        Self::new(x, y, x.saturating_add(cx), y.saturating_add(cy))
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Returns the overlap of two rectangles, or `None` when they only touch
    /// or are disjoint.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!r.is_empty()).then_some(r)
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.left.saturating_add(dx),
            self.top.saturating_add(dy),
            self.right.saturating_add(dx),
            self.bottom.saturating_add(dy),
        )
    }
}

/// A set of non-overlapping rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    /// A region covering a single rectangle (empty if `rect` is degenerate).
    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    /// Appends a rectangle. The caller guarantees it does not overlap any
    /// rectangle already in the set.
    pub fn add_rect(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn area(&self) -> i64 {
        self.rects
            .iter()
            .map(|r| i64::from(r.width()) * i64::from(r.height()))
            .sum()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    /// Clips every rectangle to `clip`, dropping the ones that fall outside.
    pub fn intersect_rect(&mut self, clip: &Rect) {
        self.rects = self.rects.iter().filter_map(|r| r.intersect(clip)).collect();
    }

    /// Removes `sub` from the region. Each overlapped rectangle is split into
    /// at most four pieces: a full-width band above, a full-width band below,
    /// and the left and right remainders of the middle band.
    pub fn subtract_rect(&mut self, sub: &Rect) {
        if sub.is_empty() {
            return;
        }
        let mut out = Vec::with_capacity(self.rects.len() + 4);
        for r in &self.rects {
            let Some(hit) = r.intersect(sub) else {
                out.push(*r);
                continue;
            };
            let pieces = [
                Rect::new(r.left, r.top, r.right, hit.top),
                Rect::new(r.left, hit.bottom, r.right, r.bottom),
                Rect::new(r.left, hit.top, hit.left, hit.bottom),
                Rect::new(hit.right, hit.top, r.right, hit.bottom),
            ];
            out.extend(pieces.into_iter().filter(|p| !p.is_empty()));
        }
        self.rects = out;
    }
}
