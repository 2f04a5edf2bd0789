//! Window dragging.
//!
//! While a drag is in progress only an XOR outline moves; the window itself
//! is moved once, when the button is released.

use crate::orders::Order;
use crate::region::Rect;
use crate::wm::drawable::DrawableId;

/// PATINVERT: drawing the same outline twice restores the screen.
pub const ROP_PATINVERT: u8 = 0x5a;

const OUTLINE_WIDTH: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drag {
    pub window: DrawableId,
    /// Window bounds in screen coordinates when the drag started.
    pub origin: Rect,
    pub grab_x: i32,
    pub grab_y: i32,
    pub dx: i32,
    pub dy: i32,
    pub outline_shown: bool,
}

impl Drag {
    pub fn outline(&self) -> Rect {
        self.origin.offset(self.dx, self.dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(Drag),
}

impl DragState {
    pub fn is_dragging(&self) -> bool {
        matches!(self, DragState::Dragging(_))
    }

    pub fn window(&self) -> Option<DrawableId> {
        match self {
            DragState::Dragging(drag) => Some(drag.window),
            DragState::Idle => None,
        }
    }

    pub fn begin(&mut self, window: DrawableId, origin: Rect, x: i32, y: i32) {
        *self = DragState::Dragging(Drag {
            window,
            origin,
            grab_x: x,
            grab_y: y,
            dx: 0,
            dy: 0,
            outline_shown: false,
        });
    }

    /// Moves the outline to follow the pointer at (`x`, `y`) and returns the
    /// XOR orders that erase the previous outline and draw the new one.
    pub fn update(&mut self, x: i32, y: i32) -> Vec<Order> {
        let DragState::Dragging(drag) = self else {
            return Vec::new();
        };
        let mut orders = Vec::new();
        if drag.outline_shown {
            orders.extend(outline_orders(drag.outline()));
        }
        drag.dx = x - drag.grab_x;
        drag.dy = y - drag.grab_y;
        orders.extend(outline_orders(drag.outline()));
        drag.outline_shown = true;
        orders
    }

    /// Ends the drag. Returns the finished drag and the orders erasing its
    /// outline, or `None` if no drag was active.
    pub fn finish(&mut self) -> Option<(Drag, Vec<Order>)> {
        let DragState::Dragging(drag) = std::mem::take(self) else {
            return None;
        };
        let erase = if drag.outline_shown {
            outline_orders(drag.outline())
        } else {
            Vec::new()
        };
        Some((drag, erase))
    }
}

/// The four frame bars of `rect`, XORed onto the screen.
pub fn outline_orders(rect: Rect) -> Vec<Order> {
    let w = OUTLINE_WIDTH;
    let bars = [
        Rect::new(rect.left, rect.top, rect.right, rect.top + w),
        Rect::new(rect.left, rect.bottom - w, rect.right, rect.bottom),
        Rect::new(rect.left, rect.top + w, rect.left + w, rect.bottom - w),
        Rect::new(rect.right - w, rect.top + w, rect.right, rect.bottom - w),
    ];
    bars.into_iter()
        .filter(|bar| !bar.is_empty())
        .map(|bar| Order::PatBlt {
            rect: bar,
            rop: ROP_PATINVERT,
            fg_color: 0xffffff,
            bg_color: 0,
            brush: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_is_drawn_then_erased() {
        let mut state = DragState::default();
        state.begin(DrawableId(1), Rect::from_xywh(10, 10, 100, 80), 50, 15);

        let first = state.update(60, 20);
        assert_eq!(first.len(), 4, "nothing to erase on the first move");
        let second = state.update(70, 30);
        assert_eq!(second.len(), 8);
        // the erase half repeats the previous outline exactly
        assert_eq!(&second[..4], &first[..]);

        let (drag, erase) = state.finish().unwrap();
        assert_eq!((drag.dx, drag.dy), (20, 15));
        assert_eq!(drag.outline(), Rect::from_xywh(30, 25, 100, 80));
        assert_eq!(erase, second[4..].to_vec());
        assert_eq!(state, DragState::Idle);
        assert!(state.finish().is_none());
    }
}
