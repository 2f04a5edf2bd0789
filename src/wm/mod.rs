//! Window manager.
//!
//! Owns the session's [`Cache`] and the drawable tree. The tree lives in an
//! arena: parents own their children through the arena, and every other
//! reference (focus, drag, button capture) is a plain [`DrawableId`].
//!
//! Once a module is running, input is no longer routed to drawables; the
//! input methods return a [`ModuleEvent`] for the session to forward.

pub mod cursors;
pub mod drag;
pub mod drawable;
pub mod keymap;

use log::{debug, warn};

pub use drawable::{Drawable, DrawableId, DrawableKind, MouseButton, Outcome, WmMsg};

use crate::cache::{Cache, CacheConfig, POINTER_DEFAULT, POINTER_TEXT};
use crate::error::Result;
use crate::orders::{Order, UpdateSink};
use crate::region::{Rect, Region};
use drag::{Drag, DragState};
use drawable::msg;
use keymap::{Keymap, Modifiers, KBD_FLAG_EXT, KBD_FLAG_UP, SC_ALT, SC_CAPSLOCK, SC_LSHIFT, SC_NUMLOCK, SC_RSHIFT, SC_SCROLLLOCK};

pub const PTRFLAGS_WHEEL_NEGATIVE: u16 = 0x0100;
pub const PTRFLAGS_WHEEL: u16 = 0x0200;
pub const PTRFLAGS_MOVE: u16 = 0x0800;
pub const PTRFLAGS_BUTTON1: u16 = 0x1000;
pub const PTRFLAGS_BUTTON2: u16 = 0x2000;
pub const PTRFLAGS_BUTTON3: u16 = 0x4000;
pub const PTRFLAGS_DOWN: u16 = 0x8000;

pub const SYNC_SCROLL_LOCK: u32 = 1;
pub const SYNC_NUM_LOCK: u32 = 2;
pub const SYNC_CAPS_LOCK: u32 = 4;

/// Message code of a keyboard synchronize event forwarded to modules.
pub const KEYBRD_SYNC: u32 = 17;

const SCREEN_COLOR: u32 = 0x3a6ea5;
const KEYSYM_TAB: u32 = 0xff09;

/// An input event for the running module: `event(msg, p1, p2, p3, p4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleEvent {
    pub msg: u32,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
    pub p4: i64,
}

impl ModuleEvent {
    pub fn new(msg: u32, p1: i64, p2: i64, p3: i64, p4: i64) -> Self {
        Self { msg, p1, p2, p3, p4 }
    }
}

/// A message delivered to a drawable and what the drawable made of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub target: DrawableId,
    pub msg: WmMsg,
    pub outcome: Outcome,
}

pub struct WindowManager {
    cache: Cache,
    arena: Vec<Option<Drawable>>,
    screen: DrawableId,
    focused_window: Option<DrawableId>,
    drag: DragState,
    /// Drawable that received the last button-down; it also gets the release.
    button_down: Option<DrawableId>,
    mouse_x: i32,
    mouse_y: i32,
    keys: [bool; 256],
    altgr: bool,
    caps_lock: bool,
    num_lock: bool,
    scroll_lock: bool,
    keymap: &'static Keymap,
    current_pointer: usize,
    module_active: bool,
    notifications: Vec<Notification>,
}

impl WindowManager {
    pub fn new(width: i32, height: i32, cache_config: CacheConfig) -> Self {
        let mut screen = Drawable::new(DrawableKind::Screen, 0, 0, width, height);
        screen.bg_color = SCREEN_COLOR;
        let mut wm = Self {
            cache: Cache::new(cache_config),
            arena: vec![Some(screen)],
            screen: DrawableId(0),
            focused_window: None,
            drag: DragState::Idle,
            button_down: None,
            mouse_x: 0,
            mouse_y: 0,
            keys: [false; 256],
            altgr: false,
            caps_lock: false,
            num_lock: false,
            scroll_lock: false,
            keymap: Keymap::us(),
            current_pointer: POINTER_DEFAULT,
            module_active: false,
            notifications: Vec::new(),
        };
        wm.load_static_pointers();
        wm
    }

    fn load_static_pointers(&mut self) {
        for (index, pointer) in [(POINTER_DEFAULT, cursors::arrow()), (POINTER_TEXT, cursors::ibeam())] {
            if let Err(e) = self.cache.add_pointer_static(pointer, index) {
                warn!("failed to install default pointer {}: {}", index, e);
            }
        }
    }

    /// Empties every cache and puts the default cursors back in their slots.
    pub fn reset_cache(&mut self) {
        self.cache.reset();
        self.load_static_pointers();
        self.current_pointer = POINTER_DEFAULT;
    }

    /// Uploads the default cursors to the client and selects the arrow.
    ///
    /// The client's pointer cache is empty when the session is established
    /// and after a reset; both paths call this.
    pub fn send_static_pointers(&mut self, sink: &mut dyn UpdateSink) -> Result<()> {
        let mut orders: Vec<Order> = [POINTER_DEFAULT, POINTER_TEXT]
            .into_iter()
            .filter_map(|index| {
                let pointer = self.cache.pointer(index)?.clone();
                Some(Order::CachePointer { index, pointer })
            })
            .collect();
        orders.push(Order::SetPointer { index: POINTER_DEFAULT });
        self.current_pointer = POINTER_DEFAULT;
        send_batch(sink, orders)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn screen(&self) -> DrawableId {
        self.screen
    }

    pub fn get(&self, id: DrawableId) -> Option<&Drawable> {
        self.arena.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: DrawableId) -> Option<&mut Drawable> {
        self.arena.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn focused_window(&self) -> Option<DrawableId> {
        self.focused_window
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_dragging()
    }

    pub fn mouse_position(&self) -> (i32, i32) {
        (self.mouse_x, self.mouse_y)
    }

    pub fn modifiers(&self) -> Modifiers {
        Modifiers {
            shift: self.keys[SC_LSHIFT] || self.keys[SC_RSHIFT],
            altgr: self.altgr,
            caps_lock: self.caps_lock,
            num_lock: self.num_lock,
            scroll_lock: self.scroll_lock,
        }
    }

    pub fn set_module_active(&mut self, active: bool) {
        self.module_active = active;
    }

    pub fn module_active(&self) -> bool {
        self.module_active
    }

    /// Drains the messages delivered to drawables since the last call.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Inserts `drawable` as the topmost child of `parent`.
    pub fn add_child(&mut self, parent: DrawableId, mut drawable: Drawable) -> Option<DrawableId> {
        self.get(parent)?;
        drawable.parent = Some(parent);
        let id = match self.arena.iter().position(Option::is_none) {
            Some(free) => {
                self.arena[free] = Some(drawable);
                DrawableId(free)
            }
            None => {
                self.arena.push(Some(drawable));
                DrawableId(self.arena.len() - 1)
            }
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        Some(id)
    }

    /// Removes `id` and its whole subtree. The screen cannot be removed.
    pub fn remove(&mut self, id: DrawableId) {
        if id == self.screen {
            warn!("refusing to remove the screen drawable");
            return;
        }
        let Some(parent) = self.get(id).and_then(|d| d.parent) else {
            return;
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|&c| c != id);
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.arena.get_mut(next.0).and_then(Option::take) {
                stack.extend(node.children);
            }
            if self.focused_window == Some(next) {
                self.focused_window = None;
            }
            if self.button_down == Some(next) {
                self.button_down = None;
            }
            if self.drag.window() == Some(next) {
                self.drag = DragState::Idle;
            }
        }
    }

    /// Moves `id` to the top of its siblings.
    pub fn raise(&mut self, id: DrawableId) {
        let Some(parent) = self.get(id).and_then(|d| d.parent) else {
            return;
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|&c| c != id);
            p.children.push(id);
        }
    }

    /// Bounds of `id` in screen coordinates.
    pub fn screen_rect(&self, id: DrawableId) -> Option<Rect> {
        let node = self.get(id)?;
        let mut rect = node.rect();
        let mut parent = node.parent;
        while let Some(p) = parent {
            let pnode = self.get(p)?;
            rect = rect.offset(pnode.left, pnode.top);
            parent = pnode.parent;
        }
        Some(rect)
    }

    fn relative(&self, id: DrawableId, x: i32, y: i32) -> (i32, i32) {
        self.screen_rect(id)
            .map_or((x, y), |r| (x - r.left, y - r.top))
    }

    /// The child of the screen that contains `id`.
    pub fn top_window(&self, id: DrawableId) -> Option<DrawableId> {
        let mut current = id;
        loop {
            let parent = self.get(current)?.parent?;
            if parent == self.screen {
                return Some(current);
            }
            current = parent;
        }
    }

    /// The part of `rect` (screen coordinates) where `id` is visible: clipped
    /// by every ancestor and with all higher siblings at each level removed.
    /// With `clip_children` the drawable's own children are removed as well.
    pub fn visible_region(&self, id: DrawableId, rect: Rect, clip_children: bool) -> Region {
        let Some(bounds) = self.screen_rect(id) else {
            return Region::new();
        };
        let mut region = Region::from_rect(rect);
        region.intersect_rect(&bounds);

        if clip_children {
            if let Some(node) = self.get(id) {
                for &child in &node.children {
                    if let Some(r) = self.screen_rect(child) {
                        region.subtract_rect(&r);
                    }
                }
            }
        }

        let mut current = id;
        while let Some(parent) = self.get(current).and_then(|d| d.parent) {
            let (Some(pnode), Some(pbounds)) = (self.get(parent), self.screen_rect(parent)) else {
                break;
            };
            region.intersect_rect(&pbounds);
            let above = pnode
                .children
                .iter()
                .skip_while(|&&c| c != current)
                .skip(1);
            for &sibling in above {
                if let Some(r) = self.screen_rect(sibling) {
                    region.subtract_rect(&r);
                }
            }
            if region.is_empty() {
                break;
            }
            current = parent;
        }
        region
    }

    /// The topmost drawable under (`x`, `y`); the screen if nothing else is.
    pub fn hit_test(&self, x: i32, y: i32) -> DrawableId {
        let mut current = self.screen;
        'descend: loop {
            let Some(node) = self.get(current) else {
                return current;
            };
            for &child in node.children.iter().rev() {
                if self.screen_rect(child).is_some_and(|r| r.contains_point(x, y)) {
                    current = child;
                    continue 'descend;
                }
            }
            return current;
        }
    }

    fn dispatch(&mut self, target: DrawableId, msg: WmMsg) -> Outcome {
        let Some(node) = self.get_mut(target) else {
            return Outcome::Ignored;
        };
        let outcome = node.handle(msg);
        if let Outcome::Clicked { control_id } = outcome {
            debug!("control {} clicked", control_id);
        }
        self.notifications.push(Notification {
            target,
            msg,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Moves focus to `window`. The old holder is told it lost focus before
    /// the new one is told it gained it.
    pub fn set_focused(&mut self, window: Option<DrawableId>) {
        if window == self.focused_window {
            return;
        }
        let old = std::mem::replace(&mut self.focused_window, window);
        if let Some(old) = old {
            self.dispatch(old, WmMsg::FocusLost);
        }
        if let Some(new) = window {
            self.dispatch(new, WmMsg::FocusGained);
        }
    }

    /// Repaints `id` and everything inside it.
    pub fn invalidate(&mut self, id: DrawableId, sink: &mut dyn UpdateSink) -> Result<()> {
        let Some(area) = self.screen_rect(id) else {
            return Ok(());
        };
        let mut orders = Vec::new();
        self.collect_paint(id, &area, &mut orders);
        send_batch(sink, orders)
    }

    /// Repaints whatever lies under `rect` on the screen.
    pub fn invalidate_rect(&mut self, rect: Rect, sink: &mut dyn UpdateSink) -> Result<()> {
        let mut orders = Vec::new();
        self.collect_paint(self.screen, &rect, &mut orders);
        send_batch(sink, orders)
    }

    fn collect_paint(&self, id: DrawableId, area: &Rect, orders: &mut Vec<Order>) {
        let (Some(node), Some(abs)) = (self.get(id), self.screen_rect(id)) else {
            return;
        };
        let Some(clip) = abs.intersect(area) else {
            return;
        };
        let visible = self.visible_region(id, clip, true);
        for fill in node.paint() {
            let rect = fill.rect.offset(abs.left, abs.top);
            for part in visible.rects().iter().filter_map(|v| rect.intersect(v)) {
                orders.push(Order::OpaqueRect { rect: part, color: fill.color });
            }
        }
        for &child in &node.children {
            self.collect_paint(child, area, orders);
        }
    }

    fn update_pointer(&mut self, target: DrawableId, sink: &mut dyn UpdateSink) -> Result<()> {
        let Some(pointer) = self.get(target).map(|d| d.pointer) else {
            return Ok(());
        };
        if pointer != self.current_pointer {
            self.current_pointer = pointer;
            sink.send(Order::SetPointer { index: pointer })?;
        }
        Ok(())
    }

    pub fn mouse_move(&mut self, x: i32, y: i32, sink: &mut dyn UpdateSink) -> Result<Option<ModuleEvent>> {
        self.mouse_x = x;
        self.mouse_y = y;
        if self.drag.is_dragging() {
            let orders = self.drag.update(x, y);
            send_batch(sink, orders)?;
            return Ok(None);
        }
        if self.module_active {
            return Ok(Some(ModuleEvent::new(msg::MOUSEMOVE, x.into(), y.into(), 0, 0)));
        }
        let target = self.button_down.unwrap_or_else(|| self.hit_test(x, y));
        self.update_pointer(target, sink)?;
        let (rx, ry) = self.relative(target, x, y);
        if self.dispatch(target, WmMsg::MouseMove { x: rx, y: ry }) == Outcome::Redraw {
            self.invalidate(target, sink)?;
        }
        Ok(None)
    }

    pub fn mouse_click(
        &mut self,
        x: i32,
        y: i32,
        button: MouseButton,
        down: bool,
        sink: &mut dyn UpdateSink,
    ) -> Result<Option<ModuleEvent>> {
        self.mouse_x = x;
        self.mouse_y = y;
        if !down && button == MouseButton::Left {
            if let Some((drag, erase)) = self.drag.finish() {
                send_batch(sink, erase)?;
                self.commit_drag(drag, sink)?;
                return Ok(None);
            }
        }
        if self.module_active {
            return Ok(Some(ModuleEvent::new(button.message(down), x.into(), y.into(), 0, 0)));
        }

        if !down {
            let target = self.button_down.take().unwrap_or_else(|| self.hit_test(x, y));
            let (rx, ry) = self.relative(target, x, y);
            if self.dispatch(target, WmMsg::ButtonUp { button, x: rx, y: ry }) != Outcome::Ignored {
                self.invalidate(target, sink)?;
            }
            return Ok(None);
        }

        let target = self.hit_test(x, y);
        if let Some(window) = self.top_window(target) {
            if self.focused_window != Some(window) {
                self.set_focused(Some(window));
                self.raise(window);
                self.invalidate(window, sink)?;
            }
            if button == MouseButton::Left && target == window {
                let (rx, ry) = self.relative(window, x, y);
                let on_header = self.get(window).is_some_and(|w| w.on_header(rx, ry));
                if let (true, Some(origin)) = (on_header, self.screen_rect(window)) {
                    debug!("starting drag of {:?}", window);
                    self.drag.begin(window, origin, x, y);
                    return Ok(None);
                }
            }
            if self.get(target).is_some_and(|d| d.tab_stop) {
                self.set_focused_control(window, target);
            }
        }
        self.button_down = Some(target);
        let (rx, ry) = self.relative(target, x, y);
        if self.dispatch(target, WmMsg::ButtonDown { button, x: rx, y: ry }) != Outcome::Ignored {
            self.invalidate(target, sink)?;
        }
        Ok(None)
    }

    fn commit_drag(&mut self, drag: Drag, sink: &mut dyn UpdateSink) -> Result<()> {
        if drag.dx == 0 && drag.dy == 0 {
            return Ok(());
        }
        if let Some(window) = self.get_mut(drag.window) {
            window.left += drag.dx;
            window.top += drag.dy;
        }
        self.invalidate_rect(drag.origin, sink)?;
        self.invalidate(drag.window, sink)
    }

    fn set_focused_control(&mut self, window: DrawableId, control: DrawableId) {
        if let Some(Drawable {
            kind: DrawableKind::Window { focused_control, .. },
            ..
        }) = self.get_mut(window)
        {
            *focused_control = Some(control);
        }
    }

    fn focused_control(&self, window: DrawableId) -> Option<DrawableId> {
        match self.get(window)?.kind {
            DrawableKind::Window { focused_control, .. } => focused_control,
            _ => None,
        }
    }

    /// Moves the window's focused control to the next tab stop.
    fn focus_next_control(&mut self, window: DrawableId) {
        let Some(node) = self.get(window) else {
            return;
        };
        let stops: Vec<DrawableId> = node
            .children
            .iter()
            .copied()
            .filter(|&c| self.get(c).is_some_and(|d| d.tab_stop))
            .collect();
        if stops.is_empty() {
            return;
        }
        let next = match self.focused_control(window).and_then(|c| stops.iter().position(|&s| s == c)) {
            Some(i) => stops[(i + 1) % stops.len()],
            None => stops[0],
        };
        self.set_focused_control(window, next);
    }

    /// Handles a keyboard event. `device_flags` carries the up and extended
    /// bits of the client's keyboard event.
    pub fn key(&mut self, device_flags: u16, scan_code: u8, sink: &mut dyn UpdateSink) -> Result<Option<ModuleEvent>> {
        let sc = usize::from(scan_code);
        let up = device_flags & KBD_FLAG_UP != 0;
        let ext = device_flags & KBD_FLAG_EXT != 0;
        self.keys[sc] = !up;
        if sc == SC_ALT && ext {
            self.altgr = !up;
        }
        if !up {
            match sc {
                SC_CAPSLOCK => self.caps_lock = !self.caps_lock,
                SC_NUMLOCK => self.num_lock = !self.num_lock,
                SC_SCROLLLOCK => self.scroll_lock = !self.scroll_lock,
                _ => {}
            }
        }
        let key = self.keymap.key_info(device_flags, scan_code, self.modifiers());

        if self.module_active {
            let code = if up { msg::KEYUP } else { msg::KEYDOWN };
            let chr = key.chr.map_or(0, |c| i64::from(u32::from(c)));
            return Ok(Some(ModuleEvent::new(
                code,
                chr,
                key.sym.into(),
                sc as i64,
                device_flags.into(),
            )));
        }

        let Some(window) = self.focused_window else {
            return Ok(None);
        };
        if !up && key.sym == KEYSYM_TAB {
            self.focus_next_control(window);
            return Ok(None);
        }
        let target = self.focused_control(window).unwrap_or(window);
        let message = if up {
            WmMsg::KeyUp { scan_code, key }
        } else {
            WmMsg::KeyDown { scan_code, key }
        };
        match self.dispatch(target, message) {
            Outcome::Ignored => {}
            _ => self.invalidate(target, sink)?,
        }
        Ok(None)
    }

    /// Applies the lock state of a client synchronize event.
    pub fn key_sync(&mut self, flags: u32) -> Option<ModuleEvent> {
        self.scroll_lock = flags & SYNC_SCROLL_LOCK != 0;
        self.num_lock = flags & SYNC_NUM_LOCK != 0;
        self.caps_lock = flags & SYNC_CAPS_LOCK != 0;
        self.module_active
            .then(|| ModuleEvent::new(KEYBRD_SYNC, 0, 0, 0, flags.into()))
    }

    /// Decodes a client pointer event into moves and button transitions.
    pub fn process_input_mouse(
        &mut self,
        flags: u16,
        x: i32,
        y: i32,
        sink: &mut dyn UpdateSink,
    ) -> Result<Vec<ModuleEvent>> {
        let mut events = Vec::new();
        if flags & PTRFLAGS_MOVE != 0 {
            events.extend(self.mouse_move(x, y, sink)?);
        }
        let down = flags & PTRFLAGS_DOWN != 0;
        for (bit, button) in [
            (PTRFLAGS_BUTTON1, MouseButton::Left),
            (PTRFLAGS_BUTTON2, MouseButton::Right),
            (PTRFLAGS_BUTTON3, MouseButton::Middle),
        ] {
            if flags & bit != 0 {
                events.extend(self.mouse_click(x, y, button, down, sink)?);
            }
        }
        if flags & PTRFLAGS_WHEEL != 0 {
            let button = if flags & PTRFLAGS_WHEEL_NEGATIVE != 0 {
                MouseButton::WheelDown
            } else {
                MouseButton::WheelUp
            };
            events.extend(self.mouse_click(x, y, button, true, sink)?);
            events.extend(self.mouse_click(x, y, button, false, sink)?);
        }
        Ok(events)
    }

    /// Resizes the screen after a desktop size change.
    pub fn resize(&mut self, width: i32, height: i32) {
        let screen = self.screen;
        if let Some(node) = self.get_mut(screen) {
            node.resize(width, height);
        }
    }
}

/// Sends `orders` inside one update bracket; sends nothing for an empty batch.
fn send_batch(sink: &mut dyn UpdateSink, orders: Vec<Order>) -> Result<()> {
    if orders.is_empty() {
        return Ok(());
    }
    sink.send(Order::BeginUpdate)?;
    for order in orders {
        sink.send(order)?;
    }
    sink.send(Order::EndUpdate)
}
