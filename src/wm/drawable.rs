//! Drawables: the screen, windows and the controls inside them.
//!
//! The variant set is closed. Behaviour that differs per kind lives in
//! [`Drawable::handle`], [`Drawable::paint`] and [`Drawable::resize`].

use crate::cache::{POINTER_DEFAULT, POINTER_TEXT};
use crate::region::Rect;
use crate::wm::keymap::KeyInfo;

/// Arena handle of a drawable. Handles are non-owning: the tree owns the
/// drawables through parent/child links inside the window manager's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(pub(crate) usize);

/// Message codes exchanged with drawables and forwarded to modules.
pub mod msg {
    pub const PAINT: u32 = 3;
    pub const KEYDOWN: u32 = 15;
    pub const KEYUP: u32 = 16;
    pub const MOUSEMOVE: u32 = 100;
    pub const LBUTTONUP: u32 = 101;
    pub const LBUTTONDOWN: u32 = 102;
    pub const RBUTTONUP: u32 = 103;
    pub const RBUTTONDOWN: u32 = 104;
    pub const BUTTON3UP: u32 = 105;
    pub const BUTTON3DOWN: u32 = 106;
    pub const BUTTON4UP: u32 = 107;
    pub const BUTTON4DOWN: u32 = 108;
    pub const BUTTON5UP: u32 = 109;
    pub const BUTTON5DOWN: u32 = 110;
    pub const INVALIDATE: u32 = 200;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    WheelUp,
    WheelDown,
}

impl MouseButton {
    /// The module message code for this button going up or down.
    pub fn message(self, down: bool) -> u32 {
        let (up, dn) = match self {
            MouseButton::Left => (msg::LBUTTONUP, msg::LBUTTONDOWN),
            MouseButton::Right => (msg::RBUTTONUP, msg::RBUTTONDOWN),
            MouseButton::Middle => (msg::BUTTON3UP, msg::BUTTON3DOWN),
            MouseButton::WheelUp => (msg::BUTTON4UP, msg::BUTTON4DOWN),
            MouseButton::WheelDown => (msg::BUTTON5UP, msg::BUTTON5DOWN),
        };
        if down {
            dn
        } else {
            up
        }
    }
}

/// Input delivered to a drawable. Coordinates are relative to the drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmMsg {
    Paint,
    MouseMove { x: i32, y: i32 },
    ButtonDown { button: MouseButton, x: i32, y: i32 },
    ButtonUp { button: MouseButton, x: i32, y: i32 },
    KeyDown { scan_code: u8, key: KeyInfo },
    KeyUp { scan_code: u8, key: KeyInfo },
    FocusGained,
    FocusLost,
    Invalidate,
}

/// What a drawable did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored,
    /// Handled; the drawable needs repainting.
    Redraw,
    /// A button was released over itself.
    Clicked { control_id: i32 },
    /// Edit text or list selection changed.
    Changed { control_id: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawableKind {
    Bitmap,
    Window {
        /// Height of the caption bar that can be grabbed for dragging.
        header_height: i32,
        focused_control: Option<DrawableId>,
    },
    Screen,
    Button {
        state: ButtonState,
    },
    Image,
    Edit {
        text: String,
        cursor: usize,
        password_char: Option<char>,
    },
    Label,
    Combo {
        items: Vec<String>,
        selected: usize,
    },
    Special,
    ListBox {
        items: Vec<String>,
        selected: usize,
    },
    /// A drawable backed by an offscreen surface of the bitmap cache.
    Offscreen {
        surface_id: usize,
    },
}

/// A fill produced by [`Drawable::paint`], in drawable coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub rect: Rect,
    pub color: u32,
}

pub const COLOR_BLACK: u32 = 0x000000;
pub const COLOR_GREY: u32 = 0xc0c0c0;
pub const COLOR_DARK_GREY: u32 = 0x808080;
pub const COLOR_WHITE: u32 = 0xffffff;
pub const COLOR_DARK_BLUE: u32 = 0x00007f;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drawable {
    pub kind: DrawableKind,
    /// Position relative to the parent.
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub parent: Option<DrawableId>,
    /// Children in z-order, bottom first.
    pub children: Vec<DrawableId>,
    pub control_id: i32,
    pub bg_color: u32,
    pub tab_stop: bool,
    pub focused: bool,
    /// Pointer cache index shown while the mouse is over this drawable.
    pub pointer: usize,
}

impl Drawable {
    pub fn new(kind: DrawableKind, left: i32, top: i32, width: i32, height: i32) -> Self {
        let tab_stop = matches!(
            kind,
            DrawableKind::Button { .. }
                | DrawableKind::Edit { .. }
                | DrawableKind::Combo { .. }
                | DrawableKind::ListBox { .. }
        );
        let pointer = match kind {
            DrawableKind::Edit { .. } => POINTER_TEXT,
            _ => POINTER_DEFAULT,
        };
        Self {
            kind,
            left,
            top,
            width,
            height,
            parent: None,
            children: Vec::new(),
            control_id: 0,
            bg_color: COLOR_GREY,
            tab_stop,
            focused: false,
            pointer,
        }
    }

    pub fn window(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self::new(
            DrawableKind::Window {
                header_height: 21,
                focused_control: None,
            },
            left,
            top,
            width,
            height,
        )
    }

    pub fn with_id(mut self, control_id: i32) -> Self {
        self.control_id = control_id;
        self
    }

    /// Bounds in parent coordinates.
    pub fn rect(&self) -> Rect {
        Rect::from_xywh(self.left, self.top, self.width, self.height)
    }

    /// `true` if (`x`, `y`), relative to the drawable, lies on its caption bar.
    pub fn on_header(&self, x: i32, y: i32) -> bool {
        match self.kind {
            DrawableKind::Window { header_height, .. } => {
                x >= 0 && x < self.width && y >= 0 && y < header_height
            }
            _ => false,
        }
    }

    pub fn handle(&mut self, msg: WmMsg) -> Outcome {
        let control_id = self.control_id;
        match (&mut self.kind, msg) {
            (_, WmMsg::FocusGained) | (_, WmMsg::FocusLost) => {
                self.focused = msg == WmMsg::FocusGained;
                Outcome::Redraw
            }
            (_, WmMsg::Paint) | (_, WmMsg::Invalidate) => Outcome::Redraw,

            (DrawableKind::Button { state }, WmMsg::ButtonDown { button: MouseButton::Left, .. }) => {
                *state = ButtonState::Down;
                Outcome::Redraw
            }
            (DrawableKind::Button { state }, WmMsg::ButtonUp { button: MouseButton::Left, x, y }) => {
                let was_down = *state == ButtonState::Down;
                *state = ButtonState::Up;
                if was_down && x >= 0 && y >= 0 && x < self.width && y < self.height {
                    Outcome::Clicked { control_id }
                } else {
                    Outcome::Redraw
                }
            }
            (DrawableKind::Button { .. }, WmMsg::KeyDown { key, .. }) if key.chr == Some(' ') || key.chr == Some('\r') => {
                Outcome::Clicked { control_id }
            }

            (DrawableKind::Edit { text, cursor, .. }, WmMsg::KeyDown { key, .. }) => {
                edit_key(text, cursor, key, control_id)
            }

            (DrawableKind::Combo { items, selected }, WmMsg::KeyDown { key, .. })
            | (DrawableKind::ListBox { items, selected }, WmMsg::KeyDown { key, .. }) => {
                step_selection(items, selected, key, control_id)
            }
            (DrawableKind::Combo { items, selected }, WmMsg::ButtonDown { button: MouseButton::Left, .. }) => {
                if items.is_empty() {
                    return Outcome::Ignored;
                }
                *selected = (*selected + 1) % items.len();
                Outcome::Changed { control_id }
            }
            (DrawableKind::ListBox { items, selected }, WmMsg::ButtonDown { button: MouseButton::Left, y, .. }) => {
                let row = usize::try_from(y / LIST_ROW_HEIGHT).unwrap_or(0);
                if row < items.len() && row != *selected {
                    *selected = row;
                    Outcome::Changed { control_id }
                } else {
                    Outcome::Ignored
                }
            }

            _ => Outcome::Ignored,
        }
    }

    /// Background fills for this drawable in its own coordinates. Text and
    /// bevel rendering belong to the widget renderer.
    pub fn paint(&self) -> Vec<Fill> {
        let full = Rect::from_xywh(0, 0, self.width, self.height);
        match &self.kind {
            DrawableKind::Window { header_height, .. } => {
                let header = if self.focused { COLOR_DARK_BLUE } else { COLOR_DARK_GREY };
                vec![
                    Fill { rect: full, color: self.bg_color },
                    Fill {
                        rect: Rect::from_xywh(0, 0, self.width, *header_height),
                        color: header,
                    },
                ]
            }
            DrawableKind::Button { state } => {
                let color = match state {
                    ButtonState::Up => self.bg_color,
                    ButtonState::Down => COLOR_DARK_GREY,
                };
                vec![Fill { rect: full, color }]
            }
            DrawableKind::Edit { .. } | DrawableKind::Combo { .. } | DrawableKind::ListBox { .. } => {
                vec![Fill { rect: full, color: COLOR_WHITE }]
            }
            DrawableKind::Offscreen { .. } | DrawableKind::Bitmap | DrawableKind::Image => Vec::new(),
            DrawableKind::Screen | DrawableKind::Label | DrawableKind::Special => {
                vec![Fill { rect: full, color: self.bg_color }]
            }
        }
    }

    pub fn resize(&mut self, width: i32, height: i32) {
        self.width = width.max(0);
        self.height = height.max(0);
        if let DrawableKind::Edit { text, cursor, .. } = &mut self.kind {
            *cursor = (*cursor).min(text.chars().count());
        }
    }
}

const LIST_ROW_HEIGHT: i32 = 16;

fn edit_key(text: &mut String, cursor: &mut usize, key: KeyInfo, control_id: i32) -> Outcome {
    const BACKSPACE: u32 = 0xff08;
    const LEFT: u32 = 0xff51;
    const RIGHT: u32 = 0xff53;
    const HOME: u32 = 0xff50;
    const END: u32 = 0xff57;
    const DELETE: u32 = 0xffff;

    let len = text.chars().count();
    let byte_at = |s: &String, pos: usize| s.char_indices().nth(pos).map_or(s.len(), |(i, _)| i);
    match key.sym {
        BACKSPACE if *cursor > 0 => {
            *cursor -= 1;
            let at = byte_at(text, *cursor);
            text.remove(at);
            Outcome::Changed { control_id }
        }
        DELETE if *cursor < len => {
            let at = byte_at(text, *cursor);
            text.remove(at);
            Outcome::Changed { control_id }
        }
        LEFT => {
            *cursor = cursor.saturating_sub(1);
            Outcome::Redraw
        }
        RIGHT => {
            *cursor = (*cursor + 1).min(len);
            Outcome::Redraw
        }
        HOME => {
            *cursor = 0;
            Outcome::Redraw
        }
        END => {
            *cursor = len;
            Outcome::Redraw
        }
        _ => match key.chr {
            Some(c) if !c.is_control() => {
                let at = byte_at(text, *cursor);
                text.insert(at, c);
                *cursor += 1;
                Outcome::Changed { control_id }
            }
            _ => Outcome::Ignored,
        },
    }
}

fn step_selection(items: &[String], selected: &mut usize, key: KeyInfo, control_id: i32) -> Outcome {
    const UP: u32 = 0xff52;
    const DOWN: u32 = 0xff54;
    let next = match key.sym {
        UP => selected.saturating_sub(1),
        DOWN => (*selected + 1).min(items.len().saturating_sub(1)),
        _ => return Outcome::Ignored,
    };
    if next == *selected {
        return Outcome::Ignored;
    }
    *selected = next;
    Outcome::Changed { control_id }
}
