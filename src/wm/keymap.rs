//! Scan code to keysym/character translation.
//!
//! Layout tables normally come from the installed keymap files; a US layout
//! is built in so a session always has something to translate with.

use once_cell::sync::Lazy;

/// Device flag marking an extended (E0-prefixed) scan code.
pub const KBD_FLAG_EXT: u16 = 0x0100;
/// Device flag set on key release.
pub const KBD_FLAG_UP: u16 = 0x8000;

pub const SC_LSHIFT: usize = 42;
pub const SC_RSHIFT: usize = 54;
pub const SC_ALT: usize = 56;
pub const SC_CAPSLOCK: usize = 58;
pub const SC_NUMLOCK: usize = 69;
pub const SC_SCROLLLOCK: usize = 70;

/// Keysym plus the character it produces (`None` for non-printing keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyInfo {
    pub sym: u32,
    pub chr: Option<char>,
}

impl KeyInfo {
    const fn sym(sym: u32) -> Self {
        Self { sym, chr: None }
    }

    const fn chr(c: char) -> Self {
        Self { sym: c as u32, chr: Some(c) }
    }
}

/// Live modifier and lock state used during translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub altgr: bool,
    pub caps_lock: bool,
    pub num_lock: bool,
    pub scroll_lock: bool,
}

/// Five 256-entry tables indexed by scan code, one per modifier combination.
#[derive(Debug, Clone)]
pub struct Keymap {
    pub noshift: Vec<KeyInfo>,
    pub shift: Vec<KeyInfo>,
    pub altgr: Vec<KeyInfo>,
    pub capslock: Vec<KeyInfo>,
    pub shiftcapslock: Vec<KeyInfo>,
}

static US_LAYOUT: Lazy<Keymap> = Lazy::new(Keymap::build_us);

const ROW_CHARS: [(usize, &str, &str); 4] = [
    (2, "1234567890-=", "!@#$%^&*()_+"),
    (16, "qwertyuiop[]", "QWERTYUIOP{}"),
    (30, "asdfghjkl;'`", "ASDFGHJKL:\"~"),
    (43, "\\zxcvbnm,./", "|ZXCVBNM<>?"),
];

const KEYPAD: [(usize, char, u32); 13] = [
    (71, '7', 0xff95),
    (72, '8', 0xff97),
    (73, '9', 0xff9a),
    (74, '-', 0xffad),
    (75, '4', 0xff96),
    (76, '5', 0xff9d),
    (77, '6', 0xff98),
    (78, '+', 0xffab),
    (79, '1', 0xff9c),
    (80, '2', 0xff99),
    (81, '3', 0xff9b),
    (82, '0', 0xff9e),
    (83, '.', 0xff9f),
];

impl Keymap {
    /// The built-in US layout.
    pub fn us() -> &'static Keymap {
        &US_LAYOUT
    }

    fn empty() -> Self {
        let table = vec![KeyInfo::default(); 256];
        Self {
            noshift: table.clone(),
            shift: table.clone(),
            altgr: table.clone(),
            capslock: table.clone(),
            shiftcapslock: table,
        }
    }

    fn set_all(&mut self, sc: usize, info: KeyInfo) {
        for table in [
            &mut self.noshift,
            &mut self.shift,
            &mut self.altgr,
            &mut self.capslock,
            &mut self.shiftcapslock,
        ] {
            table[sc] = info;
        }
    }

    fn build_us() -> Self {
        let mut map = Self::empty();
        for (start, plain, shifted) in ROW_CHARS {
            for (i, (p, s)) in plain.chars().zip(shifted.chars()).enumerate() {
                let sc = start + i;
                let letter = p.is_ascii_alphabetic();
                map.noshift[sc] = KeyInfo::chr(p);
                map.altgr[sc] = KeyInfo::chr(p);
                map.shift[sc] = KeyInfo::chr(s);
                map.capslock[sc] = KeyInfo::chr(if letter { s } else { p });
                map.shiftcapslock[sc] = KeyInfo::chr(if letter { p } else { s });
            }
        }
        map.set_all(1, KeyInfo::sym(0xff1b));
        map.set_all(14, KeyInfo::sym(0xff08));
        map.set_all(15, KeyInfo { sym: 0xff09, chr: Some('\t') });
        map.set_all(28, KeyInfo { sym: 0xff0d, chr: Some('\r') });
        map.set_all(29, KeyInfo::sym(0xffe3));
        map.set_all(SC_LSHIFT, KeyInfo::sym(0xffe1));
        map.set_all(SC_RSHIFT, KeyInfo::sym(0xffe2));
        map.set_all(55, KeyInfo::chr('*'));
        map.set_all(SC_ALT, KeyInfo::sym(0xffe9));
        map.set_all(57, KeyInfo::chr(' '));
        map.set_all(SC_CAPSLOCK, KeyInfo::sym(0xffe5));
        for (i, sc) in (59..=68).enumerate() {
            map.set_all(sc, KeyInfo::sym(0xffbe + i as u32));
        }
        map.set_all(SC_NUMLOCK, KeyInfo::sym(0xff7f));
        map.set_all(SC_SCROLLLOCK, KeyInfo::sym(0xff14));
        for (sc, _, sym) in KEYPAD {
            map.set_all(sc, KeyInfo::sym(sym));
        }
        map
    }

    /// Translates a scan code under the given modifier state.
    pub fn key_info(&self, device_flags: u16, scan_code: u8, mods: Modifiers) -> KeyInfo {
        let sc = usize::from(scan_code);
        let ext = device_flags & KBD_FLAG_EXT != 0;

        if ext {
            // Extended codes share scan codes with the keypad but act as the
            // dedicated navigation cluster.
            return match sc {
                28 => KeyInfo { sym: 0xff8d, chr: Some('\r') },
                29 => KeyInfo::sym(0xffe4),
                53 => KeyInfo::chr('/'),
                56 => KeyInfo::sym(0xfe03),
                71 => KeyInfo::sym(0xff50),
                72 => KeyInfo::sym(0xff52),
                73 => KeyInfo::sym(0xff55),
                75 => KeyInfo::sym(0xff51),
                77 => KeyInfo::sym(0xff53),
                79 => KeyInfo::sym(0xff57),
                80 => KeyInfo::sym(0xff54),
                81 => KeyInfo::sym(0xff56),
                82 => KeyInfo::sym(0xff63),
                83 => KeyInfo::sym(0xffff),
                _ => self.noshift[sc],
            };
        }

        if let Some(&(_, digit, _)) = KEYPAD.iter().find(|(k, _, _)| *k == sc) {
            return if mods.num_lock && !mods.shift {
                KeyInfo::chr(digit)
            } else {
                self.noshift[sc]
            };
        }

        let table = if mods.altgr {
            &self.altgr
        } else if mods.shift && mods.caps_lock {
            &self.shiftcapslock
        } else if mods.shift {
            &self.shift
        } else if mods.caps_lock {
            &self.capslock
        } else {
            &self.noshift
        };
        table[sc]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_follow_shift_and_capslock() {
        let map = Keymap::us();
        let a = 30;
        let plain = Modifiers::default();
        assert_eq!(map.key_info(0, a, plain).chr, Some('a'));

        let shift = Modifiers { shift: true, ..plain };
        assert_eq!(map.key_info(0, a, shift).chr, Some('A'));

        let caps = Modifiers { caps_lock: true, ..plain };
        assert_eq!(map.key_info(0, a, caps).chr, Some('A'));
        assert_eq!(map.key_info(0, 2, caps).chr, Some('1'));

        let both = Modifiers { shift: true, caps_lock: true, ..plain };
        assert_eq!(map.key_info(0, a, both).chr, Some('a'));
        assert_eq!(map.key_info(0, 2, both).chr, Some('!'));
    }

    #[test]
    fn keypad_depends_on_numlock_and_extension() {
        let map = Keymap::us();
        let num = Modifiers { num_lock: true, ..Modifiers::default() };
        assert_eq!(map.key_info(0, 71, num).chr, Some('7'));
        assert_eq!(map.key_info(0, 71, Modifiers::default()).sym, 0xff95);
        // extended 71 is the Home key regardless of numlock
        assert_eq!(map.key_info(KBD_FLAG_EXT, 71, num).sym, 0xff50);
    }
}
