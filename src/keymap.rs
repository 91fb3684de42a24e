//! Infrared key codes and their PS/2 scan code set 2 translations.
//!
//! The keyboard sends a 7-bit key code with bit 7 set for key down. Each
//! code indexes a 128-entry table of set 2 scan codes; a zero entry is a
//! dead key. Extended keys carry the `0xE0` prefix in the high byte.

use std::fmt;
use std::fs;
use std::path::Path;

/// Reserved infrared codes.
pub mod ir {
    /// First byte of a mouse packet.
    pub const MOUSE: u8 = 0x3F;
    /// Typematic repeat of the last key down.
    pub const REPEAT: u8 = 0x53;
    /// All keys up.
    pub const CLEAR: u8 = 0x5D;
    pub const PRINT_SCREEN: u8 = 0x09;
    pub const PAUSE: u8 = 0x2D;
    /// Set on key down.
    pub const MAKE: u8 = 0x80;
}

/// Scan code set 2 values.
pub mod scancode {
    pub const NULL: u16 = 0x0000;
    /// Precedes the last byte of a key-up sequence.
    pub const BREAK_PREFIX: u8 = 0xF0;

    pub const UP_ARROW: u16 = 0xE075;
    pub const END: u16 = 0xE069;
    pub const HOME: u16 = 0xE06C;
    pub const PAGE_DOWN: u16 = 0xE07A;
    pub const PAGE_UP: u16 = 0xE07D;
    pub const DOWN_ARROW: u16 = 0xE072;
    pub const PRINT: u16 = 0xE07C;
    pub const RIGHT_ARROW: u16 = 0xE074;
    pub const INSERT: u16 = 0xE070;
    pub const SLEEP: u16 = 0xE05F;
    pub const LEFT_ARROW: u16 = 0xE06B;
    pub const LEFT_WINDOWS: u16 = 0xE05B;
    pub const DELETE: u16 = 0xE071;
    pub const F1: u16 = 0x05;
    pub const F2: u16 = 0x06;
    pub const F3: u16 = 0x04;
    pub const F4: u16 = 0x0C;
    pub const F5: u16 = 0x03;
    pub const F6: u16 = 0x0B;
    pub const F7: u16 = 0x83;
    pub const F8: u16 = 0x0A;
    pub const F9: u16 = 0x01;
    pub const F10: u16 = 0x09;
    pub const F11: u16 = 0x78;
    pub const F12: u16 = 0x07;
    pub const BREAK: u16 = 0xE114;
    pub const SCROLL_LOCK: u16 = 0x7E;
    pub const NUM_LOCK: u16 = 0x77;
    pub const ESC: u16 = 0x76;
    pub const TAB: u16 = 0x0D;
    pub const CAPS_LOCK: u16 = 0x58;
    pub const GRAVE: u16 = 0x0E;
    pub const BACKSPACE: u16 = 0x66;
    pub const ENTER: u16 = 0x5A;
    pub const SPACE: u16 = 0x29;
    pub const LEFT_CTRL: u16 = 0x14;
    pub const LEFT_SHIFT: u16 = 0x12;
    pub const RIGHT_SHIFT: u16 = 0x59;
    pub const LEFT_ALT: u16 = 0x11;

    pub const KEY_1: u16 = 0x16;
    pub const KEY_2: u16 = 0x1E;
    pub const KEY_3: u16 = 0x26;
    pub const KEY_4: u16 = 0x25;
    pub const KEY_5: u16 = 0x2E;
    pub const KEY_6: u16 = 0x36;
    pub const KEY_7: u16 = 0x3D;
    pub const KEY_8: u16 = 0x3E;
    pub const KEY_9: u16 = 0x46;
    pub const KEY_0: u16 = 0x45;
    pub const HYPHEN: u16 = 0x4E;
    pub const EQUALS: u16 = 0x55;
    pub const OPEN_BRACKET: u16 = 0x54;
    pub const CLOSE_BRACKET: u16 = 0x5B;
    pub const BACKSLASH: u16 = 0x5D;
    pub const SEMICOLON: u16 = 0x4C;
    pub const APOSTROPHE: u16 = 0x52;
    pub const COMMA: u16 = 0x41;
    pub const PERIOD: u16 = 0x49;
    pub const FORWARD_SLASH: u16 = 0x4A;

    pub const A: u16 = 0x1C;
    pub const B: u16 = 0x32;
    pub const C: u16 = 0x21;
    pub const D: u16 = 0x23;
    pub const E: u16 = 0x24;
    pub const F: u16 = 0x2B;
    pub const G: u16 = 0x34;
    pub const H: u16 = 0x33;
    pub const I: u16 = 0x43;
    pub const J: u16 = 0x3B;
    pub const K: u16 = 0x42;
    pub const L: u16 = 0x4B;
    pub const M: u16 = 0x3A;
    pub const N: u16 = 0x31;
    pub const O: u16 = 0x44;
    pub const P: u16 = 0x4D;
    pub const Q: u16 = 0x15;
    pub const R: u16 = 0x2D;
    pub const S: u16 = 0x1B;
    pub const T: u16 = 0x2C;
    pub const U: u16 = 0x3C;
    pub const V: u16 = 0x2A;
    pub const W: u16 = 0x1D;
    pub const X: u16 = 0x22;
    pub const Y: u16 = 0x35;
    pub const Z: u16 = 0x1A;
}

/// Bytes the keyboard must send for the two keys with fixed sequences.
pub mod sequence {
    use hex_literal::hex;

    /// Pause has no break sequence.
    pub const PAUSE: [u8; 8] = hex!("e1 14 77 e1 f0 14 f0 77");
    pub const PRINT_SCREEN_MAKE: [u8; 4] = hex!("e0 12 e0 7c");
    pub const PRINT_SCREEN_BREAK: [u8; 6] = hex!("e0 f0 7c e0 f0 12");
}

pub const KEYMAP_SIZE: usize = 128;

/// A translated key: one byte, or an `0xE0`-style prefix plus one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCode(pub u16);

impl ScanCode {
    pub fn prefix(&self) -> Option<u8> {
        match (self.0 >> 8) as u8 {
            0 => None,
            prefix => Some(prefix),
        }
    }

    pub fn code(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Keymap {
    table: [u16; KEYMAP_SIZE],
}

impl fmt::Debug for Keymap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mapped = self.table.iter().filter(|c| **c != scancode::NULL).count();
        write!(f, "Keymap({mapped} keys)")
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

impl Keymap {
    pub const fn new(table: [u16; KEYMAP_SIZE]) -> Self {
        Self { table }
    }

    /// A map with every key dead.
    pub const fn empty() -> Self {
        Self::new([scancode::NULL; KEYMAP_SIZE])
    }

    pub fn set(&mut self, code: u8, scancode: u16) {
        self.table[(code & 0x7F) as usize] = scancode;
    }

    /// Scan code for the low seven bits of `code`, `None` for dead keys.
    pub fn lookup(&self, code: u8) -> Option<ScanCode> {
        match self.table[(code & 0x7F) as usize] {
            scancode::NULL => None,
            value => Some(ScanCode(value)),
        }
    }

    /// Parse `code=scancode` hex lines, applied over the empty map. Blank
    /// lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut keymap = Keymap::empty();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((code, value)) = line.split_once('=') else {
                return Err(format!("keymap line {}: expected code=scancode", lineno + 1).into());
            };
            let code = u8::from_str_radix(strip_hex(code), 16)?;
            if code as usize >= KEYMAP_SIZE {
                return Err(format!("keymap line {}: code {code:02X} out of range", lineno + 1).into());
            }
            let value = u16::from_str_radix(strip_hex(value), 16)?;
            keymap.set(code, value);
        }
        Ok(keymap)
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

fn strip_hex(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Keys in the order they are assigned to infrared codes by the built-in
/// map. Print Screen and Pause are left out: they have fixed sequences.
const DEFAULT_ORDER: &[u16] = {
    use scancode::*;
    &[
        UP_ARROW, END, HOME, PAGE_DOWN, PAGE_UP, DOWN_ARROW, RIGHT_ARROW, INSERT, SLEEP,
        LEFT_ARROW, LEFT_WINDOWS, DELETE, F4, F3, F2, F1, F8, F7, F6, F5, F12, F11, F10, F9,
        SCROLL_LOCK, NUM_LOCK, ESC, E, W, Q, TAB, U, Y, T, R, OPEN_BRACKET, P, O, I, A,
        CAPS_LOCK, BACKSLASH, CLOSE_BRACKET, KEY_2, KEY_1, GRAVE, KEY_6, KEY_5, KEY_4, KEY_3,
        KEY_0, KEY_9, KEY_8, KEY_7, BACKSPACE, EQUALS, HYPHEN, N, B, V, C, FORWARD_SLASH,
        PERIOD, COMMA, M, LEFT_CTRL, RIGHT_SHIFT, SPACE, LEFT_ALT, G, F, D, S, L, K, J, H,
        ENTER, APOSTROPHE, SEMICOLON, X, Z, LEFT_SHIFT,
    ]
};

const fn is_reserved(code: u8) -> bool {
    matches!(
        code,
        ir::MOUSE | ir::REPEAT | ir::CLEAR | ir::PRINT_SCREEN | ir::PAUSE
    )
}

const fn build_default() -> [u16; KEYMAP_SIZE] {
    let mut table = [scancode::NULL; KEYMAP_SIZE];
    let mut code = 0;
    let mut key = 0;
    while key < DEFAULT_ORDER.len() && code < KEYMAP_SIZE {
        if !is_reserved(code as u8) {
            table[code] = DEFAULT_ORDER[key];
            key += 1;
        }
        code += 1;
    }
    table
}

const DEFAULT_TABLE: [u16; KEYMAP_SIZE] = build_default();

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_scancode_split() {
        let sc = ScanCode(scancode::UP_ARROW);
        assert_eq!(sc.prefix(), Some(0xE0));
        assert_eq!(sc.code(), 0x75);
        let sc = ScanCode(scancode::A);
        assert_eq!(sc.prefix(), None);
        assert_eq!(sc.code(), 0x1C);
    }

    #[test]
    fn test_default_map_skips_reserved_codes() {
        let keymap = Keymap::default();
        for code in 0..KEYMAP_SIZE as u8 {
            if is_reserved(code) {
                assert_eq!(keymap.lookup(code), None, "code {code:02X}");
            }
        }
        assert_eq!(keymap.lookup(0x00), Some(ScanCode(scancode::UP_ARROW)));
        // Bit 7 is ignored by the lookup.
        assert_eq!(keymap.lookup(0x80), Some(ScanCode(scancode::UP_ARROW)));

        let mapped = (0..KEYMAP_SIZE as u8)
            .filter(|c| keymap.lookup(*c).is_some())
            .count();
        assert_eq!(mapped, DEFAULT_ORDER.len());
    }

    #[test]
    fn test_parse() {
        let keymap = Keymap::parse(
            "# test map\n\
             10=1c\n\
             0x11 = 0xE075  # extended\n\
             \n\
             7f=76\n",
        )
        .unwrap();
        assert_eq!(keymap.lookup(0x10), Some(ScanCode(0x1C)));
        assert_eq!(keymap.lookup(0x91), Some(ScanCode(0xE075)));
        assert_eq!(keymap.lookup(0x7F), Some(ScanCode(0x76)));
        assert_eq!(keymap.lookup(0x12), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Keymap::parse("10 1c").is_err());
        assert!(Keymap::parse("80=1c").is_err());
        assert!(Keymap::parse("zz=1c").is_err());
        assert!(Keymap::parse("10=12345").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "20=29").unwrap();
        let keymap = Keymap::load(file.path()).unwrap();
        assert_eq!(keymap.lookup(0xA0), Some(ScanCode(scancode::SPACE)));
        assert_eq!(format!("{keymap:?}"), "Keymap(1 keys)");
    }
}
