//! Timed infrared byte scripts.
//!
//! A script is plain text. Every hex byte is delivered `gap_ms` after the
//! previous one; `wait N` adds an extra N milliseconds of silence. `#`
//! starts a comment.
//!
//! ```text
//! # A down, A up
//! 90 68
//! 10 e8
//! wait 200
//! ```

use std::error::Error;
use std::path::Path;

/// Time for one 10-bit character at 1200 baud, rounded up.
pub const DEFAULT_BYTE_GAP_MS: u32 = 9;

/// Parse whitespace- or comma-separated hex bytes, with optional `0x`.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(parse_hex_byte)
        .collect()
}

fn parse_hex_byte(token: &str) -> Result<u8, Box<dyn Error + Send + Sync>> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte {token:?}: {e}").into())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrScript {
    /// `(offset_ms, byte)`, offsets non-decreasing.
    events: Vec<(u32, u8)>,
    end_ms: u32,
    gap_ms: u32,
}

impl IrScript {
    pub fn new(gap_ms: u32) -> Self {
        Self {
            events: vec![],
            end_ms: 0,
            gap_ms,
        }
    }

    pub fn from_bytes(bytes: &[u8], gap_ms: u32) -> Self {
        let mut script = Self::new(gap_ms);
        script.bytes(bytes);
        script
    }

    pub fn parse(text: &str, gap_ms: u32) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut script = Self::new(gap_ms);
        for (index, line) in text.lines().enumerate() {
            let line = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let result: Result<(), Box<dyn Error + Send + Sync>> = match line.strip_prefix("wait") {
                Some(ms) => ms
                    .trim()
                    .parse::<u32>()
                    .map(|ms| {
                        script.wait(ms);
                    })
                    .map_err(|e| e.into()),
                None => parse_hex_bytes(line).map(|bytes| {
                    script.bytes(&bytes);
                }),
            };
            result.map_err(|e| format!("line {}: {e}", index + 1))?;
        }
        Ok(script)
    }

    pub fn load(path: &Path, gap_ms: u32) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, gap_ms)
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.events.push((self.end_ms, byte));
            self.end_ms = self.end_ms.saturating_add(self.gap_ms);
        }
        self
    }

    pub fn wait(&mut self, ms: u32) -> &mut Self {
        self.end_ms = self.end_ms.saturating_add(ms);
        self
    }

    pub fn events(&self) -> &[(u32, u8)] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Offset just past the last byte, including trailing waits.
    pub fn duration_ms(&self) -> u32 {
        self.end_ms
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("90 68,0x10 E8").unwrap(), hex!("90 68 10 e8"));
        assert_eq!(parse_hex_bytes("  ").unwrap(), Vec::<u8>::new());
        assert!(parse_hex_bytes("90 6g").is_err());
        assert!(parse_hex_bytes("100").is_err());
    }

    #[test]
    fn test_parse_script() {
        let script = IrScript::parse("90 68 # A down\n\nwait 100\n10 e8\n", 9).unwrap();
        assert_eq!(script.events(), &[(0, 0x90), (9, 0x68), (118, 0x10), (127, 0xE8)]);
        assert_eq!(script.duration_ms(), 136);
    }

    #[test]
    fn test_parse_script_errors() {
        let err = IrScript::parse("90 68\nwait soon\n", 9).unwrap_err();
        assert!(err.to_string().starts_with("line 2:"), "{err}");
        let err = IrScript::parse("zz\n", 9).unwrap_err();
        assert!(err.to_string().starts_with("line 1:"), "{err}");
    }

    #[test]
    fn test_huge_wait_saturates() {
        let script = IrScript::parse("wait 4294967295\n90 68\nwait 10\n", 9).unwrap();
        assert_eq!(script.events(), &[(u32::MAX, 0x90), (u32::MAX, 0x68)]);
        assert_eq!(script.duration_ms(), u32::MAX);
    }

    #[test]
    fn test_load_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# lone byte then a pair").unwrap();
        writeln!(file, "3f 07").unwrap();
        file.flush().unwrap();

        let script = IrScript::load(file.path(), 10).unwrap();
        assert_eq!(script.events(), &[(0, 0x3F), (10, 0x07)]);
    }
}
