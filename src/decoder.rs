//! Infrared frame decoder.
//!
//! The keyboard sends every key event as two bytes at 1200 baud. The
//! second byte repeats the low three bits of the first and complements the
//! high five, which is the only integrity check available. The second byte
//! follows the first immediately, so a 50 ms gap means the stream has to be
//! resynchronized on the next byte.

use std::fmt;
use std::ops::Deref;

use tracing::trace;

use crate::channel::ByteChannel;
use crate::hal::{Clock, wait_with_timeout};
use crate::keymap::{Keymap, ir, scancode, sequence};
use crate::link::Link;

/// Idle time after which a byte can't be the second half of a pair.
pub const IR_BYTE_TIMEOUT_MS: u32 = 50;

/// Whether `b2` is the check byte for `b1`.
pub fn is_valid_pair(b1: u8, b2: u8) -> bool {
    b2 == check_byte(b1)
}

/// Check byte the keyboard sends after `b1`.
pub fn check_byte(b1: u8) -> u8 {
    (!b1 & 0xF8) | (b1 & 0x07)
}

/// Last key down, replayed when the keyboard sends its repeat code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyRepeatLatch(Option<u8>);

impl KeyRepeatLatch {
    pub fn remember(&mut self, make: u8) {
        self.0 = Some(make);
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn last(&self) -> Option<u8> {
        self.0
    }
}

const EMISSION_CAPACITY: usize = 16;

/// PS/2 bytes produced for one infrared pair, in wire order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    bytes: [u8; EMISSION_CAPACITY],
    len: usize,
}

impl Default for Emission {
    fn default() -> Self {
        Self {
            bytes: [0; EMISSION_CAPACITY],
            len: 0,
        }
    }
}

impl Emission {
    fn push(&mut self, byte: u8) {
        self.bytes[self.len] = byte;
        self.len += 1;
    }

    fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push(byte);
        }
    }
}

impl Deref for Emission {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Debug for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Emission({:02X?})", &**self)
    }
}

pub struct IrDecoder {
    keymap: Keymap,
    latch: KeyRepeatLatch,
    timeout_ms: u32,
}

impl IrDecoder {
    pub fn new(keymap: Keymap) -> Self {
        Self {
            keymap,
            latch: KeyRepeatLatch::default(),
            timeout_ms: IR_BYTE_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn latch(&self) -> KeyRepeatLatch {
        self.latch
    }

    /// Translate one infrared pair into the bytes to put on the PS/2 link.
    /// Invalid pairs and dead keys produce nothing.
    pub fn resolve(&mut self, b1: u8, b2: u8) -> Emission {
        let mut out = Emission::default();
        if !is_valid_pair(b1, b2) {
            trace!("IR: rejected pair {b1:02X} {b2:02X}");
            return out;
        }

        let mut key = b1;
        if b1 & ir::MAKE != 0 {
            self.latch.remember(b1);
        } else if let (ir::REPEAT, Some(last)) = (b1, self.latch.last()) {
            key = last;
        } else {
            self.latch.clear();
        }
        let make = key & ir::MAKE != 0;

        if key == ir::PAUSE | ir::MAKE {
            out.extend(&sequence::PAUSE);
        } else if key == ir::PRINT_SCREEN | ir::MAKE {
            out.extend(&sequence::PRINT_SCREEN_MAKE);
        } else if key == ir::PRINT_SCREEN {
            out.extend(&sequence::PRINT_SCREEN_BREAK);
        }

        let Some(scan) = self.keymap.lookup(key) else {
            return out;
        };
        if let Some(prefix) = scan.prefix() {
            out.push(prefix);
        }
        if !make {
            out.push(scancode::BREAK_PREFIX);
            self.latch.clear();
        }
        out.push(scan.code());
        out
    }

    /// One pass of the service loop: read a pair from `ir` and send its
    /// translation. Returns without output on timeout, mouse traffic or a
    /// bad pair.
    pub fn service<C: Clock + ?Sized>(&mut self, clock: &C, ir: &ByteChannel, link: &Link) {
        let read = || wait_with_timeout(clock, self.timeout_ms, || ir.try_pop());

        let Some(b1) = read() else {
            return;
        };
        if b1 == ir::MOUSE {
            // The rest of the packet is two bytes; stop early on a gap.
            let first = read();
            let second = first.and_then(|_| read());
            trace!("IR: discarded mouse packet {b1:02X} {first:02X?} {second:02X?}");
            return;
        }
        let Some(b2) = read() else {
            trace!("IR: lone byte {b1:02X}");
            return;
        };

        let out = self.resolve(b1, b2);
        if !out.is_empty() {
            trace!("IR: {b1:02X} {b2:02X} -> {:02X?}", &*out);
        }
        link.send_all(clock, &out);
    }
}
