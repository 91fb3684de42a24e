//! Seams between the converter core and the board.
//!
//! Pin multiplexing, the systick handler and the interrupt vectors live with
//! the board bring-up; the core only sees these traits.

use std::fmt;

/// Open-drain view of the PS/2 clock and data wires.
///
/// Reads return the wired-AND level of the bus. Writes drive the device
/// side only: `true` releases the wire (pulled up high), `false` pulls it
/// low.
pub trait Ps2Lines {
    fn clock(&self) -> bool;
    fn data(&self) -> bool;
    fn set_clock(&mut self, high: bool);
    fn set_data(&mut self, high: bool);

    fn release(&mut self) {
        self.set_clock(true);
        self.set_data(true);
    }
}

/// Millisecond time source driven by the 1 kHz tick.
pub trait Clock {
    /// Monotonic, wraps at `u32::MAX`.
    fn now(&self) -> u32;

    /// Called once per busy-wait iteration.
    fn relax(&self) {
        std::hint::spin_loop();
    }
}

/// Keyboard lock lights as sent by the host with Set-LED.
///
/// Bit 0 = Scroll Lock, bit 1 = Num Lock, bit 2 = Caps Lock; higher bits are
/// ignored.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusLights(u8);

impl StatusLights {
    pub const OFF: StatusLights = StatusLights(0);

    pub fn new(bits: u8) -> Self {
        StatusLights(bits & 0x07)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_scroll(&self) -> bool {
        self.0 & 0x01 == 0x01
    }

    pub fn is_num(&self) -> bool {
        self.0 & 0x02 == 0x02
    }

    pub fn is_caps(&self) -> bool {
        self.0 & 0x04 == 0x04
    }
}

impl fmt::Debug for StatusLights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusLights({:02X}=", self.0)?;
        let mut first = true;
        for light in [
            ("Scroll", self.is_scroll()),
            ("Num", self.is_num()),
            ("Caps", self.is_caps()),
        ] {
            if light.1 {
                if first {
                    first = false;
                } else {
                    write!(f, "+")?;
                }
                write!(f, "{}", light.0)?;
            }
        }
        write!(f, ")")?;
        Ok(())
    }
}

/// The three lock-light outputs.
pub trait StatusIndicators {
    fn show(&mut self, lights: StatusLights);
}

/// Spin until `busy` returns false.
pub fn wait_while<C: Clock + ?Sized>(clock: &C, mut busy: impl FnMut() -> bool) {
    while busy() {
        clock.relax();
    }
}

/// Poll until `poll` yields a value or `timeout_ms` milliseconds elapse.
pub fn wait_with_timeout<C: Clock + ?Sized, T>(
    clock: &C,
    timeout_ms: u32,
    mut poll: impl FnMut() -> Option<T>,
) -> Option<T> {
    let start = clock.now();
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        if clock.now().wrapping_sub(start) >= timeout_ms {
            return None;
        }
        clock.relax();
    }
}
