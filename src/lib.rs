//! Infrared keyboard to PS/2 converter.
//!
//! Bytes from a two-byte-per-key infrared keyboard arrive on a UART and are
//! translated to scan code set 2. The PS/2 device side is bit-banged from
//! bus timer interrupts; everything else runs in one cooperative service
//! loop. [`sim`] wires the same code to a simulated host for testing.

pub mod channel;
pub mod config;
pub mod converter;
pub mod decoder;
pub mod hal;
pub mod host;
pub mod keymap;
pub mod link;
pub mod logging;
pub mod sim;
pub mod timer;

pub use config::ConverterConfig;
pub use converter::Converter;
pub use keymap::Keymap;
