//! Host-to-keyboard command handling.
//!
//! Only the subset of the PS/2 keyboard command set a generic host needs at
//! boot is answered. The keyboard has no typematic engine and a single scan
//! code set, so those settings are acknowledged and dropped.

use tracing::debug;

use crate::hal::{Clock, StatusIndicators, StatusLights, wait_with_timeout};
use crate::link::Link;

/// How long to wait for the parameter of a two-byte command.
pub const HOST_PARAMETER_TIMEOUT_MS: u32 = 5;

/// Bytes the keyboard sends back to the host.
pub mod reply {
    pub const ACK: u8 = 0xFA;
    /// Basic assurance test passed.
    pub const SELF_TEST_PASSED: u8 = 0xAA;
    pub const ECHO: u8 = 0xEE;
    pub const RESEND: u8 = 0xFE;
    /// MF2 keyboard identification.
    pub const KEYBOARD_ID: [u8; 2] = [0x83, 0xAB];
}

/// Commands sent from the host to the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Reset and run the self test
    Reset,
    /// Restore default typematic and scanning settings
    SetDefaults,
    /// Stop scanning
    Disable,
    /// Resume scanning
    Enable,
    /// Read the two-byte keyboard ID
    ReadId,
    /// Diagnostic echo
    Echo,
    /// Set typematic rate and delay (parameter follows)
    SetTypematic,
    /// Select scan code set (parameter follows)
    SetScanSet,
    /// Set the lock lights (parameter follows)
    SetLeds,
    /// Anything else, including the host's own Resend
    Unknown(u8),
}

impl From<u8> for HostCommand {
    fn from(byte: u8) -> Self {
        match byte {
            0xFF => HostCommand::Reset,
            0xF6 => HostCommand::SetDefaults,
            0xF5 => HostCommand::Disable,
            0xF4 => HostCommand::Enable,
            0xF2 => HostCommand::ReadId,
            0xEE => HostCommand::Echo,
            0xF3 => HostCommand::SetTypematic,
            0xF0 => HostCommand::SetScanSet,
            0xED => HostCommand::SetLeds,
            other => HostCommand::Unknown(other),
        }
    }
}

impl HostCommand {
    /// Whether a parameter byte follows the command.
    pub fn takes_parameter(&self) -> bool {
        matches!(
            self,
            HostCommand::SetTypematic | HostCommand::SetScanSet | HostCommand::SetLeds
        )
    }

    /// Bytes sent back once the command (and its parameter) is handled.
    pub fn replies(&self) -> &'static [u8] {
        const ACK_ONLY: &[u8] = &[reply::ACK];
        const RESET: &[u8] = &[reply::ACK, reply::SELF_TEST_PASSED];
        const ID: &[u8] = &[reply::ACK, reply::KEYBOARD_ID[0], reply::KEYBOARD_ID[1]];
        match self {
            HostCommand::Reset => RESET,
            HostCommand::ReadId => ID,
            HostCommand::Echo => &[reply::ECHO],
            HostCommand::Unknown(_) => &[reply::RESEND],
            HostCommand::SetDefaults
            | HostCommand::Disable
            | HostCommand::Enable
            | HostCommand::SetTypematic
            | HostCommand::SetScanSet
            | HostCommand::SetLeds => ACK_ONLY,
        }
    }
}

pub struct HostInterpreter<I> {
    indicators: I,
    lights: StatusLights,
    timeout_ms: u32,
}

impl<I: StatusIndicators> HostInterpreter<I> {
    pub fn new(indicators: I) -> Self {
        Self {
            indicators,
            lights: StatusLights::OFF,
            timeout_ms: HOST_PARAMETER_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn status_lights(&self) -> StatusLights {
        self.lights
    }

    pub fn indicators(&self) -> &I {
        &self.indicators
    }

    pub fn set_status_lights(&mut self, lights: StatusLights) {
        self.lights = lights;
        self.indicators.show(lights);
    }

    /// Answer one host command if one is waiting. Never blocks when the
    /// receive ring is empty.
    pub fn service<C: Clock + ?Sized>(&mut self, clock: &C, link: &Link) {
        let Some(byte) = link.poll_received() else {
            return;
        };
        let command = HostCommand::from(byte);
        debug!("Host sends {byte:02X} ({command:?})");

        if command.takes_parameter() {
            match wait_with_timeout(clock, self.timeout_ms, || link.poll_received()) {
                Some(param) => {
                    debug!("Host parameter {param:02X}");
                    if command == HostCommand::SetLeds {
                        self.set_status_lights(StatusLights::new(param));
                    }
                }
                None => debug!("Host parameter for {command:?} never arrived"),
            }
        }

        link.send_all(clock, command.replies());

        if command == HostCommand::Reset {
            self.set_status_lights(StatusLights::OFF);
        }
    }
}
