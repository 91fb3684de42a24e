use crate::decoder::IR_BYTE_TIMEOUT_MS;
use crate::host::HOST_PARAMETER_TIMEOUT_MS;
use crate::timer::TimerConfig;

/// Delay between power-up and the self-test-passed byte.
pub const POWER_ON_DELAY_MS: u32 = 300;

/// Tunables of the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Gap after which an infrared byte starts a new pair
    pub ir_byte_timeout_ms: u32,
    /// Wait for the parameter byte of a two-byte host command
    pub host_parameter_timeout_ms: u32,
    /// Settle time before announcing self test passed
    pub power_on_delay_ms: u32,
    pub timer: TimerConfig,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ir_byte_timeout_ms: IR_BYTE_TIMEOUT_MS,
            host_parameter_timeout_ms: HOST_PARAMETER_TIMEOUT_MS,
            power_on_delay_ms: POWER_ON_DELAY_MS,
            timer: TimerConfig::default(),
        }
    }
}
