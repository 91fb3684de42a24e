//! The cooperative service loop.
//!
//! Host commands and infrared pairs are serviced alternately on every
//! iteration. The infrared reads give up after their timeout, so a silent
//! keyboard never holds off a host command for more than two byte timeouts.

use std::sync::Arc;

use tracing::info;

use crate::channel::ByteChannel;
use crate::config::ConverterConfig;
use crate::decoder::IrDecoder;
use crate::hal::{Clock, StatusIndicators, wait_while};
use crate::host::{HostInterpreter, reply};
use crate::keymap::Keymap;
use crate::link::Link;

pub struct Converter<C, I> {
    clock: C,
    link: Link,
    ir: Arc<ByteChannel>,
    decoder: IrDecoder,
    host: HostInterpreter<I>,
    power_on_delay_ms: u32,
}

impl<C: Clock, I: StatusIndicators> Converter<C, I> {
    pub fn new(
        config: &ConverterConfig,
        clock: C,
        link: Link,
        ir: Arc<ByteChannel>,
        keymap: Keymap,
        indicators: I,
    ) -> Self {
        Self {
            clock,
            link,
            ir,
            decoder: IrDecoder::new(keymap).with_timeout(config.ir_byte_timeout_ms),
            host: HostInterpreter::new(indicators).with_timeout(config.host_parameter_timeout_ms),
            power_on_delay_ms: config.power_on_delay_ms,
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn host(&self) -> &HostInterpreter<I> {
        &self.host
    }

    pub fn decoder(&self) -> &IrDecoder {
        &self.decoder
    }

    /// Let the host settle, then announce a passed self test.
    pub fn power_on(&mut self) {
        let start = self.clock.now();
        wait_while(&self.clock, || {
            self.clock.now().wrapping_sub(start) < self.power_on_delay_ms
        });
        info!("PS2: power on, sending self test result");
        self.link.initiate_transfer(&self.clock, reply::SELF_TEST_PASSED);
    }

    /// One iteration of the service loop.
    pub fn service_once(&mut self) {
        self.host.service(&self.clock, &self.link);
        self.decoder.service(&self.clock, &self.ir, &self.link);
    }

    /// Firmware entry after board bring-up. The simulator drives
    /// [`Converter::service_once`] itself so it can stop when quiet.
    pub fn run(&mut self) -> ! {
        loop {
            self.service_once();
        }
    }
}
