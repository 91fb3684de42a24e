use crate::hal::Ps2Lines;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Drive {
    clock: bool,
    data: bool,
}

impl Drive {
    const RELEASED: Drive = Drive {
        clock: true,
        data: true,
    };
}

/// Two open-drain drivers on a pulled-up clock and data pair.
///
/// The [`Ps2Lines`] impl is the device's view; the host model drives its
/// side through the `host_*` setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WiredBus {
    device: Drive,
    host: Drive,
}

impl Default for WiredBus {
    fn default() -> Self {
        Self {
            device: Drive::RELEASED,
            host: Drive::RELEASED,
        }
    }
}

impl WiredBus {
    pub fn set_host_clock(&mut self, high: bool) {
        self.host.clock = high;
    }

    pub fn set_host_data(&mut self, high: bool) {
        self.host.data = high;
    }

    pub fn device_clock(&self) -> bool {
        self.device.clock
    }

    pub fn device_data(&self) -> bool {
        self.device.data
    }

    pub fn is_released(&self) -> bool {
        self.device == Drive::RELEASED && self.host == Drive::RELEASED
    }
}

impl Ps2Lines for WiredBus {
    fn clock(&self) -> bool {
        self.device.clock && self.host.clock
    }

    fn data(&self) -> bool {
        self.device.data && self.host.data
    }

    fn set_clock(&mut self, high: bool) {
        self.device.clock = high;
    }

    fn set_data(&mut self, high: bool) {
        self.device.data = high;
    }
}
