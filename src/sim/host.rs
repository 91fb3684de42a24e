//! Host side of the simulated PS/2 port.
//!
//! The model samples device frames on falling clock edges, the way a PC
//! keyboard controller does, and plays host-to-device frames from a queue
//! using the request-to-send handshake.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace};

use super::bus::WiredBus;
use crate::hal::Ps2Lines;
use crate::link::odd_parity;
use crate::timer::TimerEvent;

/// Both lines must read high for this many events before the host starts
/// a request to send.
const IDLE_BEFORE_REQUEST: u32 = 4;

/// Events the host holds the clock low for a request to send. Long enough
/// that the device sees the low clock on at least one rising compare.
const INHIBIT_EVENTS: u32 = 4;

/// A partial device frame is abandoned after this many idle events.
const STALE_FRAME_EVENTS: u32 = 12;

/// Falling edges to wait for the acknowledge after the stop bit.
const ACK_EDGES: u32 = 3;

const FRAME_BITS: u8 = 11;

/// One device-to-host frame as sampled on the wire. Bit `i` is the data
/// line level at the `i`th falling clock edge.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame(u16);

impl Frame {
    pub fn value(&self) -> u8 {
        (self.0 >> 1) as u8
    }

    pub fn bit(&self, index: usize) -> bool {
        (self.0 >> index) & 1 == 1
    }

    pub fn start_ok(&self) -> bool {
        !self.bit(0)
    }

    pub fn parity_ok(&self) -> bool {
        self.bit(9) == odd_parity(self.value())
    }

    pub fn stop_ok(&self) -> bool {
        self.bit(10)
    }

    pub fn is_valid(&self) -> bool {
        self.start_ok() && self.parity_ok() && self.stop_ok()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:02X}", self.value())?;
        if !self.is_valid() {
            write!(f, ", raw={:011b}", self.0)?;
        }
        write!(f, ")")
    }
}

/// Outcome of one host-to-device byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTransfer {
    pub value: u8,
    pub acked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transmit {
    Idle,
    Inhibit { value: u8, remaining: u32 },
    /// `frame` holds data, parity and stop; `next` is the bit to drive at
    /// the next falling edge.
    Shift { value: u8, frame: u16, next: u8 },
    AwaitAck { value: u8, edges: u32 },
}

#[derive(Debug)]
pub struct HostPort {
    last_clock: bool,
    idle_events: u32,
    rx_bits: u16,
    rx_count: u8,
    frames: Vec<Frame>,
    queue: VecDeque<u8>,
    tx: Transmit,
    transfers: Vec<HostTransfer>,
}

impl Default for HostPort {
    fn default() -> Self {
        Self {
            last_clock: true,
            idle_events: 0,
            rx_bits: 0,
            rx_count: 0,
            frames: vec![],
            queue: VecDeque::new(),
            tx: Transmit::Idle,
            transfers: vec![],
        }
    }
}

fn host_frame(value: u8) -> u16 {
    (value as u16) | ((odd_parity(value) as u16) << 8) | (1 << 9)
}

impl HostPort {
    /// Queue bytes to send to the device.
    pub fn send(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes.iter().copied());
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Values of all frames received from the device.
    pub fn received(&self) -> Vec<u8> {
        self.frames.iter().map(Frame::value).collect()
    }

    pub fn transfers(&self) -> &[HostTransfer] {
        &self.transfers
    }

    /// Nothing queued, no frame in flight in either direction.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.tx == Transmit::Idle && self.rx_count == 0
    }

    /// Look at the bus after the device handled `event`, then drive the
    /// host side for the next event.
    pub fn observe(&mut self, event: TimerEvent, bus: &mut WiredBus) {
        let clock = bus.clock();
        let data = bus.data();
        let falling = self.last_clock && !clock;
        if clock && data {
            self.idle_events += 1;
        } else {
            self.idle_events = 0;
        }

        match self.tx {
            Transmit::Idle => {
                if falling {
                    self.sample(data);
                } else if self.rx_count > 0 && self.idle_events >= STALE_FRAME_EVENTS {
                    debug!("Host: dropped partial frame ({} bits)", self.rx_count);
                    self.rx_bits = 0;
                    self.rx_count = 0;
                }

                // Only start right after a falling compare: the device can't
                // be mid-frame then without having pulled the clock low.
                if self.rx_count == 0
                    && event == TimerEvent::ClockFalling
                    && self.idle_events >= IDLE_BEFORE_REQUEST
                {
                    if let Some(value) = self.queue.pop_front() {
                        trace!("Host: request to send {value:02X}");
                        bus.set_host_clock(false);
                        self.tx = Transmit::Inhibit {
                            value,
                            remaining: INHIBIT_EVENTS,
                        };
                    }
                }
            }
            Transmit::Inhibit { value, remaining } => {
                if remaining > 1 {
                    self.tx = Transmit::Inhibit {
                        value,
                        remaining: remaining - 1,
                    };
                } else {
                    bus.set_host_data(false);
                    bus.set_host_clock(true);
                    self.tx = Transmit::Shift {
                        value,
                        frame: host_frame(value),
                        next: 0,
                    };
                }
            }
            Transmit::Shift { value, frame, next } => {
                if falling {
                    bus.set_host_data((frame >> next) & 1 == 1);
                    self.tx = if next == 9 {
                        Transmit::AwaitAck { value, edges: 0 }
                    } else {
                        Transmit::Shift {
                            value,
                            frame,
                            next: next + 1,
                        }
                    };
                }
            }
            Transmit::AwaitAck { value, edges } => {
                if falling {
                    if !data {
                        self.finish_transfer(value, true);
                    } else if edges + 1 >= ACK_EDGES {
                        self.finish_transfer(value, false);
                    } else {
                        self.tx = Transmit::AwaitAck {
                            value,
                            edges: edges + 1,
                        };
                    }
                }
            }
        }

        self.last_clock = bus.clock();
    }

    fn sample(&mut self, data: bool) {
        self.rx_bits |= (data as u16) << self.rx_count;
        self.rx_count += 1;
        if self.rx_count == FRAME_BITS {
            let frame = Frame(self.rx_bits);
            trace!("Host: received {frame:?}");
            self.frames.push(frame);
            self.rx_bits = 0;
            self.rx_count = 0;
        }
    }

    fn finish_transfer(&mut self, value: u8, acked: bool) {
        if !acked {
            debug!("Host: {value:02X} was not acknowledged");
        }
        self.transfers.push(HostTransfer { value, acked });
        self.tx = Transmit::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_fields() {
        // 0x1C has three ones, so the odd parity bit is clear.
        let raw = (0x1C << 1) | (1 << 10);
        let frame = Frame(raw);
        assert_eq!(frame.value(), 0x1C);
        assert!(frame.start_ok() && frame.parity_ok() && frame.stop_ok());
        assert_eq!(format!("{frame:?}"), "Frame(1C)");

        let bad = Frame(raw | 1 << 9);
        assert!(!bad.parity_ok());
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_host_frame_layout() {
        assert_eq!(host_frame(0xED), 0x3ED);
        assert_eq!(host_frame(0x01), 0x201);
        assert_eq!(host_frame(0xFF), 0x3FF);
        assert_eq!(host_frame(0x00), 0x300);
    }

    #[test]
    fn test_request_waits_for_idle_bus() {
        let mut host = HostPort::default();
        let mut bus = WiredBus::default();
        host.send(&[0xFF]);

        bus.set_data(false);
        for event in TimerEvent::SEQUENCE.iter().cycle().take(9) {
            host.observe(*event, &mut bus);
        }
        assert!(bus.clock(), "must not inhibit while the device drives data");

        bus.set_data(true);
        for event in TimerEvent::SEQUENCE.iter().cycle().take(6) {
            host.observe(*event, &mut bus);
        }
        assert!(!bus.clock());
        assert!(bus.device_clock());
    }
}
