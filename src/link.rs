//! PS/2 device-side link, clocked from the bus timer interrupts.
//!
//! The link is split in two halves. [`LinkMachine`] is owned by the timer
//! interrupt and is the only writer of the bus state. [`Link`] is the
//! service-loop handle: it reads the published phase, hands over one
//! outbound byte at a time and drains the inbound ring.
//!
//! Device-to-host frame: start (0), eight data bits LSB first, odd parity,
//! stop (1). The device puts each bit on the data line at
//! [`TimerEvent::DataSample`] while the clock is high, and the host samples
//! it when the clock falls.
//!
//! Host-to-device frame: the host holds the clock low (request to send),
//! then pulls data low and releases the clock. The device clocks in the
//! start bit, eight data bits, parity and stop, sampling at
//! [`TimerEvent::DataSample`], then pulls data low for one clock as the
//! acknowledge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::{debug, trace};

use crate::channel::ByteChannel;
use crate::hal::{Clock, Ps2Lines, wait_while};
use crate::timer::TimerEvent;

/// Coarse link state, published by the interrupt for the service loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkPhase {
    Idle = 0,
    RequestPending = 1,
    Sending = 2,
    Receiving = 3,
}

impl From<u8> for LinkPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => LinkPhase::RequestPending,
            2 => LinkPhase::Sending,
            3 => LinkPhase::Receiving,
            _ => LinkPhase::Idle,
        }
    }
}

/// Bit-level position within a device-to-host frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Start,
    /// Next data bit to put on the wire (0..8).
    Data(u8),
    Parity,
    Stop,
    Finished,
}

/// Bit-level position within a host-to-device frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Start,
    /// Next data bit to sample (0..8).
    Data(u8),
    Parity,
    Stop,
    Ack,
    Unack,
    Finished,
}

/// Byte being shifted out, with the running XOR of the bits sent so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundByte {
    pub value: u8,
    parity: bool,
}

impl OutboundByte {
    fn new(value: u8) -> Self {
        Self {
            value,
            parity: false,
        }
    }
}

/// Byte being shifted in from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InboundByte {
    pub value: u8,
    parity: bool,
    pub parity_ok: bool,
    pub stop_ok: bool,
}

/// Full interrupt-side state. Frame progress only exists while a transfer
/// is active, so an idle link can't carry a half-finished frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    RequestPending,
    Sending {
        state: SendState,
        byte: OutboundByte,
    },
    Receiving {
        state: ReceiveState,
        byte: InboundByte,
    },
}

impl LinkState {
    pub fn phase(&self) -> LinkPhase {
        match self {
            LinkState::Idle => LinkPhase::Idle,
            LinkState::RequestPending => LinkPhase::RequestPending,
            LinkState::Sending { .. } => LinkPhase::Sending,
            LinkState::Receiving { .. } => LinkPhase::Receiving,
        }
    }

    fn is_transferring(&self) -> bool {
        matches!(self, LinkState::Sending { .. } | LinkState::Receiving { .. })
    }
}

/// State touched by both halves.
///
/// `phase` is stored only by the interrupt. `outbound` is stored only by the
/// service loop, and only while no send request is pending. `send_request`
/// is set by the service loop and cleared by the interrupt once the frame is
/// done or abandoned. `inbound` is pushed by the interrupt and popped by the
/// service loop.
struct LinkShared {
    phase: AtomicU8,
    send_request: AtomicBool,
    outbound: AtomicU8,
    inbound: ByteChannel,
}

/// Create both halves of a link in the idle state.
pub fn link() -> (Link, LinkMachine) {
    let shared = Arc::new(LinkShared {
        phase: AtomicU8::new(LinkPhase::Idle as u8),
        send_request: AtomicBool::new(false),
        outbound: AtomicU8::new(0),
        inbound: ByteChannel::new(),
    });
    (
        Link {
            shared: shared.clone(),
        },
        LinkMachine {
            state: LinkState::Idle,
            shared,
        },
    )
}

/// Service-loop handle to the link.
#[derive(Clone)]
pub struct Link {
    shared: Arc<LinkShared>,
}

impl Link {
    pub fn phase(&self) -> LinkPhase {
        LinkPhase::from(self.shared.phase.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == LinkPhase::Idle
    }

    fn send_pending(&self) -> bool {
        self.shared.send_request.load(Ordering::Acquire)
    }

    /// Hand `byte` to the interrupt if the link is free. Does not wait.
    fn offer(&self, byte: u8) -> bool {
        if !self.is_idle() || self.send_pending() {
            return false;
        }
        self.shared.outbound.store(byte, Ordering::Relaxed);
        self.shared.send_request.store(true, Ordering::Release);
        true
    }

    /// Queue `byte` for transmission.
    ///
    /// Spins until the link is idle with nothing pending, then spins again
    /// until the interrupt has moved off idle. On return the byte has been
    /// accepted, not necessarily delivered. Callers serialize their own
    /// calls; there is only ever one outbound byte.
    pub fn initiate_transfer<C: Clock + ?Sized>(&self, clock: &C, byte: u8) {
        wait_while(clock, || !self.offer(byte));
        trace!("PS2: queued {byte:02X}");
        wait_while(clock, || self.is_idle() && self.send_pending());
    }

    /// Send each byte of `bytes` in order.
    pub fn send_all<C: Clock + ?Sized>(&self, clock: &C, bytes: &[u8]) {
        for &byte in bytes {
            self.initiate_transfer(clock, byte);
        }
    }

    /// Whether received bytes are waiting, regardless of the bus.
    pub fn has_received(&self) -> bool {
        !self.shared.inbound.is_empty()
    }

    /// Oldest byte received from the host. Returns `None` while a transfer
    /// is on the wire even if bytes are buffered.
    pub fn poll_received(&self) -> Option<u8> {
        if !self.is_idle() {
            return None;
        }
        self.shared.inbound.try_pop()
    }
}

/// Interrupt-side half of the link.
pub struct LinkMachine {
    state: LinkState,
    shared: Arc<LinkShared>,
}

impl LinkMachine {
    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Handle one bus timer compare interrupt.
    pub fn on_timer<L: Ps2Lines + ?Sized>(&mut self, event: TimerEvent, lines: &mut L) {
        match event {
            TimerEvent::ClockRising => {
                self.check_receive_request(lines);
                if self.state.is_transferring() {
                    lines.set_clock(true);
                }
                self.finish_send();
                self.check_send_request();
            }
            TimerEvent::DataSample => self.advance_bit(lines),
            TimerEvent::ClockFalling => {
                if self.state.is_transferring() {
                    lines.set_clock(false);
                }
                self.finish_receive(lines);
            }
        }
        self.shared
            .phase
            .store(self.state.phase() as u8, Ordering::Release);
    }

    /// A low clock while idle is a host request to send. Once the host lets
    /// the clock go, a low data line is the start bit; anything else was a
    /// glitch.
    fn check_receive_request<L: Ps2Lines + ?Sized>(&mut self, lines: &L) {
        match self.state {
            LinkState::Idle => {
                if !lines.clock() {
                    trace!("PS2: host request to send");
                    self.state = LinkState::RequestPending;
                }
            }
            LinkState::RequestPending => {
                if lines.clock() {
                    if !lines.data() {
                        self.state = LinkState::Receiving {
                            state: ReceiveState::Start,
                            byte: InboundByte::default(),
                        };
                    } else {
                        self.state = LinkState::Idle;
                    }
                }
            }
            _ => {}
        }
    }

    fn check_send_request(&mut self) {
        if self.state == LinkState::Idle && self.shared.send_request.load(Ordering::Acquire) {
            let value = self.shared.outbound.load(Ordering::Relaxed);
            self.state = LinkState::Sending {
                state: SendState::Start,
                byte: OutboundByte::new(value),
            };
        }
    }

    fn finish_send(&mut self) {
        if let LinkState::Sending {
            state: SendState::Finished,
            byte,
        } = self.state
        {
            trace!("PS2: sent {:02X}", byte.value);
            self.state = LinkState::Idle;
            self.shared.send_request.store(false, Ordering::Release);
        }
    }

    fn finish_receive<L: Ps2Lines + ?Sized>(&mut self, lines: &mut L) {
        if let LinkState::Receiving {
            state: ReceiveState::Finished,
            ..
        } = self.state
        {
            lines.release();
            self.state = LinkState::Idle;
        }
    }

    fn advance_bit<L: Ps2Lines + ?Sized>(&mut self, lines: &mut L) {
        if !self.state.is_transferring() {
            return;
        }

        // The clock is released for this half of the cycle, so a low clock
        // here means the host is holding it: abandon the frame.
        if !lines.clock() {
            debug!("PS2: host inhibited the bus during {:?}", self.state.phase());
            lines.set_data(true);
            if matches!(self.state, LinkState::Sending { .. }) {
                self.shared.send_request.store(false, Ordering::Release);
            }
            self.state = LinkState::Idle;
            return;
        }

        match &mut self.state {
            LinkState::Sending { state, byte } => {
                let bit = send_bit(state, byte);
                lines.set_data(bit);
            }
            LinkState::Receiving { state, byte } => {
                let bit = lines.data();
                receive_bit(state, byte, bit, lines, &self.shared.inbound);
            }
            _ => {}
        }
    }
}

/// Next data-line level for a frame in `state`, advancing it.
fn send_bit(state: &mut SendState, byte: &mut OutboundByte) -> bool {
    match *state {
        SendState::Start => {
            byte.parity = false;
            *state = SendState::Data(0);
            false
        }
        SendState::Data(pos) => {
            let bit = (byte.value >> pos) & 1 == 1;
            byte.parity ^= bit;
            if pos == 7 {
                byte.parity ^= true;
                *state = SendState::Parity;
            } else {
                *state = SendState::Data(pos + 1);
            }
            bit
        }
        SendState::Parity => {
            *state = SendState::Stop;
            byte.parity
        }
        SendState::Stop => {
            *state = SendState::Finished;
            true
        }
        SendState::Finished => true,
    }
}

fn receive_bit<L: Ps2Lines + ?Sized>(
    state: &mut ReceiveState,
    byte: &mut InboundByte,
    bit: bool,
    lines: &mut L,
    inbound: &ByteChannel,
) {
    match *state {
        ReceiveState::Start => {
            // A high start bit is ignored; keep waiting for a real one.
            if !bit {
                *byte = InboundByte::default();
                *state = ReceiveState::Data(0);
            }
        }
        ReceiveState::Data(pos) => {
            byte.value |= (bit as u8) << pos;
            byte.parity ^= bit;
            if pos == 7 {
                byte.parity ^= true;
                *state = ReceiveState::Parity;
            } else {
                *state = ReceiveState::Data(pos + 1);
            }
        }
        ReceiveState::Parity => {
            byte.parity_ok = bit == byte.parity;
            *state = ReceiveState::Stop;
        }
        ReceiveState::Stop => {
            byte.stop_ok = bit;
            *state = ReceiveState::Ack;
        }
        ReceiveState::Ack => {
            lines.set_data(false);
            *state = ReceiveState::Unack;
        }
        ReceiveState::Unack => {
            lines.set_data(true);
            // Framing errors are reported but the byte is kept.
            if !byte.parity_ok || !byte.stop_ok {
                debug!(
                    "PS2: framing error on {:02X} (parity ok: {}, stop ok: {})",
                    byte.value, byte.parity_ok, byte.stop_ok
                );
            }
            if !inbound.try_push(byte.value) {
                trace!("PS2: receive ring full, dropped {:02X}", byte.value);
            }
            *state = ReceiveState::Finished;
        }
        ReceiveState::Finished => {}
    }
}

/// Odd parity bit for `value`: set when `value` has an even number of ones.
pub fn odd_parity(value: u8) -> bool {
    value.count_ones() % 2 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wired-AND lines with a scriptable host side.
    #[derive(Debug)]
    struct TestLines {
        dev_clock: bool,
        dev_data: bool,
        host_clock: bool,
        host_data: bool,
    }

    impl Default for TestLines {
        fn default() -> Self {
            Self {
                dev_clock: true,
                dev_data: true,
                host_clock: true,
                host_data: true,
            }
        }
    }

    impl Ps2Lines for TestLines {
        fn clock(&self) -> bool {
            self.dev_clock && self.host_clock
        }
        fn data(&self) -> bool {
            self.dev_data && self.host_data
        }
        fn set_clock(&mut self, high: bool) {
            self.dev_clock = high;
        }
        fn set_data(&mut self, high: bool) {
            self.dev_data = high;
        }
    }

    struct Harness {
        link: Link,
        machine: LinkMachine,
        lines: TestLines,
        next: TimerEvent,
    }

    impl Harness {
        fn new() -> Self {
            let (link, machine) = link();
            Self {
                link,
                machine,
                lines: TestLines::default(),
                next: TimerEvent::ClockRising,
            }
        }

        fn step(&mut self) -> TimerEvent {
            let event = self.next;
            self.machine.on_timer(event, &mut self.lines);
            self.next = event.next();
            event
        }

        /// Run until the machine is idle again, recording the data line at
        /// each falling clock edge as a host would.
        fn collect_sent_bits(&mut self) -> Vec<bool> {
            let mut bits = vec![];
            for _ in 0..200 {
                let event = self.step();
                if event == TimerEvent::ClockFalling && !self.lines.clock() {
                    bits.push(self.lines.data());
                }
                if self.link.is_idle() && !self.link.send_pending() {
                    break;
                }
            }
            bits
        }

        /// Play a host-to-device frame. `frame` holds the bits after the
        /// start bit (data, parity, stop). Returns whether the device pulled
        /// data low after the stop bit.
        fn host_send(&mut self, frame: &[bool]) -> bool {
            // Request to send: hold the clock over a rising compare.
            self.lines.host_clock = false;
            while self.step() != TimerEvent::ClockRising {}
            self.step();
            assert_eq!(self.link.phase(), LinkPhase::RequestPending);
            self.lines.host_data = false;
            self.lines.host_clock = true;

            let mut pending = frame.iter().copied();
            let mut acked = false;
            for _ in 0..200 {
                let event = self.step();
                if event == TimerEvent::ClockFalling && !self.lines.clock() {
                    match pending.next() {
                        Some(bit) => self.lines.host_data = bit,
                        None => self.lines.host_data = true,
                    }
                }
                if event == TimerEvent::DataSample && !self.lines.dev_data {
                    acked = true;
                }
                if self.link.is_idle() {
                    break;
                }
            }
            acked
        }
    }

    fn frame_bits(value: u8, parity: bool, stop: bool) -> Vec<bool> {
        let mut bits: Vec<bool> = (0..8).map(|i| (value >> i) & 1 == 1).collect();
        bits.push(parity);
        bits.push(stop);
        bits
    }

    #[test]
    fn test_odd_parity() {
        assert!(odd_parity(0x00));
        assert!(!odd_parity(0x01));
        assert!(odd_parity(0xFF));
        assert!(!odd_parity(0xFA));
    }

    #[test]
    fn test_send_frame() {
        for value in [0x00, 0xAA, 0xFA, 0xE0, 0x83, 0xFF] {
            let mut h = Harness::new();
            assert!(h.link.offer(value));
            assert!(!h.link.offer(0x12), "second byte must wait");

            let bits = h.collect_sent_bits();
            assert_eq!(bits.len(), 11, "frame for {value:02X}: {bits:?}");
            assert!(!bits[0], "start bit");
            let data = (0..8).fold(0u8, |acc, i| acc | ((bits[1 + i] as u8) << i));
            assert_eq!(data, value);
            let ones = bits[1..10].iter().filter(|b| **b).count();
            assert_eq!(ones % 2, 1, "odd parity over data+parity");
            assert!(bits[10], "stop bit");

            assert_eq!(*h.machine.state(), LinkState::Idle);
            assert!(h.lines.dev_clock && h.lines.dev_data);
        }
    }

    #[test]
    fn test_receive_frame() {
        let mut h = Harness::new();
        let acked = h.host_send(&frame_bits(0xED, odd_parity(0xED), true));
        assert!(acked);
        assert_eq!(*h.machine.state(), LinkState::Idle);
        assert!(h.lines.dev_clock && h.lines.dev_data);
        assert_eq!(h.link.poll_received(), Some(0xED));
        assert_eq!(h.link.poll_received(), None);
    }

    #[test]
    fn test_receive_keeps_bad_parity() {
        let mut h = Harness::new();
        let acked = h.host_send(&frame_bits(0xF4, !odd_parity(0xF4), false));
        assert!(acked);
        assert_eq!(h.link.poll_received(), Some(0xF4));
    }

    #[test]
    fn test_request_glitch_returns_to_idle() {
        let mut h = Harness::new();
        h.lines.host_clock = false;
        h.step();
        assert_eq!(h.link.phase(), LinkPhase::RequestPending);
        // Released without a start bit.
        h.lines.host_clock = true;
        h.step();
        h.step();
        h.step();
        assert_eq!(h.link.phase(), LinkPhase::Idle);
        assert_eq!(h.link.poll_received(), None);
    }

    #[test]
    fn test_host_inhibit_aborts_send() {
        let mut h = Harness::new();
        assert!(h.link.offer(0x1C));
        // Rising: start sending; sample: start bit; falling; rising; sample bit 0.
        for _ in 0..5 {
            h.step();
        }
        assert_eq!(h.link.phase(), LinkPhase::Sending);

        h.lines.host_clock = false;
        while h.step() != TimerEvent::DataSample {}
        assert_eq!(*h.machine.state(), LinkState::Idle);
        assert!(h.lines.dev_data, "data released on abort");
        assert!(!h.link.send_pending(), "aborted byte is not retried");

        // The held clock then reads as a request to send.
        while h.step() != TimerEvent::ClockRising {}
        assert_eq!(h.link.phase(), LinkPhase::RequestPending);
    }

    #[test]
    fn test_host_inhibit_aborts_receive() {
        let mut h = Harness::new();
        h.lines.host_clock = false;
        while h.step() != TimerEvent::ClockRising {}
        h.step();
        assert_eq!(h.link.phase(), LinkPhase::RequestPending);
        h.lines.host_data = false;
        h.lines.host_clock = true;

        // Clock in the start bit and three data bits of 0xFF.
        let mut edges = 0;
        while edges < 3 {
            if h.step() == TimerEvent::ClockFalling && !h.lines.clock() {
                h.lines.host_data = true;
                edges += 1;
            }
        }
        assert_eq!(h.link.phase(), LinkPhase::Receiving);

        h.lines.host_clock = false;
        while h.step() != TimerEvent::DataSample {}
        assert_eq!(*h.machine.state(), LinkState::Idle);
        assert!(h.lines.dev_data, "data released on abort");
        assert!(!h.link.has_received(), "partial byte is not delivered");
    }

    #[test]
    fn test_poll_refuses_while_busy() {
        let mut h = Harness::new();
        h.host_send(&frame_bits(0xEE, odd_parity(0xEE), true));
        assert!(h.link.offer(0xEE));
        h.step();
        assert_eq!(h.link.phase(), LinkPhase::Sending);
        assert_eq!(h.link.poll_received(), None);
        h.collect_sent_bits();
        assert_eq!(h.link.poll_received(), Some(0xEE));
    }

    #[test]
    fn test_host_request_wins_over_pending_send() {
        let mut h = Harness::new();
        h.lines.host_clock = false;
        assert!(h.link.offer(0xAA));
        h.step();
        assert_eq!(h.link.phase(), LinkPhase::RequestPending);
        assert!(h.link.send_pending());
    }
}
