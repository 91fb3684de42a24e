//! Deterministic single-threaded model of the converter board.
//!
//! The bus timer, the millisecond tick and the infrared UART are folded
//! into one event loop, advanced by one timer compare every time the
//! service loop relaxes in a busy wait. [`Simulation::events_per_ms`]
//! compares make up one millisecond of [`Clock::now`].

mod bus;
mod host;
mod script;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace};

pub use bus::WiredBus;
pub use host::{Frame, HostPort, HostTransfer};
pub use script::{DEFAULT_BYTE_GAP_MS, IrScript, parse_hex_bytes};

use crate::channel::ByteChannel;
use crate::config::ConverterConfig;
use crate::converter::Converter;
use crate::hal::{Clock, StatusIndicators, StatusLights};
use crate::keymap::Keymap;
use crate::link::{Link, LinkMachine, LinkState, link};
use crate::timer::TimerEvent;

struct World {
    machine: LinkMachine,
    bus: WiredBus,
    host: HostPort,
    next_event: TimerEvent,
    events_per_ms: u32,
    events_this_ms: u32,
    now_ms: u32,
    ir: Arc<ByteChannel>,
    /// `(due_ms, byte)` in delivery order.
    ir_pending: VecDeque<(u32, u8)>,
    ir_dropped: usize,
}

impl World {
    fn step(&mut self) {
        let event = self.next_event;
        self.machine.on_timer(event, &mut self.bus);
        self.host.observe(event, &mut self.bus);
        self.next_event = event.next();

        self.events_this_ms += 1;
        if self.events_this_ms >= self.events_per_ms {
            self.events_this_ms = 0;
            self.tick();
        }
    }

    fn tick(&mut self) {
        self.now_ms = self.now_ms.wrapping_add(1);
        while let Some(&(due, byte)) = self.ir_pending.front() {
            if due > self.now_ms {
                break;
            }
            self.ir_pending.pop_front();
            if self.ir.try_push(byte) {
                trace!("IR: received {byte:02X} at {} ms", self.now_ms);
            } else {
                self.ir_dropped += 1;
                debug!("IR: ring full, dropped {byte:02X}");
            }
        }
    }
}

/// Millisecond clock whose busy-wait advances the board by one compare.
#[derive(Clone)]
pub struct SimClock {
    world: Rc<RefCell<World>>,
}

impl Clock for SimClock {
    fn now(&self) -> u32 {
        self.world.borrow().now_ms
    }

    fn relax(&self) {
        self.world.borrow_mut().step();
    }
}

/// Lock lights that remember every state they were set to.
#[derive(Clone, Default)]
pub struct SimLights {
    history: Rc<RefCell<Vec<StatusLights>>>,
}

impl SimLights {
    pub fn current(&self) -> StatusLights {
        self.history.borrow().last().copied().unwrap_or_default()
    }

    pub fn history(&self) -> Vec<StatusLights> {
        self.history.borrow().clone()
    }
}

impl StatusIndicators for SimLights {
    fn show(&mut self, lights: StatusLights) {
        debug!("Lights: {lights:?}");
        self.history.borrow_mut().push(lights);
    }
}

pub struct Simulation {
    world: Rc<RefCell<World>>,
    config: ConverterConfig,
    link: Link,
    ir: Arc<ByteChannel>,
    lights: SimLights,
}

impl Simulation {
    pub fn new(config: &ConverterConfig) -> Self {
        let (link, machine) = link();
        let ir = Arc::new(ByteChannel::new());
        let world = World {
            machine,
            bus: WiredBus::default(),
            host: HostPort::default(),
            next_event: TimerEvent::ClockRising,
            events_per_ms: config.timer.events_per_ms(),
            events_this_ms: 0,
            now_ms: 0,
            ir: ir.clone(),
            ir_pending: VecDeque::new(),
            ir_dropped: 0,
        };
        Self {
            world: Rc::new(RefCell::new(world)),
            config: *config,
            link,
            ir,
            lights: SimLights::default(),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            world: self.world.clone(),
        }
    }

    /// A converter wired to this board.
    pub fn converter(&self, keymap: Keymap) -> Converter<SimClock, SimLights> {
        Converter::new(
            &self.config,
            self.clock(),
            self.link.clone(),
            self.ir.clone(),
            keymap,
            self.lights.clone(),
        )
    }

    pub fn events_per_ms(&self) -> u32 {
        self.world.borrow().events_per_ms
    }

    pub fn now(&self) -> u32 {
        self.world.borrow().now_ms
    }

    /// Deliver `script` to the infrared UART, starting one millisecond
    /// from now.
    pub fn schedule_ir(&self, script: &IrScript) {
        let mut world = self.world.borrow_mut();
        let start = world.now_ms.saturating_add(1);
        let pending = script
            .events()
            .iter()
            .map(|&(offset, byte)| (start.saturating_add(offset), byte));
        world.ir_pending.extend(pending);
    }

    /// Queue bytes for the host to send to the converter.
    pub fn host_send(&self, bytes: &[u8]) {
        self.world.borrow_mut().host.send(bytes);
    }

    /// Bytes the host has received, in order.
    pub fn received(&self) -> Vec<u8> {
        self.world.borrow().host.received()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.world.borrow().host.frames().to_vec()
    }

    pub fn transfers(&self) -> Vec<HostTransfer> {
        self.world.borrow().host.transfers().to_vec()
    }

    pub fn lights(&self) -> &SimLights {
        &self.lights
    }

    pub fn ir_dropped(&self) -> usize {
        self.world.borrow().ir_dropped
    }

    /// No input scheduled, nothing buffered, both ends of the bus idle.
    pub fn is_quiet(&self) -> bool {
        let world = self.world.borrow();
        world.ir_pending.is_empty()
            && world.ir.is_empty()
            && world.host.is_idle()
            && *world.machine.state() == LinkState::Idle
            && world.bus.is_released()
            && !self.link.has_received()
    }

    /// Step the board without running the service loop.
    pub fn advance_ms(&self, ms: u32) {
        let clock = self.clock();
        let start = clock.now();
        while clock.now().wrapping_sub(start) < ms {
            clock.relax();
        }
    }

    /// Run the service loop until everything has drained. Returns false if
    /// that takes longer than `limit_ms`.
    pub fn run_until_quiet<I: StatusIndicators>(
        &self,
        converter: &mut Converter<SimClock, I>,
        limit_ms: u32,
    ) -> bool {
        let start = self.now();
        loop {
            if self.is_quiet() {
                return true;
            }
            if self.now().wrapping_sub(start) >= limit_ms {
                debug!("Simulation still busy after {limit_ms} ms");
                return false;
            }
            converter.service_once();
        }
    }
}
