//! Timing of the center-aligned bus timer that clocks the PS/2 link.
//!
//! The counter runs up to `period / 2` and back down. The clock compare
//! sits a quarter of the way up and matches twice per cycle (once counting
//! up, once counting down); the data compare sits at the peak and matches
//! once. That yields three interrupts per bus clock, always in the order of
//! [`TimerEvent::SEQUENCE`].

/// One compare interrupt of the bus timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Clock compare while counting up: the device releases the clock.
    ClockRising,
    /// Data compare at the peak: middle of the high half of the bit cell.
    DataSample,
    /// Clock compare while counting down: the device pulls the clock low.
    ClockFalling,
}

impl TimerEvent {
    pub const SEQUENCE: [TimerEvent; 3] = [
        TimerEvent::ClockRising,
        TimerEvent::DataSample,
        TimerEvent::ClockFalling,
    ];

    /// The event that follows this one.
    pub fn next(self) -> Self {
        match self {
            TimerEvent::ClockRising => TimerEvent::DataSample,
            TimerEvent::DataSample => TimerEvent::ClockFalling,
            TimerEvent::ClockFalling => TimerEvent::ClockRising,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerConfig {
    pub input_hz: u32,
    pub prescaler: u32,
    /// Full up/down cycle in counter ticks.
    pub period: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            input_hz: 72_000_000,
            prescaler: 3,
            period: 2000,
        }
    }
}

impl TimerConfig {
    /// Auto-reload value: the counter peaks at `period / 2 - 1`.
    pub fn reload(&self) -> u32 {
        self.period / 2 - 1
    }

    pub fn clock_compare(&self) -> u32 {
        self.period / 4 - 1
    }

    pub fn data_compare(&self) -> u32 {
        self.period / 2 - 1
    }

    pub fn bus_clock_hz(&self) -> u32 {
        self.input_hz / self.prescaler / self.period
    }

    /// Length of one bus clock in nanoseconds.
    pub fn bit_time_ns(&self) -> u64 {
        1_000_000_000 / self.bus_clock_hz() as u64
    }

    /// Timer interrupts per millisecond tick, rounded down but at least one.
    pub fn events_per_ms(&self) -> u32 {
        (self.bus_clock_hz() * TimerEvent::SEQUENCE.len() as u32 / 1000).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let t = TimerConfig::default();
        assert_eq!(t.bus_clock_hz(), 12_000);
        assert_eq!(t.reload(), 999);
        assert_eq!(t.clock_compare(), 499);
        assert_eq!(t.data_compare(), 999);
        assert_eq!(t.bit_time_ns(), 83_333);
        assert_eq!(t.events_per_ms(), 36);
    }

    #[test]
    fn test_event_cycle() {
        let mut event = TimerEvent::ClockRising;
        for expected in TimerEvent::SEQUENCE.iter().cycle().skip(1).take(6) {
            event = event.next();
            assert_eq!(event, *expected);
        }
    }

    #[test]
    fn test_slow_timer_has_one_event_per_ms() {
        let t = TimerConfig {
            input_hz: 1_000_000,
            prescaler: 100,
            period: 1000,
        };
        assert_eq!(t.bus_clock_hz(), 10);
        assert_eq!(t.events_per_ms(), 1);
    }
}
