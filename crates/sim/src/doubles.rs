//! Recording doubles for the core's hardware seams.
//!
//! All doubles assume non-inverted pins (the default [`Settings`]) so a set
//! bit in a port write is an asserted line.
//!
//! [`Settings`]: step_exec::Settings

use embedded_hal::delay::DelayNs;
use step_exec::config::N_AXIS;
use step_exec::hal::{ProbeMonitor, SpindleControl, StepDirPort, StepTimer};
use step_exec::system::SystemState;

/// Records step and direction port activity and counts rising edges per
/// primary axis.
#[derive(Debug, Default)]
pub struct PinRecorder {
    last_steps: u8,
    rising_acc: u8,
    /// Rising-edge counts per primary axis.
    pub edges: [u64; N_AXIS],
    /// Last direction image written.
    pub dirs: u8,
    pub enable: Option<bool>,
}

impl PinRecorder {
    /// Returns and clears the rising-edge mask accumulated since the last
    /// call. One harness tick produces at most one pulse per axis.
    pub fn take_rising(&mut self) -> u8 {
        core::mem::take(&mut self.rising_acc)
    }
}

impl StepDirPort for PinRecorder {
    fn write_steps(&mut self, bits: u8) {
        let rising = bits & !self.last_steps;
        self.last_steps = bits;
        self.rising_acc |= rising;
        for (axis, count) in self.edges.iter_mut().enumerate() {
            if rising & (1 << axis) != 0 {
                *count += 1;
            }
        }
    }

    fn write_dirs(&mut self, bits: u8) {
        self.dirs = bits;
    }

    fn set_enable(&mut self, level: bool) {
        self.enable = Some(level);
    }
}

/// Step timer double. Keeps the programmed period/compare pair and a full
/// period history for rate assertions.
#[derive(Debug, Default)]
pub struct SimTimer {
    pub period: u16,
    pub pulse_compare: u16,
    pub running: bool,
    pub period_history: Vec<u16>,
}

impl StepTimer for SimTimer {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn set_period(&mut self, cycles: u16) {
        self.period = cycles;
        self.period_history.push(cycles);
    }

    fn set_pulse_compare(&mut self, cycles: u16) {
        self.pulse_compare = cycles;
    }
}

/// Spindle double with a linear RPM-to-PWM map.
#[derive(Debug)]
pub struct SimSpindle {
    pub max_rpm: f32,
    /// Every PWM value pushed by the ISR, in order.
    pub speed_history: Vec<u8>,
}

impl SimSpindle {
    pub fn new(max_rpm: f32) -> Self {
        Self {
            max_rpm,
            speed_history: Vec::new(),
        }
    }
}

impl Default for SimSpindle {
    fn default() -> Self {
        Self::new(10_000.0)
    }
}

impl SpindleControl for SimSpindle {
    fn set_speed(&mut self, pwm: u8) {
        self.speed_history.push(pwm);
    }

    fn compute_pwm_value(&mut self, rpm: f32) -> u8 {
        let scaled = (rpm / self.max_rpm * 255.0).clamp(0.0, 255.0);
        scaled as u8
    }

    fn pwm_off_value(&self) -> u8 {
        0
    }
}

/// Probe double that never trips.
#[derive(Debug, Default)]
pub struct NullProbe;

impl ProbeMonitor for NullProbe {
    fn state_monitor(&mut self, _sys: &SystemState) {}
}

/// Delay double that only accumulates the requested time.
#[derive(Debug, Default)]
pub struct SimDelay {
    pub total_ns: u64,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
