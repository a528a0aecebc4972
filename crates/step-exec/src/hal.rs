//! Hardware abstraction seams.
//!
//! The core drives named step and direction lines, one periodic step timer
//! with a pulse-width compare channel, the spindle PWM and the probe input
//! through these traits. They are designed to map onto atomic port writes
//! (e.g. the BSRR register on STM32 parts) and an up-counting 16-bit timer;
//! the doubles in the sim crate implement them for host testing.

use crate::system::SystemState;

/// Step, direction and enable outputs.
///
/// Bit positions follow the layout in [`crate::config`]; the mirrored gantry
/// bits arrive pre-expanded. All bits are physical levels, with pin
/// inversion already applied by the caller, so a full-image write maps to a
/// single port store.
pub trait StepDirPort {
    /// Writes the full step-line image.
    fn write_steps(&mut self, bits: u8);

    /// Writes the full direction-line image.
    fn write_dirs(&mut self, bits: u8);

    /// Drives the shared driver-enable line to a raw level.
    fn set_enable(&mut self, level: bool);
}

/// The periodic step timer and its pulse-width companion.
///
/// The auto-reload dictates the tick period (step rising edges); the compare
/// channel fires the falling-edge interrupt partway through the period.
pub trait StepTimer {
    fn start(&mut self);

    fn stop(&mut self);

    /// Programs the auto-reload: timer ticks between step rising edges.
    fn set_period(&mut self, cycles: u16);

    /// Programs the pulse-width compare: falling-edge offset within the
    /// period. Must retire before the next rising edge.
    fn set_pulse_compare(&mut self, cycles: u16);
}

/// Spindle PWM driver.
pub trait SpindleControl {
    /// Pushes a PWM value to the output. Called from the ISR at segment
    /// load, just prior to the first step.
    fn set_speed(&mut self, pwm: u8);

    /// Converts an RPM request into a PWM value.
    fn compute_pwm_value(&mut self, rpm: f32) -> u8;

    /// PWM value meaning spindle off.
    fn pwm_off_value(&self) -> u8;
}

/// Probe input monitor.
pub trait ProbeMonitor {
    /// Called every ISR tick while the probe is armed. May latch the machine
    /// position and raise supervisor flags to abort the motion.
    fn state_monitor(&mut self, sys: &SystemState);
}
