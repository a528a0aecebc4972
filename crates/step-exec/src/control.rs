//! Control facade: driver power, timer gating and subsystem reset.
//!
//! These operations run at main-loop priority and are the only places the
//! core is allowed to dwell. Everything here works through the HAL traits,
//! so boards wire in their port, timer and delay implementations once and
//! the sequencing stays portable.

use embedded_hal::delay::DelayNs;

use crate::config::{axis_dir_bit, axis_step_bit, mirror_step_bits, Settings, N_AXIS};
use crate::executor::StepExecutor;
use crate::hal::{StepDirPort, StepTimer};
use crate::prep::SegmentPreparer;
use crate::system::{MachineState, SystemState};

/// Generates the step and direction port invert masks from the per-axis
/// settings bits. Mirrored gantry pins shadow their primary axis here; the
/// dual-axis direction inversion is applied separately at write time.
pub fn generate_step_dir_invert_masks(settings: &Settings) -> (u8, u8) {
    let mut step_mask = 0;
    let mut dir_mask = 0;
    for axis in 0..N_AXIS {
        if settings.step_invert_mask & (1 << axis) != 0 {
            step_mask |= mirror_step_bits(axis_step_bit(axis));
        }
        if settings.dir_invert_mask & (1 << axis) != 0 {
            dir_mask |= mirror_step_bits(axis_dir_bit(axis));
        }
    }
    (step_mask, dir_mask)
}

/// Puts the step and direction interface pins into their idle state. Timer
/// configuration is the board's responsibility at construction time.
pub fn init<P: StepDirPort>(port: &mut P, settings: &Settings) {
    let (step_mask, dir_mask) = generate_step_dir_invert_masks(settings);
    port.write_steps(step_mask);
    port.write_dirs(dir_mask);
    #[cfg(feature = "defmt")]
    defmt::debug!("stepper: pins initialized");
}

/// Energizes the stepper drivers and starts the step timer.
///
/// The cycle only starts once the supervisor raises its cycle-start flag;
/// startup init and limits call this without starting a cycle. Call
/// [`StepExecutor::clear_pulse_latch`] (in the ISR context) beforehand so
/// the first tick cannot emit a stale pulse.
pub fn wake_up<P, T, D>(port: &mut P, timer: &mut T, delay: &mut D, settings: &Settings)
where
    P: StepDirPort,
    T: StepTimer,
    D: DelayNs,
{
    port.set_enable(settings.invert_st_enable());

    // Give the drivers some time to wake up.
    delay.delay_ms(10);

    timer.start();
    #[cfg(feature = "defmt")]
    defmt::debug!("stepper: wake");
}

/// Stops the step timer and sets the driver idle state.
///
/// Unless the idle lock time is `0xFF` (keep energized), the drivers dwell
/// energized for the configured time so the axes stop dead instead of
/// drifting on residual inertia, then power down. `force` disables
/// unconditionally.
pub fn disable<P, T, D>(
    force: bool,
    port: &mut P,
    timer: &mut T,
    delay: &mut D,
    settings: &Settings,
    sys: &SystemState,
) where
    P: StepDirPort,
    T: StepTimer,
    D: DelayNs,
{
    timer.stop();

    // Reset the step pins, leaving the direction pins as they are.
    let (step_mask, _) = generate_step_dir_invert_masks(settings);
    port.write_steps(step_mask);

    let mut disable_drivers = false;
    if (settings.stepper_idle_lock_time != 0xFF
        || sys.alarm_active()
        || sys.state() == MachineState::Sleep)
        && sys.state() != MachineState::Homing
    {
        delay.delay_ms(u32::from(settings.stepper_idle_lock_time));
        disable_drivers = true;
    }
    if force {
        disable_drivers = true;
    }

    let mut level = disable_drivers;
    if settings.invert_st_enable() {
        level = !level;
    }
    port.set_enable(level);
    #[cfg(feature = "defmt")]
    defmt::debug!("stepper: disable (force={})", force);
}

/// Resets and clears the whole stepper subsystem: disables the drivers,
/// zeroes both halves, regenerates the invert masks and idles the pins.
///
/// The executor half normally lives in the ISR context; run this with
/// interrupts masked or the timer verifiably stopped.
#[allow(clippy::too_many_arguments)]
pub fn reset<P, T, D>(
    executor: &mut StepExecutor<'_>,
    preparer: &mut SegmentPreparer<'_>,
    port: &mut P,
    timer: &mut T,
    delay: &mut D,
    settings: &Settings,
    sys: &SystemState,
) where
    P: StepDirPort,
    T: StepTimer,
    D: DelayNs,
{
    disable(false, port, timer, delay, settings, sys);

    let (step_mask, dir_mask) = generate_step_dir_invert_masks(settings);
    executor.reset(step_mask, dir_mask);
    preparer.reset();

    port.write_steps(step_mask);
    port.write_dirs(dir_mask);
    #[cfg(feature = "defmt")]
    defmt::debug!("stepper: reset");
}
