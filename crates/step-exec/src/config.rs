//! Compile-time machine configuration and runtime stepper settings.
//!
//! Axis layout, timer frequencies and the step-smoothing level table are
//! fixed at build time; pin inversion, idle lock and mode flags arrive at
//! runtime from the settings store.

use crate::errors::ConfigError;

/// Number of coordinated Cartesian axes.
pub const N_AXIS: usize = 3;

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;

// Bit layout shared by step and direction masks. The mirrored gantry axes
// occupy the bits above Z and are only driven when the matching feature is
// enabled.
pub const X_BIT: u8 = 1 << X_AXIS;
pub const Y_BIT: u8 = 1 << Y_AXIS;
pub const Z_BIT: u8 = 1 << Z_AXIS;
pub const X2_BIT: u8 = 1 << 3;
pub const Y2_BIT: u8 = 1 << 4;

/// All primary-axis bits.
pub const AXIS_MASK: u8 = X_BIT | Y_BIT | Z_BIT;

/// Step timer input frequency in Hz.
pub const F_TIMER_STEPPER: u32 = 24_000_000;

/// Timer ticks per microsecond, used to convert step periods to reloads.
pub const TICKS_PER_MICROSECOND: u32 = F_TIMER_STEPPER / 1_000_000;

/// Hardware ceiling on the step rate. Segments requesting a faster rate are
/// clamped to this at load time and emit a faster-than-requested pulse train.
pub const MAX_STEP_RATE_HZ: u32 = 30_000;

/// Smallest permitted timer reload, derived from [`MAX_STEP_RATE_HZ`].
pub const STEP_TIMER_MIN: u16 = (F_TIMER_STEPPER / MAX_STEP_RATE_HZ) as u16;

/// Segment cadence: how many segments per second the preparer aims for.
pub const ACCELERATION_TICKS_PER_SECOND: u32 = 100;

/// Nominal segment duration in minutes (~10 ms).
pub const DT_SEGMENT: f32 = 1.0 / (ACCELERATION_TICKS_PER_SECOND as f32 * 60.0);

/// Scalar applied to the single-step distance when floor-limiting a
/// segment's travel, guaranteeing at least one step per segment.
pub const REQ_MM_INCREMENT_SCALAR: f32 = 1.25;

// Adaptive Multi-Axis Step Smoothing levels and cutoff frequencies. Each
// level doubles the ISR rate while bit-shifting the Bresenham counts, so
// non-dominant axes may step in the intermediate ticks. The cutoffs must be
// weighed against ISR overdrive, 16-bit timer accuracy and CPU overhead.
pub const MAX_AMASS_LEVEL: u8 = 3;
/// Level 1 engages below 8 kHz (overdrives the ISR x2).
pub const AMASS_LEVEL1: u32 = F_TIMER_STEPPER / 8000;
/// Level 2 engages below 4 kHz (overdrives the ISR x4).
pub const AMASS_LEVEL2: u32 = F_TIMER_STEPPER / 4000;
/// Level 3 engages below 2 kHz (overdrives the ISR x8).
pub const AMASS_LEVEL3: u32 = F_TIMER_STEPPER / 2000;

/// Segment ring size in slots. The ring holds up to `SEGMENT_BUFFER_SIZE - 1`
/// segments, roughly 40-50 ms of motion at the nominal cadence.
pub const SEGMENT_BUFFER_SIZE: usize = 10;

/// Stepper block pool size. One less than the ring guarantees at least one
/// unreferenced slot for the preparer to write into.
pub const BLOCK_POOL_SIZE: usize = SEGMENT_BUFFER_SIZE - 1;

/// Port bit for an axis' step line.
pub const fn axis_step_bit(axis: usize) -> u8 {
    1 << axis
}

/// Port bit for an axis' direction line.
pub const fn axis_dir_bit(axis: usize) -> u8 {
    1 << axis
}

/// Expands primary-axis step bits with the mirrored gantry bits.
#[inline]
pub fn mirror_step_bits(bits: u8) -> u8 {
    #[allow(unused_mut)]
    let mut out = bits;
    #[cfg(feature = "dual-x")]
    if bits & X_BIT != 0 {
        out |= X2_BIT;
    }
    #[cfg(feature = "dual-y")]
    if bits & Y_BIT != 0 {
        out |= Y2_BIT;
    }
    out
}

/// Expands primary-axis direction bits with the mirrored gantry bits,
/// applying the dual-axis direction inversion where configured.
#[inline]
pub fn mirror_dir_bits(bits: u8) -> u8 {
    #[allow(unused_mut)]
    let mut out = bits;
    #[cfg(feature = "dual-x")]
    {
        if bits & X_BIT != 0 {
            out |= X2_BIT;
        }
        #[cfg(feature = "invert-dual-x")]
        {
            out ^= X2_BIT;
        }
    }
    #[cfg(feature = "dual-y")]
    {
        if bits & Y_BIT != 0 {
            out |= Y2_BIT;
        }
        #[cfg(feature = "invert-dual-y")]
        {
            out ^= Y2_BIT;
        }
    }
    out
}

/// Flag bits of [`Settings::flags`].
pub mod settings_flags {
    /// The stepper enable line is active-low.
    pub const INVERT_ST_ENABLE: u8 = 1 << 0;
    /// Laser mode: spindle power tracks the programmed rate per segment.
    pub const LASER_MODE: u8 = 1 << 1;
}

/// Runtime stepper settings, supplied by the external settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    /// Per-axis step pin inversion, one bit per axis index.
    pub step_invert_mask: u8,
    /// Per-axis direction pin inversion, one bit per axis index.
    pub dir_invert_mask: u8,
    /// Milliseconds to hold the drivers energized after motion stops.
    /// `0xFF` keeps them energized indefinitely.
    pub stepper_idle_lock_time: u8,
    /// See [`settings_flags`].
    pub flags: u8,
}

impl Settings {
    /// Checks that the invert masks only address configured axes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_invert_mask & !AXIS_MASK != 0 {
            return Err(ConfigError::InvalidStepInvertMask);
        }
        if self.dir_invert_mask & !AXIS_MASK != 0 {
            return Err(ConfigError::InvalidDirInvertMask);
        }
        Ok(())
    }

    pub fn invert_st_enable(&self) -> bool {
        self.flags & settings_flags::INVERT_ST_ENABLE != 0
    }

    pub fn laser_mode(&self) -> bool {
        self.flags & settings_flags::LASER_MODE != 0
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_invert_mask: 0,
            dir_invert_mask: 0,
            stepper_idle_lock_time: 25,
            flags: 0,
        }
    }
}
