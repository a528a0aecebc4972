//! Planner-facing contract.
//!
//! The motion planner is an external collaborator. It supplies fully planned
//! blocks (constant-acceleration trapezoids with continuously-joined entry
//! speeds) and recomputes entry speeds as new moves arrive. The preparer
//! works on an owned copy of the head block and mirrors its consumption
//! progress back through the [`PlannerQueue`] setters, so no pointer into
//! planner storage is ever retained across calls.

use crate::config::N_AXIS;

/// Condition flag bits of a planner block.
pub mod condition {
    pub const RAPID_MOTION: u16 = 1 << 0;
    /// Single-motion block outside the planned program (homing, parking).
    pub const SYSTEM_MOTION: u16 = 1 << 1;
    pub const NO_FEED_OVERRIDE: u16 = 1 << 2;
    pub const SPINDLE_CW: u16 = 1 << 3;
    pub const SPINDLE_CCW: u16 = 1 << 4;
}

/// One planned straight-line move. Read-only to the core except for
/// `millimeters` and `entry_speed_sqr`, which track execution progress.
///
/// Units: millimeters, mm/min, mm/min² and RPM.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct PlannerBlock {
    /// Per-axis step counts for the move.
    pub steps: [u32; N_AXIS],
    /// Maximum of `steps` over all axes: the Bresenham dominant-axis count.
    pub step_event_count: u32,
    /// Per-axis direction bits; a set bit moves the axis negative.
    pub direction_bits: u8,
    /// See [`condition`].
    pub condition: u16,
    /// Millimeters remaining in the block.
    pub millimeters: f32,
    pub acceleration: f32,
    pub entry_speed_sqr: f32,
    /// Programmed feed rate, before overrides.
    pub programmed_rate: f32,
    pub spindle_speed: f32,
    /// Backlash compensation move: steps are emitted but excluded from the
    /// reported machine position.
    pub backlash_motion: bool,
}

impl PlannerBlock {
    pub fn is_system_motion(&self) -> bool {
        self.condition & condition::SYSTEM_MOTION != 0
    }

    pub fn spindle_enabled(&self) -> bool {
        self.condition & (condition::SPINDLE_CW | condition::SPINDLE_CCW) != 0
    }
}

impl Default for PlannerBlock {
    fn default() -> Self {
        Self {
            steps: [0; N_AXIS],
            step_event_count: 0,
            direction_bits: 0,
            condition: 0,
            millimeters: 0.0,
            acceleration: 0.0,
            entry_speed_sqr: 0.0,
            programmed_rate: 0.0,
            spindle_speed: 0.0,
            backlash_motion: false,
        }
    }
}

/// The planner interface consumed by the segment preparer.
pub trait PlannerQueue {
    /// Copy of the head block of the planned queue, if any.
    fn current_block(&mut self) -> Option<PlannerBlock>;

    /// Copy of the pending system-motion block, if any.
    fn system_motion_block(&mut self) -> Option<PlannerBlock>;

    /// Planner-computed exit speed squared for the executing block.
    fn exec_block_exit_speed_sqr(&mut self) -> f32;

    /// Nominal speed of a block with feed and rapid overrides applied.
    fn compute_profile_nominal_speed(&self, block: &PlannerBlock) -> f32;

    /// Releases the head block once the preparer has exhausted it.
    fn discard_current_block(&mut self);

    /// Mirrors the remaining distance of the executing block back into the
    /// planner's copy, so a mid-flight recompute sees true progress.
    fn set_exec_block_millimeters(&mut self, millimeters: f32);

    /// Mirrors a forced entry-speed change (hold override or planner
    /// re-sync) back into the planner's copy.
    fn set_exec_block_entry_speed_sqr(&mut self, entry_speed_sqr: f32);
}
