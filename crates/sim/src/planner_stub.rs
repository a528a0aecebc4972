//! Scripted planner double.
//!
//! Implements the core's planner contract over a pre-planned queue of
//! blocks. Exit speeds come from the next block's entry speed (junctions are
//! assumed already planned); nominal speed is the programmed rate, i.e. no
//! feed overrides are simulated.

use std::collections::VecDeque;

use step_exec::config::N_AXIS;
use step_exec::planner::{PlannerBlock, PlannerQueue};

/// Builds a straight-line block from signed per-axis step counts.
pub fn line_block(
    steps: [i32; N_AXIS],
    millimeters: f32,
    feed_rate: f32,
    acceleration: f32,
) -> PlannerBlock {
    let mut block = PlannerBlock {
        millimeters,
        acceleration,
        programmed_rate: feed_rate,
        ..PlannerBlock::default()
    };
    for (axis, &signed) in steps.iter().enumerate() {
        block.steps[axis] = signed.unsigned_abs();
        if signed < 0 {
            block.direction_bits |= 1 << axis;
        }
    }
    block.step_event_count = block.steps.iter().copied().max().unwrap_or(0);
    block
}

/// A planner double feeding scripted blocks to the preparer.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    queue: VecDeque<PlannerBlock>,
    system_motion: Option<PlannerBlock>,
    /// Routes the execution write-backs to the system-motion block while
    /// one is executing, matching the contract's exec-block semantics.
    pub exec_system_motion: bool,
    /// Blocks released so far.
    pub discarded: usize,
}

impl ScriptedPlanner {
    pub fn new(blocks: Vec<PlannerBlock>) -> Self {
        Self {
            queue: blocks.into(),
            system_motion: None,
            exec_system_motion: false,
            discarded: 0,
        }
    }

    pub fn push_block(&mut self, block: PlannerBlock) {
        self.queue.push_back(block);
    }

    pub fn set_system_motion(&mut self, block: PlannerBlock) {
        self.system_motion = Some(block);
    }

    pub fn clear_system_motion(&mut self) {
        self.system_motion = None;
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn exec_block_mut(&mut self) -> Option<&mut PlannerBlock> {
        if self.exec_system_motion {
            self.system_motion.as_mut()
        } else {
            self.queue.front_mut()
        }
    }
}

impl PlannerQueue for ScriptedPlanner {
    fn current_block(&mut self) -> Option<PlannerBlock> {
        self.queue.front().copied()
    }

    fn system_motion_block(&mut self) -> Option<PlannerBlock> {
        self.system_motion
    }

    fn exec_block_exit_speed_sqr(&mut self) -> f32 {
        // The junction speed of the planned path: the next block's entry.
        self.queue
            .get(1)
            .map(|next| next.entry_speed_sqr)
            .unwrap_or(0.0)
    }

    fn compute_profile_nominal_speed(&self, block: &PlannerBlock) -> f32 {
        block.programmed_rate
    }

    fn discard_current_block(&mut self) {
        if self.queue.pop_front().is_some() {
            self.discarded += 1;
        }
    }

    fn set_exec_block_millimeters(&mut self, millimeters: f32) {
        if let Some(block) = self.exec_block_mut() {
            block.millimeters = millimeters;
        }
    }

    fn set_exec_block_entry_speed_sqr(&mut self, entry_speed_sqr: f32) {
        if let Some(block) = self.exec_block_mut() {
            block.entry_speed_sqr = entry_speed_sqr;
        }
    }
}
