//! The segment preparer.
//!
//! [`SegmentPreparer::prepare_buffer`] is called continuously from the main
//! loop. It checks steps out of the executing planner block, integrates the
//! block's velocity profile into short constant-rate segments and feeds them
//! to the step generator through the segment ring. The ring is sized so no
//! main-loop operation outlasts the time the generator needs to drain it.
//!
//! The planner only computes block entry speeds; the internal profile of
//! each block is computed here, ad hoc, as one of seven shapes: cruise-only,
//! cruise-deceleration, acceleration-cruise, acceleration-only,
//! deceleration-only, full-trapezoid and triangle (no cruise). A commanded
//! forced deceleration (feed hold) overrides the planned profile with a
//! single ramp to zero speed, which may end mid-block.
//!
//! Computation units are steps, millimeters and minutes.

use libm::{ceilf, sqrtf};

use crate::config::{
    Settings, DT_SEGMENT, MAX_AMASS_LEVEL, N_AXIS, REQ_MM_INCREMENT_SCALAR,
    TICKS_PER_MICROSECOND,
};
use crate::config::{AMASS_LEVEL1, AMASS_LEVEL2, AMASS_LEVEL3};
use crate::hal::SpindleControl;
use crate::planner::{condition, PlannerBlock, PlannerQueue};
use crate::segment::{next_block_index, BlockPool, Segment, SegmentProducer, StepperBlock};
use crate::system::{step_control, SystemState};

/// Ramp state of the velocity profile integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RampState {
    Accel,
    Cruise,
    Decel,
    /// Decelerating down to a reduced nominal speed after an override cut.
    DecelOverride,
}

// Recalculate flags, private to the preparer.
const PREP_RECALCULATE: u8 = 1 << 0;
#[cfg(feature = "parking")]
const PREP_HOLD_PARTIAL_BLOCK: u8 = 1 << 1;
#[cfg(feature = "parking")]
const PREP_PARKING: u8 = 1 << 2;
const PREP_DECEL_OVERRIDE: u8 = 1 << 3;

/// Step execution data of a partially completed block, saved around a
/// parking motion.
#[cfg(feature = "parking")]
#[derive(Debug, Clone, Copy, Default)]
struct ParkingSnapshot {
    st_block_index: u8,
    steps_remaining: f32,
    step_per_mm: f32,
    dt_remainder: f32,
}

/// Main-loop half of the core. Owns the producer side of the segment ring
/// and all floating-point profile state; the ISR never touches any of this.
pub struct SegmentPreparer<'a> {
    producer: SegmentProducer<'a>,
    pool: &'a BlockPool,
    sys: &'a SystemState,

    /// Owned working copy of the planner block being prepped.
    pl_block: Option<PlannerBlock>,

    /// Pool slot holding the Bresenham data of the prepped block.
    st_block_index: u8,
    recalculate_flag: u8,

    /// Unexecuted time of the previous segment's partial step, in minutes.
    dt_remainder: f32,
    steps_remaining: f32,
    step_per_mm: f32,
    req_mm_increment: f32,

    #[cfg(feature = "parking")]
    parking: ParkingSnapshot,

    ramp_type: RampState,
    /// End of the velocity profile, measured from the end of the block in
    /// mm. Non-zero only when a forced deceleration terminates mid-block.
    mm_complete: f32,
    /// Speed at the end of the segment buffer (mm/min).
    current_speed: f32,
    /// Peak speed of the executing block; below nominal for triangles.
    maximum_speed: f32,
    exit_speed: f32,
    /// Acceleration ramp end, measured from the end of the block (mm).
    accelerate_until: f32,
    /// Deceleration ramp start, measured from the end of the block (mm).
    decelerate_after: f32,

    /// Cached `1 / programmed_rate` for laser PWM scaling.
    inv_rate: f32,
    current_spindle_pwm: u8,
}

impl<'a> SegmentPreparer<'a> {
    pub fn new(producer: SegmentProducer<'a>, pool: &'a BlockPool, sys: &'a SystemState) -> Self {
        Self {
            producer,
            pool,
            sys,
            pl_block: None,
            st_block_index: 0,
            recalculate_flag: 0,
            dt_remainder: 0.0,
            steps_remaining: 0.0,
            step_per_mm: 0.0,
            req_mm_increment: 0.0,
            #[cfg(feature = "parking")]
            parking: ParkingSnapshot::default(),
            ramp_type: RampState::Accel,
            mm_complete: 0.0,
            current_speed: 0.0,
            maximum_speed: 0.0,
            exit_speed: 0.0,
            accelerate_until: 0.0,
            decelerate_after: 0.0,
            inv_rate: 0.0,
            current_spindle_pwm: 0,
        }
    }

    /// Zeroes all preparation state. Part of the stepper reset sequence.
    pub fn reset(&mut self) {
        self.pl_block = None;
        self.st_block_index = 0;
        self.recalculate_flag = 0;
        self.dt_remainder = 0.0;
        self.steps_remaining = 0.0;
        self.step_per_mm = 0.0;
        self.req_mm_increment = 0.0;
        #[cfg(feature = "parking")]
        {
            self.parking = ParkingSnapshot::default();
        }
        self.ramp_type = RampState::Accel;
        self.mm_complete = 0.0;
        self.current_speed = 0.0;
        self.maximum_speed = 0.0;
        self.exit_speed = 0.0;
        self.accelerate_until = 0.0;
        self.decelerate_after = 0.0;
        self.inv_rate = 0.0;
        self.current_spindle_pwm = 0;
    }

    /// Called when the planner recalculates entry speeds under the executing
    /// block. Forces a profile reload on the next [`prepare_buffer`] pass
    /// and hands the true current entry speed back to the planner.
    ///
    /// [`prepare_buffer`]: SegmentPreparer::prepare_buffer
    pub fn update_planner_block_params<P: PlannerQueue>(&mut self, planner: &mut P) {
        // Ignore if at the start of a new block.
        if let Some(block) = self.pl_block.as_mut() {
            self.recalculate_flag |= PREP_RECALCULATE;
            block.entry_speed_sqr = self.current_speed * self.current_speed;
            planner.set_exec_block_entry_speed_sqr(block.entry_speed_sqr);
            self.pl_block = None;
        }
    }

    /// Speed computed for the last prepped segment, or zero outside active
    /// motion states. Lags true speed by up to the buffered segment time.
    pub fn realtime_rate(&self) -> f32 {
        if self.sys.state().is_motion_active() {
            self.current_speed
        } else {
            0.0
        }
    }

    /// Switches the preparer to the special parking motion, saving the
    /// execution state of a partially completed block if one is held.
    #[cfg(feature = "parking")]
    pub fn parking_setup_buffer(&mut self) {
        if self.recalculate_flag & PREP_HOLD_PARTIAL_BLOCK != 0 {
            self.parking = ParkingSnapshot {
                st_block_index: self.st_block_index,
                steps_remaining: self.steps_remaining,
                step_per_mm: self.step_per_mm,
                dt_remainder: self.dt_remainder,
            };
        }
        self.recalculate_flag |= PREP_PARKING;
        self.recalculate_flag &= !PREP_RECALCULATE;
        self.pl_block = None;
    }

    /// Restores normal run state after a parking motion, resuming the
    /// partially completed block where it was interrupted.
    #[cfg(feature = "parking")]
    pub fn parking_restore_buffer(&mut self) {
        if self.recalculate_flag & PREP_HOLD_PARTIAL_BLOCK != 0 {
            self.st_block_index = self.parking.st_block_index;
            self.steps_remaining = self.parking.steps_remaining;
            self.step_per_mm = self.parking.step_per_mm;
            self.dt_remainder = self.parking.dt_remainder;
            self.req_mm_increment = REQ_MM_INCREMENT_SCALAR / self.step_per_mm;
            self.recalculate_flag = PREP_HOLD_PARTIAL_BLOCK | PREP_RECALCULATE;
        } else {
            self.recalculate_flag = 0;
        }
        self.pl_block = None; // Reload the next block.
    }

    /// Fills the segment ring from the executing planner block.
    ///
    /// Each pass carves as many segments as the ring accepts, each covering
    /// roughly [`DT_SEGMENT`] of motion, and returns early when no block is
    /// available or a forced deceleration has finished.
    #[allow(clippy::float_cmp)] // ramp distances are snapped before comparison
    pub fn prepare_buffer<P, S>(&mut self, planner: &mut P, spindle: &mut S, settings: &Settings)
    where
        P: PlannerQueue,
        S: SpindleControl,
    {
        // Blocked while in a suspend state with no suspend motion to run.
        if self.sys.step_control_test(step_control::END_MOTION) {
            return;
        }

        while self.producer.ready() {
            // Load a new planner block, or recompute the profile of the one
            // in flight if the planner updated it under us.
            let mut pl = match self.pl_block {
                Some(block) => block,
                None => match self.acquire_block(planner, settings) {
                    Some(block) => block,
                    None => return,
                },
            };

            let mut segment = Segment {
                st_block_index: self.st_block_index,
                backlash_motion: pl.backlash_motion,
                ..Segment::default()
            };

            /*
            Compute the average velocity of this segment by determining the
            distance traveled over the segment time DT_SEGMENT. The loop
            first attempts a full segment from the current ramp state; if
            segment time remains when a ramp state change terminates it, it
            keeps looping through the progressing ramp states to fill the
            rest. A segment truncated by the end of the velocity profile is
            complete despite executing less than DT_SEGMENT. Profiles end
            either at the end of the block (typical) or mid-block at the end
            of a forced deceleration.
            */
            let mut dt_max = DT_SEGMENT;
            let mut dt = 0.0_f32;
            let mut time_var = dt_max;
            let mut mm_remaining = pl.millimeters;
            // Floor the segment distance to guarantee at least one step.
            let minimum_mm = (mm_remaining - self.req_mm_increment).max(0.0);

            loop {
                match self.ramp_type {
                    RampState::DecelOverride => {
                        let speed_var = pl.acceleration * time_var;
                        let mm_var = time_var * (self.current_speed - 0.5 * speed_var);
                        mm_remaining -= mm_var;
                        if mm_remaining < self.accelerate_until || mm_var <= 0.0 {
                            // Cruise or cruise-deceleration types only for
                            // deceleration override.
                            mm_remaining = self.accelerate_until; // 0.0 at EOB
                            time_var = 2.0 * (pl.millimeters - mm_remaining)
                                / (self.current_speed + self.maximum_speed);
                            self.ramp_type = RampState::Cruise;
                            self.current_speed = self.maximum_speed;
                        } else {
                            // Mid-deceleration override ramp.
                            self.current_speed -= speed_var;
                        }
                    }
                    RampState::Accel => {
                        // Acceleration only computes during the first pass.
                        let speed_var = pl.acceleration * time_var;
                        mm_remaining -= time_var * (self.current_speed + 0.5 * speed_var);
                        if mm_remaining < self.accelerate_until {
                            // Acceleration-cruise junction, ramp junction of
                            // an accel-decel triangle, or end of block.
                            mm_remaining = self.accelerate_until; // 0.0 at EOB
                            time_var = 2.0 * (pl.millimeters - mm_remaining)
                                / (self.current_speed + self.maximum_speed);
                            self.ramp_type = if mm_remaining == self.decelerate_after {
                                RampState::Decel
                            } else {
                                RampState::Cruise
                            };
                            self.current_speed = self.maximum_speed;
                        } else {
                            self.current_speed += speed_var;
                        }
                    }
                    RampState::Cruise => {
                        // If maximum_speed * time_var is too low, round-off
                        // can leave the distance unchanged; the planner
                        // enforces a minimum speed to prevent this.
                        let mm_var = mm_remaining - self.maximum_speed * time_var;
                        if mm_var < self.decelerate_after {
                            // Cruise-deceleration junction or end of block.
                            time_var =
                                (mm_remaining - self.decelerate_after) / self.maximum_speed;
                            mm_remaining = self.decelerate_after; // 0.0 at EOB
                            self.ramp_type = RampState::Decel;
                        } else {
                            mm_remaining = mm_var;
                        }
                    }
                    RampState::Decel => {
                        let speed_var = pl.acceleration * time_var;
                        let mut ramp_finished = true;
                        // Guard against trajectories through zero speed.
                        if self.current_speed > speed_var {
                            let mm_var =
                                mm_remaining - time_var * (self.current_speed - 0.5 * speed_var);
                            if mm_var > self.mm_complete {
                                // Typical case: still inside the ramp.
                                mm_remaining = mm_var;
                                self.current_speed -= speed_var;
                                ramp_finished = false;
                            }
                        }
                        if ramp_finished {
                            // End of block or end of forced deceleration.
                            time_var = 2.0 * (mm_remaining - self.mm_complete)
                                / (self.current_speed + self.exit_speed);
                            mm_remaining = self.mm_complete;
                            self.current_speed = self.exit_speed;
                        }
                    }
                }

                dt += time_var;
                if dt < dt_max {
                    // Incomplete segment time at a ramp junction.
                    time_var = dt_max - dt;
                } else if mm_remaining > minimum_mm {
                    // Very slow segment with zero steps: extend the segment
                    // time until it covers at least one.
                    dt_max += DT_SEGMENT;
                    time_var = dt_max - dt;
                } else {
                    break; // Segment execution time maxed.
                }

                if mm_remaining <= self.mm_complete {
                    break; // Velocity profile complete.
                }
            }

            // Spindle PWM for this segment. Rate-adjusted (laser) motions
            // recompute every segment; others only when flagged.
            let pwm_rate_adjusted = critical_section::with(|cs| {
                self.pool.borrow_ref(cs)[usize::from(self.st_block_index)].is_pwm_rate_adjusted
            });
            if pwm_rate_adjusted || self.sys.step_control_test(step_control::UPDATE_SPINDLE_PWM) {
                if pl.spindle_enabled() {
                    let mut rpm = pl.spindle_speed;
                    // Feed and rapid overrides are independent of PWM value
                    // and do not alter laser power per distance.
                    if pwm_rate_adjusted {
                        rpm *= self.current_speed * self.inv_rate;
                    }
                    self.current_spindle_pwm = spindle.compute_pwm_value(rpm);
                } else {
                    self.sys.set_spindle_speed(0.0);
                    self.current_spindle_pwm = spindle.pwm_off_value();
                }
                self.sys
                    .step_control_clear(step_control::UPDATE_SPINDLE_PWM);
            }
            segment.spindle_pwm = self.current_spindle_pwm;

            /*
            Compute segment step rate and steps to execute. Steps come from
            a direct scalar conversion of the millimeters remaining, rather
            than a per-segment tally, sidestepping accumulated float
            round-off. The end of every segment carries a partial step that
            cannot execute (the ISR needs whole steps for AMASS); its time
            is tracked in dt_remainder and folded into the next segment so
            the emitted rate stays exact.
            */
            let step_dist_remaining = self.step_per_mm * mm_remaining;
            let n_steps_remaining = ceilf(step_dist_remaining);
            let last_n_steps_remaining = ceilf(self.steps_remaining);
            segment.n_step = (last_n_steps_remaining - n_steps_remaining) as u16;

            // Bail at the end of a feed hold with no step left to execute:
            // less than one step to zero speed, but already very close.
            if segment.n_step == 0 && self.sys.step_control_test(step_control::EXECUTE_HOLD) {
                self.sys.step_control_set(step_control::END_MOTION);
                #[cfg(feature = "parking")]
                if self.recalculate_flag & PREP_PARKING == 0 {
                    self.recalculate_flag |= PREP_HOLD_PARTIAL_BLOCK;
                }
                // Segment not generated; current step data retained.
                return;
            }

            dt += self.dt_remainder;
            let inv_rate = dt / (last_n_steps_remaining - step_dist_remaining);

            // Timer cycles per step event.
            let mut cycles =
                ceilf((TICKS_PER_MICROSECOND as f32 * 1_000_000.0 * 60.0) * inv_rate) as u32;

            // Step smoothing level: each level halves the timer reload and
            // doubles the step event count, letting non-dominant axes step
            // in the intermediate ticks.
            if cycles < AMASS_LEVEL1 {
                segment.amass_level = 0;
            } else {
                segment.amass_level = if cycles < AMASS_LEVEL2 {
                    1
                } else if cycles < AMASS_LEVEL3 {
                    2
                } else {
                    3
                };
                cycles >>= segment.amass_level;
                segment.n_step <<= segment.amass_level;
            }
            segment.cycles_per_tick = if cycles < (1 << 16) {
                cycles as u16
            } else {
                // Just set the slowest speed possible.
                0xFFFF
            };

            // Commit: the ISR may execute the segment as soon as the ring
            // head advances. The producer was checked ready at loop entry.
            let _ = self.producer.enqueue(segment);

            // Update planner progress and the partial-step carry.
            pl.millimeters = mm_remaining;
            planner.set_exec_block_millimeters(mm_remaining);
            self.steps_remaining = n_steps_remaining;
            self.dt_remainder = (n_steps_remaining - step_dist_remaining) * inv_rate;
            self.pl_block = Some(pl);

            if mm_remaining == self.mm_complete {
                if mm_remaining > 0.0 {
                    // End of forced termination mid-block. Hold the prep
                    // state for resuming; the ISR drains the ring and the
                    // supervisor sets the next state on CYCLE_STOP.
                    self.sys.step_control_set(step_control::END_MOTION);
                    #[cfg(feature = "parking")]
                    if self.recalculate_flag & PREP_PARKING == 0 {
                        self.recalculate_flag |= PREP_HOLD_PARTIAL_BLOCK;
                    }
                    return;
                }
                // End of planner block: all steps are checked out.
                if self.sys.step_control_test(step_control::EXECUTE_SYS_MOTION) {
                    self.sys.step_control_set(step_control::END_MOTION);
                    return;
                }
                self.pl_block = None;
                planner.discard_current_block();
            }
        }
    }

    /// Loads the next planner block (or re-enters the updated in-flight
    /// block) and computes its velocity profile. Returns the working copy,
    /// or `None` when the planner has nothing queued.
    #[allow(clippy::float_cmp)]
    fn acquire_block<P: PlannerQueue>(
        &mut self,
        planner: &mut P,
        settings: &Settings,
    ) -> Option<PlannerBlock> {
        let mut pl = if self
            .sys
            .step_control_test(step_control::EXECUTE_SYS_MOTION)
        {
            planner.system_motion_block()?
        } else {
            planner.current_block()?
        };

        if self.recalculate_flag & PREP_RECALCULATE != 0 {
            // Only the velocity profile needs recomputing; the Bresenham
            // data in the pool still matches the block.
            #[cfg(feature = "parking")]
            {
                if self.recalculate_flag & PREP_PARKING != 0 {
                    self.recalculate_flag &= !PREP_RECALCULATE;
                } else {
                    self.recalculate_flag = 0;
                }
            }
            #[cfg(not(feature = "parking"))]
            {
                self.recalculate_flag = 0;
            }
        } else {
            // New block: copy its Bresenham data into a fresh pool slot,
            // pre-shifted by the maximum smoothing level so no level ever
            // divides below the original counts and loses a step.
            self.st_block_index = next_block_index(self.st_block_index);

            let mut st_block = StepperBlock {
                direction_bits: pl.direction_bits,
                is_pwm_rate_adjusted: false,
                ..StepperBlock::default()
            };
            for axis in 0..N_AXIS {
                st_block.steps[axis] = pl.steps[axis] << MAX_AMASS_LEVEL;
            }
            st_block.step_event_count = pl.step_event_count << MAX_AMASS_LEVEL;

            self.steps_remaining = pl.step_event_count as f32;
            self.step_per_mm = self.steps_remaining / pl.millimeters;
            self.req_mm_increment = REQ_MM_INCREMENT_SCALAR / self.step_per_mm;
            self.dt_remainder = 0.0;

            if self.sys.step_control_test(step_control::EXECUTE_HOLD)
                || self.recalculate_flag & PREP_DECEL_OVERRIDE != 0
            {
                // New block loaded mid-hold: override the planned entry
                // speed to enforce the deceleration in progress.
                self.current_speed = self.exit_speed;
                pl.entry_speed_sqr = self.exit_speed * self.exit_speed;
                planner.set_exec_block_entry_speed_sqr(pl.entry_speed_sqr);
                self.recalculate_flag &= !PREP_DECEL_OVERRIDE;
            } else {
                self.current_speed = sqrtf(pl.entry_speed_sqr);
            }

            // PWM-rate-adjusted motions always complete with the spindle
            // off, so the inverse rate only needs caching here.
            if settings.laser_mode() && pl.condition & condition::SPINDLE_CCW != 0 {
                self.inv_rate = 1.0 / pl.programmed_rate;
                st_block.is_pwm_rate_adjusted = true;
            }

            critical_section::with(|cs| {
                self.pool.borrow_ref_mut(cs)[usize::from(self.st_block_index)] = st_block;
            });
        }

        self.compute_profile(&mut pl, planner);
        self.sys
            .step_control_set(step_control::UPDATE_SPINDLE_PWM);
        self.pl_block = Some(pl);
        Some(pl)
    }

    /// Computes or recomputes the velocity profile of the prepped block from
    /// its entry and exit speeds. A commanded forced deceleration overrides
    /// the planner speeds and decelerates to zero instead.
    #[allow(clippy::float_cmp)]
    fn compute_profile<P: PlannerQueue>(&mut self, pl: &mut PlannerBlock, planner: &mut P) {
        self.mm_complete = 0.0; // Profile normally completes at the block end.
        let inv_2_accel = 0.5 / pl.acceleration;

        if self.sys.step_control_test(step_control::EXECUTE_HOLD) {
            // Forced deceleration to zero velocity.
            self.ramp_type = RampState::Decel;
            let decel_dist = pl.millimeters - inv_2_accel * pl.entry_speed_sqr;
            if decel_dist < 0.0 {
                // Deceleration spans the entire block; the hold ends later.
                self.exit_speed =
                    sqrtf(pl.entry_speed_sqr - 2.0 * pl.acceleration * pl.millimeters);
            } else {
                self.mm_complete = decel_dist; // End of feed hold.
                self.exit_speed = 0.0;
            }
            return;
        }

        self.ramp_type = RampState::Accel;
        self.accelerate_until = pl.millimeters;

        let exit_speed_sqr;
        if self
            .sys
            .step_control_test(step_control::EXECUTE_SYS_MOTION)
        {
            // Enforce a stop at the end of a system motion.
            exit_speed_sqr = 0.0;
            self.exit_speed = 0.0;
        } else {
            exit_speed_sqr = planner.exec_block_exit_speed_sqr();
            self.exit_speed = sqrtf(exit_speed_sqr);
        }

        let nominal_speed = planner.compute_profile_nominal_speed(pl);
        let nominal_speed_sqr = nominal_speed * nominal_speed;
        let intersect_distance =
            0.5 * (pl.millimeters + inv_2_accel * (pl.entry_speed_sqr - exit_speed_sqr));

        if pl.entry_speed_sqr > nominal_speed_sqr {
            // Only occurs during override reductions.
            self.accelerate_until =
                pl.millimeters - inv_2_accel * (pl.entry_speed_sqr - nominal_speed_sqr);
            if self.accelerate_until <= 0.0 {
                // Deceleration-only; the block exit speed no longer matches
                // the planned one, so flag the next block to load with the
                // override in place.
                self.ramp_type = RampState::Decel;
                self.exit_speed =
                    sqrtf(pl.entry_speed_sqr - 2.0 * pl.acceleration * pl.millimeters);
                self.recalculate_flag |= PREP_DECEL_OVERRIDE;
            } else {
                // Decelerate to cruise or cruise-decelerate; guaranteed to
                // intersect the updated plan.
                self.decelerate_after = inv_2_accel * (nominal_speed_sqr - exit_speed_sqr);
                self.maximum_speed = nominal_speed;
                self.ramp_type = RampState::DecelOverride;
            }
        } else if intersect_distance > 0.0 {
            if intersect_distance < pl.millimeters {
                // Either trapezoid or triangle. For acceleration-cruise and
                // cruise-only types the following computes to 0.0.
                self.decelerate_after = inv_2_accel * (nominal_speed_sqr - exit_speed_sqr);
                if self.decelerate_after < intersect_distance {
                    // Trapezoid.
                    self.maximum_speed = nominal_speed;
                    if pl.entry_speed_sqr == nominal_speed_sqr {
                        // Cruise-deceleration or cruise-only.
                        self.ramp_type = RampState::Cruise;
                    } else {
                        // Full-trapezoid or acceleration-cruise.
                        self.accelerate_until -=
                            inv_2_accel * (nominal_speed_sqr - pl.entry_speed_sqr);
                    }
                } else {
                    // Triangle: no cruise.
                    self.accelerate_until = intersect_distance;
                    self.decelerate_after = intersect_distance;
                    self.maximum_speed =
                        sqrtf(2.0 * pl.acceleration * intersect_distance + exit_speed_sqr);
                }
            } else {
                // Deceleration-only.
                self.ramp_type = RampState::Decel;
            }
        } else {
            // Acceleration-only.
            self.accelerate_until = 0.0;
            self.maximum_speed = self.exit_speed;
        }
    }
}
