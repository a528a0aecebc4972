//! The step generator.
//!
//! [`StepExecutor::on_timer_tick`] is the workhorse of the core and must be
//! called from the periodic step timer's interrupt handler. It pops
//! pre-computed constant-rate segments from the ring and executes them by
//! pulsing the step pins via the Bresenham line algorithm, with Adaptive
//! Multi-Axis Step Smoothing (AMASS) distributing non-dominant-axis pulses
//! across the overdriven ticks. A companion compare interrupt calls
//! [`StepExecutor::on_pulse_timeout`] to drop the pulse lines partway
//! through the period, giving a programmable pulse width.
//!
//! The handler is simple and dumb by design: all acceleration math happens
//! in the preparer. The tick path is integer-only, never allocates and never
//! waits. Pulse output is pipelined — the bits computed on one tick are
//! asserted at the top of the next — so direction lines written during
//! segment load are always stable before the first rising edge they govern.
//!
//! The executor keeps an owned copy of both the active segment and its
//! stepper block, so pool slot contents are never touched after load and
//! the ring tail advances only once a segment's last step has executed.

use crate::config::{axis_dir_bit, axis_step_bit, mirror_dir_bits, mirror_step_bits};
use crate::config::{N_AXIS, STEP_TIMER_MIN};
use crate::hal::{ProbeMonitor, SpindleControl, StepDirPort, StepTimer};
use crate::segment::{BlockPool, Segment, SegmentConsumer, StepperBlock};
use crate::system::{rt_exec, MachineState, SystemState};

/// The step generator ISR state. Owns the consumer half of the segment ring.
pub struct StepExecutor<'a> {
    consumer: SegmentConsumer<'a>,
    pool: &'a BlockPool,
    sys: &'a SystemState,

    /// Bresenham error counters, one per axis.
    counters: [u32; N_AXIS],
    /// Per-axis increments for the current segment, AMASS-adjusted.
    steps: [u32; N_AXIS],
    /// Owned copy of the active stepper block.
    exec_block: StepperBlock,
    /// Pool index of `exec_block`; a change indicates a new planner block.
    exec_block_index: u8,
    /// Owned copy of the segment being executed.
    exec_segment: Option<Segment>,
    /// Step events remaining in the current segment.
    step_count: u16,
    /// Step bits to assert on the next tick (pulse pipelining).
    step_outbits: u8,
    dir_outbits: u8,
    step_invert_mask: u8,
    dir_invert_mask: u8,
}

impl<'a> StepExecutor<'a> {
    pub fn new(consumer: SegmentConsumer<'a>, pool: &'a BlockPool, sys: &'a SystemState) -> Self {
        Self {
            consumer,
            pool,
            sys,
            counters: [0; N_AXIS],
            steps: [0; N_AXIS],
            exec_block: StepperBlock::default(),
            exec_block_index: 0,
            exec_segment: None,
            step_count: 0,
            step_outbits: 0,
            dir_outbits: 0,
            step_invert_mask: 0,
            dir_invert_mask: 0,
        }
    }

    /// Installs freshly generated port invert masks.
    pub fn set_invert_masks(&mut self, step_mask: u8, dir_mask: u8) {
        self.step_invert_mask = step_mask;
        self.dir_invert_mask = dir_mask;
        self.dir_outbits = dir_mask;
    }

    /// Clears the pulse pipeline latch so the first tick after wake-up
    /// cannot emit a stale pulse.
    pub fn clear_pulse_latch(&mut self) {
        self.step_outbits = 0;
    }

    /// Drains the ring and zeroes all execution state. Part of the stepper
    /// reset sequence; must run with the step timer stopped.
    pub fn reset(&mut self, step_invert_mask: u8, dir_invert_mask: u8) {
        while self.consumer.dequeue().is_some() {}
        self.counters = [0; N_AXIS];
        self.steps = [0; N_AXIS];
        self.exec_block = StepperBlock::default();
        self.exec_block_index = 0;
        self.exec_segment = None;
        self.step_count = 0;
        self.step_outbits = 0;
        self.set_invert_masks(step_invert_mask, dir_invert_mask);
    }

    /// The segment currently executing, if any. Intended for status
    /// reporting and simulation harnesses.
    pub fn exec_segment(&self) -> Option<&Segment> {
        self.exec_segment.as_ref()
    }

    /// Segments waiting in the ring behind the active one.
    pub fn pending_segments(&self) -> usize {
        self.consumer.len()
    }

    /// The segment at the ring tail: the executing one while a segment is
    /// in flight, otherwise the one the next load will consume.
    pub fn peek_segment(&self) -> Option<&Segment> {
        self.consumer.peek()
    }

    /// True when nothing is executing and the ring is empty.
    pub fn is_idle(&self) -> bool {
        self.exec_segment.is_none() && self.consumer.peek().is_none()
    }

    /// The periodic timer interrupt body.
    pub fn on_timer_tick<P, T, S, R>(
        &mut self,
        port: &mut P,
        timer: &mut T,
        spindle: &mut S,
        probe: &mut R,
    ) where
        P: StepDirPort,
        T: StepTimer,
        S: SpindleControl,
        R: ProbeMonitor,
    {
        // Rising edge: assert the bits latched on the previous tick.
        port.write_steps(self.step_outbits ^ self.step_invert_mask);

        // If there is no segment in flight, attempt to load the next one.
        if self.exec_segment.is_none() {
            if let Some(&queued) = self.consumer.peek() {
                let mut segment = queued;

                // Enforce the hardware step-rate ceiling.
                if segment.cycles_per_tick < STEP_TIMER_MIN {
                    segment.cycles_per_tick = STEP_TIMER_MIN;
                }
                timer.set_period(segment.cycles_per_tick);
                // Falling edge at 75% of the period.
                timer.set_pulse_compare((u32::from(segment.cycles_per_tick) * 3 / 4) as u16);
                self.step_count = segment.n_step;

                // A changed pool index means a new planner block: re-point
                // the block copy and center the Bresenham error terms.
                if self.exec_block_index != segment.st_block_index {
                    self.exec_block_index = segment.st_block_index;
                    self.exec_block = critical_section::with(|cs| {
                        self.pool.borrow_ref(cs)[usize::from(self.exec_block_index)]
                    });
                    self.counters = [self.exec_block.step_event_count >> 1; N_AXIS];
                }

                // Direction lines must be valid before the steppers see the
                // next rising edge; some drivers need a setup time of a few
                // microseconds.
                self.dir_outbits =
                    mirror_dir_bits(self.exec_block.direction_bits) ^ self.dir_invert_mask;
                port.write_dirs(self.dir_outbits);

                // Adjust the Bresenham increments to this segment's
                // smoothing level.
                for axis in 0..N_AXIS {
                    self.steps[axis] = self.exec_block.steps[axis] >> segment.amass_level;
                }

                // Set real-time spindle output just prior to the first step.
                spindle.set_speed(segment.spindle_pwm);

                self.exec_segment = Some(segment);
            } else {
                // Ring empty: idle the machine cleanly.
                timer.stop();
                self.on_pulse_timeout(port);

                // Ensure PWM is off upon completion of rate-controlled motion.
                if self.exec_block.is_pwm_rate_adjusted {
                    spindle.set_speed(spindle.pwm_off_value());
                }

                // Flag the supervisor for cycle end.
                self.sys.set_exec_state_flag(rt_exec::CYCLE_STOP);
                return;
            }
        }

        let segment = match self.exec_segment {
            Some(segment) => segment,
            None => return,
        };

        if self.sys.probe_armed() {
            probe.state_monitor(self.sys);
        }

        // Execute the step displacement profile by Bresenham line algorithm.
        self.step_outbits = 0;
        for axis in 0..N_AXIS {
            self.counters[axis] += self.steps[axis];
            if self.counters[axis] > self.exec_block.step_event_count {
                self.step_outbits |= mirror_step_bits(axis_step_bit(axis));
                self.counters[axis] -= self.exec_block.step_event_count;

                // Backlash compensation moves are invisible to the reported
                // machine position.
                if !segment.backlash_motion {
                    if self.exec_block.direction_bits & axis_dir_bit(axis) != 0 {
                        self.sys.position_add(axis, -1);
                    } else {
                        self.sys.position_add(axis, 1);
                    }
                }
            }
        }

        // During a homing cycle, lock out axes already at their limit.
        if self.sys.state() == MachineState::Homing {
            self.step_outbits &= self.sys.homing_axis_lock();
        }

        self.step_count -= 1;
        if self.step_count == 0 {
            // Segment complete: only now advance the ring tail, releasing
            // the slot and its pool reference.
            self.exec_segment = None;
            let _ = self.consumer.dequeue();
        }
    }

    /// The pulse-width compare interrupt body: drops all step lines back to
    /// their idle level, leaving the direction lines untouched.
    pub fn on_pulse_timeout<P: StepDirPort>(&mut self, port: &mut P) {
        port.write_steps(self.step_invert_mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{X_BIT, Y_BIT};
    use crate::segment::{new_block_pool, SegmentQueue};

    #[derive(Default)]
    struct MockPort {
        step_writes: Vec<u8>,
        dir_writes: Vec<u8>,
        enable: Option<bool>,
    }

    impl StepDirPort for MockPort {
        fn write_steps(&mut self, bits: u8) {
            self.step_writes.push(bits);
        }
        fn write_dirs(&mut self, bits: u8) {
            self.dir_writes.push(bits);
        }
        fn set_enable(&mut self, level: bool) {
            self.enable = Some(level);
        }
    }

    #[derive(Default)]
    struct MockTimer {
        period: u16,
        pulse_compare: u16,
        running: bool,
    }

    impl StepTimer for MockTimer {
        fn start(&mut self) {
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn set_period(&mut self, cycles: u16) {
            self.period = cycles;
        }
        fn set_pulse_compare(&mut self, cycles: u16) {
            self.pulse_compare = cycles;
        }
    }

    #[derive(Default)]
    struct MockSpindle {
        speeds: Vec<u8>,
    }

    impl SpindleControl for MockSpindle {
        fn set_speed(&mut self, pwm: u8) {
            self.speeds.push(pwm);
        }
        fn compute_pwm_value(&mut self, rpm: f32) -> u8 {
            rpm as u8
        }
        fn pwm_off_value(&self) -> u8 {
            0
        }
    }

    #[derive(Default)]
    struct NullProbe;

    impl ProbeMonitor for NullProbe {
        fn state_monitor(&mut self, _sys: &SystemState) {}
    }

    fn block(steps: [u32; N_AXIS], direction_bits: u8) -> StepperBlock {
        let max = steps.iter().copied().max().unwrap_or(0);
        StepperBlock {
            steps,
            step_event_count: max,
            direction_bits,
            is_pwm_rate_adjusted: false,
        }
    }

    fn seed_pool(pool: &BlockPool, index: usize, data: StepperBlock) {
        critical_section::with(|cs| {
            pool.borrow_ref_mut(cs)[index] = data;
        });
    }

    struct Rig {
        port: MockPort,
        timer: MockTimer,
        spindle: MockSpindle,
        probe: NullProbe,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                port: MockPort::default(),
                timer: MockTimer::default(),
                spindle: MockSpindle::default(),
                probe: NullProbe,
            }
        }

        fn tick(&mut self, executor: &mut StepExecutor<'_>) {
            executor.on_timer_tick(
                &mut self.port,
                &mut self.timer,
                &mut self.spindle,
                &mut self.probe,
            );
        }
    }

    #[test]
    fn dominant_axis_steps_every_tick() {
        let mut queue = SegmentQueue::new();
        let (mut producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        seed_pool(&pool, 1, block([4, 0, 0], 0));
        producer
            .enqueue(Segment {
                n_step: 4,
                cycles_per_tick: 2000,
                st_block_index: 1,
                amass_level: 0,
                spindle_pwm: 0,
                backlash_motion: false,
            })
            .unwrap();

        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();

        // Load tick plus three more; every tick latches an X pulse that is
        // asserted at the top of the following tick.
        for _ in 0..4 {
            rig.tick(&mut executor);
        }
        rig.tick(&mut executor); // asserts the final pulse, then idles

        let pulses = rig
            .port
            .step_writes
            .iter()
            .filter(|&&bits| bits & X_BIT != 0)
            .count();
        assert_eq!(pulses, 4);
        assert_eq!(sys.position(0), 4);
        assert_eq!(rig.timer.period, 2000);
        assert_eq!(rig.timer.pulse_compare, 1500);
    }

    #[test]
    fn single_step_axis_fires_at_half_way_tick() {
        // With counters centered at step_event_count/2 and the strict `>`
        // comparison, an axis with one step in a 4-event block pulses on the
        // third tick: ceil((4 + 1) / 2).
        let mut queue = SegmentQueue::new();
        let (mut producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        seed_pool(&pool, 1, block([4, 1, 0], 0));
        producer
            .enqueue(Segment {
                n_step: 4,
                cycles_per_tick: 2000,
                st_block_index: 1,
                amass_level: 0,
                spindle_pwm: 0,
                backlash_motion: false,
            })
            .unwrap();

        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();
        let mut y_latched_on = Vec::new();
        for tick in 1..=4 {
            rig.tick(&mut executor);
            if executor.step_outbits & Y_BIT != 0 {
                y_latched_on.push(tick);
            }
        }
        assert_eq!(y_latched_on, vec![3]);
        assert_eq!(sys.position(1), 1);
    }

    #[test]
    fn direction_bit_decrements_position_and_sets_dir_lines() {
        let mut queue = SegmentQueue::new();
        let (mut producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        seed_pool(&pool, 1, block([2, 0, 0], X_BIT));
        producer
            .enqueue(Segment {
                n_step: 2,
                cycles_per_tick: 1000,
                st_block_index: 1,
                amass_level: 0,
                spindle_pwm: 0,
                backlash_motion: false,
            })
            .unwrap();

        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();
        rig.tick(&mut executor);
        assert_eq!(rig.port.dir_writes, vec![X_BIT]);
        rig.tick(&mut executor);
        assert_eq!(sys.position(0), -2);
    }

    #[test]
    fn backlash_motion_leaves_position_untouched() {
        let mut queue = SegmentQueue::new();
        let (mut producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        seed_pool(&pool, 1, block([3, 0, 0], 0));
        producer
            .enqueue(Segment {
                n_step: 3,
                cycles_per_tick: 1000,
                st_block_index: 1,
                amass_level: 0,
                spindle_pwm: 0,
                backlash_motion: true,
            })
            .unwrap();

        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();
        for _ in 0..4 {
            rig.tick(&mut executor);
        }
        let pulses = rig
            .port
            .step_writes
            .iter()
            .filter(|&&bits| bits & X_BIT != 0)
            .count();
        assert_eq!(pulses, 3);
        assert_eq!(sys.position(0), 0);
    }

    #[test]
    fn homing_lock_suppresses_locked_axes() {
        let mut queue = SegmentQueue::new();
        let (mut producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        sys.set_state(MachineState::Homing);
        sys.set_homing_axis_lock(!X_BIT);
        seed_pool(&pool, 1, block([2, 2, 0], 0));
        producer
            .enqueue(Segment {
                n_step: 2,
                cycles_per_tick: 1000,
                st_block_index: 1,
                amass_level: 0,
                spindle_pwm: 0,
                backlash_motion: false,
            })
            .unwrap();

        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();
        for _ in 0..3 {
            rig.tick(&mut executor);
        }
        assert!(rig
            .port
            .step_writes
            .iter()
            .all(|&bits| bits & X_BIT == 0));
        let y_pulses = rig
            .port
            .step_writes
            .iter()
            .filter(|&&bits| bits & Y_BIT != 0)
            .count();
        assert_eq!(y_pulses, 2);
    }

    #[test]
    fn empty_ring_idles_and_flags_cycle_stop() {
        let mut queue = SegmentQueue::new();
        let (_producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();
        rig.timer.running = true;

        rig.tick(&mut executor);

        assert!(!rig.timer.running);
        assert_eq!(sys.rt_exec_state() & rt_exec::CYCLE_STOP, rt_exec::CYCLE_STOP);
        // Idle image written after the (empty) pulse assert.
        assert_eq!(rig.port.step_writes, vec![0, 0]);
    }

    #[test]
    fn slow_segment_rate_is_clamped_to_ceiling() {
        let mut queue = SegmentQueue::new();
        let (mut producer, consumer) = queue.split();
        let pool = new_block_pool();
        let sys = SystemState::new();
        seed_pool(&pool, 1, block([1, 0, 0], 0));
        producer
            .enqueue(Segment {
                n_step: 1,
                cycles_per_tick: STEP_TIMER_MIN - 100,
                st_block_index: 1,
                amass_level: 0,
                spindle_pwm: 0,
                backlash_motion: false,
            })
            .unwrap();

        let mut executor = StepExecutor::new(consumer, &pool, &sys);
        let mut rig = Rig::new();
        rig.tick(&mut executor);
        assert_eq!(rig.timer.period, STEP_TIMER_MIN);
        assert_eq!(
            rig.timer.pulse_compare,
            (u32::from(STEP_TIMER_MIN) * 3 / 4) as u16
        );
    }
}
