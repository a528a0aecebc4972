//! Simulation harness.
//!
//! [`SimMachine`] wires a [`StepExecutor`] and [`SegmentPreparer`] pair over
//! recording doubles and drives them the way firmware would: the preparer
//! from a main loop, the executor once per timer tick. Simulated time
//! advances by the programmed timer period each tick, so velocity profiles
//! can be checked against wall-clock expectations.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use step_exec::config::{Settings, F_TIMER_STEPPER, N_AXIS};
use step_exec::hal::StepTimer;
use step_exec::segment::{new_block_pool, BlockPool, Segment, SegmentQueue};
use step_exec::system::{rt_exec, step_control, MachineState, SystemState};
use step_exec::{control, PlannerBlock, SegmentPreparer, StepExecutor};

use crate::doubles::{NullProbe, PinRecorder, SimDelay, SimSpindle, SimTimer};
use crate::planner_stub::ScriptedPlanner;

/// One recorded pulse event: which axes stepped on which tick.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TraceEntry {
    pub tick: u64,
    pub step_bits: u8,
    pub position: [i32; N_AXIS],
}

/// An in-process machine: both halves of the core, their shared buffers and
/// the recording doubles.
pub struct SimMachine {
    sys: &'static SystemState,
    executor: StepExecutor<'static>,
    preparer: SegmentPreparer<'static>,
    pub planner: ScriptedPlanner,
    pub pins: PinRecorder,
    pub timer: SimTimer,
    pub spindle: SimSpindle,
    probe: NullProbe,
    settings: Settings,
    ticks: u64,
    elapsed_sec: f64,
    /// Highest preparer rate observed, in mm/min.
    pub max_rate_seen: f32,
    segment_log: Vec<Segment>,
    trace: Vec<TraceEntry>,
}

impl SimMachine {
    /// Builds a machine around scripted planner blocks. The ring, pool and
    /// supervisor state are leaked to satisfy the `'static` wiring the
    /// firmware would provide with statics.
    pub fn new(settings: Settings, blocks: Vec<PlannerBlock>) -> Self {
        let queue: &'static mut SegmentQueue = Box::leak(Box::new(SegmentQueue::new()));
        let (producer, consumer) = queue.split();
        let pool: &'static BlockPool = Box::leak(Box::new(new_block_pool()));
        let sys: &'static SystemState = Box::leak(Box::new(SystemState::new()));

        let mut executor = StepExecutor::new(consumer, pool, sys);
        let preparer = SegmentPreparer::new(producer, pool, sys);

        let mut pins = PinRecorder::default();
        control::init(&mut pins, &settings);
        let (step_mask, dir_mask) = control::generate_step_dir_invert_masks(&settings);
        executor.set_invert_masks(step_mask, dir_mask);

        Self {
            sys,
            executor,
            preparer,
            planner: ScriptedPlanner::new(blocks),
            pins,
            timer: SimTimer::default(),
            spindle: SimSpindle::default(),
            probe: NullProbe,
            settings,
            ticks: 0,
            elapsed_sec: 0.0,
            max_rate_seen: 0.0,
            segment_log: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Enters the cycle state and wakes the steppers.
    pub fn start_cycle(&mut self) {
        self.sys.set_state(MachineState::Cycle);
        self.executor.clear_pulse_latch();
        let mut delay = SimDelay::default();
        control::wake_up(&mut self.pins, &mut self.timer, &mut delay, &self.settings);
    }

    /// One main-loop pass of the segment preparer.
    pub fn prepare(&mut self) {
        self.preparer
            .prepare_buffer(&mut self.planner, &mut self.spindle, &self.settings);
        let rate = self.preparer.realtime_rate();
        if rate > self.max_rate_seen {
            self.max_rate_seen = rate;
        }
    }

    /// One step timer tick: the periodic interrupt followed by the pulse
    /// falling edge.
    pub fn tick(&mut self) {
        // A load is about to happen; record the segment it will consume.
        if self.executor.exec_segment().is_none() {
            if let Some(&next) = self.executor.peek_segment() {
                self.segment_log.push(next);
            }
        }

        self.executor.on_timer_tick(
            &mut self.pins,
            &mut self.timer,
            &mut self.spindle,
            &mut self.probe,
        );
        self.executor.on_pulse_timeout(&mut self.pins);
        self.ticks += 1;

        let rising = self.pins.take_rising();
        if rising != 0 {
            self.trace.push(TraceEntry {
                tick: self.ticks,
                step_bits: rising,
                position: self.sys.position_snapshot(),
            });
        }

        if self.timer.running {
            self.elapsed_sec += f64::from(self.timer.period) / f64::from(F_TIMER_STEPPER);
        }
    }

    /// Runs prepare+tick until the executor drains the ring and raises
    /// CYCLE_STOP, or fails after `max_ticks`.
    #[instrument(skip(self))]
    pub fn run_to_idle(&mut self, max_ticks: u64) -> Result<()> {
        self.sys.clear_exec_state_flag(rt_exec::CYCLE_STOP);
        for _ in 0..max_ticks {
            self.prepare();
            self.tick();
            if self.sys.rt_exec_state() & rt_exec::CYCLE_STOP != 0 {
                info!(
                    ticks = self.ticks,
                    elapsed_sec = self.elapsed_sec,
                    "machine idled"
                );
                return Ok(());
            }
        }
        bail!("simulation did not reach idle within {} ticks", max_ticks)
    }

    /// Raises a feed hold: forced deceleration to zero speed.
    pub fn begin_hold(&mut self) {
        self.sys.set_state(MachineState::Hold);
        self.sys.step_control_set(step_control::EXECUTE_HOLD);
    }

    /// Resumes from a completed hold: re-syncs the planner profile and
    /// restarts the cycle.
    pub fn resume(&mut self) {
        self.preparer.update_planner_block_params(&mut self.planner);
        self.sys.step_control_reset();
        self.sys.clear_exec_state_flag(rt_exec::CYCLE_STOP);
        self.sys.set_state(MachineState::Cycle);
        self.timer.start();
    }

    /// Switches to a parking retract: saves the held block's progress and
    /// runs `retract` as a system motion.
    pub fn park(&mut self, retract: PlannerBlock) {
        self.preparer.parking_setup_buffer();
        self.planner.set_system_motion(retract);
        self.planner.exec_system_motion = true;
        self.sys.step_control_reset();
        self.sys
            .step_control_set(step_control::EXECUTE_SYS_MOTION);
        self.sys.clear_exec_state_flag(rt_exec::CYCLE_STOP);
        self.timer.start();
    }

    /// Restores the held block after a parking motion and resumes it.
    pub fn unpark(&mut self) {
        self.preparer.parking_restore_buffer();
        self.planner.clear_system_motion();
        self.planner.exec_system_motion = false;
        self.sys.step_control_reset();
        self.sys.clear_exec_state_flag(rt_exec::CYCLE_STOP);
        self.sys.set_state(MachineState::Cycle);
        self.timer.start();
    }

    pub fn sys(&self) -> &SystemState {
        self.sys
    }

    /// Rising-edge counts per primary axis.
    pub fn pulses(&self) -> [u64; N_AXIS] {
        self.pins.edges
    }

    pub fn position(&self) -> [i32; N_AXIS] {
        self.sys.position_snapshot()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_sec
    }

    pub fn realtime_rate(&self) -> f32 {
        self.preparer.realtime_rate()
    }

    /// Every segment loaded by the executor, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segment_log
    }

    /// Pulse trace: one entry per tick that stepped at least one axis.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Dumps the pulse trace as JSON for offline analysis.
    pub fn dump_trace(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "dumping trace file");
        let mut file = File::create(path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        let json = serde_json::to_string_pretty(&self.trace)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
