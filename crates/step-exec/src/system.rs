//! Shared supervisor view.
//!
//! Both execution contexts observe a small set of supervisor-owned flags and
//! the machine position. Every field is a single-word atomic so the ISR can
//! read and write without locking and reporting code gets a per-word
//! consistent snapshot. On the single-CPU targets this core runs on the ISR
//! preempts the main loop but never the reverse, so `Relaxed` ordering is
//! sufficient; the atomics exist to guarantee whole-word access.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};

use crate::config::N_AXIS;

/// Machine operating state as tracked by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MachineState {
    Idle = 0,
    Alarm = 1,
    Homing = 2,
    Cycle = 3,
    Hold = 4,
    Jog = 5,
    SafetyDoor = 6,
    Sleep = 7,
}

impl MachineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => MachineState::Alarm,
            2 => MachineState::Homing,
            3 => MachineState::Cycle,
            4 => MachineState::Hold,
            5 => MachineState::Jog,
            6 => MachineState::SafetyDoor,
            7 => MachineState::Sleep,
            _ => MachineState::Idle,
        }
    }

    /// States during which a velocity profile is actively executing.
    pub fn is_motion_active(self) -> bool {
        matches!(
            self,
            MachineState::Cycle
                | MachineState::Homing
                | MachineState::Hold
                | MachineState::Jog
                | MachineState::SafetyDoor
        )
    }
}

/// Bits of the supervisor's step control flag set, observed by the preparer.
pub mod step_control {
    pub const NORMAL_OP: u8 = 0;
    /// The preparer has enqueued the last segment of the current motion.
    pub const END_MOTION: u8 = 1 << 0;
    /// Forced deceleration to zero speed is in progress (feed hold).
    pub const EXECUTE_HOLD: u8 = 1 << 1;
    /// Execute the planner's system-motion block instead of the queue head.
    pub const EXECUTE_SYS_MOTION: u8 = 1 << 2;
    /// The spindle PWM must be recomputed for the next segment.
    pub const UPDATE_SPINDLE_PWM: u8 = 1 << 3;
}

/// Realtime executor flags raised for the supervisor to service.
pub mod rt_exec {
    /// The step generator drained the segment ring and idled the machine.
    pub const CYCLE_STOP: u8 = 1 << 0;
}

/// Supervisor-shared state. One instance is shared by reference between the
/// supervisor, the segment preparer and the step generator ISR.
///
/// Machine position is written only by the ISR (one increment per emitted
/// step) and read per-word by reporting code.
pub struct SystemState {
    state: AtomicU8,
    step_control: AtomicU8,
    rt_exec_state: AtomicU8,
    rt_exec_alarm: AtomicU8,
    homing_axis_lock: AtomicU8,
    probe_armed: AtomicBool,
    spindle_speed_bits: AtomicU32,
    position: [AtomicI32; N_AXIS],
}

impl SystemState {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicI32 = AtomicI32::new(0);
        Self {
            state: AtomicU8::new(MachineState::Idle as u8),
            step_control: AtomicU8::new(step_control::NORMAL_OP),
            rt_exec_state: AtomicU8::new(0),
            rt_exec_alarm: AtomicU8::new(0),
            homing_axis_lock: AtomicU8::new(0xFF),
            probe_armed: AtomicBool::new(false),
            spindle_speed_bits: AtomicU32::new(0),
            position: [ZERO; N_AXIS],
        }
    }

    pub fn state(&self) -> MachineState {
        MachineState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: MachineState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn step_control(&self) -> u8 {
        self.step_control.load(Ordering::Relaxed)
    }

    pub fn step_control_set(&self, bits: u8) {
        self.step_control.fetch_or(bits, Ordering::Relaxed);
    }

    pub fn step_control_clear(&self, bits: u8) {
        self.step_control.fetch_and(!bits, Ordering::Relaxed);
    }

    pub fn step_control_test(&self, bits: u8) -> bool {
        self.step_control.load(Ordering::Relaxed) & bits != 0
    }

    pub fn step_control_reset(&self) {
        self.step_control
            .store(step_control::NORMAL_OP, Ordering::Relaxed);
    }

    /// Raises a realtime executor flag for the supervisor.
    pub fn set_exec_state_flag(&self, bits: u8) {
        self.rt_exec_state.fetch_or(bits, Ordering::Relaxed);
    }

    pub fn rt_exec_state(&self) -> u8 {
        self.rt_exec_state.load(Ordering::Relaxed)
    }

    pub fn clear_exec_state_flag(&self, bits: u8) {
        self.rt_exec_state.fetch_and(!bits, Ordering::Relaxed);
    }

    pub fn set_exec_alarm(&self, code: u8) {
        self.rt_exec_alarm.store(code, Ordering::Relaxed);
    }

    pub fn alarm_active(&self) -> bool {
        self.rt_exec_alarm.load(Ordering::Relaxed) != 0
    }

    /// Per-axis mask of axes still allowed to move during homing.
    pub fn homing_axis_lock(&self) -> u8 {
        self.homing_axis_lock.load(Ordering::Relaxed)
    }

    pub fn set_homing_axis_lock(&self, mask: u8) {
        self.homing_axis_lock.store(mask, Ordering::Relaxed);
    }

    pub fn probe_armed(&self) -> bool {
        self.probe_armed.load(Ordering::Relaxed)
    }

    pub fn arm_probe(&self, armed: bool) {
        self.probe_armed.store(armed, Ordering::Relaxed);
    }

    /// Spindle speed mirror in RPM, for status reporting.
    pub fn spindle_speed(&self) -> f32 {
        f32::from_bits(self.spindle_speed_bits.load(Ordering::Relaxed))
    }

    pub fn set_spindle_speed(&self, rpm: f32) {
        self.spindle_speed_bits
            .store(rpm.to_bits(), Ordering::Relaxed);
    }

    /// Machine position of one axis in steps.
    pub fn position(&self, axis: usize) -> i32 {
        self.position[axis].load(Ordering::Relaxed)
    }

    /// Per-word snapshot of the machine position.
    pub fn position_snapshot(&self) -> [i32; N_AXIS] {
        let mut out = [0; N_AXIS];
        for (axis, word) in self.position.iter().enumerate() {
            out[axis] = word.load(Ordering::Relaxed);
        }
        out
    }

    /// Overwrites one axis position, e.g. after homing.
    pub fn set_position(&self, axis: usize, value: i32) {
        self.position[axis].store(value, Ordering::Relaxed);
    }

    pub(crate) fn position_add(&self, axis: usize, delta: i32) {
        self.position[axis].fetch_add(delta, Ordering::Relaxed);
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_control_bit_ops() {
        let sys = SystemState::new();
        sys.step_control_set(step_control::EXECUTE_HOLD);
        sys.step_control_set(step_control::UPDATE_SPINDLE_PWM);
        assert!(sys.step_control_test(step_control::EXECUTE_HOLD));
        sys.step_control_clear(step_control::EXECUTE_HOLD);
        assert!(!sys.step_control_test(step_control::EXECUTE_HOLD));
        assert!(sys.step_control_test(step_control::UPDATE_SPINDLE_PWM));
        sys.step_control_reset();
        assert_eq!(sys.step_control(), step_control::NORMAL_OP);
    }

    #[test]
    fn motion_active_states() {
        assert!(MachineState::Cycle.is_motion_active());
        assert!(MachineState::SafetyDoor.is_motion_active());
        assert!(!MachineState::Idle.is_motion_active());
        assert!(!MachineState::Sleep.is_motion_active());
    }

    #[test]
    fn position_snapshot_tracks_updates() {
        let sys = SystemState::new();
        sys.position_add(0, 5);
        sys.position_add(2, -3);
        assert_eq!(sys.position_snapshot(), [5, 0, -3]);
        sys.set_position(0, 100);
        assert_eq!(sys.position(0), 100);
    }
}
