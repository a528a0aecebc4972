//! # In-Process Simulation Harness
//!
//! A deterministic simulation environment for the step execution core,
//! designed for CI testing of the preparer/ISR pair without hardware. The
//! harness wires both halves of the core over recording doubles for the
//! step/dir port, step timer and spindle, drives them tick by tick and
//! captures pulse traces for analysis.

pub mod config;
pub mod doubles;
pub mod harness;
pub mod planner_stub;

pub use config::MachineConfig;
pub use doubles::{NullProbe, PinRecorder, SimDelay, SimSpindle, SimTimer};
pub use harness::{SimMachine, TraceEntry};
pub use planner_stub::{line_block, ScriptedPlanner};

/// Installs a compact tracing subscriber routed to the test writer. Safe to
/// call from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
