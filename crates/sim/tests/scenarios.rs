//! End-to-end scenarios driving both halves of the core through the
//! simulation harness.

use sim::{line_block, SimMachine};
use step_exec::config::{Settings, X_BIT, Y_BIT};
use step_exec::system::step_control;

const MAX_TICKS: u64 = 5_000_000;

/// 10 mm X move at 300 mm/min with 18000 mm/min² acceleration:
/// 2.5 mm accel ramp, 5 mm cruise, 2.5 mm decel ramp, 3 s total.
fn trapezoid_block() -> step_exec::PlannerBlock {
    line_block([2500, 0, 0], 10.0, 300.0, 18_000.0)
}

#[test]
fn single_axis_trapezoid_emits_exact_steps_and_time() {
    sim::init_tracing();
    let mut machine = SimMachine::new(Settings::default(), vec![trapezoid_block()]);
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert_eq!(machine.pulses(), [2500, 0, 0]);
    assert_eq!(machine.position(), [2500, 0, 0]);

    // Analytic trapezoid: 1 s up, 1 s cruise, 1 s down. The very slow ramp
    // tails run at the clamped ceiling rate, slightly faster than planned.
    let elapsed = machine.elapsed_seconds();
    assert!(
        (elapsed - 3.0).abs() < 0.15,
        "expected ~3 s, got {elapsed:.3} s"
    );

    // Cruise reaches the programmed rate and never exceeds it.
    assert!(machine.max_rate_seen <= 300.0 + 1e-3);
    assert!(machine.max_rate_seen >= 295.0);
}

#[test]
fn short_move_runs_a_triangle_profile() {
    // Same parameters over 1 mm: the ramps meet at 0.5 mm, peak speed
    // sqrt(2 * a * d) = 134.16 mm/min, well below nominal.
    let block = line_block([250, 0, 0], 1.0, 300.0, 18_000.0);
    let mut machine = SimMachine::new(Settings::default(), vec![block]);
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert_eq!(machine.pulses(), [250, 0, 0]);
    assert!(machine.max_rate_seen <= 134.2);
    assert!(machine.max_rate_seen >= 125.0);
}

#[test]
fn diagonal_move_traces_even_bresenham_distribution() {
    let millimeters = (4.0_f32 * 4.0 + 1.6 * 1.6).sqrt();
    let block = line_block([1000, 400, 0], millimeters, 300.0, 18_000.0);
    let mut machine = SimMachine::new(Settings::default(), vec![block]);
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert_eq!(machine.pulses(), [1000, 400, 0]);
    assert_eq!(machine.position(), [1000, 400, 0]);

    // Y must track the ideal 0.4 ratio within a step of the line at every
    // point of the move. Both counts individually stay within one step of
    // their tick-ideal, so the difference is bounded by 1 + 0.4.
    let mut x_count = 0_i64;
    let mut y_count = 0_i64;
    for entry in machine.trace() {
        if entry.step_bits & X_BIT != 0 {
            x_count += 1;
        }
        if entry.step_bits & Y_BIT != 0 {
            y_count += 1;
        }
        let ideal = x_count as f64 * 0.4;
        assert!(
            (y_count as f64 - ideal).abs() <= 1.4 + 1e-9,
            "Y strayed from ideal line at x={x_count}: y={y_count}, ideal={ideal:.1}"
        );
    }
}

#[test]
fn feed_hold_decelerates_then_resume_completes_the_block() {
    let mut machine = SimMachine::new(Settings::default(), vec![trapezoid_block()]);
    machine.start_cycle();

    // Run into the cruise phase, then pull the hold.
    while machine.elapsed_seconds() < 1.5 {
        machine.prepare();
        machine.tick();
    }
    let pulses_at_hold = machine.pulses()[0];
    machine.begin_hold();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert!(machine.sys().step_control_test(step_control::END_MOTION));
    let pulses_stopped = machine.pulses()[0];
    assert!(pulses_stopped < 2500, "hold must stop short of the block end");
    assert!(pulses_stopped > pulses_at_hold, "hold must ramp down, not halt");

    // Stopping distance: v²/(2a) = 2.5 mm = 625 steps from the end of the
    // buffered segments (up to ~9 segments deep at the hold instant).
    let overshoot = pulses_stopped - pulses_at_hold;
    assert!(
        overshoot <= 625 + 150,
        "stopped {overshoot} steps after the hold, expected <= 775"
    );

    // Resume re-plans from standstill and finishes the block exactly.
    machine.resume();
    machine.run_to_idle(MAX_TICKS).unwrap();
    assert_eq!(machine.pulses(), [2500, 0, 0]);
    assert_eq!(machine.position(), [2500, 0, 0]);
}

#[test]
fn parking_retract_preserves_held_block_progress() {
    let mut machine = SimMachine::new(Settings::default(), vec![trapezoid_block()]);
    machine.start_cycle();

    while machine.elapsed_seconds() < 1.0 {
        machine.prepare();
        machine.tick();
    }
    machine.begin_hold();
    machine.run_to_idle(MAX_TICKS).unwrap();
    let x_before_park = machine.pulses()[0];

    // Retract 2 mm in Z as a system motion, then restore and finish.
    machine.park(line_block([0, 0, 500], 2.0, 600.0, 18_000.0));
    machine.run_to_idle(MAX_TICKS).unwrap();
    assert_eq!(machine.pulses()[2], 500);
    assert_eq!(machine.pulses()[0], x_before_park);

    machine.unpark();
    machine.run_to_idle(MAX_TICKS).unwrap();
    assert_eq!(machine.pulses()[0], 2500);
    assert_eq!(machine.position()[0], 2500);
}

#[test]
fn backlash_motion_steps_without_moving_reported_position() {
    let mut block = line_block([50, 0, 0], 0.2, 300.0, 18_000.0);
    block.backlash_motion = true;
    let mut machine = SimMachine::new(Settings::default(), vec![block]);
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert_eq!(machine.pulses(), [50, 0, 0]);
    assert_eq!(machine.position(), [0, 0, 0]);
}

#[test]
fn slow_jog_escalates_to_full_step_smoothing() {
    // 60 mm/min at 250 steps/mm is 250 steps/s, deep inside the 2 kHz
    // cutoff: every segment must run at AMASS level 3.
    let block = line_block([200, 0, 0], 0.8, 60.0, 18_000.0);
    let mut machine = SimMachine::new(Settings::default(), vec![block]);
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert_eq!(machine.pulses(), [200, 0, 0]);
    assert!(!machine.segments().is_empty());
    for segment in machine.segments() {
        assert_eq!(segment.amass_level, 3);
        assert_eq!(
            segment.n_step % 8,
            0,
            "level-3 segments carry 8x the base step count"
        );
    }
    // The cruise segments land on the exact overdriven reload for 250
    // steps/s: 24 MHz / (250 * 8).
    assert!(machine
        .segments()
        .iter()
        .any(|segment| (11_990..=12_010).contains(&segment.cycles_per_tick)));

    // The dominant axis steps every 8th tick, with no jitter.
    let x_ticks: Vec<u64> = machine
        .trace()
        .iter()
        .filter(|entry| entry.step_bits & X_BIT != 0)
        .map(|entry| entry.tick)
        .collect();
    for pair in x_ticks.windows(2) {
        assert_eq!(pair[1] - pair[0], 8, "uneven dominant-axis spacing");
    }
}

#[test]
fn trace_dump_writes_json() {
    let mut machine = SimMachine::new(
        Settings::default(),
        vec![line_block([10, 4, 0], 0.04, 300.0, 18_000.0)],
    );
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    let dir = std::env::temp_dir().join("step-exec-sim-trace");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("trace.json");
    machine.dump_trace(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("step_bits"));
}
