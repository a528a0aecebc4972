//! Randomized property tests for the core's step accounting, ring safety
//! and smoothing-level selection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sim::{line_block, SimMachine};
use step_exec::config::{Settings, N_AXIS, STEP_TIMER_MIN};
use step_exec::config::{AMASS_LEVEL1, AMASS_LEVEL2, AMASS_LEVEL3};

const MAX_TICKS: u64 = 20_000_000;

fn random_block(rng: &mut StdRng) -> step_exec::PlannerBlock {
    let mut steps = [0_i32; N_AXIS];
    // Keep the block non-degenerate: at least one axis always moves.
    steps[0] = rng.gen_range(50..1500) * if rng.gen_bool(0.5) { 1 } else { -1 };
    for axis_steps in steps.iter_mut().skip(1) {
        let magnitude = rng.gen_range(0..1500);
        *axis_steps = magnitude * if rng.gen_bool(0.5) { 1 } else { -1 };
    }
    let dominant = steps.iter().map(|s| s.unsigned_abs()).max().unwrap();
    let millimeters = dominant as f32 / 250.0;
    let feed = rng.gen_range(100.0..1500.0);
    let accel = rng.gen_range(8_000.0..40_000.0);
    line_block(steps, millimeters, feed, accel)
}

/// Property: every block's programmed step counts are emitted exactly, per
/// axis, and the reported position moves by the signed totals.
#[test]
fn step_conservation_over_randomized_blocks() {
    sim::init_tracing();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let blocks: Vec<_> = (0..15).map(|_| random_block(&mut rng)).collect();

    let mut expected_pulses = [0_u64; N_AXIS];
    let mut expected_position = [0_i64; N_AXIS];
    for block in &blocks {
        for axis in 0..N_AXIS {
            expected_pulses[axis] += u64::from(block.steps[axis]);
            let sign = if block.direction_bits & (1 << axis) != 0 {
                -1
            } else {
                1
            };
            expected_position[axis] += i64::from(block.steps[axis]) * sign;
        }
    }

    let mut machine = SimMachine::new(Settings::default(), blocks);
    machine.start_cycle();
    machine.run_to_idle(MAX_TICKS).unwrap();

    assert_eq!(machine.pulses(), expected_pulses);
    let position = machine.position();
    for axis in 0..N_AXIS {
        assert_eq!(i64::from(position[axis]), expected_position[axis]);
    }
}

/// Property: under a fuzzed interleaving of preparer and ISR calls, every
/// segment that reaches the executor carries at least one step, every
/// programmed timer period respects the hardware rate ceiling, and no step
/// is lost or duplicated.
#[test]
fn ring_handoff_survives_fuzzed_interleaving() {
    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..5_u64 {
        let block = random_block(&mut rng);
        let expected: Vec<u64> = block.steps.iter().map(|&s| u64::from(s)).collect();
        let mut machine = SimMachine::new(Settings::default(), vec![block]);
        machine.start_cycle();

        let mut guard = 0_u64;
        loop {
            // Bias toward ticking so the ring drains and refills often.
            if rng.gen_bool(0.3) {
                machine.prepare();
            } else {
                machine.prepare();
                machine.tick();
            }
            if machine.sys().rt_exec_state() != 0 {
                break;
            }
            guard += 1;
            assert!(guard < MAX_TICKS, "round {round} never drained");
        }

        for segment in machine.segments() {
            assert!(segment.n_step >= 1);
        }
        for &period in &machine.timer.period_history {
            assert!(period >= STEP_TIMER_MIN);
        }
        let pulses = machine.pulses();
        for axis in 0..N_AXIS {
            assert_eq!(pulses[axis], expected[axis], "round {round} axis {axis}");
        }
    }
}

/// Property: each segment's smoothing level matches its pre-scaling step
/// period: level N is only chosen inside its cutoff band, and the scaled
/// reload times 2^N reproduces the dominant-axis period.
#[test]
fn amass_levels_stay_inside_their_cutoff_bands() {
    // Feeds chosen to land in each band at 250 steps/mm:
    // 3000 mm/min -> 12.5 kHz (level 0), 1200 -> 5 kHz (1),
    // 600 -> 2.5 kHz (2), 100 -> 417 Hz (3).
    let feeds = [3000.0, 1200.0, 600.0, 100.0];
    let mut seen_levels = [false; 4];

    for feed in feeds {
        let block = line_block([2000, 0, 0], 8.0, feed, 400_000.0);
        let mut machine = SimMachine::new(Settings::default(), vec![block]);
        machine.start_cycle();
        machine.run_to_idle(MAX_TICKS).unwrap();

        for segment in machine.segments() {
            let level = segment.amass_level;
            seen_levels[usize::from(level)] = true;
            let unscaled = u32::from(segment.cycles_per_tick) << level;
            match level {
                0 => assert!(unscaled < AMASS_LEVEL1),
                1 => assert!((AMASS_LEVEL1..AMASS_LEVEL2).contains(&unscaled)),
                2 => assert!((AMASS_LEVEL2..AMASS_LEVEL3).contains(&unscaled)),
                _ => assert!(unscaled >= AMASS_LEVEL3),
            }
        }
    }
    assert_eq!(seen_levels, [true; 4], "every cutoff band must be exercised");
}
