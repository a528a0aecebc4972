//! Segment ring buffer and stepper block pool.
//!
//! Segments are compact descriptors of a few milliseconds of constant-rate
//! motion, checked out incrementally from the executing planner block. They
//! travel through a lock-free SPSC ring: the preparer is sole producer, the
//! step ISR sole consumer. Consumption advances only after a segment's last
//! step, which also keeps the referenced pool slot alive until then.
//!
//! The pool holds the Bresenham data shared by all segments of one planner
//! block, pre-shifted by [`MAX_AMASS_LEVEL`](crate::config::MAX_AMASS_LEVEL)
//! so no level ever divides below the original counts. Sizing it one short
//! of the ring guarantees the preparer always finds an unreferenced slot.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::spsc::{Consumer, Producer, Queue};

use crate::config::{BLOCK_POOL_SIZE, N_AXIS, SEGMENT_BUFFER_SIZE};

/// One ring-buffered step segment: `n_step` step events at a fixed timer
/// reload, referencing pooled Bresenham data by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// Step events to execute; at least 1 for every enqueued segment.
    pub n_step: u16,
    /// Timer reload value, i.e. the dominant-axis step period after AMASS
    /// scaling.
    pub cycles_per_tick: u16,
    /// Index into the stepper block pool.
    pub st_block_index: u8,
    /// AMASS level the ISR must execute this segment at (0-3).
    pub amass_level: u8,
    pub spindle_pwm: u8,
    /// Steps of this segment are excluded from the reported position.
    pub backlash_motion: bool,
}

/// Bresenham execution data for one planner block, copied out so the planner
/// may discard the block while the ring still executes it. Step counts are
/// pre-shifted left by the maximum AMASS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepperBlock {
    pub steps: [u32; N_AXIS],
    pub step_event_count: u32,
    pub direction_bits: u8,
    /// Motion requires constant laser power per distance; PWM follows rate.
    pub is_pwm_rate_adjusted: bool,
}

/// The segment ring. Holds up to `SEGMENT_BUFFER_SIZE - 1` segments.
pub type SegmentQueue = Queue<Segment, SEGMENT_BUFFER_SIZE>;

/// Producer half, owned by the segment preparer.
pub type SegmentProducer<'a> = Producer<'a, Segment, SEGMENT_BUFFER_SIZE>;

/// Consumer half, owned by the step generator ISR.
pub type SegmentConsumer<'a> = Consumer<'a, Segment, SEGMENT_BUFFER_SIZE>;

/// The stepper block pool, shared between the preparer (writer of free
/// slots) and the ISR (reader of referenced slots).
pub type BlockPool = Mutex<RefCell<[StepperBlock; BLOCK_POOL_SIZE]>>;

/// A fresh, zeroed block pool.
pub fn new_block_pool() -> BlockPool {
    Mutex::new(RefCell::new([StepperBlock::default(); BLOCK_POOL_SIZE]))
}

/// Advances a block pool index with wrap.
pub(crate) fn next_block_index(index: u8) -> u8 {
    let next = index + 1;
    if next as usize == BLOCK_POOL_SIZE {
        0
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_capacity_is_one_less_than_size() {
        let mut queue = SegmentQueue::new();
        let (mut producer, _consumer) = queue.split();
        let mut accepted = 0;
        while producer.ready() {
            producer.enqueue(Segment::default()).unwrap();
            accepted += 1;
        }
        assert_eq!(accepted, SEGMENT_BUFFER_SIZE - 1);
    }

    #[test]
    fn block_index_wraps_at_pool_size() {
        let mut index = 0;
        for _ in 0..BLOCK_POOL_SIZE {
            index = next_block_index(index);
        }
        assert_eq!(index, 0);
        assert_eq!(next_block_index(BLOCK_POOL_SIZE as u8 - 1), 0);
    }
}
