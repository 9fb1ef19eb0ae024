//! Record types and stream builders shared by tests and benches.

use bytemuck::{Pod, Zeroable};
use rill_stream::{EventStream, LaneLayout, LaneWrite, SharedAllocator, StreamConfig, StreamError};

/// A small fixed-layout event.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DamageEvent {
    pub entity: u32,
    pub amount: f32,
}

impl DamageEvent {
    pub fn new(entity: u32, amount: f32) -> Self {
        Self { entity, amount }
    }
}

/// A wider event with an 8-byte aligned field.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpawnEvent {
    pub entity: u64,
    pub position: [f32; 3],
    pub kind: u32,
}

/// A config whose blocks hold exactly `records` records of `record_size`
/// bytes, to force block overflow in small tests.
pub fn tiny_blocks(records: usize, record_size: usize) -> StreamConfig {
    StreamConfig::with_block_size(StreamConfig::HEADER_BYTES + records * record_size)
}

/// An indexed stream with `lanes` lanes.
pub fn indexed_stream(
    lanes: usize,
    config: StreamConfig,
    allocator: SharedAllocator,
) -> Result<EventStream, StreamError> {
    EventStream::new(LaneLayout::Indexed { lanes }, config, allocator)
}

/// Write `values` into `lane` of an indexed stream in one session.
pub fn fill_lane<T: Pod>(stream: &EventStream, lane: usize, values: &[T]) -> Result<(), StreamError> {
    let mut writer = stream.index_writer()?;
    writer.begin_lane(lane)?;
    for value in values {
        writer.write(value)?;
    }
    writer.end_lane()?;
    Ok(())
}

/// `count` distinct damage events starting at `base`.
pub fn damage_events(base: u32, count: u32) -> Vec<DamageEvent> {
    (base..base + count)
        .map(|entity| DamageEvent::new(entity, entity as f32 * 0.5))
        .collect()
}
