//! Benchmark profiles and utilities for the Rill event streams.
//!
//! Provides fixed workloads shared by the benches:
//!
//! - [`reference_profile`]: 64 lanes × 1024 records of [`BenchEvent`]
//! - [`stress_profile`]: 256 lanes × 4096 records
//! - [`fill_indexed`] / [`checksum`]: write and replay a profile

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use bytemuck::{Pod, Zeroable};
use rill_stream::{
    EventStream, LaneLayout, LaneRead, LaneWrite, SharedAllocator, StreamConfig, StreamError,
};

/// A 16-byte record, the size of a typical gameplay event.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BenchEvent {
    /// Source entity.
    pub entity: u32,
    /// Event kind discriminant.
    pub kind: u32,
    /// Payload.
    pub value: f64,
}

/// Shape of a write/read workload.
#[derive(Clone, Debug)]
pub struct Profile {
    /// Lanes in the stream.
    pub lanes: usize,
    /// Records written to every lane.
    pub records_per_lane: u32,
    /// Stream block configuration.
    pub config: StreamConfig,
}

impl Profile {
    /// Total records in one stream.
    pub fn total_records(&self) -> u64 {
        self.lanes as u64 * u64::from(self.records_per_lane)
    }

    /// Total payload bytes in one stream.
    pub fn total_bytes(&self) -> u64 {
        self.total_records() * std::mem::size_of::<BenchEvent>() as u64
    }
}

/// 64 lanes × 1024 records in default-sized blocks (~1 MiB of payload).
pub fn reference_profile() -> Profile {
    Profile {
        lanes: 64,
        records_per_lane: 1024,
        config: StreamConfig::new(),
    }
}

/// 256 lanes × 4096 records (~16 MiB of payload).
pub fn stress_profile() -> Profile {
    Profile {
        lanes: 256,
        records_per_lane: 4096,
        config: StreamConfig::new(),
    }
}

/// The `i`th record of `lane`.
pub fn event(lane: usize, i: u32) -> BenchEvent {
    BenchEvent {
        entity: lane as u32,
        kind: i % 7,
        value: f64::from(i),
    }
}

/// A fresh indexed stream filled according to `profile`.
pub fn fill_indexed(profile: &Profile, allocator: SharedAllocator) -> Result<EventStream, StreamError> {
    let stream = EventStream::new(
        LaneLayout::Indexed {
            lanes: profile.lanes,
        },
        profile.config.clone(),
        allocator,
    )?;
    {
        let mut writer = stream.index_writer()?;
        for lane in 0..profile.lanes {
            writer.begin_lane(lane)?;
            for i in 0..profile.records_per_lane {
                writer.write(&event(lane, i))?;
            }
            writer.end_lane()?;
        }
    }
    Ok(stream)
}

/// Replay every lane and fold the records into a checksum.
pub fn checksum(stream: &EventStream) -> Result<u64, StreamError> {
    let mut reader = stream.reader();
    let mut sum = 0u64;
    for lane in 0..reader.lane_count() {
        let count = reader.begin_lane(lane)?;
        for _ in 0..count {
            let e = reader.read::<BenchEvent>()?;
            sum = sum.wrapping_add(u64::from(e.entity) ^ u64::from(e.kind));
        }
        reader.end_lane()?;
    }
    Ok(sum)
}
