//! Read-only snapshot of a container's streams for one tick.

use std::sync::Arc;

use bytemuck::Pod;
use rill_core::TickId;
use rill_stream::{EventStream, LaneRead, StreamError, StreamReader};

/// The streams consumers read during one tick.
///
/// Cloning is cheap and every clone shares the same snapshot. A consumer
/// task holding a clone keeps the streams alive even after the container
/// has moved on.
#[derive(Clone, Debug)]
pub struct EventReaders {
    tick: TickId,
    streams: Arc<[Arc<EventStream>]>,
}

impl EventReaders {
    pub(crate) fn new(tick: TickId, streams: Vec<Arc<EventStream>>) -> Self {
        Self {
            tick,
            streams: streams.into(),
        }
    }

    /// Tick the snapshot was taken in.
    pub fn tick(&self) -> TickId {
        self.tick
    }

    /// Every stream in the snapshot: the container's own first, then
    /// streams shared over the bus.
    pub fn streams(&self) -> &[Arc<EventStream>] {
        &self.streams
    }

    /// Number of streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the snapshot holds no streams.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Whether `other` is a clone of this snapshot.
    pub fn same_snapshot(&self, other: &EventReaders) -> bool {
        Arc::ptr_eq(&self.streams, &other.streams)
    }

    /// Records across every stream.
    pub fn element_count(&self) -> Result<u64, StreamError> {
        let mut total = 0;
        for stream in self.streams.iter() {
            total += stream.element_count()?;
        }
        Ok(total)
    }

    /// A reader over stream `index`.
    pub fn stream_reader(&self, index: usize) -> Option<StreamReader<'_>> {
        self.streams.get(index).map(|s| s.reader())
    }

    /// Replay every record as a `T`, stream by stream and lane by lane.
    ///
    /// Every stream in the snapshot must hold only `T` records.
    pub fn for_each<T: Pod>(&self, mut f: impl FnMut(T)) -> Result<(), StreamError> {
        for stream in self.streams.iter() {
            let mut reader = stream.reader();
            for lane in 0..reader.lane_count() {
                let count = reader.begin_lane(lane)?;
                for _ in 0..count {
                    f(reader.read::<T>()?);
                }
                reader.end_lane()?;
            }
        }
        Ok(())
    }

    /// Every record as a `T`, in [`for_each`](Self::for_each) order.
    pub fn collect<T: Pod>(&self) -> Result<Vec<T>, StreamError> {
        let mut out = Vec::new();
        self.for_each(|v: T| out.push(v))?;
        Ok(out)
    }
}
