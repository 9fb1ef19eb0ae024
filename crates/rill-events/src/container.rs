//! Per-event-type tick bookkeeping.
//!
//! An [`EventContainer`] owns the streams produced for one event type and
//! the completion tokens that order their readers and their teardown.
//!
//! The lifecycle per tick is:
//! 1. `create_stream()`: producers get a [`ProducerSession`] each
//! 2. `complete_producer()`: each producer hands back its token
//! 3. `readers()`: first call flips to read mode and snapshots streams
//! 4. `add_consumer_token()`: consumers report their tokens
//! 5. `end_of_tick()`: dispose of streams, promote deferred ones
//!
//! A stream created after step 3 is *deferred*: it is not in this tick's
//! snapshot and becomes an active stream of the next tick, so a late
//! producer can overlap this tick's consumers without stalling them.

use std::fmt;
use std::sync::Arc;

use rill_core::{ContainerId, Scheduler, StreamId, SubscriberId, TickId};
use rill_stream::{EventStream, LaneLayout, SharedAllocator};
use tracing::{debug, warn};

use crate::bus::{BusKey, EventBus};
use crate::config::ContainerConfig;
use crate::error::EventError;
use crate::readers::EventReaders;

/// Which half of the tick a container is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerMode {
    /// Producers are filling this tick's streams.
    Write,
    /// Readers were handed out; new streams are deferred.
    Read,
}

/// One producer's claim on a freshly created stream.
///
/// Hand it back with [`EventContainer::complete_producer`] together with
/// the producer's completion token.
#[must_use = "complete the session with EventContainer::complete_producer"]
#[derive(Debug)]
pub struct ProducerSession {
    stream: Arc<EventStream>,
    container: ContainerId,
    tick: TickId,
    deferred: bool,
}

impl ProducerSession {
    /// The stream to write into. Clone the `Arc` into producer tasks.
    pub fn stream(&self) -> &Arc<EventStream> {
        &self.stream
    }

    /// Whether the stream belongs to the next tick.
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Tick the session was opened in.
    pub fn tick(&self) -> TickId {
        self.tick
    }

    /// Container that created the session.
    pub fn container(&self) -> ContainerId {
        self.container
    }
}

struct BusLink<S: Scheduler> {
    bus: Arc<EventBus<S>>,
    key: BusKey,
    subscriber: SubscriberId,
}

/// Streams, tokens, and mode for one event type.
pub struct EventContainer<S: Scheduler> {
    id: ContainerId,
    config: ContainerConfig,
    scheduler: Arc<S>,
    allocator: SharedAllocator,
    mode: ContainerMode,
    tick: TickId,
    /// Streams produced for the current tick.
    active: Vec<Arc<EventStream>>,
    /// Streams created in read mode, promoted at end of tick.
    deferred: Vec<Arc<EventStream>>,
    /// Streams delivered by other subscribers of the bus.
    external: Vec<Arc<EventStream>>,
    snapshot: Option<(EventReaders, S::Token)>,
    producer_tokens: Vec<S::Token>,
    consumer_tokens: Vec<S::Token>,
    deferred_tokens: Vec<S::Token>,
    external_tokens: Vec<S::Token>,
    open_producers: usize,
    open_deferred: usize,
    /// Completes once every stream this container let go of is dropped.
    teardown: S::Token,
    bus: Option<BusLink<S>>,
}

impl<S: Scheduler> EventContainer<S> {
    /// Create an empty container in write mode at tick 0.
    pub fn new(
        config: ContainerConfig,
        scheduler: Arc<S>,
        allocator: SharedAllocator,
    ) -> Result<Self, EventError> {
        config.validate()?;
        let teardown = scheduler.completed();
        let id = ContainerId::next();
        debug!(container = %id, name = %config.name, "container created");
        Ok(Self {
            id,
            config,
            scheduler,
            allocator,
            mode: ContainerMode::Write,
            tick: TickId(0),
            active: Vec::new(),
            deferred: Vec::new(),
            external: Vec::new(),
            snapshot: None,
            producer_tokens: Vec::new(),
            consumer_tokens: Vec::new(),
            deferred_tokens: Vec::new(),
            external_tokens: Vec::new(),
            open_producers: 0,
            open_deferred: 0,
            teardown,
            bus: None,
        })
    }

    /// Subscribe to `key` on `bus`.
    ///
    /// From then on, streams are published on the bus at end of tick
    /// instead of dropped, and streams other subscribers publish join this
    /// container's reader snapshots.
    pub fn attach_bus(
        &mut self,
        bus: Arc<EventBus<S>>,
        key: impl Into<BusKey>,
    ) -> Result<SubscriberId, EventError> {
        if let Some(link) = &self.bus {
            return Err(EventError::BusAlreadyAttached {
                key: link.key.clone(),
            });
        }
        let key = key.into();
        let subscriber = bus.subscribe(key.clone());
        self.bus = Some(BusLink {
            bus,
            key,
            subscriber,
        });
        Ok(subscriber)
    }

    /// Open a producer session on a new stream.
    ///
    /// In read mode the stream is deferred to the next tick.
    pub fn create_stream(&mut self, layout: LaneLayout) -> Result<ProducerSession, EventError> {
        let stream = Arc::new(EventStream::new(
            layout,
            self.config.stream.clone(),
            Arc::clone(&self.allocator),
        )?);
        let deferred = self.mode == ContainerMode::Read;
        if deferred {
            self.deferred.push(Arc::clone(&stream));
            self.open_deferred += 1;
        } else {
            self.active.push(Arc::clone(&stream));
            self.open_producers += 1;
        }
        debug!(
            container = %self.id,
            stream = %stream.id(),
            tick = %self.tick,
            deferred,
            "producer opened"
        );
        Ok(ProducerSession {
            stream,
            container: self.id,
            tick: self.tick,
            deferred,
        })
    }

    /// Open a producer session on a stream with one lane per partition.
    pub fn create_indexed_stream(&mut self, lanes: usize) -> Result<ProducerSession, EventError> {
        self.create_stream(LaneLayout::Indexed { lanes })
    }

    /// Open a producer session on a stream with one lane per worker thread.
    pub fn create_worker_stream(&mut self) -> Result<ProducerSession, EventError> {
        let workers = self.scheduler.worker_count();
        self.create_stream(LaneLayout::PerWorker { workers })
    }

    /// Close a producer session, recording the producer's completion token.
    ///
    /// The token joins the current tick's producer token, or the deferred
    /// producer token when the session is deferred.
    pub fn complete_producer(
        &mut self,
        session: ProducerSession,
        token: S::Token,
    ) -> Result<(), EventError> {
        if session.container != self.id {
            return Err(EventError::ForeignSession {
                session: session.container,
                container: self.id,
            });
        }
        let for_current_tick = if session.deferred {
            if session.tick == self.tick {
                false
            } else if session.tick.next() == self.tick {
                // Promoted at the last end of tick.
                true
            } else {
                return Err(self.stale(&session));
            }
        } else if session.tick == self.tick {
            true
        } else {
            return Err(self.stale(&session));
        };

        if for_current_tick {
            if crate::CHECKED && self.mode == ContainerMode::Read {
                return Err(EventError::ProducerAfterSnapshot {
                    stream: session.stream.id(),
                });
            }
            self.producer_tokens.push(token);
            self.open_producers = self.open_producers.saturating_sub(1);
        } else {
            self.deferred_tokens.push(token);
            self.open_deferred = self.open_deferred.saturating_sub(1);
        }
        Ok(())
    }

    fn stale(&self, session: &ProducerSession) -> EventError {
        EventError::StaleSession {
            opened: session.tick,
            current: self.tick,
        }
    }

    /// Readers over this tick's streams, and the token consumers must be
    /// scheduled after.
    ///
    /// The first call flips the container to read mode and takes the
    /// snapshot, pulling in streams shared over the bus; later calls in
    /// the same tick return the same snapshot.
    pub fn readers(&mut self) -> Result<(EventReaders, S::Token), EventError> {
        if let Some((readers, token)) = &self.snapshot {
            return Ok((readers.clone(), token.clone()));
        }
        if crate::CHECKED && self.open_producers > 0 {
            return Err(EventError::ProducersStillOpen {
                open: self.open_producers,
            });
        }
        if let Some(link) = &self.bus {
            for (stream, token) in link.bus.take_inbox(&link.key, link.subscriber)? {
                self.external.push(stream);
                self.external_tokens.push(token);
            }
        }

        let streams: Vec<Arc<EventStream>> =
            self.active.iter().chain(&self.external).cloned().collect();
        let readers = EventReaders::new(self.tick, streams);
        let after: Vec<S::Token> = self
            .producer_tokens
            .iter()
            .chain(&self.external_tokens)
            .cloned()
            .collect();
        let token = self.scheduler.combine(&after);
        self.mode = ContainerMode::Read;
        self.snapshot = Some((readers.clone(), token.clone()));
        debug!(
            container = %self.id,
            tick = %self.tick,
            active = self.active.len(),
            external = self.external.len(),
            "container entered read mode"
        );
        Ok((readers, token))
    }

    /// Record a consumer's completion token for this tick.
    pub fn add_consumer_token(&mut self, token: S::Token) -> Result<(), EventError> {
        if crate::CHECKED && self.mode != ContainerMode::Read {
            return Err(EventError::NotInReadMode { tick: self.tick });
        }
        self.consumer_tokens.push(token);
        Ok(())
    }

    /// Finish the tick.
    ///
    /// Combines every producer and consumer token of the tick and returns
    /// the result. Active streams are dropped after that token, or
    /// published on the bus when one is attached; streams received over
    /// the bus are released back to it. Deferred streams and their tokens
    /// become the next tick's active set, and the container returns to
    /// write mode.
    pub fn end_of_tick(&mut self) -> Result<S::Token, EventError> {
        if crate::CHECKED && self.open_producers > 0 {
            return Err(EventError::ProducersStillOpen {
                open: self.open_producers,
            });
        }
        if let Some(link) = &self.bus {
            if !link.bus.is_subscribed(&link.key, link.subscriber) {
                return Err(EventError::NotSubscribed {
                    key: link.key.clone(),
                    subscriber: link.subscriber,
                });
            }
        }
        let mut tokens = std::mem::take(&mut self.producer_tokens);
        tokens.append(&mut self.consumer_tokens);
        tokens.append(&mut self.external_tokens);
        let done = self.scheduler.combine(&tokens);

        let active = std::mem::take(&mut self.active);
        let external = std::mem::take(&mut self.external);
        self.snapshot = None;
        self.active = std::mem::take(&mut self.deferred);
        self.producer_tokens = std::mem::take(&mut self.deferred_tokens);
        self.open_producers = std::mem::take(&mut self.open_deferred);
        self.mode = ContainerMode::Write;
        let finished = self.tick;
        self.tick = self.tick.next();

        debug!(
            container = %self.id,
            tick = %finished,
            streams = active.len(),
            external = external.len(),
            promoted = self.active.len(),
            "end of tick"
        );

        let mut teardown = vec![self.teardown.clone()];
        match &self.bus {
            Some(link) => {
                if !active.is_empty() {
                    teardown.push(link.bus.publish(&link.key, link.subscriber, active, done.clone())?);
                }
                if !external.is_empty() {
                    teardown.push(link.bus.release(&link.key, link.subscriber, external, done.clone())?);
                }
            }
            None => {
                if !active.is_empty() {
                    teardown.push(
                        self.scheduler
                            .schedule_after(&done, Box::new(move || drop(active))),
                    );
                }
            }
        }
        self.teardown = self.scheduler.combine(&teardown);
        Ok(done)
    }

    /// Wait for all outstanding work and let go of every stream.
    ///
    /// This is the one blocking call: it waits on every producer, consumer,
    /// and teardown token, then detaches from the bus. The container is
    /// left empty in write mode and may be reused.
    pub fn shutdown(&mut self) -> Result<(), EventError> {
        let open = self.open_producers + self.open_deferred;
        if open > 0 {
            warn!(container = %self.id, open, "shutdown with producer sessions open");
        }
        let mut tokens = std::mem::take(&mut self.producer_tokens);
        tokens.append(&mut self.consumer_tokens);
        tokens.append(&mut self.deferred_tokens);
        tokens.append(&mut self.external_tokens);
        tokens.push(self.teardown.clone());
        self.scheduler.wait(&self.scheduler.combine(&tokens));

        self.snapshot = None;
        self.active.clear();
        self.deferred.clear();
        self.open_producers = 0;
        self.open_deferred = 0;
        self.mode = ContainerMode::Write;
        self.teardown = self.scheduler.completed();

        let external = std::mem::take(&mut self.external);
        if let Some(link) = self.bus.take() {
            // Unsubscribing elsewhere already released what this side held.
            if !link.bus.is_subscribed(&link.key, link.subscriber) {
                debug!(container = %self.id, key = %link.key, "bus link already gone");
                return Ok(());
            }
            let mut drops = Vec::new();
            if !external.is_empty() {
                let done = self.scheduler.completed();
                drops.push(link.bus.release(&link.key, link.subscriber, external, done)?);
            }
            drops.push(link.bus.unsubscribe(&link.key, link.subscriber)?);
            self.scheduler.wait(&self.scheduler.combine(&drops));
        }
        debug!(container = %self.id, tick = %self.tick, "container shut down");
        Ok(())
    }

    /// Unique identity of this container.
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Event type name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The container's configuration.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Current mode.
    pub fn mode(&self) -> ContainerMode {
        self.mode
    }

    /// Ticks completed so far.
    pub fn tick(&self) -> TickId {
        self.tick
    }

    /// Streams produced for the current tick.
    pub fn active_stream_count(&self) -> usize {
        self.active.len()
    }

    /// Streams waiting for the next tick.
    pub fn deferred_stream_count(&self) -> usize {
        self.deferred.len()
    }

    /// Streams received over the bus this tick.
    pub fn external_stream_count(&self) -> usize {
        self.external.len()
    }

    /// Ids of the current tick's own streams.
    pub fn active_stream_ids(&self) -> Vec<StreamId> {
        self.active.iter().map(|s| s.id()).collect()
    }

    /// Producer sessions not yet completed, current and deferred.
    pub fn open_producer_count(&self) -> usize {
        self.open_producers + self.open_deferred
    }

    /// Token that completes once every stream released so far is dropped.
    pub fn teardown_token(&self) -> S::Token {
        self.teardown.clone()
    }

    /// Bus subscription, if attached.
    pub fn subscriber(&self) -> Option<SubscriberId> {
        self.bus.as_ref().map(|link| link.subscriber)
    }
}

impl<S: Scheduler> fmt::Debug for EventContainer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContainer")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("mode", &self.mode)
            .field("tick", &self.tick)
            .field("active", &self.active.len())
            .field("deferred", &self.deferred.len())
            .field("external", &self.external.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_stream::{LaneWrite, StreamConfig};
    use rill_test_utils::{CountingAllocator, ManualScheduler, ManualToken};

    struct Fixture {
        scheduler: Arc<ManualScheduler>,
        counter: Arc<CountingAllocator>,
        container: EventContainer<ManualScheduler>,
    }

    fn fixture() -> Fixture {
        let scheduler = Arc::new(ManualScheduler::new(2));
        let counter = CountingAllocator::new();
        let config = ContainerConfig::new("damage").with_stream(StreamConfig::with_block_size(64));
        let container =
            EventContainer::new(config, Arc::clone(&scheduler), counter.shared()).unwrap();
        Fixture {
            scheduler,
            counter,
            container,
        }
    }

    fn produce(f: &mut Fixture, values: &[u32]) -> ManualToken {
        let session = f.container.create_indexed_stream(1).unwrap();
        rill_test_utils::fixtures::fill_lane(session.stream(), 0, values).unwrap();
        let token = f.scheduler.pending();
        f.container.complete_producer(session, token.clone()).unwrap();
        token
    }

    #[test]
    fn tick_lifecycle() {
        let mut f = fixture();
        assert_eq!(f.container.mode(), ContainerMode::Write);
        let p = produce(&mut f, &[1, 2]);

        let (readers, after) = f.container.readers().unwrap();
        assert_eq!(f.container.mode(), ContainerMode::Read);
        assert_eq!(readers.collect::<u32>().unwrap(), vec![1, 2]);
        assert!(f.scheduler.covers(&after, &p));

        let c = f.scheduler.pending();
        f.container.add_consumer_token(c.clone()).unwrap();
        let done = f.container.end_of_tick().unwrap();
        assert!(f.scheduler.covers(&done, &p));
        assert!(f.scheduler.covers(&done, &c));
        assert_eq!(f.container.mode(), ContainerMode::Write);
        assert_eq!(f.container.tick(), TickId(1));
        assert_eq!(f.container.active_stream_count(), 0);

        drop(readers);
        assert_eq!(f.counter.releases(), 0);
        f.scheduler.complete(&done);
        assert_eq!(f.counter.releases(), f.counter.allocations());
    }

    #[test]
    fn readers_return_the_same_snapshot() {
        let mut f = fixture();
        produce(&mut f, &[7]);
        let (a, ta) = f.container.readers().unwrap();
        let (b, tb) = f.container.readers().unwrap();
        assert!(a.same_snapshot(&b));
        assert_eq!(ta, tb);
    }

    #[test]
    fn stream_created_in_read_mode_is_deferred() {
        let mut f = fixture();
        produce(&mut f, &[1]);
        let (readers, _) = f.container.readers().unwrap();

        let late = f.container.create_indexed_stream(1).unwrap();
        assert!(late.is_deferred());
        let late_id = late.stream().id();
        rill_test_utils::fixtures::fill_lane(late.stream(), 0, &[99u32]).unwrap();
        let late_token = f.scheduler.pending();
        f.container.complete_producer(late, late_token.clone()).unwrap();

        assert_eq!(readers.len(), 1);
        assert!(readers.streams().iter().all(|s| s.id() != late_id));
        assert_eq!(f.container.deferred_stream_count(), 1);

        let done = f.container.end_of_tick().unwrap();
        assert!(!f.scheduler.covers(&done, &late_token));
        assert_eq!(f.container.active_stream_ids(), vec![late_id]);

        let (next, after) = f.container.readers().unwrap();
        assert_eq!(next.collect::<u32>().unwrap(), vec![99]);
        assert!(f.scheduler.covers(&after, &late_token));
    }

    #[test]
    fn deferred_producer_may_finish_after_promotion() {
        let mut f = fixture();
        f.container.readers().unwrap();
        let late = f.container.create_indexed_stream(1).unwrap();
        f.container.end_of_tick().unwrap();
        assert_eq!(f.container.open_producer_count(), 1);

        let token = f.scheduler.pending();
        f.container.complete_producer(late, token.clone()).unwrap();
        let (_, after) = f.container.readers().unwrap();
        assert!(f.scheduler.covers(&after, &token));
    }

    #[test]
    fn readers_refused_while_producers_open() {
        let mut f = fixture();
        let _session = f.container.create_indexed_stream(1).unwrap();
        assert_eq!(
            f.container.readers().err(),
            Some(EventError::ProducersStillOpen { open: 1 })
        );
        assert_eq!(
            f.container.end_of_tick().err(),
            Some(EventError::ProducersStillOpen { open: 1 })
        );
    }

    #[test]
    fn consumer_token_outside_read_mode_rejected() {
        let mut f = fixture();
        let token = f.scheduler.pending();
        assert_eq!(
            f.container.add_consumer_token(token),
            Err(EventError::NotInReadMode { tick: TickId(0) })
        );
    }

    #[test]
    fn session_from_another_container_rejected() {
        let mut f = fixture();
        let mut other = fixture();
        let session = other.container.create_indexed_stream(1).unwrap();
        let err = f
            .container
            .complete_producer(session, f.scheduler.completed())
            .unwrap_err();
        assert!(matches!(err, EventError::ForeignSession { .. }));
    }

    #[test]
    fn stale_session_rejected() {
        let mut f = fixture();
        let session = f.container.create_indexed_stream(1).unwrap();
        // Let the tick end with the session still open.
        f.container.open_producers = 0;
        f.container.end_of_tick().unwrap();
        assert_eq!(
            f.container.complete_producer(session, f.scheduler.completed()),
            Err(EventError::StaleSession {
                opened: TickId(0),
                current: TickId(1)
            })
        );
    }

    #[test]
    fn producer_after_snapshot_rejected() {
        let mut f = fixture();
        let session = f.container.create_indexed_stream(1).unwrap();
        let id = session.stream().id();
        f.container.open_producers = 0;
        f.container.readers().unwrap();
        assert_eq!(
            f.container.complete_producer(session, f.scheduler.completed()),
            Err(EventError::ProducerAfterSnapshot { stream: id })
        );
    }

    #[test]
    fn worker_streams_use_scheduler_width() {
        let mut f = fixture();
        let session = f.container.create_worker_stream().unwrap();
        assert_eq!(session.stream().lane_count(), 2);
        {
            let mut writer = session
                .stream()
                .thread_writer(rill_core::WorkerId(1))
                .unwrap();
            writer.write(&5u32).unwrap();
        }
        f.container
            .complete_producer(session, f.scheduler.completed())
            .unwrap();
        let (readers, _) = f.container.readers().unwrap();
        assert_eq!(readers.collect::<u32>().unwrap(), vec![5]);
    }

    #[test]
    fn shutdown_drains_everything() {
        let mut f = fixture();
        produce(&mut f, &[1, 2, 3]);
        f.container.readers().unwrap();
        let late = f.container.create_indexed_stream(1).unwrap();
        f.container
            .complete_producer(late, f.scheduler.pending())
            .unwrap();
        f.container.end_of_tick().unwrap();
        assert!(f.counter.outstanding() > 0);

        f.container.shutdown().unwrap();
        assert_eq!(f.counter.outstanding(), 0);
        assert_eq!(f.container.active_stream_count(), 0);
        assert_eq!(f.container.open_producer_count(), 0);
    }

    #[test]
    fn end_of_tick_after_lost_subscription_keeps_the_tick() {
        let mut f = fixture();
        let bus = Arc::new(EventBus::new(Arc::clone(&f.scheduler)));
        let key = BusKey::from("combat");
        let subscriber = f.container.attach_bus(Arc::clone(&bus), key.clone()).unwrap();
        let p = produce(&mut f, &[4, 5]);
        f.container.readers().unwrap();
        bus.unsubscribe(&key, subscriber).unwrap();

        let err = f.container.end_of_tick().unwrap_err();
        assert_eq!(err, EventError::NotSubscribed { key, subscriber });
        assert_eq!(f.container.tick(), TickId(0));
        assert_eq!(f.container.mode(), ContainerMode::Read);
        assert_eq!(f.container.active_stream_count(), 1);
        assert!(f.counter.outstanding() > 0);

        f.scheduler.complete(&p);
        f.container.shutdown().unwrap();
        assert_eq!(f.counter.outstanding(), 0);
        assert!(f.container.subscriber().is_none());
    }
}
