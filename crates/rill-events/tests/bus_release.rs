//! Integration test: reference-counted release of shared streams.
//!
//! A stream published to several subscribers must survive until the last
//! of them releases it, and its drop must be ordered after the tokens of
//! the publisher and of *every* holder, not only the last one to release.
//! Holders read a shared stream concurrently.

use std::sync::{Arc, Barrier, Mutex};

use rill_core::Scheduler;
use rill_events::{BusKey, ContainerConfig, EventBus, EventContainer, EventError, EventReaders};
use rill_stream::{EventStream, LaneLayout, LaneRead, StreamConfig, StreamError};
use rill_test_utils::fixtures::{damage_events, fill_lane, tiny_blocks, DamageEvent};
use rill_test_utils::{init_test_logging, CountingAllocator, ManualScheduler, PoolScheduler};

fn published_stream(counter: &Arc<CountingAllocator>) -> Arc<EventStream> {
    let stream = EventStream::new(
        LaneLayout::Indexed { lanes: 2 },
        StreamConfig::with_block_size(64),
        counter.shared(),
    )
    .unwrap();
    fill_lane(&stream, 0, &damage_events(0, 10)).unwrap();
    fill_lane(&stream, 1, &damage_events(10, 10)).unwrap();
    Arc::new(stream)
}

// ── Bus protocol ─────────────────────────────────────────────────────

#[test]
fn three_holders_release_in_turn() {
    init_test_logging();
    let scheduler = Arc::new(ManualScheduler::new(4));
    let bus = EventBus::new(Arc::clone(&scheduler));
    let key = BusKey::from("damage");
    let counter = CountingAllocator::new();

    let owner = bus.subscribe(key.clone());
    let subscribers = [
        bus.subscribe(key.clone()),
        bus.subscribe(key.clone()),
        bus.subscribe(key.clone()),
    ];
    let stream = published_stream(&counter);
    let id = stream.id();
    let produced = scheduler.pending();
    bus.publish(&key, owner, vec![stream], produced.clone())
        .unwrap();
    assert_eq!(bus.holders(&key, id), subscribers.to_vec());

    let mut reader_tokens = Vec::new();
    let mut frees = Vec::new();
    for (i, subscriber) in subscribers.iter().enumerate() {
        let inbox = bus.take_inbox(&key, *subscriber).unwrap();
        assert_eq!(inbox.len(), 1);
        let (stream, after) = inbox.into_iter().next().unwrap();
        assert_eq!(after, produced);
        assert_eq!(stream.element_count().unwrap(), 20);

        let read = scheduler.pending();
        reader_tokens.push(read.clone());
        frees.push(bus.release(&key, *subscriber, vec![stream], read).unwrap());

        if i < 2 {
            assert_eq!(bus.shared_stream_count(&key), 1, "freed after {} releases", i + 1);
            assert_eq!(bus.holders(&key, id).len(), 2 - i);
        }
    }
    assert_eq!(bus.shared_stream_count(&key), 0);

    // The first two releases scheduled nothing; the third scheduled the drop.
    assert!(frees[0].is_empty());
    assert!(frees[1].is_empty());
    let free = &frees[2];
    assert!(scheduler.covers(free, &produced));
    for token in &reader_tokens {
        assert!(scheduler.covers(free, token));
    }

    // Completing the last holder alone must not free the stream.
    scheduler.complete(&reader_tokens[2]);
    assert_eq!(counter.releases(), 0);
    scheduler.complete(&reader_tokens[0]);
    scheduler.complete(&produced);
    assert_eq!(counter.releases(), 0);
    scheduler.complete(&reader_tokens[1]);
    assert!(scheduler.is_complete(free));
    assert_eq!(counter.outstanding(), 0);
}

#[test]
fn releasing_twice_is_rejected() {
    let scheduler = Arc::new(ManualScheduler::new(1));
    let bus = EventBus::new(Arc::clone(&scheduler));
    let key = BusKey::from("damage");
    let counter = CountingAllocator::new();
    let owner = bus.subscribe(key.clone());
    let a = bus.subscribe(key.clone());
    let b = bus.subscribe(key.clone());
    let stream = published_stream(&counter);
    let id = stream.id();
    bus.publish(&key, owner, vec![stream], scheduler.completed())
        .unwrap();

    let (stream, _) = bus.take_inbox(&key, a).unwrap().pop().unwrap();
    bus.release(&key, a, vec![Arc::clone(&stream)], scheduler.completed())
        .unwrap();
    assert!(matches!(
        bus.release(&key, a, vec![stream], scheduler.completed()),
        Err(EventError::NotHolder { .. })
    ));
    assert_eq!(bus.holders(&key, id), vec![b]);
    assert_eq!(counter.releases(), 0);

    bus.unsubscribe(&key, b).unwrap();
    assert_eq!(counter.outstanding(), 0);
}

// ── Through containers ───────────────────────────────────────────────

#[test]
fn containers_share_streams_over_the_bus() {
    init_test_logging();
    let scheduler = Arc::new(ManualScheduler::new(2));
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let counter = CountingAllocator::new();
    let config = ContainerConfig::new("damage").with_stream(StreamConfig::with_block_size(64));

    let mut physics =
        EventContainer::new(config.clone(), Arc::clone(&scheduler), counter.shared()).unwrap();
    let mut audio = EventContainer::new(config, Arc::clone(&scheduler), counter.shared()).unwrap();
    physics.attach_bus(Arc::clone(&bus), "damage").unwrap();
    audio.attach_bus(Arc::clone(&bus), "damage").unwrap();
    assert!(matches!(
        audio.attach_bus(Arc::clone(&bus), "damage"),
        Err(EventError::BusAlreadyAttached { .. })
    ));

    // Tick 0: physics produces and consumes its own events.
    let session = physics.create_indexed_stream(1).unwrap();
    fill_lane(session.stream(), 0, &damage_events(0, 5)).unwrap();
    let produced = scheduler.pending();
    physics.complete_producer(session, produced.clone()).unwrap();
    let (own, _) = physics.readers().unwrap();
    assert_eq!(own.collect::<DamageEvent>().unwrap(), damage_events(0, 5));
    drop(own);
    let physics_read = scheduler.pending();
    physics.add_consumer_token(physics_read.clone()).unwrap();
    let physics_done = physics.end_of_tick().unwrap();

    // Audio picks the stream up in its own read phase.
    let (shared, after) = audio.readers().unwrap();
    assert_eq!(audio.external_stream_count(), 1);
    assert!(scheduler.covers(&after, &physics_done));
    assert_eq!(shared.collect::<DamageEvent>().unwrap(), damage_events(0, 5));
    drop(shared);
    let audio_read = scheduler.pending();
    audio.add_consumer_token(audio_read.clone()).unwrap();
    audio.end_of_tick().unwrap();
    assert_eq!(audio.external_stream_count(), 0);

    let teardown = audio.teardown_token();
    assert!(scheduler.covers(&teardown, &produced));
    assert!(scheduler.covers(&teardown, &physics_read));
    assert!(scheduler.covers(&teardown, &audio_read));

    scheduler.complete(&audio_read);
    assert_eq!(counter.releases(), 0, "freed before physics readers finished");
    scheduler.complete(&physics_done);
    assert_eq!(counter.outstanding(), 0);

    physics.shutdown().unwrap();
    audio.shutdown().unwrap();
    assert_eq!(bus.subscriber_count(&BusKey::from("damage")), 0);
}

// ── Concurrent holders ───────────────────────────────────────────────

const SUBSCRIBERS: usize = 3;
const SHARED_RECORDS: u32 = 40;

/// Open lane 0 of the first stream, wait until every other holder has
/// opened it too, then replay it.
fn read_in_step(readers: &EventReaders, barrier: &Barrier) -> Result<Vec<DamageEvent>, StreamError> {
    let mut reader = readers.stream_reader(0).expect("one shared stream");
    let opened = reader.begin_lane(0);
    barrier.wait();
    let count = opened?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(reader.read::<DamageEvent>()?);
    }
    reader.end_lane()?;
    Ok(out)
}

#[test]
fn subscribers_read_one_stream_at_the_same_time() {
    init_test_logging();
    let scheduler = Arc::new(PoolScheduler::new(SUBSCRIBERS));
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let counter = CountingAllocator::new();
    let config = ContainerConfig::new("damage")
        .with_stream(tiny_blocks(4, std::mem::size_of::<DamageEvent>()));

    let mut physics =
        EventContainer::new(config.clone(), Arc::clone(&scheduler), counter.shared()).unwrap();
    physics.attach_bus(Arc::clone(&bus), "damage").unwrap();
    let mut holders: Vec<_> = (0..SUBSCRIBERS)
        .map(|_| {
            let mut container =
                EventContainer::new(config.clone(), Arc::clone(&scheduler), counter.shared())
                    .unwrap();
            container.attach_bus(Arc::clone(&bus), "damage").unwrap();
            container
        })
        .collect();

    let session = physics.create_indexed_stream(1).unwrap();
    fill_lane(session.stream(), 0, &damage_events(0, SHARED_RECORDS)).unwrap();
    physics.complete_producer(session, scheduler.completed()).unwrap();
    physics.readers().unwrap();
    physics.end_of_tick().unwrap();

    let barrier = Arc::new(Barrier::new(SUBSCRIBERS));
    let seen = Arc::new(Mutex::new(Vec::new()));
    for (i, container) in holders.iter_mut().enumerate() {
        let (readers, after) = container.readers().unwrap();
        assert_eq!(container.external_stream_count(), 1);
        let barrier = Arc::clone(&barrier);
        let sink = Arc::clone(&seen);
        let token = scheduler.schedule_after(
            &after,
            Box::new(move || {
                let result = read_in_step(&readers, &barrier);
                sink.lock().unwrap().push((i, result));
            }),
        );
        container.add_consumer_token(token).unwrap();
    }
    for container in &mut holders {
        container.end_of_tick().unwrap();
    }
    for container in &mut holders {
        container.shutdown().unwrap();
    }
    physics.shutdown().unwrap();

    let mut seen = std::mem::take(&mut *seen.lock().unwrap());
    seen.sort_by_key(|(i, _)| *i);
    assert_eq!(seen.len(), SUBSCRIBERS);
    for (i, result) in seen {
        assert_eq!(result, Ok(damage_events(0, SHARED_RECORDS)), "holder {i}");
    }

    drop(holders);
    drop(physics);
    drop(bus);
    match Arc::try_unwrap(scheduler) {
        Ok(pool) => drop(pool),
        Err(_) => panic!("scheduler still shared after shutdown"),
    }
    assert_eq!(counter.outstanding(), 0);
}
