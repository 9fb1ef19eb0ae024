//! Cross-subsystem stream sharing.
//!
//! Several subsystems may consume the same event stream without copying
//! it. The bus is a directory keyed by [`BusKey`]: each key has a set of
//! subscribers, an inbox per subscriber, and for every shared stream the
//! subscribers still holding it plus every completion token recorded
//! against it.
//!
//! # Teardown ordering
//!
//! A shared stream is dropped once its last holder releases it, after the
//! *combined* tokens of the publisher and every holder, not only the last
//! one. An earlier holder's reader task may still be in flight when a
//! later holder releases.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use rill_core::{Scheduler, StreamId, SubscriberId};
use rill_stream::EventStream;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::EventError;

/// Name of a bus scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusKey(Arc<str>);

impl BusKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BusKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for BusKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for BusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stream delivered to a subscriber, with the token its readers must be
/// scheduled after.
pub type Delivery<T> = (Arc<EventStream>, T);

struct Shared<T> {
    stream: Arc<EventStream>,
    holders: SmallVec<[SubscriberId; 4]>,
    tokens: Vec<T>,
}

struct Scope<T> {
    inboxes: IndexMap<SubscriberId, Vec<Delivery<T>>>,
    shared: IndexMap<StreamId, Shared<T>>,
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self {
            inboxes: IndexMap::new(),
            shared: IndexMap::new(),
        }
    }
}

struct BusState<T> {
    next_subscriber: u64,
    scopes: IndexMap<BusKey, Scope<T>>,
}

impl<T> BusState<T> {
    fn scope_mut(&mut self, key: &BusKey, subscriber: SubscriberId) -> Result<&mut Scope<T>, EventError> {
        self.scopes
            .get_mut(key)
            .filter(|scope| scope.inboxes.contains_key(&subscriber))
            .ok_or_else(|| EventError::NotSubscribed {
                key: key.clone(),
                subscriber,
            })
    }
}

/// A stream that lost its last holder, waiting to be scheduled for drop.
struct Expired<T> {
    stream: Arc<EventStream>,
    tokens: Vec<T>,
}

/// Key-scoped registry of subscribers and the streams they share.
///
/// `EventBus` is `Send + Sync`; share it between containers with `Arc`.
/// Scheduler calls are made after the internal lock is released, so
/// continuations may run inline.
pub struct EventBus<S: Scheduler> {
    scheduler: Arc<S>,
    state: Mutex<BusState<S::Token>>,
}

impl<S: Scheduler> EventBus<S> {
    /// An empty bus.
    pub fn new(scheduler: Arc<S>) -> Self {
        Self {
            scheduler,
            state: Mutex::new(BusState {
                next_subscriber: 0,
                scopes: IndexMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BusState<S::Token>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new subscriber under `key`.
    pub fn subscribe(&self, key: impl Into<BusKey>) -> SubscriberId {
        let key = key.into();
        let mut state = self.state();
        let id = SubscriberId(state.next_subscriber);
        state.next_subscriber += 1;
        state
            .scopes
            .entry(key.clone())
            .or_default()
            .inboxes
            .insert(id, Vec::new());
        debug!(%key, subscriber = %id, "bus subscribe");
        id
    }

    /// Remove a subscriber, releasing everything it still holds.
    ///
    /// Undelivered and unreleased streams are released with a completed
    /// token: the subscriber must not have reader tasks in flight. Returns
    /// the token of any drops this triggers.
    pub fn unsubscribe(&self, key: &BusKey, subscriber: SubscriberId) -> Result<S::Token, EventError> {
        let expired = {
            let mut state = self.state();
            let scope = state.scope_mut(key, subscriber)?;
            scope.inboxes.shift_remove(&subscriber);
            let done = self.scheduler.completed();
            let held: Vec<StreamId> = scope
                .shared
                .iter()
                .filter(|(_, s)| s.holders.contains(&subscriber))
                .map(|(id, _)| *id)
                .collect();
            let expired = release_held(scope, subscriber, &held, &done);
            if scope.inboxes.is_empty() {
                state.scopes.shift_remove(key);
            }
            expired
        };
        debug!(%key, %subscriber, freed = expired.len(), "bus unsubscribe");
        Ok(self.schedule_drops(expired))
    }

    /// Share `streams` from `owner` with every other subscriber of `key`.
    ///
    /// With no other subscribers the streams are dropped after `token`.
    /// Otherwise each is delivered to every other subscriber's inbox and
    /// stays alive until all of them release it. Returns the token after
    /// which the publisher's part is finished: the drop token, or `token`
    /// itself when the streams were shared.
    pub fn publish(
        &self,
        key: &BusKey,
        owner: SubscriberId,
        streams: Vec<Arc<EventStream>>,
        token: S::Token,
    ) -> Result<S::Token, EventError> {
        let shared = {
            let mut state = self.state();
            let scope = state.scope_mut(key, owner)?;
            let others: SmallVec<[SubscriberId; 4]> =
                scope.inboxes.keys().copied().filter(|s| *s != owner).collect();
            if others.is_empty() {
                false
            } else {
                if let Some(dup) = streams.iter().find(|s| scope.shared.contains_key(&s.id())) {
                    return Err(EventError::AlreadyShared {
                        key: key.clone(),
                        stream: dup.id(),
                    });
                }
                for stream in &streams {
                    for other in &others {
                        if let Some(inbox) = scope.inboxes.get_mut(other) {
                            inbox.push((Arc::clone(stream), token.clone()));
                        }
                    }
                    scope.shared.insert(
                        stream.id(),
                        Shared {
                            stream: Arc::clone(stream),
                            holders: others.clone(),
                            tokens: vec![token.clone()],
                        },
                    );
                }
                true
            }
        };

        debug!(%key, %owner, streams = streams.len(), shared, "bus publish");
        if shared {
            return Ok(token);
        }
        Ok(self.scheduler.schedule_after(&token, Box::new(move || drop(streams))))
    }

    /// Release `streams` held by `subscriber`, recording `token` as the
    /// completion of its readers.
    ///
    /// Each stream whose holder set becomes empty is dropped after the
    /// combination of every token recorded against it. Returns the token
    /// of those drops (completed if none were triggered).
    pub fn release(
        &self,
        key: &BusKey,
        subscriber: SubscriberId,
        streams: Vec<Arc<EventStream>>,
        token: S::Token,
    ) -> Result<S::Token, EventError> {
        let ids: Vec<StreamId> = streams.iter().map(|s| s.id()).collect();
        drop(streams);
        let expired = {
            let mut state = self.state();
            let scope = state.scope_mut(key, subscriber)?;
            if crate::CHECKED {
                let missing = ids.iter().find(|id| {
                    !scope
                        .shared
                        .get(*id)
                        .is_some_and(|s| s.holders.contains(&subscriber))
                });
                if let Some(id) = missing {
                    return Err(EventError::NotHolder {
                        key: key.clone(),
                        subscriber,
                        stream: *id,
                    });
                }
            }
            release_held(scope, subscriber, &ids, &token)
        };
        debug!(%key, %subscriber, released = ids.len(), freed = expired.len(), "bus release");
        Ok(self.schedule_drops(expired))
    }

    /// Streams delivered to `subscriber` since its last call.
    pub fn take_inbox(
        &self,
        key: &BusKey,
        subscriber: SubscriberId,
    ) -> Result<Vec<Delivery<S::Token>>, EventError> {
        let mut state = self.state();
        let scope = state.scope_mut(key, subscriber)?;
        Ok(scope
            .inboxes
            .get_mut(&subscriber)
            .map(std::mem::take)
            .unwrap_or_default())
    }

    /// Whether `subscriber` is registered under `key`.
    pub fn is_subscribed(&self, key: &BusKey, subscriber: SubscriberId) -> bool {
        self.state()
            .scopes
            .get(key)
            .is_some_and(|scope| scope.inboxes.contains_key(&subscriber))
    }

    /// Subscribers registered under `key`.
    pub fn subscriber_count(&self, key: &BusKey) -> usize {
        self.state().scopes.get(key).map_or(0, |s| s.inboxes.len())
    }

    /// Streams under `key` still held by at least one subscriber.
    pub fn shared_stream_count(&self, key: &BusKey) -> usize {
        self.state().scopes.get(key).map_or(0, |s| s.shared.len())
    }

    /// Subscribers still holding `stream` under `key`.
    pub fn holders(&self, key: &BusKey, stream: StreamId) -> Vec<SubscriberId> {
        self.state()
            .scopes
            .get(key)
            .and_then(|s| s.shared.get(&stream))
            .map(|s| s.holders.to_vec())
            .unwrap_or_default()
    }

    fn schedule_drops(&self, expired: Vec<Expired<S::Token>>) -> S::Token {
        let drops: Vec<S::Token> = expired
            .into_iter()
            .map(|Expired { stream, tokens }| {
                let after = self.scheduler.combine(&tokens);
                debug!(stream = %stream.id(), tokens = tokens.len(), "shared stream expired");
                self.scheduler.schedule_after(&after, Box::new(move || drop(stream)))
            })
            .collect();
        self.scheduler.combine(&drops)
    }
}

/// Remove `subscriber` from the holder sets of `ids`, returning the
/// streams nobody holds any more. Ids it does not hold are skipped.
fn release_held<T: Clone>(
    scope: &mut Scope<T>,
    subscriber: SubscriberId,
    ids: &[StreamId],
    token: &T,
) -> Vec<Expired<T>> {
    let mut expired = Vec::new();
    for id in ids {
        let Some(shared) = scope.shared.get_mut(id) else {
            continue;
        };
        let Some(pos) = shared.holders.iter().position(|h| *h == subscriber) else {
            continue;
        };
        shared.holders.swap_remove(pos);
        shared.tokens.push(token.clone());
        if shared.holders.is_empty() {
            if let Some(done) = scope.shared.shift_remove(id) {
                expired.push(Expired {
                    stream: done.stream,
                    tokens: done.tokens,
                });
            }
        }
    }
    expired
}

impl<S: Scheduler> fmt::Debug for EventBus<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("EventBus")
            .field("scopes", &state.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}
