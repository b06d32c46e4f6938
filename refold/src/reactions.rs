//! Watch dispatcher: lifecycle reactions fired, in a fixed order, after every
//! accepted mutation.
//!
//! Each reaction is registered as a trait object under a unique key and
//! observes the pre-action [`Delta`] against the mutated record. Reactions
//! run to completion before the actor pulls the next mailbox entry.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;

use crate::actor::ActorContext;
use crate::error::Result;
use crate::fanout;
use crate::ident::Ident;
use crate::pump;
use crate::record::ReactorRecord;

/// Unique key under which a reaction is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ReactionKey {
    PublishersOnStart,
    PublishersOnChange,
    SubscribersOnStart,
    SubscribersOnChange,
    AllSubscribersRemoved,
    StateChange,
}

impl fmt::Display for ReactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReactionKey::PublishersOnStart => "publishers-on-start",
            ReactionKey::PublishersOnChange => "publishers-on-change",
            ReactionKey::SubscribersOnStart => "subscribers-on-start",
            ReactionKey::SubscribersOnChange => "subscribers-on-change",
            ReactionKey::AllSubscribersRemoved => "all-subscribers-removed",
            ReactionKey::StateChange => "state-change",
        };
        f.write_str(name)
    }
}

/// What the actor should do once dispatch returns.
pub(crate) enum Flow {
    Continue,
    Implode,
}

/// Pre-action snapshot the dispatcher diffs the mutated record against.
pub(crate) struct Delta<S> {
    pub(crate) old_state: S,
    pub(crate) old_started: bool,
    pub(crate) old_subscribers: BTreeSet<Ident>,
}

impl<S: Clone> Delta<S> {
    pub(crate) fn capture<A, M>(record: &ReactorRecord<S, A, M>) -> Self {
        Self {
            old_state: record.state.clone(),
            old_started: record.started,
            old_subscribers: record.subscribers.keys().cloned().collect(),
        }
    }
}

#[async_trait]
pub(crate) trait Reaction<S, A, M>: Send + Sync {
    fn key(&self) -> ReactionKey;
    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool;
    async fn fire(
        &self,
        delta: &Delta<S>,
        record: &mut ReactorRecord<S, A, M>,
        ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow>;
}

/// The registered reactions, in firing order. Keys must be unique so no
/// reaction is registered twice.
pub(crate) fn registry<S, A, M>() -> Vec<Box<dyn Reaction<S, A, M>>>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    let reactions: Vec<Box<dyn Reaction<S, A, M>>> = vec![
        Box::new(PublishersOnStart),
        Box::new(PublishersOnChange),
        Box::new(SubscribersOnStart),
        Box::new(SubscribersOnChange),
        Box::new(AllSubscribersRemoved),
        Box::new(StateChange),
    ];
    let keys: BTreeSet<ReactionKey> = reactions.iter().map(|reaction| reaction.key()).collect();
    debug_assert_eq!(keys.len(), reactions.len(), "reaction keys must be unique");
    reactions
}

pub(crate) async fn dispatch<S, A, M>(
    reactions: &[Box<dyn Reaction<S, A, M>>],
    delta: &Delta<S>,
    record: &mut ReactorRecord<S, A, M>,
    ctx: &ActorContext<S, A, M>,
) -> Result<Flow>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    // Channels the action removed (or replaced) are closed first, so no
    // reaction can observe or emit into a half-detached channel.
    drain_retired(record, ctx);

    for reaction in reactions {
        if !reaction.applies(delta, record) {
            continue;
        }
        tracing::trace!(
            target: "refold::reactions",
            reactor = %ctx.id,
            key = %reaction.key(),
            "reaction firing"
        );
        match reaction.fire(delta, record, ctx).await? {
            Flow::Continue => {}
            Flow::Implode => return Ok(Flow::Implode),
        }
    }
    Ok(Flow::Continue)
}

fn drain_retired<S, A, M>(record: &mut ReactorRecord<S, A, M>, ctx: &ActorContext<S, A, M>) {
    for (ident, slot) in record.retired_publishers.drain(..) {
        tracing::debug!(
            target: "refold::reactions",
            reactor = %ctx.id,
            publisher = %ident,
            "closing removed publisher channel"
        );
        slot.close();
    }
    for (ident, slot) in record.retired_subscribers.drain(..) {
        tracing::debug!(
            target: "refold::reactions",
            reactor = %ctx.id,
            subscriber = %ident,
            "closing removed subscriber channel"
        );
        slot.close();
    }
}

fn added_subscribers<S, A, M>(
    delta: &Delta<S>,
    record: &ReactorRecord<S, A, M>,
) -> Vec<Ident> {
    record
        .subscribers
        .keys()
        .filter(|ident| !delta.old_subscribers.contains(*ident))
        .cloned()
        .collect()
}

fn subscribers_changed<S, A, M>(delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
    delta.old_subscribers.len() != record.subscribers.len()
        || record
            .subscribers
            .keys()
            .any(|ident| !delta.old_subscribers.contains(ident))
}

/// Started flipped: every publisher attached at that moment gets a pump.
struct PublishersOnStart;

#[async_trait]
impl<S, A, M> Reaction<S, A, M> for PublishersOnStart
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn key(&self) -> ReactionKey {
        ReactionKey::PublishersOnStart
    }

    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
        !delta.old_started && record.started
    }

    async fn fire(
        &self,
        _delta: &Delta<S>,
        record: &mut ReactorRecord<S, A, M>,
        ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow> {
        pump::start_idle_pumps(record, ctx);
        Ok(Flow::Continue)
    }
}

/// While running, publishers added by a mutation get pumps. Removed ones were
/// already closed by the retired-channel drain.
struct PublishersOnChange;

#[async_trait]
impl<S, A, M> Reaction<S, A, M> for PublishersOnChange
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn key(&self) -> ReactionKey {
        ReactionKey::PublishersOnChange
    }

    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
        delta.old_started && record.started
    }

    async fn fire(
        &self,
        _delta: &Delta<S>,
        record: &mut ReactorRecord<S, A, M>,
        ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow> {
        pump::start_idle_pumps(record, ctx);
        Ok(Flow::Continue)
    }
}

/// Started flipped with subscribers attached: they see the initial state as a
/// catch-up emission from the empty state.
struct SubscribersOnStart;

#[async_trait]
impl<S, A, M> Reaction<S, A, M> for SubscribersOnStart
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn key(&self) -> ReactionKey {
        ReactionKey::SubscribersOnStart
    }

    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
        !delta.old_started && record.started && !record.subscribers.is_empty()
    }

    async fn fire(
        &self,
        _delta: &Delta<S>,
        record: &mut ReactorRecord<S, A, M>,
        ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow> {
        pump::start_missing_watchers(record, ctx);
        fanout::emit_catch_up(record, None).await?;
        Ok(Flow::Continue)
    }
}

/// While running, a fresh subscriber always sees the world as if transitioning
/// from nothing: catch-up goes to the newly-added subscribers only.
struct SubscribersOnChange;

#[async_trait]
impl<S, A, M> Reaction<S, A, M> for SubscribersOnChange
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn key(&self) -> ReactionKey {
        ReactionKey::SubscribersOnChange
    }

    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
        delta.old_started && record.started && subscribers_changed(delta, record)
    }

    async fn fire(
        &self,
        delta: &Delta<S>,
        record: &mut ReactorRecord<S, A, M>,
        ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow> {
        pump::start_missing_watchers(record, ctx);
        let added = added_subscribers(delta, record);
        if !added.is_empty() {
            fanout::emit_catch_up(record, Some(&added)).await?;
        }
        Ok(Flow::Continue)
    }
}

/// The last subscriber going away while running is terminal.
struct AllSubscribersRemoved;

#[async_trait]
impl<S, A, M> Reaction<S, A, M> for AllSubscribersRemoved
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn key(&self) -> ReactionKey {
        ReactionKey::AllSubscribersRemoved
    }

    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
        delta.old_started
            && record.started
            && record.subscribers.is_empty()
            && !delta.old_subscribers.is_empty()
    }

    async fn fire(
        &self,
        _delta: &Delta<S>,
        _record: &mut ReactorRecord<S, A, M>,
        ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow> {
        tracing::info!(
            target: "refold::reactions",
            reactor = %ctx.id,
            "last subscriber removed"
        );
        Ok(Flow::Implode)
    }
}

/// An ordinary state transition broadcasts the emitter's diff to everyone.
struct StateChange;

#[async_trait]
impl<S, A, M> Reaction<S, A, M> for StateChange
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn key(&self) -> ReactionKey {
        ReactionKey::StateChange
    }

    fn applies(&self, delta: &Delta<S>, record: &ReactorRecord<S, A, M>) -> bool {
        delta.old_started
            && record.started
            && !record.subscribers.is_empty()
            && record.state != delta.old_state
    }

    async fn fire(
        &self,
        delta: &Delta<S>,
        record: &mut ReactorRecord<S, A, M>,
        _ctx: &ActorContext<S, A, M>,
    ) -> Result<Flow> {
        fanout::emit_diff(record, &delta.old_state).await?;
        Ok(Flow::Continue)
    }
}
