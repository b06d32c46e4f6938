//! The reactor record: the sole mutable entity, owned by the state actor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::ident::Ident;

/// Fold function applied to every event a publisher pump forwards.
pub type Reducer<S, A> = Arc<dyn Fn(S, Signal<A>) -> anyhow::Result<S> + Send + Sync>;

/// Diff function turning a state transition into subscriber messages.
///
/// Must be pure: it runs once per transition and again for catch-up
/// emissions, where the old state is `S::default()`.
pub type Emitter<S, M> = Arc<dyn Fn(&S, &S) -> anyhow::Result<Vec<M>> + Send + Sync>;

/// State constructor used on start and after every reboot.
pub type Initializer<S> = Arc<dyn Fn() -> anyhow::Result<S> + Send + Sync>;

/// Side effect invoked exactly once during implosion.
pub type Destructor = Box<dyn FnOnce() + Send + Sync>;

/// An event paired with the publisher it arrived on.
pub struct Signal<A> {
    /// Identifier of the publisher channel the event was received from.
    pub publisher: Ident,
    /// The event itself.
    pub event: A,
}

impl<A: fmt::Debug> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("publisher", &self.publisher)
            .field("event", &self.event)
            .finish()
    }
}

/// Lifecycle of a reactor, as observed through [`ReactorView`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Spawned, `start` not yet processed.
    Created,
    /// Processing actions.
    Running,
    /// An action raised; the mailbox is paused until the supervisor acts.
    Faulted,
    /// The supervisor is resetting the record after the backoff delay.
    Rebooting,
    /// Terminal: channels closed, destructors invoked, mailbox drained.
    Imploded,
}

/// Snapshot of the record as of the last completed action.
///
/// Accessors hand these out so readers never observe a half-applied
/// mutation. Treat the contents as immutable.
#[derive(Clone, Debug)]
pub struct ReactorView<S> {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Whether `start` has been processed.
    pub started: bool,
    /// Number of reboots performed so far.
    pub restarts: u32,
    /// The authoritative state.
    pub state: S,
    /// Idents of attached publishers, in ascending order.
    pub publishers: Vec<Ident>,
    /// Idents of attached subscribers, in ascending order.
    pub subscribers: Vec<Ident>,
}

/// An attached publisher channel.
///
/// Idle until a pump is running for it; the receiver then moves into the pump
/// task and only the cancellation token stays behind.
pub(crate) enum PublisherSlot<A> {
    Idle(mpsc::Receiver<A>),
    Pumping(CancellationToken),
}

impl<A> PublisherSlot<A> {
    pub(crate) fn close(self) {
        match self {
            PublisherSlot::Idle(mut rx) => rx.close(),
            PublisherSlot::Pumping(token) => token.cancel(),
        }
    }
}

/// An attached subscriber channel plus its close-watcher token, if one runs.
pub(crate) struct SubscriberSlot<M> {
    pub tx: mpsc::Sender<M>,
    pub watcher: Option<CancellationToken>,
}

impl<M> SubscriberSlot<M> {
    pub(crate) fn new(tx: mpsc::Sender<M>) -> Self {
        Self { tx, watcher: None }
    }

    pub(crate) fn close(self) {
        if let Some(token) = self.watcher {
            token.cancel();
        }
        // Dropping `tx` (with the watcher's clone released above) closes the
        // channel from the subscriber's side.
    }
}

pub(crate) struct ReactorRecord<S, A, M> {
    pub state: S,
    pub started: bool,
    pub publishers: BTreeMap<Ident, PublisherSlot<A>>,
    pub subscribers: BTreeMap<Ident, SubscriberSlot<M>>,
    pub destructors: BTreeMap<Ident, Destructor>,
    pub backoff: Backoff,
    pub restarts: u32,
    pub reducer: Reducer<S, A>,
    pub emitter: Emitter<S, M>,
    pub initializer: Initializer<S>,
    /// Channels removed (or replaced) by an action, awaiting closure by the
    /// watch dispatcher. Actions never close channels themselves.
    pub retired_publishers: Vec<(Ident, PublisherSlot<A>)>,
    pub retired_subscribers: Vec<(Ident, SubscriberSlot<M>)>,
}

pub(crate) fn default_reducer<S: 'static, A: 'static>() -> Reducer<S, A> {
    Arc::new(|state, _signal| Ok(state))
}

pub(crate) fn default_emitter<S: 'static, M: 'static>() -> Emitter<S, M> {
    Arc::new(|_old, _new| Ok(Vec::new()))
}

pub(crate) fn default_initializer<S: Default + 'static>() -> Initializer<S> {
    Arc::new(|| Ok(S::default()))
}

impl<S, A, M> ReactorRecord<S, A, M>
where
    S: Default,
{
    pub(crate) fn new(
        reducer: Reducer<S, A>,
        emitter: Emitter<S, M>,
        initializer: Initializer<S>,
        backoff: Backoff,
    ) -> Self {
        Self {
            state: S::default(),
            started: false,
            publishers: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            destructors: BTreeMap::new(),
            backoff,
            restarts: 0,
            reducer,
            emitter,
            initializer,
            retired_publishers: Vec::new(),
            retired_subscribers: Vec::new(),
        }
    }

    pub(crate) fn insert_publisher(&mut self, ident: Ident, rx: mpsc::Receiver<A>) {
        if let Some(replaced) = self
            .publishers
            .insert(ident.clone(), PublisherSlot::Idle(rx))
        {
            self.retired_publishers.push((ident, replaced));
        }
    }

    pub(crate) fn retire_publisher(&mut self, ident: &Ident) {
        if let Some(slot) = self.publishers.remove(ident) {
            self.retired_publishers.push((ident.clone(), slot));
        }
    }

    pub(crate) fn insert_subscriber(&mut self, ident: Ident, tx: mpsc::Sender<M>) {
        if let Some(replaced) = self
            .subscribers
            .insert(ident.clone(), SubscriberSlot::new(tx))
        {
            self.retired_subscribers.push((ident, replaced));
        }
    }

    pub(crate) fn retire_subscriber(&mut self, ident: &Ident) {
        if let Some(slot) = self.subscribers.remove(ident) {
            self.retired_subscribers.push((ident.clone(), slot));
        }
    }

    /// Reboot swap: fresh state, one more restart on the counter. Installed
    /// functions, channels, destructors, and the remaining backoff tail are
    /// all preserved.
    pub(crate) fn reset_for_reboot(&mut self) {
        self.state = S::default();
        self.restarts += 1;
    }

    pub(crate) fn publisher_idents(&self) -> Vec<Ident> {
        self.publishers.keys().cloned().collect()
    }

    pub(crate) fn subscriber_idents(&self) -> Vec<Ident> {
        self.subscribers.keys().cloned().collect()
    }
}

impl<S, A, M> ReactorRecord<S, A, M>
where
    S: Clone + Default,
{
    pub(crate) fn view(&self, phase: Phase) -> ReactorView<S> {
        ReactorView {
            phase,
            started: self.started,
            restarts: self.restarts,
            state: self.state.clone(),
            publishers: self.publisher_idents(),
            subscribers: self.subscriber_idents(),
        }
    }
}

impl<S, A, M> fmt::Debug for ReactorRecord<S, A, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorRecord")
            .field("started", &self.started)
            .field("restarts", &self.restarts)
            .field("publisher_count", &self.publishers.len())
            .field("subscriber_count", &self.subscribers.len())
            .field("destructor_count", &self.destructors.len())
            .finish()
    }
}
