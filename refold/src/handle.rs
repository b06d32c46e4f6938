//! The public reactor handle and its builder.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{mpsc, watch};

use crate::actor::{Action, ActorContext, Mailbox, ReactorActor};
use crate::backoff::Backoff;
use crate::ident::{Ident, ReactorId};
use crate::reactions;
use crate::record::{self, Destructor, Phase, ReactorView, Signal};

struct Shared<S, A, M> {
    id: ReactorId,
    mailbox: Mailbox<S, A, M>,
    view: watch::Receiver<ReactorView<S>>,
    depth: watch::Receiver<usize>,
}

/// Handle to a running reactor. Clones address the same reactor.
///
/// Every mutating operation enqueues an action on the reactor's mailbox and
/// returns the handle for chaining; effects are applied asynchronously, in
/// submission order per caller. Enqueueing never fails: after implosion the
/// operations degrade to no-ops. Use [`Reactor::settle`] to wait for queued
/// work (including the reactions it triggers) to finish.
pub struct Reactor<S, A, M> {
    inner: Arc<Shared<S, A, M>>,
}

impl<S, A, M> Clone for Reactor<S, A, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, M> fmt::Debug for Reactor<S, A, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.inner.view.borrow();
        f.debug_struct("Reactor")
            .field("id", &self.inner.id)
            .field("phase", &view.phase)
            .field("restarts", &view.restarts)
            .field("publisher_count", &view.publishers.len())
            .field("subscriber_count", &view.subscribers.len())
            .field("queued_actions", &*self.inner.depth.borrow())
            .finish()
    }
}

impl<S, A, M> Reactor<S, A, M>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Start configuring a new reactor.
    pub fn builder() -> ReactorBuilder<S, A, M> {
        ReactorBuilder::new()
    }

    /// Identifier used in this reactor's tracing fields.
    pub fn id(&self) -> ReactorId {
        self.inner.id
    }

    fn push(&self, action: Action<S, A, M>) -> &Self {
        self.inner.mailbox.push(action);
        self
    }

    /// Run the initializer, mark the reactor started, and wait for the
    /// initial emission to reach the subscribers attached so far.
    pub async fn start(&self) -> &Self {
        self.push(Action::Start);
        self.settle().await
    }

    /// Wait until the mailbox is quiescent.
    ///
    /// Quiescent means zero queued actions after all triggered reactions have
    /// finished, re-checked across drains, so work dispatched by other work
    /// is covered too. Returns immediately once the reactor has imploded.
    pub async fn settle(&self) -> &Self {
        let mut depth = self.inner.depth.clone();
        let mut view = self.inner.view.clone();
        loop {
            if *depth.borrow_and_update() == 0 {
                return self;
            }
            if view.borrow_and_update().phase == Phase::Imploded {
                return self;
            }
            tokio::select! {
                changed = depth.changed() => {
                    if changed.is_err() {
                        return self;
                    }
                }
                changed = view.changed() => {
                    if changed.is_err() {
                        return self;
                    }
                }
            }
        }
    }

    /// Enqueue `state <- f(state)` on the fast lane.
    pub fn update<F>(&self, f: F) -> &Self
    where
        F: FnOnce(S) -> S + Send + 'static,
    {
        self.push(Action::Apply {
            label: "update",
            f: Box::new(move |record| {
                let prev = mem::take(&mut record.state);
                record.state = f(prev);
                Ok(())
            }),
        })
    }

    /// Enqueue `state <- f(state)` on the blocking lane, for transforms that
    /// may do I/O. A failing transform faults the reactor and takes the
    /// recovery path.
    pub fn update_blocking<F>(&self, f: F) -> &Self
    where
        F: FnOnce(S) -> anyhow::Result<S> + Send + 'static,
    {
        self.push(Action::Transform {
            label: "update-blocking",
            f: Box::new(f),
        })
    }

    /// Force a fault. The supervisor takes the normal recovery path,
    /// consuming one backoff entry and bumping the restart counter.
    pub fn reboot(&self) -> &Self {
        self.push(Action::Reboot)
    }

    /// Install a new reducer.
    pub fn set_reducer<F>(&self, reducer: F) -> &Self
    where
        F: Fn(S, Signal<A>) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.push(Action::Apply {
            label: "set-reducer",
            f: Box::new(move |record| {
                record.reducer = Arc::new(reducer);
                Ok(())
            }),
        })
    }

    /// Install a new emitter.
    pub fn set_emitter<F>(&self, emitter: F) -> &Self
    where
        F: Fn(&S, &S) -> anyhow::Result<Vec<M>> + Send + Sync + 'static,
    {
        self.push(Action::Apply {
            label: "set-emitter",
            f: Box::new(move |record| {
                record.emitter = Arc::new(emitter);
                Ok(())
            }),
        })
    }

    /// Install a new initializer.
    pub fn set_initializer<F>(&self, initializer: F) -> &Self
    where
        F: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.push(Action::Apply {
            label: "set-initializer",
            f: Box::new(move |record| {
                record.initializer = Arc::new(initializer);
                Ok(())
            }),
        })
    }

    /// Replace the remaining reboot-delay budget.
    pub fn set_backoff(&self, backoff: Backoff) -> &Self {
        self.push(Action::Apply {
            label: "set-backoff",
            f: Box::new(move |record| {
                record.backoff = backoff;
                Ok(())
            }),
        })
    }

    /// Attach publisher channels. The reactor owns them from here on and
    /// closes them on removal or implosion; once started, each gets a pump.
    pub fn add_publishers<I, K>(&self, publishers: I) -> &Self
    where
        I: IntoIterator<Item = (K, mpsc::Receiver<A>)>,
        K: Into<Ident>,
    {
        let added: Vec<(Ident, mpsc::Receiver<A>)> = publishers
            .into_iter()
            .map(|(ident, rx)| (ident.into(), rx))
            .collect();
        self.push(Action::Apply {
            label: "add-publishers",
            f: Box::new(move |record| {
                for (ident, rx) in added {
                    record.insert_publisher(ident, rx);
                }
                Ok(())
            }),
        })
    }

    /// Detach publishers; their channels are closed and their pumps end.
    pub fn remove_publishers<I, K>(&self, idents: I) -> &Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Ident>,
    {
        let removed: Vec<Ident> = idents.into_iter().map(Into::into).collect();
        self.push(Action::Apply {
            label: "remove-publishers",
            f: Box::new(move |record| {
                for ident in &removed {
                    record.retire_publisher(ident);
                }
                Ok(())
            }),
        })
    }

    /// Attach subscriber channels. While running, a fresh subscriber first
    /// receives the catch-up emission for the current state.
    pub fn add_subscribers<I, K>(&self, subscribers: I) -> &Self
    where
        I: IntoIterator<Item = (K, mpsc::Sender<M>)>,
        K: Into<Ident>,
    {
        let added: Vec<(Ident, mpsc::Sender<M>)> = subscribers
            .into_iter()
            .map(|(ident, tx)| (ident.into(), tx))
            .collect();
        self.push(Action::Apply {
            label: "add-subscribers",
            f: Box::new(move |record| {
                for (ident, tx) in added {
                    record.insert_subscriber(ident, tx);
                }
                Ok(())
            }),
        })
    }

    /// Detach subscribers; their channels are closed. Removing the last one
    /// while running implodes the reactor.
    pub fn remove_subscribers<I, K>(&self, idents: I) -> &Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Ident>,
    {
        let removed: Vec<Ident> = idents.into_iter().map(Into::into).collect();
        self.push(Action::Apply {
            label: "remove-subscribers",
            f: Box::new(move |record| {
                for ident in &removed {
                    record.retire_subscriber(ident);
                }
                Ok(())
            }),
        })
    }

    /// Register teardown side effects, invoked exactly once at implosion in
    /// ascending ident order.
    pub fn add_destructors<I, K>(&self, destructors: I) -> &Self
    where
        I: IntoIterator<Item = (K, Destructor)>,
        K: Into<Ident>,
    {
        let added: Vec<(Ident, Destructor)> = destructors
            .into_iter()
            .map(|(ident, destructor)| (ident.into(), destructor))
            .collect();
        self.push(Action::Apply {
            label: "add-destructors",
            f: Box::new(move |record| {
                for (ident, destructor) in added {
                    record.destructors.insert(ident, destructor);
                }
                Ok(())
            }),
        })
    }

    /// Convenience for registering a single destructor without boxing.
    pub fn add_destructor<K, F>(&self, ident: K, destructor: F) -> &Self
    where
        K: Into<Ident>,
        F: FnOnce() + Send + Sync + 'static,
    {
        self.add_destructors([(ident.into(), Box::new(destructor) as Destructor)])
    }

    /// Unregister destructors without invoking them.
    pub fn remove_destructors<I, K>(&self, idents: I) -> &Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Ident>,
    {
        let removed: Vec<Ident> = idents.into_iter().map(Into::into).collect();
        self.push(Action::Apply {
            label: "remove-destructors",
            f: Box::new(move |record| {
                for ident in &removed {
                    record.destructors.remove(ident);
                }
                Ok(())
            }),
        })
    }

    /// The state as of the last completed action. Never raises.
    pub fn state(&self) -> S {
        self.inner.view.borrow().state.clone()
    }

    /// Idents of the attached publishers, ascending.
    pub fn publisher_idents(&self) -> Vec<Ident> {
        self.inner.view.borrow().publishers.clone()
    }

    /// Idents of the attached subscribers, ascending.
    pub fn subscriber_idents(&self) -> Vec<Ident> {
        self.inner.view.borrow().subscribers.clone()
    }

    /// Number of reboots performed so far.
    pub fn restarts(&self) -> u32 {
        self.inner.view.borrow().restarts
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.view.borrow().phase
    }

    /// Full snapshot of the record as of the last completed action.
    pub fn snapshot(&self) -> ReactorView<S> {
        self.inner.view.borrow().clone()
    }
}

/// Configures and spawns a reactor.
///
/// All options are optional: the default reducer keeps the state, the default
/// emitter emits nothing, the default initializer is `S::default()`, and the
/// default backoff doubles from 500 ms across eight entries.
pub struct ReactorBuilder<S, A, M> {
    reducer: Option<record::Reducer<S, A>>,
    emitter: Option<record::Emitter<S, M>>,
    initializer: Option<record::Initializer<S>>,
    backoff: Option<Backoff>,
}

impl<S, A, M> fmt::Debug for ReactorBuilder<S, A, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorBuilder")
            .field("reducer_set", &self.reducer.is_some())
            .field("emitter_set", &self.emitter.is_some())
            .field("initializer_set", &self.initializer.is_some())
            .field("backoff_set", &self.backoff.is_some())
            .finish()
    }
}

impl<S, A, M> Default for ReactorBuilder<S, A, M>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A, M> ReactorBuilder<S, A, M>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Builder with every option at its default.
    pub fn new() -> Self {
        Self {
            reducer: None,
            emitter: None,
            initializer: None,
            backoff: None,
        }
    }

    /// Fold function applied to every publisher event.
    pub fn with_reducer<F>(mut self, reducer: F) -> Self
    where
        F: Fn(S, Signal<A>) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    /// Diff function turning state transitions into subscriber messages.
    pub fn with_emitter<F>(mut self, emitter: F) -> Self
    where
        F: Fn(&S, &S) -> anyhow::Result<Vec<M>> + Send + Sync + 'static,
    {
        self.emitter = Some(Arc::new(emitter));
        self
    }

    /// State constructor used on start and after every reboot.
    pub fn with_initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Reboot-delay budget.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Spawn the actor task and hand back the reactor handle.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> Reactor<S, A, M> {
        let id = ReactorId::next();
        let record = record::ReactorRecord::new(
            self.reducer.unwrap_or_else(record::default_reducer),
            self.emitter.unwrap_or_else(record::default_emitter),
            self.initializer.unwrap_or_else(record::default_initializer),
            self.backoff.unwrap_or_default(),
        );

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (depth_tx, depth_rx) = watch::channel(0usize);
        let depth_tx = Arc::new(depth_tx);
        let (view_tx, view_rx) = watch::channel(record.view(Phase::Created));
        let imploded = Arc::new(AtomicBool::new(false));

        let mailbox = Mailbox {
            tx: action_tx,
            depth: Arc::clone(&depth_tx),
            imploded: Arc::clone(&imploded),
        };
        let ctx = ActorContext {
            id,
            mailbox: mailbox.downgrade(),
        };
        let actor = ReactorActor {
            id,
            record,
            rx: action_rx,
            ctx,
            depth: depth_tx,
            imploded,
            view_tx,
            phase: Phase::Created,
            reactions: reactions::registry(),
        };
        tokio::spawn(actor.run());
        tracing::debug!(target: "refold::actor", reactor = %id, "reactor spawned");

        Reactor {
            inner: Arc::new(Shared {
                id,
                mailbox,
                view: view_rx,
                depth: depth_rx,
            }),
        }
    }
}
