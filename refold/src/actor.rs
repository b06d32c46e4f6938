//! The single-writer state actor: a task owning the reactor record, pulling
//! actions from a FIFO mailbox.
//!
//! Two execution lanes share the mailbox. Fast actions (field assignments,
//! channel bookkeeping, `update`) run inline on the actor task. Actions that
//! may block on I/O (reduce, start/initializer, `update_blocking`) move the
//! state onto the blocking pool via `spawn_blocking` and are awaited inline,
//! so both lanes stay strictly serialized per reactor.

use std::any::Any;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task;

use crate::error::{ReactorError, Result};
use crate::ident::ReactorId;
use crate::reactions::{self, Delta, Flow, Reaction};
use crate::record::{Phase, ReactorRecord, ReactorView, Signal};

pub(crate) enum Action<S, A, M> {
    /// Fast lane: runs inline on the actor task.
    Apply {
        label: &'static str,
        f: Box<dyn FnOnce(&mut ReactorRecord<S, A, M>) -> Result<()> + Send>,
    },
    /// Blocking lane: the state moves onto the blocking pool.
    Transform {
        label: &'static str,
        f: Box<dyn FnOnce(S) -> anyhow::Result<S> + Send>,
    },
    /// Blocking lane: fold one publisher event through the installed reducer.
    Reduce { signal: Signal<A> },
    /// Blocking lane: run the initializer, mark the reactor started.
    Start,
    /// Unconditionally faults, taking the supervision path.
    Reboot,
}

impl<S, A, M> Action<S, A, M> {
    fn label(&self) -> &'static str {
        match self {
            Action::Apply { label, .. } | Action::Transform { label, .. } => label,
            Action::Reduce { .. } => "reduce",
            Action::Start => "start",
            Action::Reboot => "reboot",
        }
    }
}

/// Enqueue side of a reactor's mailbox, shared by handles, pumps, and
/// close-watchers. Every push bumps the depth gauge `settle` waits on.
pub(crate) struct Mailbox<S, A, M> {
    pub(crate) tx: mpsc::UnboundedSender<Action<S, A, M>>,
    pub(crate) depth: Arc<watch::Sender<usize>>,
    pub(crate) imploded: Arc<AtomicBool>,
}

impl<S, A, M> Clone for Mailbox<S, A, M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
            imploded: Arc::clone(&self.imploded),
        }
    }
}

impl<S, A, M> Mailbox<S, A, M> {
    /// Enqueue an action. Never fails; after implosion this is a no-op.
    pub(crate) fn push(&self, action: Action<S, A, M>) {
        if self.imploded.load(Ordering::Acquire) {
            return;
        }
        self.depth.send_modify(|depth| *depth += 1);
        if self.tx.send(action).is_err() {
            self.depth.send_modify(|depth| *depth = depth.saturating_sub(1));
        }
    }

    pub(crate) fn downgrade(&self) -> WeakMailbox<S, A, M> {
        WeakMailbox {
            tx: self.tx.downgrade(),
            depth: Arc::clone(&self.depth),
            imploded: Arc::clone(&self.imploded),
        }
    }
}

/// Non-owning mailbox reference held by the actor itself.
///
/// The actor must not keep its own mailbox alive: only handles, pumps, and
/// close-watchers do, so a reactor whose last strong sender drops can shut
/// down instead of leaking.
pub(crate) struct WeakMailbox<S, A, M> {
    tx: mpsc::WeakUnboundedSender<Action<S, A, M>>,
    depth: Arc<watch::Sender<usize>>,
    imploded: Arc<AtomicBool>,
}

impl<S, A, M> Clone for WeakMailbox<S, A, M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
            imploded: Arc::clone(&self.imploded),
        }
    }
}

impl<S, A, M> WeakMailbox<S, A, M> {
    pub(crate) fn upgrade(&self) -> Option<Mailbox<S, A, M>> {
        Some(Mailbox {
            tx: self.tx.upgrade()?,
            depth: Arc::clone(&self.depth),
            imploded: Arc::clone(&self.imploded),
        })
    }
}

/// What spawned tasks (pumps, watchers) and reactions need from the actor.
pub(crate) struct ActorContext<S, A, M> {
    pub(crate) id: ReactorId,
    pub(crate) mailbox: WeakMailbox<S, A, M>,
}

impl<S, A, M> Clone for ActorContext<S, A, M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            mailbox: self.mailbox.clone(),
        }
    }
}

pub(crate) struct ReactorActor<S, A, M> {
    pub(crate) id: ReactorId,
    pub(crate) record: ReactorRecord<S, A, M>,
    pub(crate) rx: mpsc::UnboundedReceiver<Action<S, A, M>>,
    pub(crate) ctx: ActorContext<S, A, M>,
    pub(crate) depth: Arc<watch::Sender<usize>>,
    pub(crate) imploded: Arc<AtomicBool>,
    pub(crate) view_tx: watch::Sender<ReactorView<S>>,
    pub(crate) phase: Phase,
    pub(crate) reactions: Vec<Box<dyn Reaction<S, A, M>>>,
}

impl<S, A, M> ReactorActor<S, A, M>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub(crate) async fn run(mut self) {
        while let Some(action) = self.rx.recv().await {
            let flow = self.step(action).await;
            self.depth
                .send_modify(|depth| *depth = depth.saturating_sub(1));
            if matches!(flow, Flow::Implode) {
                return;
            }
        }
        tracing::debug!(target: "refold::actor", reactor = %self.id, "all handles dropped; actor stopping");
    }

    async fn step(&mut self, action: Action<S, A, M>) -> Flow {
        let label = action.label();
        tracing::trace!(target: "refold::actor", reactor = %self.id, action = label, "running action");

        let delta = Delta::capture(&self.record);
        let outcome = match self.perform(action).await {
            Ok(()) => {
                reactions::dispatch(&self.reactions, &delta, &mut self.record, &self.ctx).await
            }
            Err(fault) => Err(fault),
        };

        match outcome {
            Ok(Flow::Continue) => {
                self.publish_view();
                Flow::Continue
            }
            Ok(Flow::Implode) => {
                self.implode("last subscriber removed");
                Flow::Implode
            }
            Err(fault) => self.recover(fault).await,
        }
    }

    async fn perform(&mut self, action: Action<S, A, M>) -> Result<()> {
        match action {
            Action::Apply { label, f } => {
                let record = &mut self.record;
                match catch_unwind(AssertUnwindSafe(move || f(record))) {
                    Ok(result) => result,
                    Err(payload) => Err(ReactorError::ActionPanicked(format!(
                        "{label}: {}",
                        panic_message(payload.as_ref())
                    ))),
                }
            }
            Action::Transform { label, f } => {
                let prev = mem::take(&mut self.record.state);
                match task::spawn_blocking(move || f(prev)).await {
                    Ok(Ok(next)) => {
                        self.record.state = next;
                        Ok(())
                    }
                    Ok(Err(err)) => Err(ReactorError::Update(err)),
                    Err(join) => Err(join_fault(label, &join)),
                }
            }
            Action::Reduce { signal } => {
                let reducer = Arc::clone(&self.record.reducer);
                let prev = mem::take(&mut self.record.state);
                match task::spawn_blocking(move || reducer(prev, signal)).await {
                    Ok(Ok(next)) => {
                        self.record.state = next;
                        Ok(())
                    }
                    Ok(Err(err)) => Err(ReactorError::Reducer(err)),
                    Err(join) => Err(join_fault("reduce", &join)),
                }
            }
            Action::Start => {
                let initializer = Arc::clone(&self.record.initializer);
                match task::spawn_blocking(move || initializer()).await {
                    Ok(Ok(state)) => {
                        self.record.state = state;
                        self.record.started = true;
                        self.phase = Phase::Running;
                        Ok(())
                    }
                    Ok(Err(err)) => Err(ReactorError::Initializer(err)),
                    Err(join) => Err(join_fault("start", &join)),
                }
            }
            Action::Reboot => Err(ReactorError::RebootRequested),
        }
    }

    pub(crate) fn publish_view(&self) {
        self.view_tx.send_replace(self.record.view(self.phase));
    }
}

pub(crate) fn join_fault(label: &str, join: &task::JoinError) -> ReactorError {
    ReactorError::ActionPanicked(format!("{label}: {join}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
