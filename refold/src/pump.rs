//! Publisher pumps and subscriber close-watchers.
//!
//! One pump task per pumping publisher, one watcher task per subscriber.
//! Both end at their next suspension point when their cancellation token
//! fires; both outlive actor reboots, since they only hold a mailbox handle.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actor::{Action, ActorContext, Mailbox};
use crate::ident::{Ident, ReactorId};
use crate::record::{PublisherSlot, ReactorRecord, Signal};

/// Spawn a pump for every attached publisher that does not have one yet.
pub(crate) fn start_idle_pumps<S, A, M>(
    record: &mut ReactorRecord<S, A, M>,
    ctx: &ActorContext<S, A, M>,
) where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    // Upgrade fails only when every handle, pump, and watcher is already
    // gone; nothing is left to observe the reactor then.
    let Some(mailbox) = ctx.mailbox.upgrade() else {
        return;
    };
    for (ident, slot) in record.publishers.iter_mut() {
        if matches!(slot, PublisherSlot::Pumping(_)) {
            continue;
        }
        let token = CancellationToken::new();
        if let PublisherSlot::Idle(rx) =
            std::mem::replace(slot, PublisherSlot::Pumping(token.clone()))
        {
            spawn_pump(ctx.id, ident.clone(), rx, token, mailbox.clone());
        }
    }
}

fn spawn_pump<S, A, M>(
    reactor: ReactorId,
    ident: Ident,
    mut rx: mpsc::Receiver<A>,
    token: CancellationToken,
    mailbox: Mailbox<S, A, M>,
) where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        tracing::trace!(target: "refold::pump", reactor = %reactor, publisher = %ident, "pump started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    rx.close();
                    break;
                }
                received = rx.recv() => match received {
                    Some(event) => mailbox.push(Action::Reduce {
                        signal: Signal {
                            publisher: ident.clone(),
                            event,
                        },
                    }),
                    None => {
                        // Producer went away; keep the record honest.
                        tracing::debug!(
                            target: "refold::pump",
                            reactor = %reactor,
                            publisher = %ident,
                            "publisher channel closed externally; removing"
                        );
                        let removed = ident.clone();
                        mailbox.push(Action::Apply {
                            label: "remove-publishers",
                            f: Box::new(move |record| {
                                record.retire_publisher(&removed);
                                Ok(())
                            }),
                        });
                        break;
                    }
                }
            }
        }
        tracing::trace!(target: "refold::pump", reactor = %reactor, publisher = %ident, "pump stopped");
    });
}

/// Spawn a close-watcher for every attached subscriber that lacks one.
pub(crate) fn start_missing_watchers<S, A, M>(
    record: &mut ReactorRecord<S, A, M>,
    ctx: &ActorContext<S, A, M>,
) where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    let Some(mailbox) = ctx.mailbox.upgrade() else {
        return;
    };
    for (ident, slot) in record.subscribers.iter_mut() {
        if slot.watcher.is_some() {
            continue;
        }
        let token = CancellationToken::new();
        slot.watcher = Some(token.clone());
        spawn_subscriber_watch(ctx.id, ident.clone(), slot.tx.clone(), token, mailbox.clone());
    }
}

fn spawn_subscriber_watch<S, A, M>(
    reactor: ReactorId,
    ident: Ident,
    tx: mpsc::Sender<M>,
    token: CancellationToken,
    mailbox: Mailbox<S, A, M>,
) where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tx.closed() => {
                tracing::debug!(
                    target: "refold::pump",
                    reactor = %reactor,
                    subscriber = %ident,
                    "subscriber channel closed externally; removing"
                );
                let removed = ident;
                mailbox.push(Action::Apply {
                    label: "remove-subscribers",
                    f: Box::new(move |record| {
                        record.retire_subscriber(&removed);
                        Ok(())
                    }),
                });
            }
        }
        // The watcher's sender clone drops here, so cancellation leaves the
        // record's sender as the only one keeping the channel open.
    });
}
