//! Fault recovery and terminal teardown.
//!
//! When an action raises, the actor stops consuming its mailbox and the
//! recovery procedure here takes over: one backoff entry buys one reboot,
//! a reboot resets the record through the initializer, and an exhausted
//! budget ends the reactor for good.

use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::task;
use tokio::time;

use crate::actor::{ReactorActor, join_fault};
use crate::error::ReactorError;
use crate::fanout;
use crate::reactions::Flow;
use crate::record::Phase;

impl<S, A, M> ReactorActor<S, A, M>
where
    S: Clone + Default + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Consume backoff entries until the initializer succeeds or the budget
    /// runs out. Runs on the actor task, so no other action can interleave
    /// with the reset.
    pub(crate) async fn recover(&mut self, fault: ReactorError) -> Flow {
        let mut fault = fault;
        loop {
            tracing::warn!(
                target: "refold::supervisor",
                reactor = %self.id,
                restarts = self.record.restarts,
                error = %fault,
                "action faulted; scheduling reboot"
            );
            self.phase = Phase::Faulted;
            self.publish_view();

            let Some(delay) = self.record.backoff.next_delay() else {
                tracing::error!(
                    target: "refold::supervisor",
                    reactor = %self.id,
                    restarts = self.record.restarts,
                    "backoff exhausted"
                );
                self.implode("backoff exhausted");
                return Flow::Implode;
            };

            time::sleep(delay).await;
            self.phase = Phase::Rebooting;
            self.publish_view();

            // A reboot is a reset, not a retry: whatever was queued belonged
            // to the failed incarnation.
            self.discard_queued();
            self.record.reset_for_reboot();

            let initializer = Arc::clone(&self.record.initializer);
            let initialized = match task::spawn_blocking(move || initializer()).await {
                Ok(Ok(state)) => Ok(state),
                Ok(Err(err)) => Err(ReactorError::Initializer(err)),
                Err(join) => Err(join_fault("initializer", &join)),
            };

            match initialized {
                Ok(state) => {
                    self.record.state = state;
                    // Subscribers see the rebooted world the way a fresh
                    // subscriber would: a catch-up from the empty state.
                    if self.record.started && !self.record.subscribers.is_empty() {
                        if let Err(err) = fanout::emit_catch_up(&self.record, None).await {
                            fault = err;
                            continue;
                        }
                    }
                    self.phase = Phase::Running;
                    self.publish_view();
                    tracing::info!(
                        target: "refold::supervisor",
                        reactor = %self.id,
                        restarts = self.record.restarts,
                        "reactor rebooted"
                    );
                    return Flow::Continue;
                }
                Err(err) => fault = err,
            }
        }
    }

    /// Terminal teardown, executed once: close every subscriber channel,
    /// close every publisher channel, invoke destructors in ascending ident
    /// order. Per-step failures are swallowed.
    pub(crate) fn implode(&mut self, reason: &str) {
        tracing::info!(target: "refold::supervisor", reactor = %self.id, reason, "imploding");
        self.imploded.store(true, Ordering::Release);

        for (ident, slot) in mem::take(&mut self.record.subscribers) {
            tracing::trace!(target: "refold::supervisor", reactor = %self.id, subscriber = %ident, "closing subscriber channel");
            slot.close();
        }
        for (_, slot) in self.record.retired_subscribers.drain(..) {
            slot.close();
        }

        for (ident, slot) in mem::take(&mut self.record.publishers) {
            tracing::trace!(target: "refold::supervisor", reactor = %self.id, publisher = %ident, "closing publisher channel");
            slot.close();
        }
        for (_, slot) in self.record.retired_publishers.drain(..) {
            slot.close();
        }

        for (ident, destructor) in mem::take(&mut self.record.destructors) {
            if catch_unwind(AssertUnwindSafe(destructor)).is_err() {
                tracing::warn!(
                    target: "refold::supervisor",
                    reactor = %self.id,
                    destructor = %ident,
                    "destructor panicked; continuing teardown"
                );
            }
        }

        self.discard_queued();
        self.phase = Phase::Imploded;
        self.publish_view();
    }

    pub(crate) fn discard_queued(&mut self) {
        let mut discarded = 0usize;
        while self.rx.try_recv().is_ok() {
            self.depth
                .send_modify(|depth| *depth = depth.saturating_sub(1));
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(
                target: "refold::supervisor",
                reactor = %self.id,
                discarded,
                "discarded queued actions"
            );
        }
    }
}
