//! Subscriber fan-out: blocking broadcast of emitted messages.

use futures::future::join_all;
use tokio::sync::mpsc;

use crate::error::{ReactorError, Result};
use crate::ident::Ident;
use crate::record::ReactorRecord;

/// Deliver `messages` to every target, in order per target.
///
/// Targets are written concurrently, but each sees the messages in emitter
/// output order. A full channel blocks the emitting task until the
/// subscriber drains: backpressure is the policy. Sends to an
/// externally-closed channel are swallowed; its close-watcher issues the
/// removal.
pub(crate) async fn deliver<'a, M, I>(messages: &[M], targets: I)
where
    M: Clone + 'a,
    I: Iterator<Item = (&'a Ident, &'a mpsc::Sender<M>)>,
{
    let sends = targets.map(|(ident, tx)| async move {
        for message in messages {
            if tx.send(message.clone()).await.is_err() {
                tracing::trace!(
                    target: "refold::fanout",
                    subscriber = %ident,
                    "dropping emission for closed subscriber channel"
                );
                break;
            }
        }
    });
    join_all(sends).await;
}

/// Catch-up emission: the state as seen from nothing, for subscribers that
/// have not observed any transition yet. `only` narrows delivery to the
/// newly-attached subscribers; `None` broadcasts to everyone.
pub(crate) async fn emit_catch_up<S, A, M>(
    record: &ReactorRecord<S, A, M>,
    only: Option<&[Ident]>,
) -> Result<()>
where
    S: Default,
    M: Clone,
{
    let baseline = S::default();
    let messages = (record.emitter)(&baseline, &record.state).map_err(ReactorError::Emitter)?;
    if messages.is_empty() {
        return Ok(());
    }
    match only {
        Some(added) => {
            let targets = record
                .subscribers
                .iter()
                .filter(|(ident, _)| added.contains(*ident))
                .map(|(ident, slot)| (ident, &slot.tx));
            deliver(&messages, targets).await;
        }
        None => {
            let targets = record
                .subscribers
                .iter()
                .map(|(ident, slot)| (ident, &slot.tx));
            deliver(&messages, targets).await;
        }
    }
    Ok(())
}

/// Ordinary transition emission, delivered to all subscribers.
pub(crate) async fn emit_diff<S, A, M>(record: &ReactorRecord<S, A, M>, old_state: &S) -> Result<()>
where
    M: Clone,
{
    let messages = (record.emitter)(old_state, &record.state).map_err(ReactorError::Emitter)?;
    if messages.is_empty() {
        return Ok(());
    }
    let targets = record
        .subscribers
        .iter()
        .map(|(ident, slot)| (ident, &slot.tx));
    deliver(&messages, targets).await;
    Ok(())
}
