//! Crash recovery, reboot semantics, and backoff exhaustion.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use refold::{Backoff, Phase, ReactorBuilder};
use support::{MapState, kv, recv_within, wait_until};

#[tokio::test]
async fn crash_recovery_reemits_full_state() {
    support::init_tracing();
    let ingest_enabled = Arc::new(AtomicBool::new(true));

    let mode = Arc::clone(&ingest_enabled);
    let reactor = ReactorBuilder::<MapState, MapState, String>::new()
        .with_reducer(move |mut state, signal| {
            if !mode.load(Ordering::SeqCst) {
                anyhow::bail!("ingest disabled");
            }
            state.extend(signal.event);
            Ok(state)
        })
        .with_emitter(support::new_keys_emitter)
        .with_initializer(|| Ok(kv("zero", 0)))
        .with_backoff(Backoff::from_millis([1, 1, 1, 1]))
        .spawn();

    let (p_tx, p_rx) = mpsc::channel(8);
    let (s_tx, mut s_rx) = mpsc::channel(16);
    reactor
        .add_publishers([("p", p_rx)])
        .add_subscribers([("s", s_tx)]);

    reactor.start().await;
    assert_eq!(recv_within(&mut s_rx, "initial emission").await, "zero");

    p_tx.send(kv("one", 1)).await.unwrap();
    assert_eq!(recv_within(&mut s_rx, "first reduction").await, "one");

    // A faulting reducer reboots the reactor; the subscriber sees the
    // re-initialized world as a fresh catch-up.
    ingest_enabled.store(false, Ordering::SeqCst);
    p_tx.send(kv("two", 1)).await.unwrap();
    assert_eq!(recv_within(&mut s_rx, "catch-up after first crash").await, "zero");

    p_tx.send(kv("two", 1)).await.unwrap();
    assert_eq!(recv_within(&mut s_rx, "catch-up after second crash").await, "zero");

    // The pump survived both reboots and keeps feeding the new incarnation.
    ingest_enabled.store(true, Ordering::SeqCst);
    p_tx.send(kv("two", 1)).await.unwrap();
    assert_eq!(recv_within(&mut s_rx, "reduction after recovery").await, "two");

    assert_eq!(reactor.restarts(), 2);
    assert_eq!(reactor.phase(), Phase::Running);
}

#[tokio::test]
async fn backoff_exhaustion_implodes() {
    let destroyed = Arc::new(AtomicBool::new(false));

    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new()
        .with_initializer(|| anyhow::bail!("refusing to initialize"))
        .with_backoff(Backoff::from_millis([1, 1, 1]))
        .spawn();

    let flag = Arc::clone(&destroyed);
    reactor.add_destructor("d1", move || flag.store(true, Ordering::SeqCst));

    reactor.start().await;

    assert_eq!(reactor.phase(), Phase::Imploded);
    assert!(destroyed.load(Ordering::SeqCst));
    // One reboot per backoff entry, and not a single one more.
    assert_eq!(reactor.restarts(), 3);
}

#[tokio::test]
async fn explicit_reboot_resets_state_through_the_initializer() {
    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new()
        .with_initializer(|| Ok(kv("base", 1)))
        .with_backoff(Backoff::from_millis([1, 1]))
        .spawn();

    reactor.start().await;
    reactor
        .update(|mut state| {
            state.insert("extra".to_owned(), 5);
            state
        })
        .settle()
        .await;
    assert!(reactor.state().contains_key("extra"));

    reactor.reboot().settle().await;
    assert_eq!(reactor.state(), kv("base", 1));
    assert_eq!(reactor.restarts(), 1);
    assert_eq!(reactor.phase(), Phase::Running);
}

#[tokio::test]
async fn reboot_discards_actions_queued_behind_the_fault() {
    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new()
        .with_initializer(|| Ok(kv("base", 0)))
        .with_backoff(Backoff::from_millis([20]))
        .spawn();

    reactor.start().await;

    // The update sits in the mailbox behind the fault; the reboot clears it.
    reactor.reboot().update(|mut state| {
        state.insert("late".to_owned(), 1);
        state
    });
    reactor.settle().await;

    assert_eq!(reactor.state(), kv("base", 0));
    assert_eq!(reactor.restarts(), 1);
}

#[tokio::test]
async fn initializer_failure_during_recovery_consumes_further_backoff_entries() {
    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new()
        .with_initializer(move || {
            // Succeed on the first call (start), then fail twice before
            // coming back up.
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt == 1 || attempt == 2 {
                anyhow::bail!("not yet");
            }
            Ok(kv("up", 1))
        })
        .with_backoff(Backoff::from_millis([1, 1, 1, 1]))
        .spawn();

    reactor.start().await;
    assert_eq!(reactor.state(), kv("up", 1));

    reactor.reboot().settle().await;

    assert_eq!(reactor.phase(), Phase::Running);
    assert_eq!(reactor.state(), kv("up", 1));
    // Reboot request plus two initializer failures: three backoff entries.
    assert_eq!(reactor.restarts(), 3);
}

#[tokio::test]
async fn failing_blocking_update_takes_the_recovery_path() {
    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new()
        .with_initializer(|| Ok(kv("base", 1)))
        .with_backoff(Backoff::from_millis([1]))
        .spawn();

    reactor.start().await;
    reactor
        .update_blocking(|_state| anyhow::bail!("disk on fire"))
        .settle()
        .await;

    assert_eq!(reactor.phase(), Phase::Running);
    assert_eq!(reactor.state(), kv("base", 1));
    assert_eq!(reactor.restarts(), 1);
}

#[tokio::test]
async fn rebooted_reactor_keeps_serving_subscribers() {
    let reactor = ReactorBuilder::<MapState, MapState, String>::new()
        .with_reducer(support::merge_reducer)
        .with_emitter(support::new_keys_emitter)
        .with_initializer(|| Ok(kv("zero", 0)))
        .with_backoff(Backoff::from_millis([1]))
        .spawn();

    let (s_tx, mut s_rx) = mpsc::channel(8);
    reactor.add_subscribers([("s", s_tx)]);
    reactor.start().await;
    assert_eq!(recv_within(&mut s_rx, "initial emission").await, "zero");

    reactor.reboot();
    assert_eq!(recv_within(&mut s_rx, "catch-up after reboot").await, "zero");

    wait_until(|| reactor.phase() == Phase::Running, "back to running").await;
    assert_eq!(reactor.restarts(), 1);
}
