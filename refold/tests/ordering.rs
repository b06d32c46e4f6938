//! Serialization, submission-order, catch-up, and backpressure guarantees.

mod support;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use refold::ReactorBuilder;
use support::{MapState, kv, recv_within};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_all_fold_in() {
    let reactor = ReactorBuilder::<i64, i64, i64>::new().spawn();
    reactor.start().await;

    let mut submitters = Vec::new();
    for _ in 0..10 {
        let handle = reactor.clone();
        submitters.push(tokio::spawn(async move {
            for _ in 0..1000 {
                handle.update(|state| state + 1);
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }

    reactor.settle().await;
    assert_eq!(reactor.state(), 10_000);
}

#[tokio::test]
async fn update_then_settle_observes_the_fold() {
    let reactor = ReactorBuilder::<i64, i64, i64>::new()
        .with_initializer(|| Ok(11))
        .spawn();
    reactor.start().await;

    let prior = reactor.state();
    reactor.update(|state| state * 3 + 7).settle().await;
    assert_eq!(reactor.state(), prior * 3 + 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshots_are_prefix_consistent() {
    let reactor = ReactorBuilder::<i64, i64, i64>::new().spawn();
    reactor.start().await;

    let writer_handle = reactor.clone();
    let writer = tokio::spawn(async move {
        for _ in 0..500 {
            writer_handle.update(|state| state + 1);
        }
    });

    // Snapshots may lag but can never run backwards.
    time::timeout(Duration::from_secs(5), async {
        let mut last = 0;
        while last < 500 {
            let seen = reactor.state();
            assert!(seen >= last, "snapshot went backwards: {seen} < {last}");
            last = seen;
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("all updates observed");

    writer.await.unwrap();
}

#[tokio::test]
async fn fast_and_blocking_updates_stay_in_submission_order() {
    let reactor = ReactorBuilder::<Vec<i64>, i64, i64>::new().spawn();
    reactor.start().await;

    reactor
        .update(|mut state| {
            state.push(1);
            state
        })
        .update_blocking(|mut state| {
            state.push(2);
            Ok(state)
        })
        .update(|mut state| {
            state.push(3);
            state
        })
        .settle()
        .await;

    assert_eq!(reactor.state(), vec![1, 2, 3]);
}

#[tokio::test]
async fn late_subscriber_catches_up_to_the_current_state() {
    let reactor = ReactorBuilder::<MapState, MapState, String>::new()
        .with_emitter(support::new_keys_emitter)
        .with_initializer(|| Ok(kv("zero", 0)))
        .spawn();

    let (s1_tx, mut s1_rx) = mpsc::channel(8);
    reactor.add_subscribers([("s1", s1_tx)]);
    reactor.start().await;
    assert_eq!(recv_within(&mut s1_rx, "s1 initial emission").await, "zero");

    reactor
        .update(|mut state| {
            state.insert("one".to_owned(), 1);
            state
        })
        .settle()
        .await;
    assert_eq!(recv_within(&mut s1_rx, "s1 state change").await, "one");

    // The fresh subscriber sees the world as if transitioning from nothing:
    // every key of the current state, in emitter output order.
    let (s2_tx, mut s2_rx) = mpsc::channel(8);
    reactor.add_subscribers([("s2", s2_tx)]).settle().await;
    assert_eq!(recv_within(&mut s2_rx, "s2 catch-up, first").await, "one");
    assert_eq!(recv_within(&mut s2_rx, "s2 catch-up, second").await, "zero");

    // The established subscriber saw nothing extra.
    assert!(s1_rx.try_recv().is_err());
}

#[tokio::test]
async fn default_reducer_is_identity_on_state() {
    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new().spawn();

    let (p_tx, p_rx) = mpsc::channel(8);
    reactor.add_publishers([("p", p_rx)]);
    reactor.start().await;

    p_tx.send(kv("ignored", 1)).await.unwrap();
    time::sleep(Duration::from_millis(50)).await;
    reactor.settle().await;
    assert!(reactor.state().is_empty());
}

#[tokio::test]
async fn installing_a_reducer_takes_effect_for_subsequent_events() {
    let reactor = ReactorBuilder::<MapState, MapState, MapState>::new().spawn();

    let (p_tx, p_rx) = mpsc::channel(8);
    reactor.add_publishers([("p", p_rx)]);
    reactor.start().await;
    reactor.set_reducer(support::merge_reducer).settle().await;

    p_tx.send(kv("kept", 2)).await.unwrap();
    support::wait_until(
        || reactor.state().contains_key("kept"),
        "merge reducer applied",
    )
    .await;
}

#[tokio::test]
async fn full_subscriber_channel_applies_backpressure() {
    let reactor = ReactorBuilder::<MapState, MapState, String>::new()
        .with_emitter(|_old, new| Ok(new.keys().cloned().collect()))
        .with_initializer(|| {
            Ok(MapState::from([
                ("a".to_owned(), 1),
                ("b".to_owned(), 2),
                ("c".to_owned(), 3),
            ]))
        })
        .spawn();

    // Capacity one: the initial emission of three messages cannot complete
    // until the subscriber drains.
    let (s_tx, mut s_rx) = mpsc::channel(1);
    reactor.add_subscribers([("s", s_tx)]);

    let starter_handle = reactor.clone();
    let starter = tokio::spawn(async move {
        starter_handle.start().await;
    });

    time::sleep(Duration::from_millis(50)).await;
    assert!(
        !starter.is_finished(),
        "emission must block on the full subscriber channel"
    );

    assert_eq!(recv_within(&mut s_rx, "first message").await, "a");
    assert_eq!(recv_within(&mut s_rx, "second message").await, "b");
    assert_eq!(recv_within(&mut s_rx, "third message").await, "c");
    starter.await.unwrap();
}
