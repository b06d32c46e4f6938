//! Property-based tests over the fold and supervision invariants.

use proptest::prelude::*;

use refold::{Backoff, Phase, ReactorBuilder};

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Updates submitted from one caller fold in submission order: the final
    /// state equals the sequential fold of the submitted deltas.
    #[test]
    fn updates_fold_in_submission_order(deltas in prop::collection::vec(-100i64..=100, 1..40)) {
        let expected: i64 = deltas.iter().sum();
        let runtime = current_thread_runtime();
        let observed = runtime.block_on(async {
            let reactor = ReactorBuilder::<i64, i64, i64>::new().spawn();
            reactor.start().await;
            for delta in &deltas {
                let delta = *delta;
                reactor.update(move |state| state + delta);
            }
            reactor.settle().await;
            reactor.state()
        });
        prop_assert_eq!(observed, expected);
    }

    /// A backoff of length `n` buys at most `n` reboots before implosion.
    #[test]
    fn reboot_budget_bounds_restarts(budget in 0usize..5) {
        let runtime = current_thread_runtime();
        let (restarts, phase) = runtime.block_on(async {
            let reactor = ReactorBuilder::<i64, i64, i64>::new()
                .with_initializer(|| anyhow::bail!("always down"))
                .with_backoff(Backoff::from_millis(vec![1u64; budget]))
                .spawn();
            reactor.start().await;
            (reactor.restarts(), reactor.phase())
        });
        prop_assert_eq!(phase, Phase::Imploded);
        prop_assert_eq!(restarts, budget as u32);
    }

    /// Mixing the fast and blocking lanes never reorders a caller's updates.
    #[test]
    fn lanes_preserve_submission_order(blocking_mask in prop::collection::vec(any::<bool>(), 1..24)) {
        let runtime = current_thread_runtime();
        let observed = runtime.block_on(async {
            let reactor = ReactorBuilder::<Vec<usize>, i64, i64>::new().spawn();
            reactor.start().await;
            for (index, blocking) in blocking_mask.iter().enumerate() {
                if *blocking {
                    reactor.update_blocking(move |mut state| {
                        state.push(index);
                        Ok(state)
                    });
                } else {
                    reactor.update(move |mut state| {
                        state.push(index);
                        state
                    });
                }
            }
            reactor.settle().await;
            reactor.state()
        });
        let expected: Vec<usize> = (0..blocking_mask.len()).collect();
        prop_assert_eq!(observed, expected);
    }
}
