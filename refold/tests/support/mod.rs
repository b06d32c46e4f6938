#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use refold::Signal;

/// Map-shaped state used across the integration tests.
pub type MapState = BTreeMap<String, i64>;

pub fn kv(key: &str, value: i64) -> MapState {
    BTreeMap::from([(key.to_owned(), value)])
}

/// Reducer that merges the incoming map into the state.
pub fn merge_reducer(mut state: MapState, signal: Signal<MapState>) -> anyhow::Result<MapState> {
    state.extend(signal.event);
    Ok(state)
}

/// Emitter that reports the keys present in the new state but not the old.
pub fn new_keys_emitter(old: &MapState, new: &MapState) -> anyhow::Result<Vec<String>> {
    Ok(new
        .keys()
        .filter(|key| !old.contains_key(*key))
        .cloned()
        .collect())
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub async fn recv_within<T>(rx: &mut mpsc::Receiver<T>, label: &str) -> T {
    time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {label}"))
        .unwrap_or_else(|| panic!("channel closed while waiting for {label}"))
}

pub async fn wait_until<F>(mut condition: F, label: &str)
where
    F: FnMut() -> bool,
{
    time::timeout(Duration::from_secs(2), async {
        while !condition() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {label}"));
}
