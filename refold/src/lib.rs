//! Supervised single-writer reactors.
//!
//! A reactor is an in-process state container that serializes changes from
//! many asynchronous sources, maintains a single authoritative state, and
//! broadcasts change-derived messages to dynamic subscribers. Events arrive
//! on publisher channels and are folded into the state by a caller-supplied
//! reducer; every state transition runs a caller-supplied emitter whose
//! output is fanned out to every subscriber channel. A faulting reducer,
//! emitter, or initializer reboots the reactor under an exponential-backoff
//! budget; once the budget is spent — or the last subscriber leaves — the
//! reactor implodes: channels close and registered destructors run.
//!
//! ```
//! use refold::{Backoff, ReactorBuilder};
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let reactor = ReactorBuilder::<i64, i64, i64>::new()
//!     .with_reducer(|state, signal| Ok(state + signal.event))
//!     .with_emitter(|old, new| Ok(vec![new - old]))
//!     .with_initializer(|| Ok(5))
//!     .with_backoff(Backoff::from_millis([10, 20, 40]))
//!     .spawn();
//!
//! let (event_tx, event_rx) = mpsc::channel(8);
//! let (emit_tx, mut emit_rx) = mpsc::channel(8);
//! reactor
//!     .add_publishers([("ticks", event_rx)])
//!     .add_subscribers([("view", emit_tx)]);
//!
//! // Starting runs the initializer and emits the initial state to every
//! // subscriber attached so far.
//! reactor.start().await;
//! assert_eq!(emit_rx.recv().await, Some(5));
//!
//! event_tx.send(2).await.unwrap();
//! assert_eq!(emit_rx.recv().await, Some(2));
//! assert_eq!(reactor.settle().await.state(), 7);
//! # }
//! ```

pub mod backoff;
pub mod error;
pub mod handle;
pub mod ident;
pub mod record;

mod actor;
mod fanout;
mod pump;
mod reactions;
mod supervisor;

pub use backoff::Backoff;
pub use error::{ReactorError, Result};
pub use handle::{Reactor, ReactorBuilder};
pub use ident::{Ident, ReactorId};
pub use record::{Destructor, Emitter, Initializer, Phase, ReactorView, Reducer, Signal};
