//! Fault taxonomy of the reactor engine.

use thiserror::Error;

/// Faults that take a reactor through the supervision path.
///
/// None of these surface synchronously to callers of enqueue operations;
/// they are logged and answered with a reboot (or, once the backoff budget is
/// spent, an implosion).
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The installed reducer raised while folding a publisher event.
    #[error("reducer failed")]
    Reducer(#[source] anyhow::Error),

    /// The installed initializer raised during start or reboot.
    #[error("initializer failed")]
    Initializer(#[source] anyhow::Error),

    /// The installed emitter raised inside a watch reaction.
    #[error("emitter failed")]
    Emitter(#[source] anyhow::Error),

    /// A caller-supplied blocking update raised.
    #[error("blocking update failed")]
    Update(#[source] anyhow::Error),

    /// A caller-supplied function panicked instead of returning an error.
    #[error("action panicked: {0}")]
    ActionPanicked(String),

    /// A caller asked for a reboot; not an error in itself.
    #[error("reboot requested")]
    RebootRequested,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ReactorError>;
