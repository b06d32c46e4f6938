//! Reboot-delay policies.

use std::fmt;
use std::time::Duration;

/// Lazy sequence of delays between successive reboots.
///
/// The supervisor consumes the sequence head-first, one entry per reboot.
/// Exhaustion is terminal: the reactor implodes instead of rebooting again.
/// Policies may be infinite; nothing in the engine assumes a finite length.
pub struct Backoff {
    delays: Box<dyn Iterator<Item = Duration> + Send + Sync>,
}

impl Backoff {
    /// Backoff over an arbitrary (possibly infinite) delay iterator.
    pub fn from_delays<I>(delays: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
        I::IntoIter: Send + Sync + 'static,
    {
        Self {
            delays: Box::new(delays.into_iter()),
        }
    }

    /// Backoff over explicit millisecond delays.
    pub fn from_millis<I>(millis: I) -> Self
    where
        I: IntoIterator<Item = u64>,
        I::IntoIter: Send + Sync + 'static,
    {
        Self::from_delays(millis.into_iter().map(Duration::from_millis))
    }

    /// Doubling schedule: `base, base*2, base*4, ...` for `steps` entries.
    pub fn exponential(base: Duration, steps: u32) -> Self {
        Self::from_delays((0..steps).map(move |step| base * 2u32.pow(step)))
    }

    /// No reboot budget at all: the first fault implodes the reactor.
    pub fn none() -> Self {
        Self::from_delays(std::iter::empty())
    }

    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        self.delays.next()
    }
}

impl Default for Backoff {
    /// 500 ms doubling to 64 s, eight entries.
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500), 8)
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_from_500ms() {
        let mut backoff = Backoff::default();
        let mut delays = Vec::new();
        while let Some(delay) = backoff.next_delay() {
            delays.push(delay.as_millis() as u64);
        }
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 16000, 32000, 64000]);
    }

    #[test]
    fn none_is_immediately_exhausted() {
        assert!(Backoff::none().next_delay().is_none());
    }

    #[test]
    fn infinite_policies_are_allowed() {
        let mut backoff = Backoff::from_delays(std::iter::repeat(Duration::from_millis(1)));
        for _ in 0..10_000 {
            assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1)));
        }
    }
}
