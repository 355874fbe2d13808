//! Wall-clock time source for pipeline diagnostics.

use std::time::{Duration, Instant};

use lanefind_pipeline::diagnostics::Clock;

/// [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_does_not_go_backwards() {
        let clock = SystemClock;
        let start = clock.now();
        let first = clock.elapsed(&start);
        let second = clock.elapsed(&start);
        assert!(second >= first);
    }
}
