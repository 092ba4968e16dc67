use std::time::Duration;

/// Reconnect delay: doubles after every failed attempt up to a ceiling.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub const INITIAL: Duration = Duration::from_secs(1);
    pub const MAX: Duration = Duration::from_secs(120);

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}
