use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A manual-reset readiness flag paired with the poll's waker.
///
/// The flag is the state, the waker is the doorbell: `raise` may be
/// called from any thread and the flag stays set until the reactor
/// thread consumes it with `clear`. The shutdown and rebuild signals are
/// two instances sharing the one waker their poll allows.
pub(crate) struct Signal {
    flag: AtomicBool,
    waker: Arc<mio::Waker>,
}

impl Signal {
    pub(crate) fn new(waker: Arc<mio::Waker>) -> Self {
        Self {
            flag: AtomicBool::new(false),
            waker,
        }
    }

    /// Set the flag and kick the blocked wait.
    pub(crate) fn raise(&self) {
        self.flag.store(true, Ordering::Release);
        // a wake failure means the poll is gone and nobody is listening
        let _ = self.waker.wake();
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::time::Duration;

    #[test]
    fn raised_flag_is_sticky_until_cleared() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(mio::Waker::new(poll.registry(), Token(0)).unwrap());
        let signal = Signal::new(waker);

        assert!(!signal.is_raised());
        signal.raise();
        signal.raise();
        assert!(signal.is_raised());
        signal.clear();
        assert!(!signal.is_raised());
    }

    #[test]
    fn raise_wakes_the_poll() {
        let mut poll = Poll::new().unwrap();
        let waker = Arc::new(mio::Waker::new(poll.registry(), Token(0)).unwrap());
        let signal = Signal::new(waker);

        signal.raise();

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|event| event.token() == Token(0)));
    }
}
