use std::os::fd::RawFd;

use crate::reactor::ReactorHandle;
use crate::timer::TimerId;

/// Identifies the source a removal notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovedSource {
    /// A caller-owned descriptor. Safe to close once this has fired.
    Fd(RawFd),
    /// A reactor-owned timer. Most consumers ignore these.
    Timer(TimerId),
}

/// Lifecycle notifications, invoked on the reactor thread.
///
/// The one exception: removals performed by a final [`stop`] run on the
/// stopping thread, after the reactor thread has already exited.
///
/// [`stop`]: crate::Reactor::stop
pub trait ReactorHooks: Send {
    /// Runs before the first wait. A good place to register initial
    /// sources.
    fn on_loop_start(&mut self, reactor: &ReactorHandle) {
        let _ = reactor;
    }

    /// Runs after the loop has exited; `graceful` is false when the loop
    /// died on an error instead of an explicit shutdown.
    fn on_loop_end(&mut self, graceful: bool) {
        let _ = graceful;
    }

    /// Runs once a removed source has left the wait set for good.
    fn on_source_removed(&mut self, source: RemovedSource) {
        let _ = source;
    }
}

/// The default: no hooks.
pub(crate) struct NoHooks;

impl ReactorHooks for NoHooks {}
