//! A waitable-event reactor: one dedicated thread multiplexes a dynamic
//! set of readiness sources (caller-owned file descriptors and
//! reactor-owned timers) onto a single blocking wait, and runs the
//! registered callback for whichever source fires.
//!
//! Registration is callable from any thread at any time. Mutations are
//! committed under a short critical section and flagged through a
//! rebuild signal; the reactor wakes, recomputes its wait set, and
//! carries on. Removal is a soft mark: the entry disappears from
//! dispatch immediately and is erased on the reactor thread at the next
//! rebuild, at which point [`ReactorHooks::on_source_removed`] tells the
//! consumer its descriptor is safe to close.
//!
//! Callbacks are serialized: at most one runs at any time, always on the
//! reactor thread. A callback may call any registration method on a
//! [`ReactorHandle`] it captured, but must not call [`Reactor::stop`],
//! and must drain its descriptor before returning so the source goes
//! non-ready again.
//!
//! ```
//! use std::time::Duration;
//!
//! let reactor = eventmux::Reactor::new()?;
//! reactor.start()?;
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! reactor
//!     .add_timer(Duration::from_millis(10), false, move || {
//!         let _ = tx.send(());
//!     })
//!     .expect("a wait slot is free");
//! rx.recv_timeout(Duration::from_secs(1)).expect("timer fired");
//!
//! reactor.stop();
//! # Ok::<(), std::io::Error>(())
//! ```

mod hooks;
mod reactor;
mod registry;
mod signal;
mod timer;

pub use hooks::{ReactorHooks, RemovedSource};
pub use reactor::{Reactor, ReactorHandle};
pub use registry::Callback;
pub use timer::TimerId;

/// Capacity of the wait set, including the two reserved signal slots.
pub const MAX_WAIT_SLOTS: usize = 64;

/// Slots 0 and 1 are taken by the shutdown and rebuild signals.
pub(crate) const RESERVED_SLOTS: usize = 2;
