use std::io;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::hooks::{NoHooks, ReactorHooks};
use crate::registry::{Registry, SourceKind};
use crate::signal::Signal;
use crate::timer::TimerId;
use crate::{MAX_WAIT_SLOTS, RESERVED_SLOTS};

/// Slots 0 and 1 belong to the shutdown and rebuild signals; both ring
/// the poll's waker. User sources start at slot 2.
const WAKER_TOKEN: Token = Token(0);
const FIRST_SOURCE_SLOT: usize = RESERVED_SLOTS;

struct Shared {
    registry: Mutex<Registry>,
    shutdown: Signal,
    rebuild: Signal,
    hooks: Mutex<Box<dyn ReactorHooks>>,
    worker: Mutex<Option<Thread>>,
}

/// Cloneable registration surface of a [`Reactor`].
///
/// Handles are safe to use from any thread, including from inside
/// callbacks running on the reactor thread: every method here commits
/// its change under a short critical section and raises the rebuild
/// signal, never blocking on the reactor itself.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Register a caller-owned descriptor. `callback` runs on the
    /// reactor thread whenever `fd` becomes readable, and must drain the
    /// descriptor (read until `WouldBlock`) before returning.
    ///
    /// Returns false when all wait slots are taken. The reactor borrows
    /// `fd` from now until the removal notification fires; it never
    /// closes it.
    pub fn add_fd(&self, fd: RawFd, callback: impl FnMut() + Send + 'static) -> bool {
        let mut registry = self.shared.registry.lock();
        if !registry.add_fd(fd, Box::new(callback)) {
            return false;
        }
        self.shared.rebuild.raise();
        true
    }

    /// Soft-remove the first source registered for `fd`. The entry is
    /// erased on the reactor thread at the next rebuild, at which point
    /// [`ReactorHooks::on_source_removed`] fires and the caller may
    /// close the descriptor.
    pub fn remove_fd(&self, fd: RawFd) {
        let mut registry = self.shared.registry.lock();
        if registry.mark_fd(fd) {
            self.shared.rebuild.raise();
        }
    }

    /// Schedule `callback` to run after `interval`, and every `interval`
    /// after that when `repeat` is set. Millisecond granularity is all
    /// the loop guarantees. Returns `None` when all wait slots are
    /// taken.
    pub fn add_timer(
        &self,
        interval: Duration,
        repeat: bool,
        callback: impl FnMut() + Send + 'static,
    ) -> Option<TimerId> {
        let mut registry = self.shared.registry.lock();
        let id = registry.add_timer(interval, repeat, Box::new(callback))?;
        self.shared.rebuild.raise();
        Some(id)
    }

    /// Soft-remove a timer. Unknown ids are ignored: one-shot timers
    /// remove themselves after firing, so callers routinely lose this
    /// race.
    pub fn remove_timer(&self, id: TimerId) {
        let mut registry = self.shared.registry.lock();
        if registry.mark_timer(id) {
            self.shared.rebuild.raise();
        }
    }

    /// Re-arm a timer with a new interval and repeat flag, keeping its
    /// id. Ignored when the id is unknown or the timer is already marked
    /// for removal.
    pub fn adjust_timer(&self, id: TimerId, interval: Duration, repeat: bool) {
        let mut registry = self.shared.registry.lock();
        if registry.adjust_timer(id, interval, repeat) {
            // the blocked wait may have been computed from the old
            // deadline; force a recompute
            self.shared.rebuild.raise();
        }
    }

    /// Identity of the reactor thread, for inspection only. `None`
    /// before the first `start`.
    pub fn thread(&self) -> Option<Thread> {
        self.shared.worker.lock().clone()
    }
}

/// The reactor: one dedicated thread multiplexing registered fd sources
/// and timers onto a single blocking wait.
///
/// Dropping the reactor stops the loop and tears the registry down, so
/// no callback outlives the value.
pub struct Reactor {
    handle: ReactorHandle,
    poll: Mutex<Option<Poll>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Self::with_hooks(NoHooks)
    }

    /// Build a reactor with consumer lifecycle hooks.
    pub fn with_hooks(hooks: impl ReactorHooks + 'static) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKER_TOKEN)?);

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new()),
            shutdown: Signal::new(Arc::clone(&waker)),
            rebuild: Signal::new(waker),
            hooks: Mutex::new(Box::new(hooks)),
            worker: Mutex::new(None),
        });

        Ok(Self {
            handle: ReactorHandle { shared },
            poll: Mutex::new(Some(poll)),
            worker: Mutex::new(None),
        })
    }

    /// A cheap handle carrying the registration API, for callbacks and
    /// other threads.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Spawn the reactor thread. Fails when the OS refuses the thread,
    /// when the reactor is already running, or after a `stop` (a stopped
    /// reactor stays stopped).
    pub fn start(&self) -> io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "reactor already started",
            ));
        }
        let poll = self
            .poll
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "reactor cannot be restarted"))?;

        let shared = Arc::clone(&self.handle.shared);
        let join = thread::Builder::new()
            .name("eventmux-reactor".into())
            .spawn(move || Worker::new(shared, poll).run())?;

        *self.handle.shared.worker.lock() = Some(join.thread().clone());
        *worker = Some(join);
        Ok(())
    }

    /// Raise the shutdown signal, wait for the reactor thread to exit,
    /// then drop every remaining source, notifying the removal hook for
    /// each (callbacks are not invoked). Idempotent.
    ///
    /// Calling this from a callback on the reactor thread only raises
    /// the signal; the loop exits once the callback returns, and the
    /// owner still has to stop (or drop) the reactor to tear it down.
    pub fn stop(&self) {
        self.handle.shared.shutdown.raise();

        let join = { self.worker.lock().take() };
        if let Some(join) = join {
            if thread::current().id() == join.thread().id() {
                warn!("stop called on the reactor thread; deferring join to the owner");
                *self.worker.lock() = Some(join);
                return;
            }
            if join.join().is_err() {
                error!("reactor thread panicked");
            }
            *self.handle.shared.worker.lock() = None;
        }

        let removed = { self.handle.shared.registry.lock().drain_all() };
        if removed.is_empty() {
            return;
        }
        let mut hooks = self.handle.shared.hooks.lock();
        for entry in &removed {
            hooks.on_source_removed(entry.removed_source());
        }
    }

    /// See [`ReactorHandle::add_fd`].
    pub fn add_fd(&self, fd: RawFd, callback: impl FnMut() + Send + 'static) -> bool {
        self.handle.add_fd(fd, callback)
    }

    /// See [`ReactorHandle::remove_fd`].
    pub fn remove_fd(&self, fd: RawFd) {
        self.handle.remove_fd(fd);
    }

    /// See [`ReactorHandle::add_timer`].
    pub fn add_timer(
        &self,
        interval: Duration,
        repeat: bool,
        callback: impl FnMut() + Send + 'static,
    ) -> Option<TimerId> {
        self.handle.add_timer(interval, repeat, callback)
    }

    /// See [`ReactorHandle::remove_timer`].
    pub fn remove_timer(&self, id: TimerId) {
        self.handle.remove_timer(id);
    }

    /// See [`ReactorHandle::adjust_timer`].
    pub fn adjust_timer(&self, id: TimerId, interval: Duration, repeat: bool) {
        self.handle.adjust_timer(id, interval, repeat);
    }

    /// See [`ReactorHandle::thread`].
    pub fn thread(&self) -> Option<Thread> {
        self.handle.thread()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the reactor thread: the poll, its event buffer, and
/// the fd registered for each slot of the current snapshot.
struct Worker {
    shared: Arc<Shared>,
    poll: Poll,
    events: Events,
    slots: Vec<Option<RawFd>>,
}

impl Worker {
    fn new(shared: Arc<Shared>, poll: Poll) -> Self {
        Self {
            shared,
            poll,
            events: Events::with_capacity(MAX_WAIT_SLOTS),
            slots: Vec::new(),
        }
    }

    fn run(mut self) {
        let handle = ReactorHandle {
            shared: Arc::clone(&self.shared),
        };

        // the loop body is guarded so that a misbehaving callback still
        // reaches the end-of-loop notification
        let graceful = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.shared.hooks.lock().on_loop_start(&handle);
            self.turn()
        })) {
            Ok(graceful) => graceful,
            Err(_) => {
                error!("reactor loop aborted by a panic");
                false
            }
        };
        debug!(graceful, "reactor loop exited");

        self.shared.hooks.lock().on_loop_end(graceful);
    }

    /// The dispatch loop. Returns whether the exit was graceful.
    fn turn(&mut self) -> bool {
        self.rebuild();

        loop {
            if self.shared.shutdown.is_raised() {
                return true;
            }
            if self.shared.rebuild.is_raised() {
                self.rebuild();
                continue;
            }

            let timeout = self.next_timeout();
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(%err, "multiplex wait failed");
                    return false;
                }
            }

            // the ready set for this wake: poll events plus due timers,
            // lowest slot first so insertion order breaks ties
            let mut ready: Vec<usize> = self
                .events
                .iter()
                .map(|event| event.token().0)
                .filter(|&slot| slot >= FIRST_SOURCE_SLOT)
                .collect();
            self.collect_due_timers(&mut ready);
            ready.sort_unstable();
            ready.dedup();

            for slot in ready {
                // shutdown and rebuild outrank every user source
                if self.shared.shutdown.is_raised() {
                    return true;
                }
                if self.shared.rebuild.is_raised() {
                    // the snapshot is stale; re-registering re-arms any
                    // source still pending, so nothing is lost
                    break;
                }
                self.dispatch(slot);
            }
        }
    }

    /// The wait is bounded by the earliest live timer deadline in the
    /// current snapshot, or unbounded when there is none.
    fn next_timeout(&self) -> Option<Duration> {
        let registry = self.shared.registry.lock();
        let visible = self.slots.len().min(registry.entries.len());
        registry.entries[..visible]
            .iter()
            .filter(|entry| !entry.deleted)
            .filter_map(|entry| entry.timer().map(|timer| timer.deadline))
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn collect_due_timers(&self, ready: &mut Vec<usize>) {
        let now = Instant::now();
        let registry = self.shared.registry.lock();
        let visible = self.slots.len().min(registry.entries.len());
        for (idx, entry) in registry.entries[..visible].iter().enumerate() {
            if entry.deleted {
                continue;
            }
            if entry.timer().map_or(false, |timer| timer.is_due(now)) {
                ready.push(FIRST_SOURCE_SLOT + idx);
            }
        }
    }

    /// Sweep-and-snapshot: erase marked entries, then register the live
    /// set as slots 2.. in registration order. Re-adding a still-ready
    /// fd re-arms it, so a source preempted by a higher-priority wake is
    /// reported again on the next poll.
    fn rebuild(&mut self) {
        for fd in self.slots.drain(..).flatten() {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }

        let removed = {
            let mut registry = self.shared.registry.lock();
            let removed = registry.sweep();

            debug_assert!(registry.entries.len() <= MAX_WAIT_SLOTS - RESERVED_SLOTS);

            for (idx, entry) in registry.entries.iter().enumerate() {
                let slot = match entry.kind {
                    SourceKind::Fd(fd) => {
                        let token = Token(FIRST_SOURCE_SLOT + idx);
                        match self
                            .poll
                            .registry()
                            .register(&mut SourceFd(&fd), token, Interest::READABLE)
                        {
                            Ok(()) => Some(fd),
                            Err(err) => {
                                warn!(fd, %err, "cannot register wait fd; the source will not fire");
                                None
                            }
                        }
                    }
                    SourceKind::Timer(_) => None,
                };
                self.slots.push(slot);
            }

            // the reset has to follow the copy: a mutation committed
            // before it is in the new snapshot, one committed after it
            // raises the signal again
            self.shared.rebuild.clear();
            removed
        };

        if removed.is_empty() {
            return;
        }
        let mut hooks = self.shared.hooks.lock();
        for entry in &removed {
            hooks.on_source_removed(entry.removed_source());
        }
    }

    /// Invoke the callback of the entry behind `slot`, skipping entries
    /// that lost a race with removal or rescheduling since the wait
    /// returned. The registry lock is released while user code runs, so
    /// a callback may re-enter the registration API freely.
    fn dispatch(&mut self, slot: usize) {
        let idx = slot - FIRST_SOURCE_SLOT;
        let now = Instant::now();

        let mut callback = {
            let mut registry = self.shared.registry.lock();
            let entry = match registry.entries.get_mut(idx) {
                Some(entry) => entry,
                None => return,
            };
            if entry.deleted {
                return;
            }
            if entry.timer().map_or(false, |timer| !timer.is_due(now)) {
                return;
            }
            match entry.callback.take() {
                Some(callback) => callback,
                None => return,
            }
        };

        callback();

        let mut registry = self.shared.registry.lock();
        let entry = match registry.entries.get_mut(idx) {
            Some(entry) => entry,
            None => return,
        };
        entry.callback = Some(callback);

        if entry.deleted {
            return;
        }
        if let SourceKind::Timer(ref mut timer) = entry.kind {
            if timer.repeat {
                timer.rearm();
            } else {
                // one-shot: hide from dispatch and let the next sweep
                // erase the entry
                entry.deleted = true;
                self.shared.rebuild.raise();
            }
        }
    }
}
