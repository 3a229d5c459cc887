use std::os::fd::RawFd;
use std::time::Duration;

use crate::hooks::RemovedSource;
use crate::timer::{TimerId, TimerState};
use crate::{MAX_WAIT_SLOTS, RESERVED_SLOTS};

/// Callback invoked on the reactor thread when its source becomes ready.
pub type Callback = Box<dyn FnMut() + Send + 'static>;

pub(crate) enum SourceKind {
    /// Caller-owned descriptor. The reactor never closes it.
    Fd(RawFd),
    /// Reactor-owned timer schedule.
    Timer(TimerState),
}

pub(crate) struct SourceEntry {
    pub(crate) kind: SourceKind,
    /// Hidden from dispatch once set; erased at the next sweep.
    pub(crate) deleted: bool,
    /// Taken out while a dispatch runs, so the registry lock can be
    /// released around user code.
    pub(crate) callback: Option<Callback>,
}

impl SourceEntry {
    fn new(kind: SourceKind, callback: Callback) -> Self {
        Self {
            kind,
            deleted: false,
            callback: Some(callback),
        }
    }

    pub(crate) fn timer(&self) -> Option<&TimerState> {
        match &self.kind {
            SourceKind::Timer(timer) => Some(timer),
            SourceKind::Fd(_) => None,
        }
    }

    pub(crate) fn removed_source(&self) -> RemovedSource {
        match &self.kind {
            SourceKind::Fd(fd) => RemovedSource::Fd(*fd),
            SourceKind::Timer(timer) => RemovedSource::Timer(timer.id),
        }
    }
}

/// Insertion-ordered set of registered sources.
///
/// Positions map to wait slots (offset by the reserved ones), so entries
/// are never erased in place: removal marks them and `sweep`, run only by
/// the reactor thread, erases. Always accessed under the reactor's
/// registry mutex.
pub(crate) struct Registry {
    pub(crate) entries: Vec<SourceEntry>,
    next_timer_id: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_timer_id: 1,
        }
    }

    fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.deleted).count()
    }

    /// Marked entries keep a snapshot slot until the next sweep, so the
    /// limit is checked against live entries only; live plus marked still
    /// fits the wait set.
    fn has_free_slot(&self) -> bool {
        self.live_count() < MAX_WAIT_SLOTS - RESERVED_SLOTS
    }

    pub(crate) fn add_fd(&mut self, fd: RawFd, callback: Callback) -> bool {
        if !self.has_free_slot() {
            return false;
        }
        self.entries.push(SourceEntry::new(SourceKind::Fd(fd), callback));
        true
    }

    pub(crate) fn add_timer(
        &mut self,
        interval: Duration,
        repeat: bool,
        callback: Callback,
    ) -> Option<TimerId> {
        if !self.has_free_slot() {
            return None;
        }
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        let timer = TimerState::new(id, interval, repeat);
        self.entries
            .push(SourceEntry::new(SourceKind::Timer(timer), callback));
        Some(id)
    }

    /// Mark the first live entry registered for `fd`.
    pub(crate) fn mark_fd(&mut self, fd: RawFd) -> bool {
        for entry in &mut self.entries {
            if entry.deleted {
                continue;
            }
            if matches!(entry.kind, SourceKind::Fd(f) if f == fd) {
                entry.deleted = true;
                return true;
            }
        }
        false
    }

    pub(crate) fn mark_timer(&mut self, id: TimerId) -> bool {
        for entry in &mut self.entries {
            if entry.deleted {
                continue;
            }
            if entry.timer().map_or(false, |timer| timer.id == id) {
                entry.deleted = true;
                return true;
            }
        }
        false
    }

    /// Re-arm an existing timer in place. Entries already marked for
    /// deletion lost the race and are left alone.
    pub(crate) fn adjust_timer(&mut self, id: TimerId, interval: Duration, repeat: bool) -> bool {
        for entry in &mut self.entries {
            if entry.deleted {
                continue;
            }
            if let SourceKind::Timer(ref mut timer) = entry.kind {
                if timer.id == id {
                    timer.reschedule(interval, repeat);
                    return true;
                }
            }
        }
        false
    }

    /// Erase every marked entry, handing them back in registration order
    /// for removal notification.
    pub(crate) fn sweep(&mut self) -> Vec<SourceEntry> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.deleted);
        self.entries = kept;
        removed
    }

    /// Hand back every entry, marked or not, for teardown.
    pub(crate) fn drain_all(&mut self) -> Vec<SourceEntry> {
        std::mem::take(&mut self.entries)
    }
}
