use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Set once the gate starts closing. The remaining bits count passes.
const CLOSING: usize = 1 << (usize::BITS - 1);

/// Lifecycle of a [`Gate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Calls are accepted.
    Open,
    /// New calls are rejected while in-flight calls drain.
    Closing,
    /// No call is accepted or in flight.
    Closed,
}

/// A reference-counted admission gate.
///
/// Every operation holds a [`Pass`] for its whole duration. Once closing has
/// begun, new passes are refused, and the closer can wait until all the
/// granted ones are returned.
pub(crate) struct Gate {
    state: AtomicUsize,
    // Set once the last pass is returned after closing, and never cleared.
    closed: AtomicBool,
    drained: Mutex<()>,
    drained_cv: Condvar,
}

/// Proof of an admitted, in-flight call. Dropping it leaves the gate.
#[must_use]
pub(crate) struct Pass<'a> {
    gate: &'a Gate,
}

impl Gate {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            drained: Mutex::new(()),
            drained_cv: Condvar::new(),
        }
    }

    pub(crate) fn enter(&self) -> Option<Pass<'_>> {
        // Calls after closing never touch the count.
        if self.is_closing() {
            return None;
        }
        // `Acquire` pairs with the `Release` of `close`, so a call admitted
        // before the closing bit is visible is counted by the closer.
        let prev = self.state.fetch_add(1, Ordering::Acquire);
        debug_assert!(prev & !CLOSING < !CLOSING, "too many passes");
        if prev & CLOSING != 0 {
            self.leave();
            return None;
        }
        Some(Pass { gate: self })
    }

    fn leave(&self) {
        // `Release` enforces everything done under the pass to happen before
        // the closer observes the drained gate.
        let prev = self.state.fetch_sub(1, Ordering::Release);
        if prev == CLOSING | 1 {
            self.set_closed();
        }
    }

    fn set_closed(&self) {
        let _guard = self.drained.lock();
        self.closed.store(true, Ordering::Release);
        self.drained_cv.notify_all();
    }

    /// Starts closing. Returns `true` if this call was the one to start it.
    pub(crate) fn close(&self) -> bool {
        let prev = self.state.fetch_or(CLOSING, Ordering::AcqRel);
        if prev & !CLOSING == 0 {
            self.set_closed();
        }
        prev & CLOSING == 0
    }

    /// Blocks until every pass granted before closing is returned.
    pub(crate) fn wait_drained(&self) {
        debug_assert!(self.is_closing(), "waiting on an open gate");
        let mut guard = self.drained.lock();
        while !self.closed.load(Ordering::Acquire) {
            self.drained_cv.wait(&mut guard);
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSING != 0
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.state.load(Ordering::Acquire) & !CLOSING
    }

    pub(crate) fn state(&self) -> State {
        if self.closed.load(Ordering::Acquire) {
            State::Closed
        } else if self.is_closing() {
            State::Closing
        } else {
            State::Open
        }
    }
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn gate_state() {
        let gate = Gate::new();
        assert_eq!(gate.state(), State::Open);

        let pass = gate.enter().unwrap();
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.close());
        assert!(!gate.close());
        assert_eq!(gate.state(), State::Closing);
        assert!(gate.enter().is_none());
        assert_eq!(gate.in_flight(), 1);

        drop(pass);
        assert_eq!(gate.state(), State::Closed);
        gate.wait_drained();

        assert!(gate.enter().is_none());
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.state(), State::Closed);
    }

    #[test]
    fn gate_closed_is_terminal() {
        let gate = Gate::new();
        assert!(gate.close());
        assert_eq!(gate.state(), State::Closed);

        let stop = AtomicBool::new(false);
        std::thread::scope(|cx| {
            for _ in 0..4 {
                cx.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        assert!(gate.enter().is_none());
                    }
                });
            }
            for _ in 0..100_000 {
                assert_eq!(gate.state(), State::Closed);
            }
            stop.store(true, Ordering::Relaxed);
        });
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn gate_close_waits_passes() {
        let gate = Gate::new();
        let (entered, released) = (AtomicBool::new(false), AtomicBool::new(false));
        std::thread::scope(|cx| {
            cx.spawn(|| {
                let pass = gate.enter().unwrap();
                entered.store(true, Ordering::Release);
                std::thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::Release);
                drop(pass);
            });

            while !entered.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
            gate.close();
            gate.wait_drained();
            assert!(released.load(Ordering::Acquire));
            assert_eq!(gate.state(), State::Closed);
        });
    }

    #[test]
    fn gate_threaded() {
        let gate = Gate::new();
        let admitted = AtomicUsize::new(0);
        std::thread::scope(|cx| {
            for _ in 0..4 {
                cx.spawn(|| {
                    while let Some(_pass) = gate.enter() {
                        admitted.fetch_add(1, Ordering::Relaxed);
                        std::thread::yield_now();
                    }
                });
            }

            while admitted.load(Ordering::Relaxed) < 100 {
                std::thread::yield_now();
            }
            gate.close();
            gate.wait_drained();
        });
        assert_eq!(gate.state(), State::Closed);
    }
}
