use parking_lot::{Condvar, Mutex};

/// Parks consumers while there is no data.
///
/// The mutex guards the wait/notify handshake only. A waiter re-checks its
/// condition under the lock before each wait, so every notifier that changes
/// the condition must take the same lock before signalling.
pub(crate) struct Waiter {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Waiter {
    pub(crate) const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Blocks until `ready` returns `true`. Spurious wakeups are absorbed by
    /// checking again.
    pub(crate) fn wait_until(&self, mut ready: impl FnMut() -> bool) {
        let mut guard = self.lock.lock();
        while !ready() {
            self.cv.wait(&mut guard);
        }
    }

    /// Wakes one waiter after a change of its condition.
    pub(crate) fn notify_one(&self) {
        let _guard = self.lock.lock();
        if self.cv.notify_one() {
            tracing::trace!("woke a consumer");
        }
    }

    /// Wakes one more waiter without synchronizing with the waiters.
    ///
    /// Only valid when the condition was already signalled by
    /// [`notify_one`](Self::notify_one) and is known to still hold.
    pub(crate) fn pass_on(&self) {
        self.cv.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.lock.lock();
        let woken = self.cv.notify_all();
        tracing::trace!("woke {woken} consumers");
    }
}
