use std::fmt;

/// The item was not accepted because the queue is closing or gone.
///
/// The rejected item is handed back to the caller.
#[derive(Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("producing on a closed queue")]
pub struct Closed<T>(pub T);

impl<T> Closed<T> {
    /// Returns the item that was not accepted.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Closed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closed").finish_non_exhaustive()
    }
}
