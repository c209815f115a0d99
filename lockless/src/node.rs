use std::cell::UnsafeCell;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// A shared reference to the following node, or `None` at the tail.
pub(crate) type Link<T> = Option<Arc<Node<T>>>;

/// A cell of the linked list.
///
/// Apart from the item slot, which is emptied exactly once by the consumer
/// that unlinked the node, a node is immutable after construction. Its
/// `next` link starts empty and is written exactly once, either to the
/// appended successor or to the queue's [`Retired`](Slot::Retired) marker.
pub(crate) struct Node<T> {
    slot: Slot<T>,
    pub(crate) next: ArcSwapOption<Node<T>>,
}

enum Slot<T> {
    /// The permanent anchor at the front of a queue.
    Sentinel,
    /// Marks the `next` link of a node that is being unlinked as the last
    /// node of a queue. It is never linked as a successor.
    Retired,
    Item(UnsafeCell<Option<T>>),
}

// SAFETY: The item is only accessed through `take`, whose caller guarantees
// exclusive access. All other fields are thread-safe.
unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Node<T> {
    pub(crate) fn sentinel() -> Self {
        Self::with_slot(Slot::Sentinel)
    }

    pub(crate) fn retired() -> Self {
        Self::with_slot(Slot::Retired)
    }

    pub(crate) fn new(item: T) -> Self {
        Self::with_slot(Slot::Item(UnsafeCell::new(Some(item))))
    }

    fn with_slot(slot: Slot<T>) -> Self {
        Self {
            slot,
            next: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        matches!(self.slot, Slot::Sentinel)
    }

    pub(crate) fn is_retired(&self) -> bool {
        matches!(self.slot, Slot::Retired)
    }

    /// Moves the item out of this node.
    ///
    /// # Safety
    ///
    /// The caller must be the only thread that ever calls this method on this
    /// node, i.e. the consumer whose CAS unlinked it from the queue.
    pub(crate) unsafe fn take(&self) -> Option<T> {
        match &self.slot {
            // SAFETY: Exclusive access is guaranteed by the caller.
            Slot::Item(item) => unsafe { (*item.get()).take() },
            Slot::Sentinel | Slot::Retired => None,
        }
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        // Release the chain iteratively. Dropping it recursively overflows
        // the stack once a few hundred thousand nodes are linked.
        let mut next = self.next.swap(None);
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(node) => next = node.next.swap(None),
                // Still owned by the queue or by another snapshot.
                Err(_) => break,
            }
        }
    }
}

/// Whether both links refer to the same node.
pub(crate) fn same<T>(a: &Link<T>, b: &Link<T>) -> bool {
    a.as_ref().map(Arc::as_ptr) == b.as_ref().map(Arc::as_ptr)
}
