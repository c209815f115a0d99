use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::Guard;

use crate::error::Closed;
use crate::gate::{Gate, State};
use crate::node::{Link, Node, same};
use crate::wait::Waiter;

/// An unbounded, lock-free, multi-producer multi-consumer FIFO queue.
///
/// Items live in a singly-linked list anchored at a sentinel node. Producers
/// append with a CAS on the `next` link of the tail, consumers remove with a
/// CAS on the `next` link of the sentinel. Nodes are reference counted, so a
/// thread may keep walking a node that another thread has just unlinked.
///
/// Dropping the queue [closes](Self::close) it.
pub struct Queue<T>(Arc<QueueInner<T>>);

/// A weak reference to a [`Queue`].
///
/// A handle never keeps the queue alive. Once the queue is closed or dropped,
/// every call through the handle is rejected as if the queue were closing.
pub struct Handle<T>(Weak<QueueInner<T>>);

struct QueueInner<T> {
    head: Arc<Node<T>>,
    // Seals the last node while a consumer unlinks it.
    retired: Arc<Node<T>>,
    waiter: Waiter,
    gate: Gate,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self(Arc::new(QueueInner {
            head: Arc::new(Node::sentinel()),
            retired: Arc::new(Node::retired()),
            waiter: Waiter::new(),
            gate: Gate::new(),
        }))
    }

    /// Appends an item to the end of the queue.
    ///
    /// The item is silently dropped if the queue is closing. Use
    /// [`try_produce`](Self::try_produce) to get it back.
    pub fn produce(&self, item: T) {
        _ = self.0.produce(item);
    }

    pub fn try_produce(&self, item: T) -> Result<(), Closed<T>> {
        self.0.produce(item)
    }

    /// Removes the item at the front of the queue.
    ///
    /// If the queue is empty, a non-blocking call returns `None` immediately,
    /// while a blocking call waits for an item. A blocking call returns `None`
    /// only once the queue is closing.
    pub fn consume(&self, blocking: bool) -> Option<T> {
        self.0.consume(blocking)
    }

    /// Returns an iterator that consumes items until the queue is empty.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { queue: self }
    }

    pub fn is_empty(&self) -> bool {
        // A sealed front is already claimed.
        match &*self.0.head.next.load() {
            Some(front) => front.next.load().as_ref().is_some_and(|n| n.is_retired()),
            None => true,
        }
    }

    /// Returns `true` once closing has begun.
    pub fn is_closed(&self) -> bool {
        self.0.gate.is_closing()
    }

    pub fn state(&self) -> State {
        self.0.gate.state()
    }

    /// Closes the queue.
    ///
    /// New calls are rejected, blocked consumers are woken, and this call
    /// returns once every in-flight call has returned. Items left in the queue
    /// are dropped with it.
    pub fn close(&self) {
        self.0.close();
    }

    pub fn handle(&self) -> Handle<T> {
        Handle(Arc::downgrade(&self.0))
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("state", &self.state())
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl<T> Handle<T> {
    pub fn produce(&self, item: T) {
        _ = self.try_produce(item);
    }

    pub fn try_produce(&self, item: T) -> Result<(), Closed<T>> {
        match self.0.upgrade() {
            Some(queue) => queue.produce(item),
            None => Err(Closed(item)),
        }
    }

    pub fn consume(&self, blocking: bool) -> Option<T> {
        self.0.upgrade()?.consume(blocking)
    }

    /// Returns `true` if the queue still accepts calls.
    pub fn is_alive(&self) -> bool {
        self.0.upgrade().is_some_and(|queue| !queue.gate.is_closing())
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Iterator returned by [`Queue::try_iter`].
pub struct TryIter<'a, T> {
    queue: &'a Queue<T>,
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.consume(false)
    }
}

impl<T> QueueInner<T> {
    fn produce(&self, item: T) -> Result<(), Closed<T>> {
        let Some(_pass) = self.gate.enter() else {
            tracing::trace!("rejected an item, queue is closing");
            return Err(Closed(item));
        };

        let prev = self.append(Arc::new(Node::new(item)));
        // Linked right after the sentinel, so the queue was empty.
        if prev.is_sentinel() {
            self.waiter.notify_one();
        }
        Ok(())
    }

    /// Links `node` at the end of the list and returns its predecessor.
    fn append(&self, node: Arc<Node<T>>) -> Arc<Node<T>> {
        'scan: loop {
            let mut tail = self.head.clone();
            while let Some(next) = tail.next.load_full() {
                if next.is_retired() {
                    // `tail` was claimed as the last node, finish its unlink
                    // and start over from the front.
                    self.help_unlink(&tail);
                    continue 'scan;
                }
                tail = next;
            }

            loop {
                let prev = tail
                    .next
                    .compare_and_swap(&None::<Arc<Node<T>>>, Some(node.clone()));
                match Guard::into_inner(prev) {
                    None => return tail,
                    Some(next) if next.is_retired() => {
                        self.help_unlink(&tail);
                        continue 'scan;
                    },
                    // Another producer won, retry on the node it linked.
                    Some(next) => tail = next,
                }
            }
        }
    }

    fn consume(&self, blocking: bool) -> Option<T> {
        let Some(_pass) = self.gate.enter() else {
            tracing::trace!("rejected a consumer, queue is closing");
            return None;
        };

        let mut front = self.head.next.load_full();
        loop {
            if front.is_none() {
                if !blocking {
                    return None;
                }
                self.waiter.wait_until(|| {
                    front = self.head.next.load_full();
                    front.is_some() || self.gate.is_closing()
                });
            }
            // Still empty after waiting only if the queue is closing.
            let node = front.clone()?;

            match self.unlink(&node) {
                Ok(successor) => {
                    if successor.is_some() {
                        // Items appended after an empty queue only signal one
                        // consumer, hand over to the next one.
                        self.waiter.pass_on();
                    }
                    // SAFETY: `node` was claimed by the CAS of this thread,
                    // either on the front link or on its own sealed link.
                    let item = unsafe { node.take() };
                    debug_assert!(item.is_some(), "consumed a node twice");
                    return item;
                },
                Err(observed) => front = observed,
            }
        }
    }

    /// Claims `node`, the front of the list, and unlinks it.
    ///
    /// Returns the new front on success, or the front observed instead if
    /// another consumer claimed `node` first.
    fn unlink(&self, node: &Arc<Node<T>>) -> Result<Link<T>, Link<T>> {
        let next = match node.next.load_full() {
            // The last node is claimed by sealing it, otherwise a producer that
            // still sees it as the tail would append onto a detached node.
            None => {
                let prev = node
                    .next
                    .compare_and_swap(&None::<Arc<Node<T>>>, Some(self.retired.clone()));
                match Guard::into_inner(prev) {
                    None => {
                        self.help_unlink(node);
                        return Ok(None);
                    },
                    next => next,
                }
            },
            next => next,
        };

        match next {
            Some(next) if next.is_retired() => {
                // Claimed by another consumer.
                self.help_unlink(node);
                Err(self.head.next.load_full())
            },
            successor => {
                let expected = Some(node.clone());
                let prev = self
                    .head
                    .next
                    .compare_and_swap(&expected, successor.clone());
                if same(&*prev, &expected) {
                    Ok(successor)
                } else {
                    Err(Guard::into_inner(prev))
                }
            },
        }
    }

    /// Moves the front past a sealed `node`. Any thread may do this, and it
    /// has no effect once `node` is gone.
    fn help_unlink(&self, node: &Arc<Node<T>>) {
        let expected = Some(node.clone());
        self.head
            .next
            .compare_and_swap(&expected, None::<Arc<Node<T>>>);
    }

    fn close(&self) {
        let initiated = self.gate.close();
        if initiated {
            tracing::debug!(in_flight = self.gate.in_flight(), "closing queue");
        }
        self.waiter.notify_all();
        self.gate.wait_drained();
        if initiated {
            tracing::debug!("closed queue");
        }
    }
}
