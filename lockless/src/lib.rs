//! An unbounded lock-free MPMC queue with blocking consumers and a safe
//! shutdown.
//!
//! ```
//! let queue = lockless::Queue::new();
//! queue.produce("a");
//! queue.produce("b");
//! assert_eq!(queue.consume(false), Some("a"));
//! assert_eq!(queue.consume(true), Some("b"));
//! assert_eq!(queue.consume(false), None);
//! ```

mod error;
pub use error::Closed;

mod gate;
pub use gate::State;

mod node;

mod queue;
pub use queue::{Handle, Queue, TryIter};

mod wait;

#[test]
fn ping_pong() {
    let (ping, pong) = (Queue::new(), Queue::new());
    std::thread::scope(|cx| {
        cx.spawn(|| {
            while let Some(i) = ping.consume(true) {
                pong.produce(i + 1);
            }
            pong.close();
        });

        for i in 0..10 {
            ping.produce(i * 2);
            assert_eq!(pong.consume(true), Some(i * 2 + 1));
        }
        ping.close();
        assert_eq!(pong.consume(true), None);
    });
}
