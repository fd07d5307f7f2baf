//! Dispatch queue between the sessions and the engine thread.
//!
//! Any number of session tasks enqueue without blocking; exactly one
//! consumer, the engine thread, dequeues in arrival order. The consumer
//! half is not `Clone`, so there can only ever be one.

use tokio::sync::mpsc;

use crate::protocol::Frame;

/// A unit of engine-bound work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Work {
    /// A frame received from `source`.
    Frame {
        /// Endpoint of the session the frame arrived on.
        source: String,
        /// The decoded frame.
        frame: Frame,
    },
    /// A session was just registered and should learn the current status.
    Opened {
        /// Endpoint of the new session.
        source: String,
    },
}

/// Producer half, shared by all sessions.
#[derive(Clone)]
pub struct DispatchSender {
    tx: mpsc::UnboundedSender<Work>,
}

impl DispatchSender {
    /// Enqueue a frame tagged with its session.
    ///
    /// Returns `false` once the consumer has gone away.
    pub fn enqueue(&self, source: &str, frame: Frame) -> bool {
        self.push(Work::Frame {
            source: source.to_string(),
            frame,
        })
    }

    /// Announce a newly registered session.
    pub fn opened(&self, source: &str) -> bool {
        self.push(Work::Opened {
            source: source.to_string(),
        })
    }

    fn push(&self, work: Work) -> bool {
        self.tx.send(work).is_ok()
    }
}

/// Consumer half, owned by the engine thread.
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<Work>,
}

impl DispatchReceiver {
    /// Wait for the next item.
    ///
    /// Returns `None` once every producer is dropped and the queue is
    /// drained. Must not be called from inside an async task.
    pub fn dequeue_blocking(&mut self) -> Option<Work> {
        self.rx.blocking_recv()
    }

    /// Take the next item if one is ready.
    pub fn try_dequeue(&mut self) -> Option<Work> {
        self.rx.try_recv().ok()
    }
}

/// Create a dispatch queue.
pub fn dispatch_queue() -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchSender { tx }, DispatchReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{fact_frame, Request};
    use std::thread;

    #[test]
    fn test_fifo_within_one_producer() {
        let (tx, mut rx) = dispatch_queue();
        for i in 0..5 {
            assert!(tx.enqueue("a:1", Request::new(i, "run", "1").to_frame()));
        }
        drop(tx);

        let ids: Vec<_> = std::iter::from_fn(|| rx.dequeue_blocking())
            .map(|work| match work {
                Work::Frame { frame, .. } => frame.id(),
                Work::Opened { .. } => None,
            })
            .collect();
        assert_eq!(ids, (0..5).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_producers_keep_per_session_order() {
        let (tx, mut rx) = dispatch_queue();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    let source = format!("10.0.0.{p}:5000");
                    for i in 0..100u32 {
                        tx.enqueue(&source, Request::new(i, "assert", "(x)").to_frame());
                    }
                })
            })
            .collect();
        drop(tx);
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last: std::collections::HashMap<String, u32> = Default::default();
        let mut count = 0;
        while let Some(Work::Frame { source, frame }) = rx.dequeue_blocking() {
            let id = frame.id().unwrap();
            if let Some(prev) = last.insert(source, id) {
                assert!(id > prev);
            }
            count += 1;
        }
        assert_eq!(count, 400);
    }

    #[test]
    fn test_consumer_blocks_until_work_arrives() {
        let (tx, mut rx) = dispatch_queue();

        let consumer = thread::spawn(move || rx.dequeue_blocking());
        thread::sleep(std::time::Duration::from_millis(20));
        tx.enqueue("a:1", fact_frame("hello").unwrap());

        let work = consumer.join().unwrap();
        assert!(matches!(work, Some(Work::Frame { frame, .. }) if frame.is_fact()));
    }

    #[test]
    fn test_enqueue_after_consumer_dropped() {
        let (tx, rx) = dispatch_queue();
        drop(rx);
        assert!(!tx.opened("a:1"));
    }

    #[test]
    fn test_try_dequeue() {
        let (tx, mut rx) = dispatch_queue();
        assert!(rx.try_dequeue().is_none());
        tx.opened("a:1");
        assert_eq!(
            rx.try_dequeue(),
            Some(Work::Opened {
                source: "a:1".to_string()
            })
        );
    }
}
