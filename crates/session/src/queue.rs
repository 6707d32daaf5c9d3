//! Priority send queues and their writer workers.
//!
//! Frames are popped while holding the shared writer lock, so delivery is
//! globally ordered: higher priorities first, enqueue order within one
//! priority, regardless of how many workers are configured.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ferryline_wire::frame::write_frame;

use crate::types::Priority;

/// An encoded frame ready for the wire.
pub(crate) struct OutFrame {
    pub flags: u16,
    pub bytes: Vec<u8>,
}

/// The three priority queues of a connection.
pub(crate) struct SendQueues {
    queues: [Mutex<VecDeque<OutFrame>>; 3],
    notify: Notify,
    closed: AtomicBool,
}

impl SendQueues {
    pub fn new() -> Self {
        Self {
            queues: [
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
            ],
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a frame; returns `false` when the queues are closed.
    pub fn push(&self, priority: Priority, frame: OutFrame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.queues[priority.index()]
            .lock()
            .unwrap()
            .push_back(frame);
        self.notify.notify_one();
        true
    }

    /// Pops the highest-priority pending frame.
    pub fn try_pop(&self) -> Option<OutFrame> {
        for queue in &self.queues {
            if let Some(frame) = queue.lock().unwrap().pop_front() {
                return Some(frame);
            }
        }
        None
    }

    /// Waits for the next frame; `None` once closed and drained.
    pub async fn next(&self) -> Option<OutFrame> {
        loop {
            // Register interest before checking, so a concurrent push
            // cannot slip between the check and the await.
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Closes the queues and wakes every waiting worker.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One writer worker. All workers of a connection share `writer`; the frame
/// pop happens under that lock, which is what preserves ordering.
pub(crate) async fn writer_worker<W>(
    queues: std::sync::Arc<SendQueues>,
    writer: std::sync::Arc<tokio::sync::Mutex<W>>,
    cancel: CancellationToken,
    grace: Duration,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => break,
            guard = writer.lock() => guard,
        };

        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                drain(&queues, &mut *guard, grace).await;
                return;
            }
            frame = queues.next() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        if let Err(e) = write_frame(&mut *guard, frame.flags, &frame.bytes).await {
            debug!("send worker stopping: {e}");
            queues.close();
            return;
        }
        trace!(len = frame.bytes.len(), flags = frame.flags, "frame sent");
    }

    // Cancelled while waiting for the writer: another worker drains.
}

/// Flushes whatever is still queued, bounded by the stop grace.
async fn drain<W>(queues: &SendQueues, writer: &mut W, grace: Duration)
where
    W: AsyncWrite + Unpin + Send,
{
    let deadline = tokio::time::Instant::now() + grace;
    while let Some(frame) = queues.try_pop() {
        let write = write_frame(writer, frame.flags, &frame.bytes);
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => {}
            _ => break,
        }
    }
    queues.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(tag: u8) -> OutFrame {
        OutFrame {
            flags: 0,
            bytes: vec![tag],
        }
    }

    #[test]
    fn pop_is_priority_ordered() {
        let queues = SendQueues::new();
        assert!(queues.push(Priority::Low, frame(3)));
        assert!(queues.push(Priority::Normal, frame(2)));
        assert!(queues.push(Priority::High, frame(1)));

        let order: Vec<u8> = std::iter::from_fn(|| queues.try_pop())
            .map(|f| f.bytes[0])
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn same_priority_keeps_enqueue_order() {
        let queues = SendQueues::new();
        for tag in 0..5 {
            queues.push(Priority::Normal, frame(tag));
        }
        let order: Vec<u8> = std::iter::from_fn(|| queues.try_pop())
            .map(|f| f.bytes[0])
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn push_after_close_is_rejected() {
        let queues = SendQueues::new();
        queues.close();
        assert!(!queues.push(Priority::High, frame(0)));
        assert!(queues.try_pop().is_none());
    }

    #[tokio::test]
    async fn next_returns_none_when_closed() {
        let queues = Arc::new(SendQueues::new());
        let waiter = {
            let queues = Arc::clone(&queues);
            tokio::spawn(async move { queues.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queues.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn next_wakes_on_push() {
        let queues = Arc::new(SendQueues::new());
        let waiter = {
            let queues = Arc::clone(&queues);
            tokio::spawn(async move { queues.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queues.push(Priority::Low, frame(9));

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert_eq!(result.unwrap().bytes, vec![9]);
    }

    /// Single high worker drains every priority: H, N, L on the wire.
    #[tokio::test]
    async fn single_worker_serves_priorities_in_order() {
        use ferryline_wire::frame::read_frame;

        let queues = Arc::new(SendQueues::new());
        queues.push(Priority::Low, frame(b'L'));
        queues.push(Priority::Normal, frame(b'N'));
        queues.push(Priority::High, frame(b'H'));

        let buf: Vec<u8> = Vec::new();
        let writer = Arc::new(tokio::sync::Mutex::new(buf));
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(writer_worker(
            Arc::clone(&queues),
            Arc::clone(&writer),
            cancel.clone(),
            Duration::from_secs(1),
        ));

        // Let the worker flush, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        worker.await.unwrap();

        let bytes = writer.lock().await.clone();
        let mut cursor = &bytes[..];
        let mut tags = Vec::new();
        while let Ok((_, payload)) = read_frame(&mut cursor).await {
            tags.push(payload[0]);
        }
        assert_eq!(tags, vec![b'H', b'N', b'L']);
    }
}
