//! Hand-off of operator answers to kernel input requests.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Ordered hand-off channel between the presentation layer and one running
/// task: one `put` per operator response, one `get` per prompt observed from
/// the kernel.
///
/// The channel holds a single slot, so puts and gets strictly alternate:
/// there is never more than one outstanding unanswered prompt per runner,
/// and a `get` can never see a stale answer from an earlier exchange.
#[derive(Clone)]
pub struct InputQueue {
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl InputQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        InputQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Called by the presentation layer when the operator types an answer.
    /// Waits if the previous answer has not been consumed yet.
    pub async fn put(&self, answer: String) {
        // The queue holds its own receiver half, so the channel cannot close
        // while self is alive.
        let _ = self.tx.send(answer).await;
    }

    /// Called by the execution bridge; blocks until an answer arrives. This
    /// is the one deliberately unbounded wait in a task's life: it is gated
    /// on a human and happens on the runner, never on the event loop.
    pub async fn get(&self) -> String {
        let mut rx = self.rx.lock().await;
        rx.recv().await.unwrap_or_default()
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        InputQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_then_get() {
        let queue = InputQueue::new();
        queue.put("yes".into()).await;
        assert_eq!(queue.get().await, "yes");
    }

    #[tokio::test]
    async fn test_get_blocks_until_matching_put() {
        let queue = InputQueue::new();

        // Nothing enqueued: the get must still be pending after a grace
        // period...
        let pending = tokio::time::timeout(Duration::from_millis(50), queue.get()).await;
        assert!(pending.is_err(), "get returned without a put");

        // ...and must be released by exactly the answer that is put.
        let getter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put("proceed".into()).await;

        let answer = tokio::time::timeout(Duration::from_secs(1), getter)
            .await
            .expect("get never released")
            .unwrap();
        assert_eq!(answer, "proceed");
    }

    #[tokio::test]
    async fn test_no_stale_answers_across_exchanges() {
        let queue = InputQueue::new();

        queue.put("first".into()).await;
        assert_eq!(queue.get().await, "first");

        // The first exchange is complete; a new get must block again rather
        // than observe anything from the previous round.
        let pending = tokio::time::timeout(Duration::from_millis(50), queue.get()).await;
        assert!(pending.is_err(), "second get saw a stale answer");

        queue.put("second".into()).await;
        assert_eq!(queue.get().await, "second");
    }
}
