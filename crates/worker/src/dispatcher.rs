//! Routes envelopes peeked off the queue to the worker pool registered for
//! their kind. Grounded on `interfaces/mq/dispatcher.go`'s
//! `messageDispatcher`: one poller forwards each message to the channel of
//! the worker registered for its kind; N worker tasks per kind each delete
//! (ack) the message before calling the handler, so a panic mid-handle
//! never causes redelivery of that message.

use std::collections::HashMap;
use std::sync::Arc;

use reportbot_shared::activity::ActivityInfo;
use reportbot_shared::queue::{is_no_messages, Envelope, MessageQueue, WaitOption};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use crate::worker_trait::Worker;

struct RegistryEntry {
    worker: Arc<dyn Worker>,
    sender: mpsc::Sender<Envelope>,
    receiver: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

pub struct MessageDispatcher {
    registry: HashMap<String, RegistryEntry>,
    queue: Arc<dyn MessageQueue>,
    concurrency_level: usize,
}

impl MessageDispatcher {
    pub fn new(queue: Arc<dyn MessageQueue>, concurrency_level: usize) -> Self {
        Self {
            registry: HashMap::new(),
            queue,
            concurrency_level,
        }
    }

    pub fn register_worker(&mut self, worker: Arc<dyn Worker>) -> anyhow::Result<()> {
        for kind in worker.supported_messages() {
            if self.registry.contains_key(kind) {
                anyhow::bail!("a worker is already registered for {kind}");
            }
            // Unbuffered: the poller blocks handing a message off until some
            // worker in this kind's pool is free to receive it.
            let (sender, receiver) = mpsc::channel(1);
            self.registry.insert(
                kind.to_string(),
                RegistryEntry {
                    worker: worker.clone(),
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                },
            );
        }
        Ok(())
    }

    /// Spawns the poller and every kind's worker pool onto `tasks`. Callers
    /// await `tasks` (e.g. via `while tasks.join_next().await.is_some() {}`)
    /// to block until shutdown completes.
    pub fn start(&self, tasks: &mut JoinSet<()>, cancel: CancellationToken) {
        let senders: HashMap<String, mpsc::Sender<Envelope>> = self
            .registry
            .iter()
            .map(|(k, e)| (k.clone(), e.sender.clone()))
            .collect();

        let queue = self.queue.clone();
        let poll_cancel = cancel.clone();
        tasks.spawn(async move {
            poll(queue, senders, poll_cancel).await;
        });

        for (kind, entry) in &self.registry {
            for worker_id in 0..self.concurrency_level {
                let kind = kind.clone();
                let worker = entry.worker.clone();
                let receiver = entry.receiver.clone();
                let queue = self.queue.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    run_worker(kind, worker_id, worker, receiver, queue, cancel).await;
                });
            }
        }
    }
}

async fn poll(
    queue: Arc<dyn MessageQueue>,
    senders: HashMap<String, mpsc::Sender<Envelope>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            peeked = queue.peek(WaitOption::Wait) => match peeked {
                Ok(e) => e,
                Err(e) => {
                    if !is_no_messages(&e) {
                        debug!(error = %e, "couldn't receive message");
                    }
                    continue;
                }
            },
        };

        let Some(sender) = senders.get(&envelope.kind) else {
            error!(kind = %envelope.kind, message_id = %envelope.id, "no suitable worker");
            if let Err(e) = queue.delete(&envelope.handle).await {
                error!(error = %e, "couldn't delete message");
            }
            continue;
        };

        // Every worker sharing this kind's receiver has exited — nothing
        // left to hand messages of this kind to.
        if sender.send(envelope).await.is_err() {
            return;
        }
    }
}

async fn run_worker(
    kind: String,
    worker_id: usize,
    worker: Arc<dyn Worker>,
    receiver: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    queue: Arc<dyn MessageQueue>,
    cancel: CancellationToken,
) {
    debug!(%kind, worker_id, "started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            received = async { receiver.lock().await.recv().await } => match received {
                Some(e) => e,
                None => return,
            },
        };

        let message_id = envelope.id.clone();
        let activity = ActivityInfo::new(envelope.trace_id.clone(), envelope.kind.clone());
        let span = info_span!("handle_message", trace_id = activity.trace_id(), message_kind = %envelope.kind);

        async {
            if let Err(e) = queue.delete(&envelope.handle).await {
                error!(error = %e, %message_id, "couldn't delete message");
            }

            if let Err(e) = worker.handle(&envelope).await {
                error!(error = %e, %message_id, "couldn't handle message");
            }
        }
        .instrument(span)
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reportbot_shared::queue::InMemoryMessageQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingWorker {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn supported_messages(&self) -> Vec<&'static str> {
            vec!["postReport"]
        }

        async fn handle(&self, _envelope: &Envelope) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn registering_the_same_kind_twice_fails() {
        let queue = Arc::new(InMemoryMessageQueue::default());
        let mut dispatcher = MessageDispatcher::new(queue, 1);
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher
            .register_worker(Arc::new(CountingWorker { count: count.clone() }))
            .unwrap();
        let err = dispatcher
            .register_worker(Arc::new(CountingWorker { count }))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn dispatches_a_message_to_its_registered_worker() {
        let queue = Arc::new(InMemoryMessageQueue::default());
        let mut dispatcher = MessageDispatcher::new(queue.clone(), 1);
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher
            .register_worker(Arc::new(CountingWorker { count: count.clone() }))
            .unwrap();

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        dispatcher.start(&mut tasks, cancel.clone());

        queue.send("postReport", "trace-1", serde_json::json!({})).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker never handled the message");

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }
}
