use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{no_messages_error, Envelope, MessageQueue, WaitOption};
use crate::error::Error;

struct Inflight {
    envelope: Envelope,
}

/// A `VecDeque`-backed queue for tests and single-process/dev runs. Not
/// durable across restarts; `peek` doesn't enforce a visibility timeout
/// because there's only ever one consumer in-process.
pub struct InMemoryMessageQueue {
    ready: Mutex<VecDeque<Envelope>>,
    inflight: Mutex<HashMap<String, Inflight>>,
    poll_interval: Duration,
}

impl InMemoryMessageQueue {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            inflight: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn peek(&self, wait: WaitOption) -> Result<Envelope, Error> {
        loop {
            {
                let mut ready = self.ready.lock().await;
                if let Some(envelope) = ready.pop_front() {
                    let handle = envelope.handle.clone();
                    let out = envelope.clone();
                    self.inflight.lock().await.insert(handle, Inflight { envelope });
                    return Ok(out);
                }
            }

            match wait {
                WaitOption::NoWait => return Err(no_messages_error()),
                WaitOption::Wait => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), Error> {
        self.inflight.lock().await.remove(handle);
        Ok(())
    }

    async fn send(&self, kind: &str, trace_id: &str, body: Value) -> Result<(), Error> {
        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            body,
            trace_id: trace_id.to_string(),
            handle: Uuid::new_v4().to_string(),
        };
        self.ready.lock().await.push_back(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fifo_within_a_single_kind() {
        let q = InMemoryMessageQueue::default();
        q.send("postReport", "t1", json!({"n": 1})).await.expect("send");
        q.send("postReport", "t2", json!({"n": 2})).await.expect("send");

        let first = q.peek(WaitOption::NoWait).await.expect("peek");
        assert_eq!(first.trace_id, "t1");
        q.delete(&first.handle).await.expect("delete");

        let second = q.peek(WaitOption::NoWait).await.expect("peek");
        assert_eq!(second.trace_id, "t2");
    }

    #[tokio::test]
    async fn no_wait_returns_error_when_empty() {
        let q = InMemoryMessageQueue::default();
        let err = q.peek(WaitOption::NoWait).await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
    }

    #[tokio::test]
    async fn peek_is_invisible_until_deleted() {
        let q = InMemoryMessageQueue::default();
        q.send("postReport", "t1", json!({})).await.expect("send");
        let env = q.peek(WaitOption::NoWait).await.expect("peek");
        assert!(q.peek(WaitOption::NoWait).await.is_err());
        q.delete(&env.handle).await.expect("delete");
    }
}
