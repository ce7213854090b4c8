pub mod memory_queue;
pub mod messages;
pub mod redis_queue;

pub use memory_queue::InMemoryMessageQueue;
pub use redis_queue::RedisMessageQueue;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;

/// Controls whether `peek` blocks when the queue is momentarily empty.
/// `Wait` is what the dispatcher's poller uses in steady state; `NoWait`
/// is for one-shot drains (tests, admin tooling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOption {
    NoWait,
    Wait,
}

/// A message & its delivery metadata. `handle` is the backend-specific
/// receipt needed to delete (acknowledge) the message; it is never
/// serialized into the message body.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: String,
    pub kind: String,
    pub body: Value,
    pub trace_id: String,
    pub handle: String,
}

impl Envelope {
    /// Deserializes `body` into a concrete message type.
    pub fn unpack<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.body.clone()).map_err(Error::from)
    }
}

/// A message queue backend. At-least-once delivery: `peek` hands back a
/// message without removing it, the caller processes it, and only a
/// successful `delete` acknowledges it. A message whose handle is never
/// deleted before its visibility timeout lapses becomes visible to `peek`
/// again.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn peek(&self, wait: WaitOption) -> Result<Envelope, Error>;
    async fn delete(&self, handle: &str) -> Result<(), Error>;
    /// Enqueues a new envelope, used by the posting scheduler (one per
    /// due task/page) and by the retry strategy (re-enqueueing a failed
    /// render under a fresh handle).
    async fn send(&self, kind: &str, trace_id: &str, body: Value) -> Result<(), Error>;
}

/// Returned by `peek` when the queue is empty and `WaitOption::NoWait` was
/// requested, or when a `Wait` poll's timeout lapses with nothing to show.
pub fn no_messages_error() -> Error {
    Error::Queue("no messages to read".to_string())
}

/// Distinguishes the routine "nothing to do yet" case from a genuine queue
/// backend failure, so pollers can stay quiet on the former and log the
/// latter.
pub fn is_no_messages(err: &Error) -> bool {
    matches!(err, Error::Queue(msg) if msg == "no messages to read")
}
