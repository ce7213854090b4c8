//! The dispatcher-facing contract a message handler implements. Grounded on
//! `interfaces/mq.Worker`: a worker declares which message kinds it wants
//! and handles one envelope at a time.

use async_trait::async_trait;
use reportbot_shared::queue::Envelope;

#[async_trait]
pub trait Worker: Send + Sync {
    fn supported_messages(&self) -> Vec<&'static str>;
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()>;
}
