//! Retry-by-re-enqueue: grounded on `retrystrategy.cdp.go`. A failed render
//! doesn't get retried in-process — the original envelope is rebuilt with an
//! incremented attempt counter and sent back onto the queue, so a retry
//! survives a worker restart the same way the first attempt did.

use std::sync::Arc;

use reportbot_shared::queue::messages::{PostReportMessage, MESSAGE_POST_REPORT};
use reportbot_shared::queue::MessageQueue;
use tracing::{error, info};

use crate::engine::RenderError;

/// `true` means the caller should stop processing this message without
/// posting anything further — either because a retry was enqueued, or
/// because attempts are exhausted and the failure was already logged.
pub struct RetryOutcome {
    pub skip_posting: bool,
}

pub struct RetryStrategy {
    queue: Arc<dyn MessageQueue>,
    max_attempts: u32,
}

impl RetryStrategy {
    pub fn new(queue: Arc<dyn MessageQueue>, max_attempts: u32) -> Self {
        Self { queue, max_attempts }
    }

    /// Mirrors `RetryStrategy.Retry`: on a render failure, re-enqueue with
    /// `retry_attempt` incremented as long as we're still under
    /// `max_attempts - 1`; past that, the original error is handed back to
    /// the caller so it can be logged and the job dropped.
    pub async fn retry(
        &self,
        trace_id: &str,
        message: &PostReportMessage,
        render_error: &RenderError,
    ) -> Result<RetryOutcome, reportbot_shared::Error> {
        if message.render.retry_attempt >= self.max_attempts.saturating_sub(1) {
            error!(error = %render_error, report_id = %message.render.report_id, "couldn't generate report, retries exhausted");
            return Ok(RetryOutcome { skip_posting: false });
        }

        let mut retried = message.clone();
        retried.render.retry_attempt += 1;

        let body = serde_json::to_value(&retried)?;
        self.queue.send(MESSAGE_POST_REPORT, trace_id, body).await?;

        info!(
            report_id = %message.render.report_id,
            retry_attempt = retried.render.retry_attempt,
            error = %render_error,
            "retry enqueued"
        );

        Ok(RetryOutcome { skip_posting: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportbot_shared::queue::messages::{RenderReportMessage, Tokens};
    use reportbot_shared::queue::InMemoryMessageQueue;

    fn sample_message(retry_attempt: u32) -> PostReportMessage {
        PostReportMessage {
            render: RenderReportMessage {
                client_id: "client".to_string(),
                report_id: "report-1".to_string(),
                report_name: "Sales".to_string(),
                filter: None,
                pages: vec![],
                user_id: "U1".to_string(),
                channel_id: "C1".to_string(),
                workspace_id: "T1".to_string(),
                unique_id: "u1".to_string(),
                tokens: Tokens {
                    bot_access_token: "bot".to_string(),
                    power_bi_token: "pbi".to_string(),
                },
                retry_attempt,
            },
            is_scheduled: true,
            skip_posting: false,
        }
    }

    #[tokio::test]
    async fn retries_when_under_the_limit() {
        let queue = Arc::new(InMemoryMessageQueue::default());
        let strategy = RetryStrategy::new(queue.clone(), 3);
        let outcome = strategy
            .retry("trace-1", &sample_message(0), &RenderError::Timeout("tab_timeout"))
            .await
            .unwrap();
        assert!(outcome.skip_posting);
    }

    #[tokio::test]
    async fn stops_retrying_once_attempts_are_exhausted() {
        let queue = Arc::new(InMemoryMessageQueue::default());
        let strategy = RetryStrategy::new(queue, 3);
        let outcome = strategy
            .retry("trace-1", &sample_message(2), &RenderError::Timeout("tab_timeout"))
            .await
            .unwrap();
        assert!(!outcome.skip_posting);
    }
}
