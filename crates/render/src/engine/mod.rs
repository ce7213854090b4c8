pub mod cdp;
pub mod errors;
pub mod filters;

pub use errors::RenderError;

use async_trait::async_trait;
use reportbot_shared::queue::messages::{FilterMessage, PageMessage};

/// Everything a render engine needs to know to drive one report through the
/// embedded renderer and capture its pages. No global singleton holds this —
/// it is built fresh per job and passed in explicitly, since a single worker
/// process renders many different users' reports concurrently.
#[derive(Debug, Clone)]
pub struct ShareOptions {
    pub client_id: String,
    pub access_token: String,
    pub report_id: String,
    pub report_name: String,
    pub filter: Option<FilterMessage>,
    pub pages: Vec<PageMessage>,
    pub channel_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub is_scheduled: bool,
    pub retry_attempt: u32,
    /// Used to derive the screenshot filename's timestamp component, keyed
    /// off the message's trace id the same way the SQS-based pipeline does.
    pub trace_id: String,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub image_data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub id: String,
    pub name: String,
    pub pages: Vec<RenderedPage>,
}

/// Renders Power BI reports to PNG screenshots. `new_context` hands back a
/// fresh, independently cancellable unit of work; `render_report` drives one
/// report through it. Implemented by [`cdp::CdpEngine`]; kept as a trait so
/// tests can substitute a fake engine without spinning up a real browser.
#[async_trait]
pub trait ReportEngine: Send + Sync {
    async fn render_report(
        &self,
        options: &ShareOptions,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<RenderedReport, RenderError>;
}
