//! Product-analytics emission points. The source fans these out to
//! Amplitude through a process-global `analytics.DefaultAmplitudeClient()`
//! singleton; here it's an explicit dependency, `Arc<dyn AnalyticsSink>`,
//! constructed once at startup and passed down like every other
//! collaborator.
//!
//! There's no Amplitude crate anywhere in the pack, so the only
//! implementation shipped is [`LoggingAnalyticsSink`], which just logs the
//! event at `info` level. A real sink can be swapped in behind the same
//! trait without touching a call site.

use std::collections::BTreeMap;

use tracing::info;

/// Named the way the source names its event constants
/// (`EventUserPowerBITokenDeactivatedExternally`,
/// `EventKindStoppedReportDueToChannelRemoval`, ...), kept as an enum
/// instead of bare strings so a call site can't typo an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ReportFailedToGenerate,
    ReportGenerated,
    SendReportMessageFailed,
    WorkspaceDeleted,
    ChannelDeleted,
    UserDeactivated,
    UserReactivated,
    /// A user's Power BI session expired and the posting scheduler
    /// deactivated every task that depended on it.
    UserPowerBiTokenDeactivatedExternally,
    /// A scheduled task was stopped because its Slack channel was removed.
    StoppedReportDueToChannelRemoval,
    /// A due task's render-and-enqueue step failed.
    ReportsScheduleFailed,
    /// Re-fetching a report to name a page-removal notice failed.
    ReportReceivedFailed,
    /// One of a task's pages no longer exists on the underlying report.
    PageRemovedFromSchedule,
    /// A task was stopped outright because none of its pages still exist.
    ScheduledReportStoppedDueToNoActivePagesAvailable,
    /// A visual's value crossed an alert's configured threshold.
    AlertGenerated,
}

pub trait AnalyticsSink: Send + Sync {
    fn send(&self, event: Event, workspace_id: &str, user_id: &str, properties: BTreeMap<String, String>);
}

#[derive(Debug, Default)]
pub struct LoggingAnalyticsSink;

impl AnalyticsSink for LoggingAnalyticsSink {
    fn send(&self, event: Event, workspace_id: &str, user_id: &str, properties: BTreeMap<String, String>) {
        info!(?event, %workspace_id, %user_id, ?properties, "analytics event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_sink_does_not_panic_on_empty_properties() {
        let sink = LoggingAnalyticsSink;
        sink.send(Event::UserPowerBiTokenDeactivatedExternally, "W1", "U1", BTreeMap::new());
    }
}
