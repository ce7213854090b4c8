//! The 30-minute posting sweep: reconciles scheduled tasks against live
//! Slack/Power BI state, then enqueues one render message per due page.
//! Grounded on `report.usecase.go::postScheduledReports` and the three
//! handlers it runs in sequence before dispatching
//! (`deletedchannelshandler.go`, `schedulererrorhandler.go`,
//! `relevantpageshandler.go`).

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use reportbot_render::delivery::SlackClient;
use reportbot_render::powerbi::ServiceClient;
use reportbot_shared::analytics::{AnalyticsSink, Event as AnalyticsEvent};
use reportbot_shared::domain::task::{PostReportTask, PostReportTaskRepository};
use reportbot_shared::domain::WorkspaceRepository;
use reportbot_shared::error::Result as SharedResult;
use reportbot_shared::queue::messages::{
    MESSAGE_POST_REPORT, PageMessage, PostReportMessage, RenderReportMessage, Tokens,
};
use reportbot_shared::queue::MessageQueue;
use tracing::{debug, error, info, instrument};

const COULDNT_RENDER_SCHEDULED_PAGE: &str =
    "Couldn't render page {{{page}}} because the page doesn't exist in scheduled report {{{report}}} anymore";
const NO_ACTIVE_PAGES: &str = "Report {{{report}}} had been stopped, because there are no active pages to send";
const SESSION_EXPIRED: &str = "Scheduled report had been stopped. We can't obtain data from Power BI account \
     because session had been expired. Please disconnect your Power BI account and connect again.";
const CHANNEL_DELETED_PREFIX: &str = "deleted_";

pub struct PostingScheduler {
    task_repo: Arc<dyn PostReportTaskRepository>,
    workspace_repo: Arc<dyn WorkspaceRepository>,
    powerbi: Arc<ServiceClient>,
    queue: Arc<dyn MessageQueue>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl PostingScheduler {
    pub fn new(
        task_repo: Arc<dyn PostReportTaskRepository>,
        workspace_repo: Arc<dyn WorkspaceRepository>,
        powerbi: Arc<ServiceClient>,
        queue: Arc<dyn MessageQueue>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            task_repo,
            workspace_repo,
            powerbi,
            queue,
            analytics,
        }
    }

    #[instrument(skip(self))]
    pub async fn run_sweep(&self) {
        let tasks = match self.load_due_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "couldn't load due tasks");
                return;
            }
        };

        self.handle_deleted_channels(&tasks).await;

        let tasks = match self.load_due_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "couldn't reload due tasks after the deleted-channels sweep");
                return;
            }
        };

        self.check_power_bi_connection(&tasks).await;

        let tasks = match self.load_due_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "couldn't reload due tasks after the connection check");
                return;
            }
        };

        self.filter_active_pages(&tasks).await;

        let tasks = match self.load_due_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "couldn't reload due tasks before dispatch");
                return;
            }
        };

        self.dispatch_due_tasks(&tasks).await;
    }

    /// Fetches every active task and narrows it to the ones due this tick,
    /// matched in each task's own `tz` rather than raw UTC (spec.md's
    /// fire-wall-clock property needs the comparison done per zone — see
    /// `is_task_due`).
    async fn load_due_tasks(&self) -> SharedResult<Vec<PostReportTask>> {
        let now_utc = Utc::now();
        let tasks = self.task_repo.get_actual_scheduled_reports().await?;
        Ok(tasks.into_iter().filter(|t| is_task_due(t, now_utc)).collect())
    }

    /// Deactivates a task once its Slack channel is no longer reachable
    /// through the workspace's bot token, grounded on
    /// `deletedchannelshandler.go::Handle`.
    async fn handle_deleted_channels(&self, tasks: &[PostReportTask]) {
        for task in tasks {
            if task.channel_id.starts_with(CHANNEL_DELETED_PREFIX) {
                continue;
            }

            let workspace = match self.workspace_repo.get_by_id(&task.workspace_id).await {
                Ok(w) => w,
                Err(e) => {
                    error!(error = %e, workspace_id = %task.workspace_id, "couldn't get workspace");
                    continue;
                }
            };

            let slack = SlackClient::new(workspace.bot_access_token.clone());
            let channels = match slack.list_channel_ids().await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "couldn't list channels");
                    continue;
                }
            };

            if channels.contains(&task.channel_id) {
                continue;
            }

            let new_channel_id = format!("{CHANNEL_DELETED_PREFIX}{}", task.channel_id);
            if let Err(e) = self
                .task_repo
                .update_channel_and_status(task.id, &new_channel_id, false)
                .await
            {
                error!(error = %e, task_id = task.id, "couldn't update task after channel removal");
                continue;
            }

            info!(task_id = task.id, "stopped report due to channel removal");
            self.analytics.send(
                AnalyticsEvent::StoppedReportDueToChannelRemoval,
                &task.workspace_id,
                &task.user_id,
                BTreeMap::new(),
            );
        }
    }

    /// Probes Power BI connectivity for every due task and deactivates it on
    /// an authorization failure, grounded on
    /// `schedulererrorhandler.go::CheckingPowerBIConnection`/`Handle`.
    async fn check_power_bi_connection(&self, tasks: &[PostReportTask]) {
        for task in tasks {
            if let Err(e) = self.powerbi.get_pages(&task.user_id, &task.report_id).await {
                error!(error = %e, task_id = task.id, "couldn't get pages");

                if !is_authorization_error(&e) {
                    continue;
                }

                if let Err(e) = self.task_repo.update_completion_status(task.id).await {
                    error!(error = %e, task_id = task.id, "couldn't update completion status");
                    continue;
                }

                self.analytics.send(
                    AnalyticsEvent::UserPowerBiTokenDeactivatedExternally,
                    &task.workspace_id,
                    &task.user_id,
                    BTreeMap::new(),
                );

                let workspace = match self.workspace_repo.get_by_id(&task.workspace_id).await {
                    Ok(w) => w,
                    Err(e) => {
                        error!(error = %e, workspace_id = %task.workspace_id, "couldn't get workspace");
                        continue;
                    }
                };
                let slack = SlackClient::new(workspace.bot_access_token);
                if let Err(e) = slack.post_message(&task.channel_id, SESSION_EXPIRED).await {
                    error!(error = %e, "couldn't post session-expired message");
                }
            }
        }
    }

    /// Drops pages that no longer exist on the underlying report, grounded
    /// on `relevantpageshandler.go::ActivePagesFilter.Handle`.
    async fn filter_active_pages(&self, tasks: &[PostReportTask]) {
        for task in tasks {
            let pages = match self.powerbi.get_pages(&task.user_id, &task.report_id).await {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, task_id = task.id, "couldn't get pages");
                    continue;
                }
            };

            let live_pages: Vec<String> = pages.value.into_iter().map(|p| p.name).collect();
            let deleted_pages: Vec<String> = task
                .page_ids
                .iter()
                .filter(|id| !live_pages.contains(id))
                .cloned()
                .collect();
            if deleted_pages.is_empty() {
                continue;
            }

            let active_pages: Vec<String> = task
                .page_ids
                .iter()
                .filter(|id| !deleted_pages.contains(id))
                .cloned()
                .collect();
            let is_update = !active_pages.is_empty();

            info!(task_id = task.id, removed = deleted_pages.len(), "pages are no longer relevant");

            if let Err(e) = self.task_repo.update_page_ids(task.id, &active_pages, is_update).await {
                error!(error = %e, task_id = task.id, "couldn't update page ids");
                continue;
            }

            let report = match self.powerbi.get_report(&task.user_id, &task.report_id).await {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, task_id = task.id, "couldn't get report");
                    self.analytics.send(
                        AnalyticsEvent::ReportReceivedFailed,
                        &task.workspace_id,
                        &task.user_id,
                        BTreeMap::new(),
                    );
                    continue;
                }
            };

            let workspace = match self.workspace_repo.get_by_id(&task.workspace_id).await {
                Ok(w) => w,
                Err(e) => {
                    error!(error = %e, workspace_id = %task.workspace_id, "couldn't get workspace");
                    continue;
                }
            };

            let mut text = String::new();
            if is_update {
                for page in &deleted_pages {
                    text = COULDNT_RENDER_SCHEDULED_PAGE
                        .replace("{page}", page)
                        .replace("{report}", &report.name);
                    self.analytics.send(
                        AnalyticsEvent::PageRemovedFromSchedule,
                        &task.workspace_id,
                        &task.user_id,
                        BTreeMap::new(),
                    );
                }
            } else {
                text = NO_ACTIVE_PAGES.replace("{report}", &report.name);
                self.analytics.send(
                    AnalyticsEvent::ScheduledReportStoppedDueToNoActivePagesAvailable,
                    &task.workspace_id,
                    &task.user_id,
                    BTreeMap::new(),
                );
            }

            let slack = SlackClient::new(workspace.bot_access_token);
            if let Err(e) = slack.post_message(&task.channel_id, &text).await {
                error!(error = %e, task_id = task.id, "couldn't post error message");
            }
        }
    }

    /// Enqueues one `postReport` message per live page, grounded on
    /// `report.usecase.go::postScheduledReports`'s dispatch loop.
    async fn dispatch_due_tasks(&self, tasks: &[PostReportTask]) {
        for task in tasks {
            let report = match self.powerbi.get_report(&task.user_id, &task.report_id).await {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, task_id = task.id, "couldn't get report");
                    continue;
                }
            };

            let pages = match self.powerbi.get_pages(&task.user_id, &task.report_id).await {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, task_id = task.id, "couldn't get pages");
                    continue;
                }
            };

            let names: BTreeMap<String, String> =
                pages.value.into_iter().map(|p| (p.name, p.display_name)).collect();

            for page_id in &task.page_ids {
                let page_name = names.get(page_id).cloned().unwrap_or_default();
                let message = PostReportMessage {
                    render: RenderReportMessage {
                        client_id: "slack".to_string(),
                        report_id: task.report_id.clone(),
                        report_name: report.name.clone(),
                        filter: None,
                        pages: vec![PageMessage { id: page_id.clone(), name: page_name }],
                        user_id: task.user_id.clone(),
                        channel_id: task.channel_id.clone(),
                        workspace_id: task.workspace_id.clone(),
                        unique_id: uuid::Uuid::new_v4().to_string(),
                        tokens: Tokens { bot_access_token: String::new(), power_bi_token: String::new() },
                        retry_attempt: 0,
                    },
                    is_scheduled: true,
                    skip_posting: false,
                };

                let body = match serde_json::to_value(&message) {
                    Ok(b) => b,
                    Err(e) => {
                        error!(error = %e, task_id = task.id, "couldn't marshal scheduled message");
                        continue;
                    }
                };

                if let Err(e) = self.queue.send(MESSAGE_POST_REPORT, &task.id.to_string(), body).await {
                    error!(error = %e, task_id = task.id, "couldn't enqueue message");
                    self.analytics.send(
                        AnalyticsEvent::ReportsScheduleFailed,
                        &task.workspace_id,
                        &task.user_id,
                        BTreeMap::new(),
                    );
                }
            }

            if task.is_every_hour {
                if let Err(e) = self.task_repo.update_hourly_reports(task.id).await {
                    error!(error = %e, task_id = task.id, "couldn't rewrite hourly task_time");
                }
            }
        }
        debug!(count = tasks.len(), "posting sweep dispatched due tasks");
    }
}

fn is_authorization_error(err: &reportbot_render::powerbi::PowerBiError) -> bool {
    matches!(
        err,
        reportbot_render::powerbi::PowerBiError::UnexpectedStatusCode(401)
            | reportbot_render::powerbi::PowerBiError::UnexpectedStatusCode(403)
    )
}

/// Replicates `GetActualScheduledReports`'s 30-minute-window + recurrence
/// match, but against `task.tz`'s local wall-clock instead of raw UTC:
/// `task_time` is a local time-of-day in that zone, not a UTC one. Falls
/// back to UTC for an unparseable `tz` rather than dropping the task.
fn is_task_due(task: &PostReportTask, now_utc: DateTime<Utc>) -> bool {
    let tz = chrono_tz::Tz::from_str(&task.tz).unwrap_or(chrono_tz::UTC);
    let local_now = now_utc.with_timezone(&tz);

    let Some(target) = parse_task_time(&task.task_time) else {
        return false;
    };

    let local_time = local_now.time();
    let window_start = local_time - ChronoDuration::minutes(30);
    let in_window = if window_start <= local_time {
        target > window_start && target < local_time
    } else {
        // Window straddles midnight in this zone.
        target > window_start || target < local_time
    };
    if !in_window {
        return false;
    }

    if task.is_every_hour || task.is_every_day {
        return true;
    }

    let local_date = local_now.date_naive();
    let day_of_week = local_date.weekday().num_days_from_sunday() as i32 + 1;
    if day_of_week == task.day_of_week {
        return true;
    }

    let day = local_date.day() as i32;
    if day == task.day_of_month {
        return true;
    }
    if task.day_of_month == 32 && day == last_day_of_month(local_date) {
        return true;
    }
    if task.day_of_month == -1 && day == 1 {
        return true;
    }

    false
}

fn parse_task_time(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

fn last_day_of_month(date: NaiveDate) -> i32 {
    let (year, month) = (date.year(), date.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day() as i32)
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn authorization_errors_are_401_or_403() {
        assert!(is_authorization_error(&reportbot_render::powerbi::PowerBiError::UnexpectedStatusCode(401)));
        assert!(is_authorization_error(&reportbot_render::powerbi::PowerBiError::UnexpectedStatusCode(403)));
        assert!(!is_authorization_error(&reportbot_render::powerbi::PowerBiError::UnexpectedStatusCode(500)));
    }

    fn base_task(tz: &str, task_time: &str) -> PostReportTask {
        PostReportTask {
            id: 1,
            workspace_id: "W1".into(),
            user_id: "U1".into(),
            report_id: "R1".into(),
            page_ids: vec![],
            channel_id: "C1".into(),
            channel_name: "general".into(),
            task_time: task_time.to_string(),
            day_of_week: 0,
            day_of_month: 0,
            is_every_day: true,
            is_every_hour: false,
            tz: tz.to_string(),
            completed_at: None,
            is_active: true,
            retry_attempt: 0,
        }
    }

    #[test]
    fn fires_when_local_wall_clock_is_inside_the_window() {
        // 2024-07-15 is a Monday; New York is UTC-4 (EDT) in July, so local
        // 09:10 is 13:10 UTC.
        let task = base_task("America/New_York", "09:00");
        let now_utc = Utc.with_ymd_and_hms(2024, 7, 15, 13, 10, 0).unwrap();
        assert!(is_task_due(&task, now_utc));
    }

    #[test]
    fn does_not_fire_once_the_window_has_passed() {
        let task = base_task("America/New_York", "09:00");
        let now_utc = Utc.with_ymd_and_hms(2024, 7, 15, 14, 0, 0).unwrap();
        assert!(!is_task_due(&task, now_utc));
    }

    #[test]
    fn a_raw_utc_comparison_would_get_this_wrong() {
        // At 13:10 UTC the raw UTC hour is 13, nowhere near a 09:00
        // task_time — only converting through the task's own tz lands on
        // 09:10 local, inside the window.
        let task = base_task("America/New_York", "09:00");
        let now_utc = Utc.with_ymd_and_hms(2024, 7, 15, 13, 10, 0).unwrap();
        assert_ne!(now_utc.time().hour(), 9);
        assert!(is_task_due(&task, now_utc));
    }

    #[test]
    fn last_day_of_month_sentinel_matches_in_local_time() {
        let mut task = base_task("UTC", "09:00");
        task.is_every_day = false;
        task.day_of_month = 32;
        // 2024-02-29 is the last day of February in a leap year.
        let now_utc = Utc.with_ymd_and_hms(2024, 2, 29, 9, 10, 0).unwrap();
        assert!(is_task_due(&task, now_utc));
    }

    #[test]
    fn first_of_month_sentinel_matches_in_local_time() {
        let mut task = base_task("UTC", "09:00");
        task.is_every_day = false;
        task.day_of_month = -1;
        let now_utc = Utc.with_ymd_and_hms(2024, 3, 1, 9, 10, 0).unwrap();
        assert!(is_task_due(&task, now_utc));
    }

    #[test]
    fn unparseable_tz_falls_back_to_utc_instead_of_dropping_the_task() {
        let task = base_task("Not/AZone", "09:00");
        let now_utc = Utc.with_ymd_and_hms(2024, 7, 15, 9, 10, 0).unwrap();
        assert!(is_task_due(&task, now_utc));
    }
}
