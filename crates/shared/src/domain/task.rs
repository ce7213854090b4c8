use async_trait::async_trait;
use time::OffsetDateTime;

use crate::domain::user::SlackUserId;
use crate::error::Result;

/// A scheduled, recurring report post.
///
/// Recurrence is encoded across four fields rather than a single cron
/// string, matching the source schema exactly:
///
/// - `is_every_hour` — posts every hour, ignoring `task_time`'s minute
///   field beyond the `:55` rewrite the scheduler applies (see
///   `UpdateHourlyReports`).
/// - `is_every_day` — posts once a day at `task_time`.
/// - `day_of_week` — 1–7 (`DAYOFWEEK` convention: 1 = Sunday), set only
///   when neither of the above holds and `day_of_month == 0`.
/// - `day_of_month` — 1–31 for a specific calendar day, plus two
///   sentinels: `32` means "the last day of the month" (handles months
///   shorter than 31 days), and `-1` means "the 1st of the month" (a
///   rollover companion to `32` — see DESIGN.md's Open Question 1).
///
/// Exactly one of `is_every_hour`, `is_every_day`, `day_of_week`, or
/// `day_of_month` is the live recurrence rule for a given task; the
/// others are zero/null. `Add`'s nullability logic (mirrored in
/// `postgres_task::insert`) enforces this at write time.
#[derive(Debug, Clone)]
pub struct PostReportTask {
    pub id: i64,
    pub workspace_id: String,
    pub user_id: String,
    pub report_id: String,
    pub page_ids: Vec<String>,
    pub channel_id: String,
    pub channel_name: String,
    /// Wall-clock time of day, `"HH:MM"`, interpreted in `tz`.
    pub task_time: String,
    pub day_of_week: i32,
    pub day_of_month: i32,
    pub is_every_day: bool,
    pub is_every_hour: bool,
    pub tz: String,
    pub completed_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub retry_attempt: u32,
}

#[async_trait]
pub trait PostReportTaskRepository: Send + Sync {
    async fn add(&self, task: &mut PostReportTask) -> Result<()>;
    async fn get_scheduled_reports(
        &self,
        user: &SlackUserId,
        report_id: &str,
    ) -> Result<Vec<PostReportTask>>;
    async fn get_power_bi_report_ids_by_user(&self, user: &SlackUserId) -> Result<Vec<String>>;
    /// Returns every active task, as a candidate set for the current
    /// scheduler tick. Narrowing this down to tasks actually due — the
    /// 30-minute window and recurrence match, evaluated in each task's own
    /// `tz` — is done by `scheduler::posting::is_task_due`, not here; see
    /// `postgres_task::get_actual_scheduled_reports` for why a per-row
    /// timezone rules out a single SQL predicate.
    async fn get_actual_scheduled_reports(&self) -> Result<Vec<PostReportTask>>;
    async fn update(&self, task: &PostReportTask) -> Result<()>;
    async fn update_hourly_reports(&self, id: i64) -> Result<()>;
    async fn update_completion_status(&self, id: i64) -> Result<bool>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn delete_by_slack_info(&self, user: &SlackUserId, channel_id: &str) -> Result<()>;
    async fn check_if_report_scheduled_already(&self, task: &PostReportTask) -> Result<bool>;
    /// Rewrites `page_ids` after pages disappear from the underlying report,
    /// deactivating the task outright when none are left (`is_active = false`).
    async fn update_page_ids(&self, id: i64, page_ids: &[String], is_active: bool) -> Result<()>;
    /// Prefixes `channel_id` with `deleted_` and deactivates the task once its
    /// Slack channel is no longer reachable through the workspace's bot token.
    async fn update_channel_and_status(&self, id: i64, channel_id: &str, is_active: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> PostReportTask {
        PostReportTask {
            id: 1,
            workspace_id: "W1".into(),
            user_id: "U1".into(),
            report_id: "R1".into(),
            page_ids: vec!["p1".into()],
            channel_id: "C1".into(),
            channel_name: "general".into(),
            task_time: "09:00".into(),
            day_of_week: 0,
            day_of_month: 0,
            is_every_day: false,
            is_every_hour: false,
            tz: "UTC".into(),
            completed_at: None,
            is_active: true,
            retry_attempt: 0,
        }
    }

    #[test]
    fn last_day_of_month_sentinel_is_32() {
        let mut t = base_task();
        t.day_of_month = 32;
        assert_eq!(t.day_of_month, 32);
    }

    #[test]
    fn first_of_month_sentinel_is_negative_one() {
        let mut t = base_task();
        t.day_of_month = -1;
        assert_eq!(t.day_of_month, -1);
    }
}
