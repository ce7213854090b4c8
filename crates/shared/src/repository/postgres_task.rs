use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::domain::task::{PostReportTask, PostReportTaskRepository};
use crate::domain::user::SlackUserId;
use crate::error::{Error, Result};
use crate::retry::{with_fast_retry, with_slow_retry};

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    workspace_id: String,
    user_id: String,
    report_id: String,
    page_ids: serde_json::Value,
    channel_id: String,
    channel_name: String,
    task_time: String,
    day_of_week: Option<i32>,
    day_of_month: Option<i32>,
    is_every_day: bool,
    is_every_hour: bool,
    tz: String,
    completed_at: Option<time::OffsetDateTime>,
    is_active: bool,
}

impl From<TaskRow> for PostReportTask {
    fn from(row: TaskRow) -> Self {
        PostReportTask {
            id: row.id,
            workspace_id: row.workspace_id,
            user_id: row.user_id,
            report_id: row.report_id,
            page_ids: serde_json::from_value(row.page_ids).unwrap_or_default(),
            channel_id: row.channel_id,
            channel_name: row.channel_name,
            task_time: row.task_time,
            day_of_week: row.day_of_week.unwrap_or(0),
            day_of_month: row.day_of_month.unwrap_or(0),
            is_every_day: row.is_every_day,
            is_every_hour: row.is_every_hour,
            tz: row.tz,
            completed_at: row.completed_at,
            is_active: row.is_active,
            // Retry attempt is carried on the in-flight queue message, not
            // persisted alongside the schedule row — the MySQL repository
            // this table was translated from never selects/stores it either.
            retry_attempt: 0,
        }
    }
}

const SELECT_COLUMNS: &str = "id, workspace_id, user_id, report_id, page_ids, channel_id, \
     channel_name, task_time, day_of_week, day_of_month, is_every_day, is_every_hour, tz, \
     completed_at, is_active";

pub struct PostgresPostReportTaskRepository {
    pool: PgPool,
}

impl PostgresPostReportTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostReportTaskRepository for PostgresPostReportTaskRepository {
    #[instrument(skip(self, task))]
    async fn add(&self, task: &mut PostReportTask) -> Result<()> {
        // Same nullability rule the schema was translated from: only one of
        // {is_every_hour/is_every_day, day_of_week, day_of_month} is ever
        // the live recurrence; the others are written as NULL.
        let (day_of_week, day_of_month): (Option<i32>, Option<i32>) =
            if task.is_every_day || task.is_every_hour {
                (None, None)
            } else if task.day_of_month == 0 {
                (Some(task.day_of_week), None)
            } else {
                (None, Some(task.day_of_month))
            };

        let page_ids = serde_json::to_value(&task.page_ids).map_err(Error::from)?;

        let row: (i64,) = with_fast_retry("task.add", || async {
            sqlx::query_as(
                "INSERT INTO post_report_tasks \
                 (workspace_id, user_id, report_id, page_ids, channel_id, channel_name, \
                  task_time, day_of_week, day_of_month, is_every_day, is_every_hour, tz, \
                  completed_at, is_active) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,NULL,$13) \
                 RETURNING id",
            )
            .bind(&task.workspace_id)
            .bind(&task.user_id)
            .bind(&task.report_id)
            .bind(&page_ids)
            .bind(&task.channel_id)
            .bind(&task.channel_name)
            .bind(&task.task_time)
            .bind(day_of_week)
            .bind(day_of_month)
            .bind(task.is_every_day)
            .bind(task.is_every_hour)
            .bind(&task.tz)
            .bind(task.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::Conflict,
                _ => Error::from(e),
            })
        })
        .await?;

        task.id = row.0;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_scheduled_reports(
        &self,
        user: &SlackUserId,
        report_id: &str,
    ) -> Result<Vec<PostReportTask>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM post_report_tasks \
             WHERE workspace_id = $1 AND user_id = $2 AND report_id = $3"
        );
        let rows = with_fast_retry("task.get_scheduled_reports", || async {
            sqlx::query_as::<_, TaskRow>(&query)
                .bind(&user.workspace_id)
                .bind(&user.id)
                .bind(report_id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(rows.into_iter().map(PostReportTask::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_power_bi_report_ids_by_user(&self, user: &SlackUserId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = with_fast_retry("task.get_power_bi_report_ids_by_user", || async {
            sqlx::query_as(
                "SELECT DISTINCT report_id FROM post_report_tasks \
                 WHERE workspace_id = $1 AND user_id = $2",
            )
            .bind(&user.workspace_id)
            .bind(&user.id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Returns every active task as a candidate set. `GetActualScheduledReports`'s
    /// MySQL query narrowed this down to the current 30-minute window and
    /// recurrence match directly in SQL, comparing `taskTime` against
    /// `UTC_TIME()` — but that's only correct when every row's `task_time`
    /// means the same thing in the same zone. Since `tz` varies per row, a
    /// single `now()`-based predicate can't express "due in this task's own
    /// local time" without a per-row `AT TIME ZONE tz` expression; the
    /// window/recurrence match is done in `scheduler::posting::is_task_due`
    /// instead, against each task's zone individually. `is_active` is still
    /// pushed down here since it doesn't depend on time at all.
    #[instrument(skip(self))]
    async fn get_actual_scheduled_reports(&self) -> Result<Vec<PostReportTask>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM post_report_tasks WHERE is_active = TRUE");
        let rows = with_slow_retry("task.get_actual_scheduled_reports", || async {
            sqlx::query_as::<_, TaskRow>(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(rows.into_iter().map(PostReportTask::from).collect())
    }

    #[instrument(skip(self, task))]
    async fn update(&self, task: &PostReportTask) -> Result<()> {
        let result = with_fast_retry("task.update", || async {
            sqlx::query(
                "UPDATE post_report_tasks SET completed_at = $1, is_active = $2 WHERE id = $3",
            )
            .bind(task.completed_at)
            .bind(task.is_active)
            .bind(task.id)
            .execute(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;

        if result.rows_affected() != 1 {
            return Err(Error::NotUpdated);
        }
        Ok(())
    }

    /// Rewrites `task_time` to the current UTC hour's `"HH:55"`, keeping an
    /// "every hour" task's nominal time anchored to the most recent tick so
    /// the scheduler's 30-minute window always catches it exactly once per
    /// hour.
    #[instrument(skip(self))]
    async fn update_hourly_reports(&self, id: i64) -> Result<()> {
        let hour = time::OffsetDateTime::now_utc().hour();
        let new_time = format!("{hour:02}:55");
        with_fast_retry("task.update_hourly_reports", || async {
            sqlx::query("UPDATE post_report_tasks SET task_time = $1 WHERE id = $2")
                .bind(&new_time)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_completion_status(&self, id: i64) -> Result<bool> {
        let current: (bool,) = with_fast_retry("task.update_completion_status.read", || async {
            sqlx::query_as("SELECT is_active FROM post_report_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?
        .ok_or(Error::NotFound)?;

        let new_status = !current.0;
        with_fast_retry("task.update_completion_status.write", || async {
            sqlx::query("UPDATE post_report_tasks SET is_active = $1 WHERE id = $2")
                .bind(new_status)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(new_status)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<()> {
        with_fast_retry("task.delete", || async {
            sqlx::query("DELETE FROM post_report_tasks WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_slack_info(&self, user: &SlackUserId, channel_id: &str) -> Result<()> {
        with_fast_retry("task.delete_by_slack_info", || async {
            sqlx::query(
                "DELETE FROM post_report_tasks WHERE workspace_id = $1 AND user_id = $2 AND channel_id = $3",
            )
            .bind(&user.workspace_id)
            .bind(&user.id)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_page_ids(&self, id: i64, page_ids: &[String], is_active: bool) -> Result<()> {
        let page_ids = serde_json::to_value(page_ids).map_err(Error::from)?;
        with_fast_retry("task.update_page_ids", || async {
            sqlx::query("UPDATE post_report_tasks SET page_ids = $1, is_active = $2 WHERE id = $3")
                .bind(&page_ids)
                .bind(is_active)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_channel_and_status(&self, id: i64, channel_id: &str, is_active: bool) -> Result<()> {
        with_fast_retry("task.update_channel_and_status", || async {
            sqlx::query("UPDATE post_report_tasks SET channel_id = $1, is_active = $2 WHERE id = $3")
                .bind(channel_id)
                .bind(is_active)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, task))]
    async fn check_if_report_scheduled_already(&self, task: &PostReportTask) -> Result<bool> {
        let exists: (bool,) = with_fast_retry("task.check_if_report_scheduled_already", || async {
            sqlx::query_as(
                "SELECT EXISTS ( \
                   SELECT id FROM post_report_tasks \
                   WHERE workspace_id = $1 AND user_id = $2 AND report_id = $3 \
                     AND channel_id = $4 AND task_time = $5 \
                     AND COALESCE(day_of_week, 0) = $6 AND COALESCE(day_of_month, 0) = $7 \
                     AND is_every_day = $8 AND is_every_hour = $9 \
                 )",
            )
            .bind(&task.workspace_id)
            .bind(&task.user_id)
            .bind(&task.report_id)
            .bind(&task.channel_id)
            .bind(&task.task_time)
            .bind(task.day_of_week)
            .bind(task.day_of_month)
            .bind(task.is_every_day)
            .bind(task.is_every_hour)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(exists.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_columns_matches_task_row_shape() {
        assert!(SELECT_COLUMNS.contains("day_of_month"));
        assert!(SELECT_COLUMNS.contains("is_every_hour"));
    }
}
