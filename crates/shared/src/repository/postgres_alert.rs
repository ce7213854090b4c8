use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::domain::alert::{Alert, AlertCondition, AlertRepository, AlertStatus, NotificationFrequency};
use crate::domain::user::SlackUserId;
use crate::error::{Error, Result};
use crate::retry::with_fast_retry;

#[derive(FromRow)]
struct AlertRow {
    id: i64,
    user_id: String,
    workspace_id: String,
    report_id: String,
    visual_name: String,
    condition: String,
    threshold: f64,
    notification_frequency: String,
    channel_id: String,
    status: String,
}

fn parse_condition(s: &str) -> AlertCondition {
    match s {
        "above" => AlertCondition::Above,
        "below" => AlertCondition::Below,
        _ => AlertCondition::Equal,
    }
}

fn condition_str(c: AlertCondition) -> &'static str {
    match c {
        AlertCondition::Above => "above",
        AlertCondition::Below => "below",
        AlertCondition::Equal => "equal",
    }
}

fn parse_frequency(s: &str) -> NotificationFrequency {
    match s {
        "Once an hour" => NotificationFrequency::OnceAnHour,
        _ => NotificationFrequency::OnceADay,
    }
}

fn frequency_str(f: NotificationFrequency) -> &'static str {
    match f {
        NotificationFrequency::OnceAnHour => "Once an hour",
        NotificationFrequency::OnceADay => "Once a day",
    }
}

fn parse_status(s: &str) -> AlertStatus {
    match s {
        "Active" => AlertStatus::Active,
        _ => AlertStatus::Inactive,
    }
}

fn status_str(s: AlertStatus) -> &'static str {
    match s {
        AlertStatus::Active => "Active",
        AlertStatus::Inactive => "Inactive",
    }
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Alert {
            id: row.id,
            user_id: row.user_id,
            workspace_id: row.workspace_id,
            report_id: row.report_id,
            visual_name: row.visual_name,
            condition: parse_condition(&row.condition),
            threshold: row.threshold,
            notification_frequency: parse_frequency(&row.notification_frequency),
            channel_id: row.channel_id,
            status: parse_status(&row.status),
        }
    }
}

const SELECT_COLUMNS: &str = "id, user_id, workspace_id, report_id, visual_name, condition, \
     threshold, notification_frequency, channel_id, status";

pub struct PostgresAlertRepository {
    pool: PgPool,
}

impl PostgresAlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertRepository for PostgresAlertRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> Result<Alert> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM alerts WHERE id = $1");
        let row = with_fast_retry("alert.get_by_id", || async {
            sqlx::query_as::<_, AlertRow>(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        row.map(Alert::from).ok_or(Error::NotFound)
    }

    #[instrument(skip(self, alert))]
    async fn store(&self, alert: &mut Alert) -> Result<()> {
        let row: (i64,) = with_fast_retry("alert.store", || async {
            sqlx::query_as(
                "INSERT INTO alerts (user_id, workspace_id, report_id, visual_name, condition, \
                 threshold, notification_frequency, channel_id, status) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) RETURNING id",
            )
            .bind(&alert.user_id)
            .bind(&alert.workspace_id)
            .bind(&alert.report_id)
            .bind(&alert.visual_name)
            .bind(condition_str(alert.condition))
            .bind(alert.threshold)
            .bind(frequency_str(alert.notification_frequency))
            .bind(&alert.channel_id)
            .bind(status_str(alert.status))
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        alert.id = row.0;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, id: i64) -> Result<()> {
        with_fast_retry("alert.delete_by_id", || async {
            sqlx::query("DELETE FROM alerts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, alert))]
    async fn update(&self, alert: &Alert) -> Result<()> {
        with_fast_retry("alert.update", || async {
            sqlx::query(
                "UPDATE alerts SET condition = $1, threshold = $2, notification_frequency = $3, \
                 channel_id = $4, status = $5 WHERE id = $6",
            )
            .bind(condition_str(alert.condition))
            .bind(alert.threshold)
            .bind(frequency_str(alert.notification_frequency))
            .bind(&alert.channel_id)
            .bind(status_str(alert.status))
            .bind(alert.id)
            .execute(&self.pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_power_bi_report_ids_by_user(&self, user: &SlackUserId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = with_fast_retry("alert.get_power_bi_report_ids_by_user", || async {
            sqlx::query_as(
                "SELECT DISTINCT report_id FROM alerts WHERE workspace_id = $1 AND user_id = $2",
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

    #[instrument(skip(self))]
    async fn get_by_user_id_and_report_id(
        &self,
        user: &SlackUserId,
        report_id: &str,
    ) -> Result<Vec<Alert>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM alerts WHERE workspace_id = $1 AND user_id = $2 AND report_id = $3"
        );
        let rows = with_fast_retry("alert.get_by_user_id_and_report_id", || async {
            sqlx::query_as::<_, AlertRow>(&query)
                .bind(&user.workspace_id)
                .bind(&user.id)
                .bind(report_id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_all(&self, status: AlertStatus) -> Result<Vec<Alert>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM alerts WHERE status = $1");
        let rows = with_fast_retry("alert.list_all", || async {
            sqlx::query_as::<_, AlertRow>(&query)
                .bind(status_str(status))
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }
}
