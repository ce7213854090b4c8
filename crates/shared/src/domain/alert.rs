use std::time::Duration;

use async_trait::async_trait;

use crate::domain::user::SlackUserId;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationFrequency {
    OnceAnHour,
    OnceADay,
}

impl NotificationFrequency {
    /// `OnceADay` is intentionally 23 hours, not 24 — carried from
    /// `ToHours`, which staggers daily alerts just inside a
    /// calendar day so a fixed boot-time offset doesn't drift a check
    /// across midnight over many days.
    pub fn to_duration(self) -> Duration {
        match self {
            NotificationFrequency::OnceAnHour => Duration::from_secs(3600),
            NotificationFrequency::OnceADay => Duration::from_secs(23 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCondition {
    Above,
    Below,
    Equal,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: i64,
    pub user_id: String,
    pub workspace_id: String,
    pub report_id: String,
    pub visual_name: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub notification_frequency: NotificationFrequency,
    pub channel_id: String,
    pub status: AlertStatus,
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Alert>;
    async fn store(&self, alert: &mut Alert) -> Result<()>;
    async fn delete_by_id(&self, id: i64) -> Result<()>;
    async fn update(&self, alert: &Alert) -> Result<()>;
    async fn get_power_bi_report_ids_by_user(&self, user: &SlackUserId) -> Result<Vec<String>>;
    async fn get_by_user_id_and_report_id(
        &self,
        user: &SlackUserId,
        report_id: &str,
    ) -> Result<Vec<Alert>>;
    async fn list_all(&self, status: AlertStatus) -> Result<Vec<Alert>>;
}
