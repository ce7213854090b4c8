//! Dynamic per-alert threshold checks. Each active alert gets its own
//! recurring task, registered at boot staggered 30 seconds apart so a large
//! backlog doesn't fire every check against the browser at once. Grounded
//! on `alert.usecase.go`'s `ScheduleAlertsCheck`/`ScheduleAlertCheck`, which
//! drive the same stagger against a singleton scheduler's `AddTask`/
//! `KillTask` pair; a `CancellationToken` per alert plays that role here,
//! since cooperative cancellation of an in-flight CDP call needs a token,
//! not just a channel close.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reportbot_render::alert::condition_str;
use reportbot_render::delivery::SlackClient;
use reportbot_render::engine::cdp::CdpEngine;
use reportbot_render::powerbi::ServiceClient;
use reportbot_shared::analytics::{AnalyticsSink, Event as AnalyticsEvent};
use reportbot_shared::domain::alert::{AlertRepository, AlertStatus};
use reportbot_shared::domain::user::{SlackUserId, UserRepository};
use reportbot_shared::domain::WorkspaceRepository;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const STAGGER_INTERVAL: Duration = Duration::from_secs(30);

/// Fixed diagnostic text posted as a DM to an alert's owner when its check
/// stops running for any reason other than a transient render failure.
const ALERT_STOPPED_MESSAGE: &str =
    "Your alert had been stopped because of an unexpected error. Please create it again.";

pub struct AlertScheduler {
    alert_repo: Arc<dyn AlertRepository>,
    workspace_repo: Arc<dyn WorkspaceRepository>,
    user_repo: Arc<dyn UserRepository>,
    powerbi: Arc<ServiceClient>,
    engine: Arc<CdpEngine>,
    analytics: Arc<dyn AnalyticsSink>,
    tasks: Mutex<HashMap<i64, CancellationToken>>,
}

impl AlertScheduler {
    pub fn new(
        alert_repo: Arc<dyn AlertRepository>,
        workspace_repo: Arc<dyn WorkspaceRepository>,
        user_repo: Arc<dyn UserRepository>,
        powerbi: Arc<ServiceClient>,
        engine: Arc<CdpEngine>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            alert_repo,
            workspace_repo,
            user_repo,
            powerbi,
            engine,
            analytics,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers every currently-active alert, one every 30 seconds. Run
    /// once at boot.
    pub async fn schedule_active_alerts(self: &Arc<Self>) -> anyhow::Result<()> {
        let alerts = self.alert_repo.list_all(AlertStatus::Active).await?;
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STAGGER_INTERVAL);
            for alert in alerts {
                ticker.tick().await;
                if let Err(e) = scheduler.schedule_alert_check(alert.id).await {
                    tracing::error!(alert_id = alert.id, error = %e, "couldn't schedule alert check");
                }
            }
        });
        Ok(())
    }

    /// Registers (or re-registers) a single alert's recurring check,
    /// marking it active first and spawning a task that ticks at its
    /// notification frequency until cancelled or the check itself fails.
    pub async fn schedule_alert_check(self: &Arc<Self>, alert_id: i64) -> anyhow::Result<()> {
        let mut alert = self.alert_repo.get_by_id(alert_id).await?;
        if alert.status != AlertStatus::Active {
            alert.status = AlertStatus::Active;
            self.alert_repo.update(&alert).await?;
        }

        let cancel = self.unschedule(alert_id).await.unwrap_or_else(CancellationToken::new);
        let cancel = if cancel.is_cancelled() { CancellationToken::new() } else { cancel };
        self.tasks.lock().await.insert(alert_id, cancel.clone());

        let period = alert.notification_frequency.to_duration();
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                if let Err(e) = scheduler.check_and_show_alert(alert_id).await {
                    scheduler.on_alert_check_exception(alert_id, e).await;
                    return;
                }
            }
        });
        Ok(())
    }

    /// Cancels and removes an alert's running task, if any, handing back
    /// its token so a re-registration can detect whether it's still live.
    async fn unschedule(&self, alert_id: i64) -> Option<CancellationToken> {
        let token = self.tasks.lock().await.remove(&alert_id)?;
        token.cancel();
        None
    }

    /// Cancels every registered alert ticker. Called once during worker
    /// shutdown, after the dispatcher's own context is cancelled.
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, token) in tasks.drain() {
            token.cancel();
        }
    }

    /// Fetches the report name, runs the browser-based threshold check, and
    /// — if the visual's value crosses the threshold — uploads a screenshot
    /// to the alert's configured channel.
    async fn check_and_show_alert(&self, alert_id: i64) -> anyhow::Result<()> {
        let alert = self.alert_repo.get_by_id(alert_id).await?;
        let slack_id = SlackUserId {
            workspace_id: alert.workspace_id.clone(),
            id: alert.user_id.clone(),
        };
        let user = self.user_repo.get_by_id(&slack_id).await?;
        let workspace = self.workspace_repo.get_by_id(&alert.workspace_id).await?;

        let report = self.powerbi.get_report(&user.id, &alert.report_id).await?;

        let outcome = self
            .engine
            .check_alert(
                &user.access_token,
                &alert.report_id,
                &alert.visual_name,
                alert.condition,
                alert.threshold,
            )
            .await?;

        if !outcome.threshold_exceeded {
            return Ok(());
        }

        let slack = SlackClient::new(workspace.bot_access_token.clone());
        let comment = format!(
            "Alert! The value of {} is {} {}!",
            alert.visual_name,
            condition_str(alert.condition),
            alert.threshold
        );
        slack
            .upload_file(&alert.channel_id, &report.name, "alert.png", &comment, outcome.image_data)
            .await?;

        let mut properties = BTreeMap::new();
        properties.insert("report_id".to_string(), alert.report_id.clone());
        properties.insert("visual_name".to_string(), alert.visual_name.clone());
        self.analytics.send(
            AnalyticsEvent::AlertGenerated,
            &alert.workspace_id,
            &alert.user_id,
            properties,
        );
        Ok(())
    }

    /// Marks the alert inactive and, unless the failure is the browser
    /// template's own "report didn't load" signal, DMs the alert's owner so
    /// they know to recreate it. The task that called this has already
    /// returned, so there's nothing left to unregister but the map entry.
    async fn on_alert_check_exception(&self, alert_id: i64, err: anyhow::Error) {
        tracing::error!(alert_id, error = %err, "alert check failed");
        self.tasks.lock().await.remove(&alert_id);

        let Ok(mut alert) = self.alert_repo.get_by_id(alert_id).await else {
            return;
        };
        alert.status = AlertStatus::Inactive;
        if let Err(e) = self.alert_repo.update(&alert).await {
            tracing::error!(alert_id, error = %e, "couldn't mark alert inactive");
        }

        if is_report_not_loaded(&err) {
            return;
        }

        let Ok(workspace) = self.workspace_repo.get_by_id(&alert.workspace_id).await else {
            return;
        };
        let slack = SlackClient::new(workspace.bot_access_token);
        if let Err(e) = slack.post_message(&alert.user_id, ALERT_STOPPED_MESSAGE).await {
            tracing::error!(alert_id, error = %e, "couldn't notify alert owner");
        }
    }
}

fn is_report_not_loaded(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reportbot_render::alert::AlertCheckError>()
        .is_some_and(|e| matches!(e, reportbot_render::alert::AlertCheckError::ReportNotLoaded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_not_loaded_is_detected_through_anyhow() {
        let err: anyhow::Error = reportbot_render::alert::AlertCheckError::ReportNotLoaded.into();
        assert!(is_report_not_loaded(&err));

        let other: anyhow::Error = reportbot_render::alert::AlertCheckError::Timeout.into();
        assert!(!is_report_not_loaded(&other));
    }
}
