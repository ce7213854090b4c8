//! Handles `postReport` messages: fetches report metadata and renders its
//! pages concurrently, then delivers the result to Slack or Teams. Grounded
//! on `report.worker.go::shareReport` and `report.usecase.go`'s
//! `generateReport`/`shareToSlack`/`shareToTeams`.

use std::sync::Arc;

use async_trait::async_trait;
use reportbot_render::delivery::{message_title, page_url, scheduled_comment};
use reportbot_render::delivery::{SlackClient, SlackDeliveryError, TeamsClient};
use reportbot_render::engine::filters::describe as describe_filter;
use reportbot_render::engine::{ReportEngine, ShareOptions};
use reportbot_render::powerbi::ServiceClient;
use reportbot_render::retry_strategy::RetryStrategy;
use std::collections::BTreeMap;

use reportbot_shared::analytics::{AnalyticsSink, Event as AnalyticsEvent};
use reportbot_shared::domain::report::Report;
use reportbot_shared::domain::{PostReportTaskRepository, SlackUserId, UserRepository, WorkspaceRepository};
use reportbot_shared::queue::messages::PostReportMessage;
use reportbot_shared::queue::Envelope;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::worker_trait::Worker;

const CLIENT_SLACK: &str = "slack";
const CLIENT_TEAMS: &str = "teams";

fn report_properties(is_scheduled: bool, report_id: &str, with_filter: Option<bool>) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    props.insert("is_scheduled".to_string(), is_scheduled.to_string());
    props.insert("report_id".to_string(), report_id.to_string());
    if let Some(with_filter) = with_filter {
        props.insert("with_filter".to_string(), with_filter.to_string());
    }
    props
}

pub struct ReportWorker {
    powerbi: Arc<ServiceClient>,
    engine: Arc<dyn ReportEngine>,
    retry_strategy: Arc<RetryStrategy>,
    user_repo: Arc<dyn UserRepository>,
    workspace_repo: Arc<dyn WorkspaceRepository>,
    task_repo: Arc<dyn PostReportTaskRepository>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl ReportWorker {
    pub fn new(
        powerbi: Arc<ServiceClient>,
        engine: Arc<dyn ReportEngine>,
        retry_strategy: Arc<RetryStrategy>,
        user_repo: Arc<dyn UserRepository>,
        workspace_repo: Arc<dyn WorkspaceRepository>,
        task_repo: Arc<dyn PostReportTaskRepository>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            powerbi,
            engine,
            retry_strategy,
            user_repo,
            workspace_repo,
            task_repo,
            analytics,
        }
    }

    /// Races the report-metadata fetch against the render, cancelling the
    /// render the moment the fetch fails and vice versa. `None` means a
    /// retry was enqueued (or silently dropped after a logged failure) and
    /// the caller should do nothing further.
    async fn generate_report(
        &self,
        trace_id: &str,
        message: &PostReportMessage,
        options: &ShareOptions,
        consumer_id: Option<String>,
    ) -> anyhow::Result<Option<(Report, reportbot_render::engine::RenderedReport)>> {
        let cancel = CancellationToken::new();

        let report_handle = {
            let powerbi = self.powerbi.clone();
            let report_id = options.report_id.clone();
            let access_token = options.access_token.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = match &consumer_id {
                    Some(consumer_id) => powerbi.get_report(consumer_id, &report_id).await,
                    None => powerbi.get_report_with_token(&access_token, &report_id).await,
                };
                if result.is_err() {
                    cancel.cancel();
                }
                result
            })
        };

        let render_result = self.engine.render_report(options, cancel.clone()).await;

        match render_result {
            Err(render_error) => {
                let outcome = self.retry_strategy.retry(trace_id, message, &render_error).await?;
                report_handle.abort();
                if outcome.skip_posting {
                    return Ok(None);
                }
                Err(render_error.into())
            }
            Ok(rendered_report) => {
                let report = report_handle.await??;
                Ok(Some((report, rendered_report)))
            }
        }
    }

    #[instrument(skip(self, message), fields(report_id = %message.render.report_id, client_id = %message.render.client_id))]
    async fn share_report(&self, trace_id: &str, message: &PostReportMessage) -> anyhow::Result<()> {
        let r = &message.render;
        let options = ShareOptions {
            client_id: r.client_id.clone(),
            access_token: r.tokens.power_bi_token.clone(),
            report_id: r.report_id.clone(),
            report_name: r.report_name.clone(),
            filter: r.filter.clone(),
            pages: r.pages.clone(),
            channel_id: r.channel_id.clone(),
            workspace_id: r.workspace_id.clone(),
            user_id: r.user_id.clone(),
            is_scheduled: message.is_scheduled,
            retry_attempt: r.retry_attempt,
            trace_id: trace_id.to_string(),
        };

        match r.client_id.as_str() {
            CLIENT_SLACK => self.share_to_slack(trace_id, message, options).await,
            CLIENT_TEAMS => self.share_to_teams(trace_id, message, options).await,
            other => Err(anyhow::anyhow!("unknown report client id: {other}")),
        }
    }

    async fn share_to_slack(
        &self,
        trace_id: &str,
        message: &PostReportMessage,
        mut options: ShareOptions,
    ) -> anyhow::Result<()> {
        let r = &message.render;
        let slack_user_id = SlackUserId {
            workspace_id: r.workspace_id.clone(),
            id: r.user_id.clone(),
        };

        let user = self.user_repo.get_by_id(&slack_user_id).await?;
        let workspace = self.workspace_repo.get_by_id(&r.workspace_id).await?;
        options.access_token = user.access_token.clone();

        let slack = SlackClient::new(workspace.bot_access_token.clone());

        let outcome = self
            .generate_report(trace_id, message, &options, Some(user.id.clone()))
            .await;

        let (report, rendered) = match outcome {
            Err(e) => {
                error!(error = %e, "couldn't generate report");
                self.analytics.send(
                    AnalyticsEvent::ReportFailedToGenerate,
                    &r.workspace_id,
                    &r.user_id,
                    report_properties(message.is_scheduled, &r.report_id, None),
                );
                slack
                    .post_message(&r.channel_id, &format!("Sorry, we couldn't generate report {}", r.report_name))
                    .await?;
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(pair)) => pair,
        };

        if message.skip_posting {
            return Ok(());
        }

        match slack.get_user_info(&slack_user_id.id).await {
            Ok(health) => {
                if health.deleted && user.is_active {
                    self.user_repo.deactivate(&slack_user_id).await?;
                    info!(slack_id = %slack_user_id.id, "deactivating user account");
                    self.analytics.send(AnalyticsEvent::UserDeactivated, &r.workspace_id, &r.user_id, BTreeMap::new());
                    return Ok(());
                }
                if !health.deleted && !user.is_active {
                    self.user_repo.reactivate(&slack_user_id).await?;
                    info!(slack_id = %slack_user_id.id, "reactivating user account");
                    self.analytics.send(AnalyticsEvent::UserReactivated, &r.workspace_id, &r.user_id, BTreeMap::new());
                }
            }
            Err(SlackDeliveryError::AccountInactive) => {
                self.workspace_repo.delete_soft(&user.workspace_id).await?;
                info!(slack_id = %user.id, "workspace had been deactivated, removing it");
                self.analytics.send(AnalyticsEvent::WorkspaceDeleted, &r.workspace_id, &r.user_id, BTreeMap::new());
                return Ok(());
            }
            Err(SlackDeliveryError::NotInChannel) => {
                self.task_repo.delete_by_slack_info(&slack_user_id, &r.channel_id).await?;
                info!(slack_id = %user.id, "channel had been deactivated, removing related scheduled tasks");
                self.analytics.send(AnalyticsEvent::ChannelDeleted, &r.workspace_id, &r.user_id, BTreeMap::new());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let filter_description = r.filter.as_ref().map(describe_filter);
        for page in &rendered.pages {
            let title = message_title(&r.report_name, filter_description.as_deref(), &page.name);
            let comment = scheduled_comment(
                message.is_scheduled,
                &r.user_id,
                page_url(&report.web_url, &page.id),
            );

            if let Err(e) = slack
                .upload_file(&r.channel_id, &title, &page.filename, &comment, page.image_data.clone())
                .await
            {
                error!(error = %e, page_id = %page.id, "couldn't upload page");
                self.analytics.send(
                    AnalyticsEvent::SendReportMessageFailed,
                    &r.workspace_id,
                    &r.user_id,
                    report_properties(message.is_scheduled, &r.report_id, None),
                );
                return Err(e.into());
            }
        }

        self.analytics.send(
            AnalyticsEvent::ReportGenerated,
            &r.workspace_id,
            &r.user_id,
            report_properties(message.is_scheduled, &r.report_id, Some(r.filter.is_some())),
        );
        info!(total_pages = rendered.pages.len(), "completed sharing report");
        Ok(())
    }

    async fn share_to_teams(
        &self,
        trace_id: &str,
        message: &PostReportMessage,
        options: ShareOptions,
    ) -> anyhow::Result<()> {
        let r = &message.render;
        let teams = TeamsClient::new();
        let bot_token = &r.tokens.bot_access_token;

        let outcome = self.generate_report(trace_id, message, &options, None).await;

        let rendered = match outcome {
            Err(e) => {
                error!(error = %e, "couldn't generate report");
                self.analytics.send(
                    AnalyticsEvent::ReportFailedToGenerate,
                    &r.workspace_id,
                    &r.user_id,
                    report_properties(message.is_scheduled, &r.report_id, None),
                );
                if let Err(send_err) = teams
                    .send_failed_message(&r.workspace_id, &r.channel_id, bot_token, &r.report_name)
                    .await
                {
                    error!(error = %send_err, "couldn't send failed-report message");
                }
                return Err(e);
            }
            Ok(None) => return Ok(()),
            Ok(Some((_report, rendered))) => rendered,
        };

        for page in &rendered.pages {
            if let Err(e) = teams
                .send_page(&r.workspace_id, &r.channel_id, bot_token, &page.image_data)
                .await
            {
                error!(error = %e, page_id = %page.id, "couldn't upload page");
                self.analytics.send(
                    AnalyticsEvent::SendReportMessageFailed,
                    &r.workspace_id,
                    &r.user_id,
                    report_properties(message.is_scheduled, &r.report_id, None),
                );
                return Err(e.into());
            }
        }

        self.analytics.send(
            AnalyticsEvent::ReportGenerated,
            &r.workspace_id,
            &r.user_id,
            report_properties(message.is_scheduled, &r.report_id, Some(r.filter.is_some())),
        );
        info!(total_pages = rendered.pages.len(), "completed sharing report");
        Ok(())
    }
}

#[async_trait]
impl Worker for ReportWorker {
    fn supported_messages(&self) -> Vec<&'static str> {
        vec!["postReport"]
    }

    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let message: PostReportMessage = envelope.unpack()?;
        self.share_report(&envelope.trace_id, &message).await
    }
}
