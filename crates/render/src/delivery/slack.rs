//! Slack Web API client: `chat.postMessage`, `files.upload`, and
//! `users.info`, grounded on `report.usecase.go::shareToSlack`. No Slack SDK
//! exists in the pack (see DESIGN.md), so these are plain `reqwest` calls
//! against the documented endpoints.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

const API_BASE: &str = "https://slack.com/api";

/// Slack error codes that get special-cased rather than treated as
/// generic delivery failures.
pub const ERROR_ACCOUNT_INACTIVE: &str = "account_inactive";
pub const ERROR_NOT_IN_CHANNEL: &str = "not_in_channel";

#[derive(Debug, Error)]
pub enum SlackDeliveryError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("slack workspace was removed")]
    AccountInactive,
    #[error("slack channel was removed")]
    NotInChannel,
    #[error("slack api error: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct SlackEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: String,
    #[serde(flatten)]
    payload: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UserInfoPayload {
    user: SlackUserHealth,
}

#[derive(Debug, Deserialize)]
struct ConversationsPayload {
    channels: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    id: String,
}

/// Just the fields `shareToSlack` reads off `users.info` to decide whether
/// the local account row needs to be deactivated or reactivated.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackUserHealth {
    pub deleted: bool,
}

pub struct SlackClient {
    http: Client,
    bot_token: String,
}

impl SlackClient {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: Client::new(),
            bot_token,
        }
    }

    fn classify_error(code: &str) -> SlackDeliveryError {
        match code {
            ERROR_ACCOUNT_INACTIVE => SlackDeliveryError::AccountInactive,
            ERROR_NOT_IN_CHANNEL => SlackDeliveryError::NotInChannel,
            other => SlackDeliveryError::Api(other.to_string()),
        }
    }

    #[instrument(skip(self, text))]
    pub async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackDeliveryError> {
        let res: SlackEnvelope<serde_json::Value> = self
            .http
            .post(format!("{API_BASE}/chat.postMessage"))
            .bearer_auth(&self.bot_token)
            .json(&serde_json::json!({
                "channel": channel_id,
                "text": text,
                "as_user": true,
            }))
            .send()
            .await?
            .json()
            .await?;

        if !res.ok {
            return Err(Self::classify_error(&res.error));
        }
        Ok(())
    }

    #[instrument(skip(self, image_data))]
    pub async fn upload_file(
        &self,
        channel_id: &str,
        title: &str,
        filename: &str,
        comment: &str,
        image_data: Vec<u8>,
    ) -> Result<(), SlackDeliveryError> {
        let part = Part::bytes(image_data)
            .file_name(filename.to_string())
            .mime_str("image/png")?;

        let form = Form::new()
            .text("channels", channel_id.to_string())
            .text("title", title.to_string())
            .text("initial_comment", comment.to_string())
            .part("file", part);

        let res: SlackEnvelope<serde_json::Value> = self
            .http
            .post(format!("{API_BASE}/files.upload"))
            .bearer_auth(&self.bot_token)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        if !res.ok {
            return Err(Self::classify_error(&res.error));
        }
        Ok(())
    }

    /// Returns the Slack user's deletion status, or the classified error if
    /// the token's workspace/channel has gone away.
    #[instrument(skip(self))]
    pub async fn get_user_info(&self, slack_user_id: &str) -> Result<SlackUserHealth, SlackDeliveryError> {
        let res: SlackEnvelope<UserInfoPayload> = self
            .http
            .get(format!("{API_BASE}/users.info"))
            .bearer_auth(&self.bot_token)
            .query(&[("user", slack_user_id)])
            .send()
            .await?
            .json()
            .await?;

        if !res.ok {
            return Err(Self::classify_error(&res.error));
        }
        res.payload
            .map(|p| p.user)
            .ok_or_else(|| SlackDeliveryError::Api("missing user payload".to_string()))
    }

    /// Lists public and private channel ids visible to the bot token, used by
    /// the posting scheduler's deleted-channel sweep to detect a channel the
    /// workspace removed out from under a scheduled task.
    #[instrument(skip(self))]
    pub async fn list_channel_ids(&self) -> Result<Vec<String>, SlackDeliveryError> {
        let res: SlackEnvelope<ConversationsPayload> = self
            .http
            .get(format!("{API_BASE}/conversations.list"))
            .bearer_auth(&self.bot_token)
            .query(&[("types", "public_channel,private_channel"), ("exclude_archived", "false")])
            .send()
            .await?
            .json()
            .await?;

        if !res.ok {
            return Err(Self::classify_error(&res.error));
        }
        Ok(res
            .payload
            .map(|p| p.channels.into_iter().map(|c| c.id).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_error_codes() {
        assert!(matches!(
            SlackClient::classify_error(ERROR_ACCOUNT_INACTIVE),
            SlackDeliveryError::AccountInactive
        ));
        assert!(matches!(
            SlackClient::classify_error(ERROR_NOT_IN_CHANNEL),
            SlackDeliveryError::NotInChannel
        ));
        assert!(matches!(
            SlackClient::classify_error("something_else"),
            SlackDeliveryError::Api(_)
        ));
    }
}
