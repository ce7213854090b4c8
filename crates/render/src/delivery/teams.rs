//! Microsoft Graph channel-messages client, grounded on
//! `clients/teams/teams.go`. No Graph/Teams SDK exists in the pack (see
//! DESIGN.md), so this is a plain `reqwest` client against the documented
//! `POST /teams/{team}/channels/{channel}/messages` endpoint, embedding the
//! rendered PNG as a base64 hosted-content attachment.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

const GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Error)]
pub enum TeamsDeliveryError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    UnexpectedStatusCode(u16),
}

#[derive(Serialize)]
struct HostedContent<'a> {
    #[serde(rename = "@microsoft.graph.temporaryId")]
    temporary_id: &'a str,
    #[serde(rename = "contentBytes")]
    content_bytes: String,
    #[serde(rename = "contentType")]
    content_type: &'a str,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    #[serde(rename = "contentType")]
    content_type: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChannelMessage<'a> {
    #[serde(rename = "messageType")]
    message_type: &'a str,
    body: MessageBody<'a>,
    #[serde(rename = "hostedContents")]
    hosted_contents: Vec<HostedContent<'a>>,
}

pub struct TeamsClient {
    http: Client,
}

impl Default for TeamsClient {
    fn default() -> Self {
        Self { http: Client::new() }
    }
}

impl TeamsClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn endpoint(&self, workspace_id: &str, channel_id: &str) -> String {
        format!("{GRAPH_ENDPOINT}/teams/{workspace_id}/channels/{channel_id}/messages")
    }

    async fn post(&self, url: &str, bot_token: &str, body: &impl Serialize) -> Result<(), TeamsDeliveryError> {
        let res = self
            .http
            .post(url)
            .bearer_auth(bot_token)
            .json(body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(TeamsDeliveryError::UnexpectedStatusCode(status.as_u16()));
        }
        Ok(())
    }

    /// Posts a page's PNG as a hosted-content image, embedded via an HTML
    /// img tag pointing at the attached content.
    #[instrument(skip(self, image_data, bot_token))]
    pub async fn send_page(
        &self,
        workspace_id: &str,
        channel_id: &str,
        bot_token: &str,
        image_data: &[u8],
    ) -> Result<(), TeamsDeliveryError> {
        let encoded = BASE64.encode(image_data);
        let content = "Report generated</br><div><span><img height=\"720\" \
            src=\"../hostedContents/1/$value\" width=\"1280\" \
            style=\"vertical-align:bottom; width:1280px; height:720px\"></span>\n</div>"
            .to_string();

        let message = ChannelMessage {
            message_type: "message",
            body: MessageBody {
                content_type: "html",
                content,
            },
            hosted_contents: vec![HostedContent {
                temporary_id: "1",
                content_bytes: encoded,
                content_type: "image/png",
            }],
        };

        self.post(&self.endpoint(workspace_id, channel_id), bot_token, &message)
            .await
    }

    #[instrument(skip(self, bot_token))]
    pub async fn send_failed_message(
        &self,
        workspace_id: &str,
        channel_id: &str,
        bot_token: &str,
        report_name: &str,
    ) -> Result<(), TeamsDeliveryError> {
        let message = ChannelMessage {
            message_type: "message",
            body: MessageBody {
                content_type: "html",
                content: format!("Sorry, we couldn't generate report {report_name}"),
            },
            hosted_contents: vec![],
        };

        self.post(&self.endpoint(workspace_id, channel_id), bot_token, &message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_messages_endpoint() {
        let client = TeamsClient::new();
        assert_eq!(
            client.endpoint("T1", "C1"),
            "https://graph.microsoft.com/v1.0/teams/T1/channels/C1/messages"
        );
    }
}
