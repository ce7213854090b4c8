use serde::{Deserialize, Serialize};

/// The only message kind this system dispatches today.
pub const MESSAGE_POST_REPORT: &str = "postReport";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMessage {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterMessage {
    pub table: String,
    pub column: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<String>,
    pub condition_operator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_condition_operator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub bot_access_token: String,
    pub power_bi_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderReportMessage {
    pub client_id: String,
    pub report_id: String,
    pub report_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterMessage>,
    pub pages: Vec<PageMessage>,
    pub user_id: String,
    pub channel_id: String,
    pub workspace_id: String,
    pub unique_id: String,
    pub tokens: Tokens,
    pub retry_attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReportMessage {
    #[serde(flatten)]
    pub render: RenderReportMessage,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_scheduled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_posting: bool,
}
