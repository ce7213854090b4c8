//! Threshold checker for a single visual: loads the embedded alert
//! template, listens for a console-bridge signal the template emits once
//! the visual's value is known, and compares it against the alert's
//! threshold. Grounded on `utils/alert/checkalert.go`'s
//! `doesVisualDataExceedThreshold`.

use std::time::Duration;

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::runtime::EventConsoleApiCalled;
use futures::StreamExt;
use reportbot_shared::domain::AlertCondition;
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, instrument};

const ALERT_TEMPLATE: &str = "alert_template.html";
const ALERT_ANALYSIS_INDICATOR: &str = "alertAnalysis_";
const REPORT_ERROR_INDICATOR: &str = "reportError_";
const LISTEN_CONSOLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AlertCheckError {
    #[error("browser automation error: {0}")]
    Browser(String),
    #[error("timed out waiting for the visual's value")]
    Timeout,
    #[error("report failed to load for alert checking")]
    ReportNotLoaded,
    #[error("visual value {0:?} isn't a number")]
    NotANumber(String),
}

pub struct AlertCheckOutcome {
    pub threshold_exceeded: bool,
    pub image_data: Vec<u8>,
}

fn condition_exceeded(value: f64, condition: AlertCondition, threshold: f64) -> bool {
    match condition {
        AlertCondition::Below => value < threshold,
        AlertCondition::Above => value > threshold,
        AlertCondition::Equal => value == threshold,
    }
}

/// Navigates a fresh tab to the alert template (configured with the
/// visual's access token/report id/visual name), listens on the CDP
/// console-API-called event for the template's `alertAnalysis_<value>` or
/// `reportError_` markers, and — if the threshold is exceeded — captures a
/// screenshot of the rendered visual for posting.
#[instrument(skip(browser, resources_dir), fields(report_id))]
pub async fn check_alert_and_capture(
    browser: &Browser,
    resources_dir: &std::path::Path,
    access_token: &str,
    report_id: &str,
    visual_name: &str,
    condition: AlertCondition,
    threshold: f64,
) -> Result<AlertCheckOutcome, AlertCheckError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| AlertCheckError::Browser(format!("couldn't open page: {e}")))?;

    let mut events = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| AlertCheckError::Browser(format!("couldn't listen for console events: {e}")))?;

    let path = resources_dir.join(ALERT_TEMPLATE);
    let url = format!("file://{}", path.display());

    let config = json!({
        "accessToken": access_token,
        "reportId": report_id,
        "visualName": visual_name,
        "threshold": threshold,
        "condition": condition_str(condition),
    });
    let config_json = serde_json::to_string(&config)?;
    let goto_url = format!("{url}#{config_json}");

    page.goto(goto_url)
        .await
        .map_err(|e| AlertCheckError::Browser(format!("couldn't open html file: {e}")))?;

    let exceeded = timeout(LISTEN_CONSOLE_TIMEOUT, async {
        while let Some(event) = events.next().await {
            let Some(first_arg) = event.args.first().and_then(|a| a.value.as_ref()) else {
                continue;
            };
            let raw = first_arg.to_string();

            if let Some(rest) = raw.strip_prefix(ALERT_ANALYSIS_INDICATOR) {
                let value_str = rest.trim_matches('"');
                let value: f64 = value_str
                    .parse()
                    .map_err(|_| AlertCheckError::NotANumber(value_str.to_string()))?;
                return Ok(condition_exceeded(value, condition, threshold));
            }
            if raw.contains(REPORT_ERROR_INDICATOR) {
                return Err(AlertCheckError::ReportNotLoaded);
            }
        }
        Err(AlertCheckError::Timeout)
    })
    .await
    .map_err(|_| AlertCheckError::Timeout)??;

    if !exceeded {
        info!(report_id = %report_id, visual_name = %visual_name, "threshold isn't exceeded");
        let _ = page.close().await;
        return Ok(AlertCheckOutcome {
            threshold_exceeded: false,
            image_data: Vec::new(),
        });
    }

    let image_data = page
        .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
        .await
        .map_err(|e| AlertCheckError::Browser(format!("couldn't capture screenshot: {e}")))?;
    let _ = page.close().await;

    Ok(AlertCheckOutcome {
        threshold_exceeded: true,
        image_data,
    })
}

/// Rendered the same way in the template config and in the Slack
/// notification that follows a triggered alert.
pub fn condition_str(c: AlertCondition) -> &'static str {
    match c {
        AlertCondition::Above => "above",
        AlertCondition::Below => "below",
        AlertCondition::Equal => "equal",
    }
}

impl From<serde_json::Error> for AlertCheckError {
    fn from(e: serde_json::Error) -> Self {
        AlertCheckError::Browser(format!("couldn't marshal alert config: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn above_is_exceeded_when_value_is_greater() {
        assert!(condition_exceeded(11.0, AlertCondition::Above, 10.0));
        assert!(!condition_exceeded(9.0, AlertCondition::Above, 10.0));
    }

    #[test]
    fn below_is_exceeded_when_value_is_lesser() {
        assert!(condition_exceeded(9.0, AlertCondition::Below, 10.0));
        assert!(!condition_exceeded(11.0, AlertCondition::Below, 10.0));
    }

    #[test]
    fn equal_requires_exact_match() {
        assert!(condition_exceeded(10.0, AlertCondition::Equal, 10.0));
        assert!(!condition_exceeded(10.1, AlertCondition::Equal, 10.0));
    }
}
