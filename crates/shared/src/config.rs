use std::env;
use std::time::Duration;

/// Process configuration, loaded once at startup via `dotenvy::dotenv()`
/// first, then plain `std::env::var` reads with typed fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,

    pub mq_implementation: String,
    pub mq_url: String,
    pub mq_batch_size: u32,
    pub mq_polling_interval: Duration,

    pub messagehandler_concurrency_level: usize,
    pub shutdown_timeout: Duration,

    pub browser_headless: bool,
    pub browser_tab_timeout: Duration,
    pub browser_min_action_timeout: Duration,
    pub browser_screenshot_delay: Duration,
    pub browser_default_viewport_width: u32,
    pub browser_default_viewport_height: u32,
    pub browser_viewport_margin: u32,
    pub browser_display_density: f64,
    pub browser_resources_directory: String,

    pub max_attempts: u32,

    pub powerbi_client_id: String,
    pub powerbi_client_secret: String,
    pub powerbi_token_endpoint: String,

    pub slack_bot_token: Option<String>,
    pub teams_tenant_id: Option<String>,
    pub teams_client_id: Option<String>,
    pub teams_client_secret: Option<String>,

    pub hash_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: require_var("DATABASE_URL")?,
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),

            mq_implementation: var_or("MQ_IMPLEMENTATION", "redis"),
            mq_url: var_or("MQ_URL", "redis://127.0.0.1:6379"),
            mq_batch_size: var_parsed_or("MQ_BATCHSIZE", 10),
            mq_polling_interval: Duration::from_millis(var_parsed_or("MQ_POLLINGINTERVAL", 1_000)),

            messagehandler_concurrency_level: var_parsed_or("MESSAGEHANDLER_CONCURRENCYLEVEL", 5),
            shutdown_timeout: Duration::from_secs(var_parsed_or("SHUTDOWN_TIMEOUT", 30)),

            browser_headless: var_parsed_or("BROWSER_HEADLESS", true),
            browser_tab_timeout: Duration::from_secs(var_parsed_or("BROWSER_TABTIMEOUT", 60)),
            browser_min_action_timeout: Duration::from_secs(var_parsed_or(
                "BROWSER_MINACTIONTIMEOUT",
                15,
            )),
            browser_screenshot_delay: Duration::from_millis(var_parsed_or(
                "BROWSER_SCREENSHOTDELAY",
                1_500,
            )),
            browser_default_viewport_width: var_parsed_or("BROWSER_DEFAULTVIEWPORTWIDTH", 1_600),
            browser_default_viewport_height: var_parsed_or("BROWSER_DEFAULTVIEWPORTHEIGHT", 900),
            browser_viewport_margin: var_parsed_or("BROWSER_VIEWPORTMARGIN", 16),
            browser_display_density: var_parsed_or("BROWSER_DISPLAYDENSITY", 1.0),
            browser_resources_directory: var_or("BROWSER_RESOURCESDIRECTORY", "resources"),

            max_attempts: var_parsed_or("MAX_ATTEMPTS", 3),

            powerbi_client_id: var_or("POWERBI_CLIENT_ID", ""),
            powerbi_client_secret: var_or("POWERBI_CLIENT_SECRET", ""),
            powerbi_token_endpoint: var_or(
                "POWERBI_TOKEN_ENDPOINT",
                "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            ),

            slack_bot_token: env::var("SLACK_BOT_TOKEN").ok(),
            teams_tenant_id: env::var("TEAMS_TENANT_ID").ok(),
            teams_client_id: env::var("TEAMS_CLIENT_ID").ok(),
            teams_client_secret: env::var("TEAMS_CLIENT_SECRET").ok(),

            hash_secret: var_or("HASH_SECRET", "dev-only-insecure-secret"),
        })
    }
}

fn require_var(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn var_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_parsed_or_falls_back_on_missing_or_invalid() {
        assert_eq!(var_parsed_or::<u32>("REPORTBOT_TEST_DOES_NOT_EXIST", 7), 7);
    }
}
