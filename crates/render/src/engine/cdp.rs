//! Headless-Chrome render engine driven over the Chrome DevTools Protocol.
//! Grounded on `reportengine.cdp.go`/`cdputils.go`: a long-lived `Browser`
//! handle is started once and reused across jobs, restarted transparently if
//! it died, and each render opens its own `Page` bounded by a tab timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::ScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use reportbot_shared::config::Config;
use reportbot_shared::ksuid::timestamp_parts;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::errors::{PbiError, RenderError};
use super::filters::to_report_filter;
use super::{RenderedPage, RenderedReport, ReportEngine, ShareOptions};

const REPORT_TEMPLATE: &str = "report_template.html";

#[derive(Debug, Default, Deserialize)]
struct CustomPageSize {
    #[serde(default)]
    width: i64,
    #[serde(default)]
    height: i64,
}

struct BrowserHandle {
    browser: Browser,
    /// Keeps the event-reader task alive for as long as the browser is;
    /// dropping it would stop `Browser` from receiving CDP events at all.
    _handler: JoinHandle<()>,
}

/// A [`ReportEngine`] backed by a single headless Chrome instance, launched
/// lazily and restarted on demand if the process exits. `CDPEngine` keeps
/// one allocator/browser context and revives it in `NewContext` whenever
/// `browserCtx.Err() == context.Canceled`; the `Mutex` here plays the same
/// role `chromedp`'s internal context machinery plays there, serializing
/// restarts without serializing renders themselves (each render opens its
/// own `Page`, same as each `NewContext` opened its own tab context).
pub struct CdpEngine {
    config: Arc<Config>,
    resources_dir: PathBuf,
    handle: Mutex<Option<BrowserHandle>>,
}

impl CdpEngine {
    pub fn new(config: Arc<Config>) -> Self {
        let resources_dir = PathBuf::from(&config.browser_resources_directory);
        Self {
            config,
            resources_dir,
            handle: Mutex::new(None),
        }
    }

    async fn browser_config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder();
        if self.config.browser_headless {
            builder = builder.headless_mode(chromiumoxide::browser::HeadlessMode::New);
        } else {
            builder = builder.with_head();
        }
        builder
            .build()
            .map_err(|e| RenderError::Browser(format!("couldn't build browser config: {e}")))
    }

    #[instrument(skip(self))]
    async fn start_browser(&self) -> Result<(), RenderError> {
        let config = self.browser_config().await?;
        let (browser, mut event_stream) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Browser(format!("couldn't launch browser: {e}")))?;

        let _handler = tokio::spawn(async move {
            use futures::StreamExt;
            while event_stream.next().await.is_some() {}
        });

        let mut handle = self.handle.lock().await;
        *handle = Some(BrowserHandle { browser, _handler });
        Ok(())
    }

    /// Ensures a browser process is running. Mirrors `NewContext`'s
    /// revive-on-death check, made explicit here via `new_page`'s own
    /// restart-once-and-retry rather than probing the process beforehand.
    async fn ensure_browser(&self) -> Result<(), RenderError> {
        let started = self.handle.lock().await.is_some();
        if !started {
            self.start_browser().await?;
        }
        Ok(())
    }

    fn resource_url(&self, resource: &str) -> Result<String, RenderError> {
        let path = self.resources_dir.join(resource);
        if !path.is_file() {
            return Err(RenderError::ResourceNotFound(path.display().to_string()));
        }
        let absolute = path
            .canonicalize()
            .map_err(|e| RenderError::Browser(format!("couldn't resolve resource path: {e}")))?;
        Ok(format!("file://{}", absolute.display()))
    }

    /// Opens a new tab, restarting the browser process once and retrying if
    /// the existing handle turns out to be dead — the revive-on-death path
    /// `NewContext` takes when `browserCtx.Err()` reports the browser
    /// process exited.
    async fn new_page(&self) -> Result<Page, RenderError> {
        match self.try_new_page().await {
            Ok(page) => Ok(page),
            Err(_) => {
                warn!("browser appears to have died, restarting");
                self.start_browser().await?;
                self.try_new_page().await
            }
        }
    }

    async fn try_new_page(&self) -> Result<Page, RenderError> {
        let handle = self.handle.lock().await;
        let handle = handle
            .as_ref()
            .ok_or_else(|| RenderError::Browser("browser not started".to_string()))?;
        handle
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Browser(format!("couldn't open page: {e}")))
    }

    async fn browser(&self) -> Result<Browser, RenderError> {
        let handle = self.handle.lock().await;
        handle
            .as_ref()
            .map(|h| h.browser.clone())
            .ok_or_else(|| RenderError::Browser("browser not started".to_string()))
    }

    /// Closes the browser process, if one was ever started. Called once
    /// during worker shutdown, after the dispatcher and scheduler contexts
    /// have both been cancelled, so no render is still relying on it.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut handle = self.handle.lock().await;
        let Some(mut h) = handle.take() else {
            return;
        };
        if let Err(e) = h.browser.close().await {
            warn!(error = %e, "couldn't cleanly close browser");
        }
        h._handler.abort();
    }

    /// Runs a single alert-visual threshold check against the same
    /// long-lived browser instance report renders share — `checkalert.go`
    /// pulls its browser handle from the same process-global singleton
    /// `reportengine.cdp.go` uses.
    #[instrument(skip(self, access_token))]
    pub async fn check_alert(
        &self,
        access_token: &str,
        report_id: &str,
        visual_name: &str,
        condition: reportbot_shared::domain::AlertCondition,
        threshold: f64,
    ) -> Result<crate::alert::AlertCheckOutcome, crate::alert::AlertCheckError> {
        self.ensure_browser()
            .await
            .map_err(|e| crate::alert::AlertCheckError::Browser(e.to_string()))?;
        let browser = self
            .browser()
            .await
            .map_err(|e| crate::alert::AlertCheckError::Browser(e.to_string()))?;

        crate::alert::check_alert_and_capture(
            &browser,
            &self.resources_dir,
            access_token,
            report_id,
            visual_name,
            condition,
            threshold,
        )
        .await
    }
}

#[async_trait::async_trait]
impl ReportEngine for CdpEngine {
    #[instrument(skip(self, options, cancel), fields(report_id = %options.report_id))]
    async fn render_report(
        &self,
        options: &ShareOptions,
        cancel: CancellationToken,
    ) -> Result<RenderedReport, RenderError> {
        self.ensure_browser().await?;

        let url = self.resource_url(REPORT_TEMPLATE)?;
        let tab_timeout = self.config.browser_tab_timeout;

        let render = async {
            let page = self.new_page().await?;
            let result = self.run_render(&page, &url, options).await;
            let _ = page.close().await;
            result
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RenderError::Timeout("render cancelled by a concurrent fetch failure")),
            result = tokio::time::timeout(tab_timeout, render) => {
                result.map_err(|_| RenderError::Timeout("tab_timeout"))?
            }
        }
    }
}

impl CdpEngine {
    async fn run_render(
        &self,
        page: &Page,
        url: &str,
        options: &ShareOptions,
    ) -> Result<RenderedReport, RenderError> {
        let min_action_timeout = self.config.browser_min_action_timeout;

        tokio::time::timeout(min_action_timeout, page.goto(url))
            .await
            .map_err(|_| RenderError::Timeout("navigate"))?
            .map_err(|e| RenderError::Browser(format!("couldn't navigate: {e}")))?;

        tokio::time::timeout(min_action_timeout, page.wait_for_navigation())
            .await
            .map_err(|_| RenderError::Timeout("wait_loaded"))?
            .map_err(|e| RenderError::Browser(format!("couldn't wait for page load: {e}")))?;

        self.initialize(page).await?;
        self.configure(page, options).await?;
        self.load_report(page).await?;

        let mut rendered_pages = Vec::with_capacity(options.pages.len());
        for report_page in &options.pages {
            let screenshot = self.render_page(page, report_page, options).await?;
            rendered_pages.push(screenshot);
        }

        Ok(RenderedReport {
            id: options.report_id.clone(),
            name: options.report_name.clone(),
            pages: rendered_pages,
        })
    }

    #[instrument(skip(self, page))]
    async fn initialize(&self, page: &Page) -> Result<(), RenderError> {
        let started_at = SystemTime::now();
        tokio::time::timeout(
            self.config.browser_min_action_timeout,
            page.evaluate("window.reportRenderer.initialize();"),
        )
        .await
        .map_err(|_| RenderError::Timeout("initialize"))?
        .map_err(|e| RenderError::Browser(format!("couldn't initialize: {e}")))?;
        info!(completed_in = ?started_at.elapsed().unwrap_or_default(), "initialized");
        Ok(())
    }

    #[instrument(skip(self, page, options))]
    async fn configure(&self, page: &Page, options: &ShareOptions) -> Result<(), RenderError> {
        let filters = options
            .filter
            .as_ref()
            .map(|f| vec![to_report_filter(f)])
            .unwrap_or_default();

        let load_configuration = json!({
            "accessToken": options.access_token,
            "id": options.report_id,
            "filters": filters,
        });
        let config_json = serde_json::to_string(&load_configuration)?;

        let js = format!("window.reportRenderer.addConfig({config_json});");
        tokio::time::timeout(self.config.browser_min_action_timeout, page.evaluate(js))
            .await
            .map_err(|_| RenderError::Timeout("configure"))?
            .map_err(|e| RenderError::Browser(format!("couldn't add configuration: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self, page))]
    async fn load_report(&self, page: &Page) -> Result<(), RenderError> {
        let started_at = SystemTime::now();
        let result = tokio::time::timeout(
            self.config.browser_min_action_timeout,
            page.evaluate("window.reportRenderer.loadReport();"),
        )
        .await;

        match result {
            Ok(Ok(_)) => {
                info!(completed_in = ?started_at.elapsed().unwrap_or_default(), "loaded report");
                Ok(())
            }
            Ok(Err(e)) => Err(self.as_pbi_error(e.to_string(), true)),
            Err(_) => Err(RenderError::Timeout("load_report")),
        }
    }

    #[instrument(skip(self, page, options), fields(page_id = %report_page.id))]
    async fn render_page(
        &self,
        page: &Page,
        report_page: &reportbot_shared::queue::messages::PageMessage,
        options: &ShareOptions,
    ) -> Result<RenderedPage, RenderError> {
        let min_action_timeout = self.config.browser_min_action_timeout;

        let page_id_json = serde_json::to_string(&report_page.id)?;
        tokio::time::timeout(
            min_action_timeout,
            page.evaluate(format!("window.reportRenderer.setPage({page_id_json});")),
        )
        .await
        .map_err(|_| RenderError::Timeout("set_page"))?
        .map_err(|e| RenderError::Browser(format!("couldn't set page: {e}")))?;

        let page_size: CustomPageSize = tokio::time::timeout(
            min_action_timeout,
            page.evaluate("window.reportRenderer.getPageSize();"),
        )
        .await
        .map_err(|_| RenderError::Timeout("get_page_size"))?
        .map_err(|e| RenderError::Browser(format!("couldn't get page size: {e}")))?
        .into_value()
        .unwrap_or_default();

        let height = if page_size.height != 0 {
            page_size.height as u32
        } else {
            self.config.browser_default_viewport_height
        } + self.config.browser_viewport_margin;

        let width = if page_size.width != 0 {
            page_size.width as u32
        } else {
            self.config.browser_default_viewport_width
        } + self.config.browser_viewport_margin;

        tokio::time::timeout(
            min_action_timeout,
            page.execute(
                SetDeviceMetricsOverrideParams::builder()
                    .width(width as i64)
                    .height(height as i64)
                    .device_scale_factor(self.config.browser_display_density)
                    .mobile(false)
                    .build()
                    .map_err(|e| RenderError::Browser(format!("couldn't build viewport override: {e}")))?,
            ),
        )
        .await
        .map_err(|_| RenderError::Timeout("emulate_viewport"))?
        .map_err(|e| RenderError::Browser(format!("couldn't set page size: {e}")))?;

        let started_at = SystemTime::now();
        let render_result = tokio::time::timeout(
            min_action_timeout,
            page.evaluate("window.reportRenderer.renderReport();"),
        )
        .await;
        match render_result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(self.as_pbi_error(e.to_string(), false)),
            Err(_) => return Err(RenderError::Timeout("render_report")),
        }
        let completed_in = started_at.elapsed().unwrap_or_default();
        tracing::debug!(?completed_in, "rendered page");

        // The Bing maps visual doesn't fire a report-rendered completion
        // event, so we pad with a fixed delay before capturing.
        tokio::time::sleep(self.config.browser_screenshot_delay).await;

        let image_data = tokio::time::timeout(
            min_action_timeout,
            page.screenshot(ScreenshotParams::builder().format(ScreenshotFormat::Png).build()),
        )
        .await
        .map_err(|_| RenderError::Timeout("capture_screenshot"))?
        .map_err(|e| RenderError::Browser(format!("couldn't capture screenshot: {e}")))?;

        let filename = self.filename_for(options, report_page);

        Ok(RenderedPage {
            id: report_page.id.clone(),
            name: report_page.name.clone(),
            filename,
            image_data,
        })
    }

    fn filename_for(
        &self,
        options: &ShareOptions,
        report_page: &reportbot_shared::queue::messages::PageMessage,
    ) -> String {
        let (secs, payload) = timestamp_parts(&options.trace_id);
        let timestamp = humantime_timestamp(secs, payload);

        match &options.filter {
            Some(f) => format!(
                "{} ({}): {} {}.png",
                options.report_name,
                super::filters::describe(f),
                report_page.name,
                timestamp
            ),
            None => format!("{}: {} {}.png", options.report_name, report_page.name, timestamp),
        }
    }

    /// Best-effort decode of a renderer-thrown JS error into a [`PbiError`];
    /// if the thrown value isn't shaped like one, the raw message is kept as
    /// a browser error instead of being force-fit into the PBI taxonomy.
    fn as_pbi_error(&self, raw: String, loading: bool) -> RenderError {
        match serde_json::from_str::<PbiError>(&raw) {
            Ok(pbi) if loading => RenderError::Load(pbi),
            Ok(pbi) => RenderError::Render(pbi),
            Err(_) => {
                warn!(error = %raw, "renderer threw a non-PbiError exception");
                RenderError::Browser(raw)
            }
        }
    }
}

fn humantime_timestamp(unix_secs: i64, payload: u32) -> String {
    let base = UNIX_EPOCH + Duration::from_secs(unix_secs.max(0) as u64);
    let datetime: chrono::DateTime<chrono::Utc> = base.into();
    format!("{} {}", datetime.to_rfc3339(), payload)
}
