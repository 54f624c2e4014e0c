use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use sluice_core::error::AppError;
use sluice_core::models::{ContentType, FetchRequest, RawContent};
use sluice_core::traits::{ExecuteOptions, Provider};
use sluice_core::validation::BrowserParameters;
use url::Url;

/// Provider name, also the parameter kind this scraper reads.
pub const BROWSER_PROVIDER: &str = "browser";

/// Headless-browser scraper using Chromium via the Chrome DevTools Protocol.
///
/// Unlike [`crate::ReqwestFetcher`], this renders JavaScript before returning
/// the HTML, making it suitable for SPAs and pages with lazy-loaded content.
///
/// A single Chromium process is shared across all clones of this struct;
/// each execution opens a new tab, grabs the rendered HTML, and closes the tab.
/// `headless` and the viewport are launch options and are taken from the
/// parameters passed to [`launch`](Self::launch); the remaining browser
/// parameters apply per request.
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
}

impl BrowserFetcher {
    /// Launches a headless Chromium with the default browser parameters.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`
    /// or one of the well-known install locations.
    pub async fn new() -> Result<Self, AppError> {
        Self::launch(&BrowserParameters::default()).await
    }

    pub async fn launch(params: &BrowserParameters) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .window_size(params.viewport_width, params.viewport_height);

        if !params.headless {
            builder = builder.with_head();
        }

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags, so prefer the real binary when one is found.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        if params.headless {
            builder = builder.arg("--headless=new");
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::Generic(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
        })
    }

    async fn render(&self, url: &str, params: &BrowserParameters) -> Result<String, AppError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| AppError::HttpError(format!("Navigation failed: {e}")))?;

        if params.wait_until == "networkidle" {
            page.wait_for_navigation()
                .await
                .map_err(|e| AppError::HttpError(format!("Navigation did not settle: {e}")))?;
        }

        let selector = params.wait_for_selector.as_deref().unwrap_or("body");
        page.find_element(selector)
            .await
            .map_err(|e| AppError::HttpError(format!("Selector '{selector}' not found: {e}")))?;

        if params.slow_mo_ms > 0 {
            tokio::time::sleep(Duration::from_millis(params.slow_mo_ms)).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))?;

        if let Err(e) = page.close().await {
            tracing::debug!(url, error = %e, "Failed to close browser tab");
        }

        Ok(html)
    }
}

/// Locate the real Chrome/Chromium binary, honouring `CHROME_BIN` first.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    std::env::var("CHROME_BIN")
        .ok()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .or_else(|| CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists()))
}

#[async_trait]
impl Provider<FetchRequest, RawContent> for BrowserFetcher {
    fn name(&self) -> &str {
        BROWSER_PROVIDER
    }

    fn can_handle(&self, request: &FetchRequest) -> bool {
        !request.content_type.is_document()
            && Url::parse(&request.url)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false)
    }

    async fn execute(
        &self,
        request: &FetchRequest,
        _opts: &ExecuteOptions,
    ) -> Result<RawContent, AppError> {
        let params: BrowserParameters = request.parameters_for(BROWSER_PROVIDER)?;
        if !params.javascript {
            tracing::debug!(url = %request.url, "javascript=false is ignored by the Chromium scraper");
        }

        let html = tokio::time::timeout(
            Duration::from_millis(params.timeout_ms),
            self.render(&request.url, &params),
        )
        .await
        .map_err(|_| AppError::Timeout(params.timeout_ms))??;

        Ok(RawContent {
            url: request.url.clone(),
            body: html.into_bytes(),
            mime: Some("text/html".to_string()),
            content_type: ContentType::Html,
            provider: BROWSER_PROVIDER.to_string(),
        })
    }
}
