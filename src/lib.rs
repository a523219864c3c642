pub mod browser;
pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod filter;
pub mod manifest;
pub mod metadata;
pub mod paginate;
pub mod results;
pub mod utils;

// Re-export commonly used types for convenience
pub use browser::session::{SessionCredential, SessionMode};
pub use error::{ExportError, SessionError, Warning};
pub use results::ImageRecord;

use browser::BrowserTab;
use config::ExportConfig;
use download::{DownloadOptions, Downloader};
use feed::intercept::{ResponseInterceptor, ResponseSummary};
use filter::{FeedFilter, FeedFilterConfig, compile_all};
use manifest::Manifest;
use paginate::{OpenedFeed, PaginationDriver, StopReason};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the screenshot saved when no feed page could be captured
const NO_FEED_SCREENSHOT: &str = "debug_no_feed.png";

/// Name of the summary of API responses seen on feed URLs
const RESPONSES_DEBUG_FILE: &str = "api_responses_debug.json";

/// What a finished export produced
#[derive(Debug)]
pub struct ExportReport {
    pub records: usize,
    pub pages: usize,
    pub scrolls: usize,
    pub stop: StopReason,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    pub metadata_path: PathBuf,
    pub warnings: Vec<Warning>,
}

impl ExportReport {
    pub fn log_summary(&self) {
        ::log::info!(
            "Export complete: {} records from {} pages ({} scrolls, stopped: {:?})",
            self.records,
            self.pages,
            self.scrolls,
            self.stop
        );
        ::log::info!(
            "Images: {} downloaded, {} already present, {} failed",
            self.downloaded,
            self.skipped,
            self.failed.len()
        );
        ::log::info!("Metadata: {}", self.metadata_path.display());
        if !self.warnings.is_empty() {
            ::log::warn!("{} warnings during export:", self.warnings.len());
            for warning in &self.warnings {
                ::log::warn!("  {}", warning);
            }
        }
    }
}

/// Main builder for an export run
pub struct Exporter {
    mode: SessionMode,
    config: ExportConfig,
    output_dir: Option<PathBuf>,
    webdriver_url: Option<String>,
    headless: Option<bool>,
    max_scrolls: Option<usize>,
    scroll_timeout: Option<Duration>,
    login_timeout: Option<Duration>,
    thumbnail_fallback: Option<bool>,
    debug_responses: Option<bool>,
    metadata_only: bool,
}

impl Exporter {
    /// Create a new Exporter for the given session mode with default settings
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            config: ExportConfig::default(),
            output_dir: None,
            webdriver_url: None,
            headless: None,
            max_scrolls: None,
            scroll_timeout: None,
            login_timeout: None,
            thumbnail_fallback: None,
            debug_responses: None,
            metadata_only: false,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: ExportConfig) -> Self {
        self.config = config;
        self
    }

    /// Overlay the fields present in a JSON config file
    pub fn with_config_file(
        self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, error::ConfigError> {
        let config = self.config.overlay_file(path)?;
        Ok(self.with_config(config))
    }

    /// Overlay the fields present in a JSON string
    pub fn with_config_str(self, config_str: &str) -> Result<Self, error::ConfigError> {
        let config = self.config.overlay_json(config_str)?;
        Ok(self.with_config(config))
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_webdriver_url(mut self, url: impl Into<String>) -> Self {
        self.webdriver_url = Some(url.into());
        self
    }

    /// Run the browser without a window (honored in token mode)
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    pub fn with_max_scrolls(mut self, max_scrolls: usize) -> Self {
        self.max_scrolls = Some(max_scrolls);
        self
    }

    /// Set how long to wait for a new page after each scroll
    pub fn with_scroll_timeout(mut self, timeout_seconds: u64) -> Self {
        self.scroll_timeout = Some(Duration::from_secs(timeout_seconds));
        self
    }

    /// Set how long to wait for the operator to log in
    pub fn with_login_timeout(mut self, timeout_seconds: u64) -> Self {
        self.login_timeout = Some(Duration::from_secs(timeout_seconds));
        self
    }

    pub fn with_thumbnail_fallback(mut self, enabled: bool) -> Self {
        self.thumbnail_fallback = Some(enabled);
        self
    }

    /// Write the summary of API responses seen on feed URLs even when the
    /// feed was recognized
    pub fn with_debug_responses(mut self, enabled: bool) -> Self {
        self.debug_responses = Some(enabled);
        self
    }

    /// Collect and write metadata without downloading any image
    pub fn metadata_only(mut self, metadata_only: bool) -> Self {
        self.metadata_only = metadata_only;
        self
    }

    /// Effective configuration: file/string config, then builder overrides,
    /// then the `WEBDRIVER_URL` environment variable if no URL was given.
    pub fn resolved_config(&self) -> ExportConfig {
        let mut config = self.config.clone();
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(headless) = self.headless {
            config.headless = headless;
        }
        if let Some(max_scrolls) = self.max_scrolls {
            config.max_scrolls = max_scrolls;
        }
        if let Some(timeout) = self.scroll_timeout {
            config.scroll_timeout_secs = timeout.as_secs();
        }
        if let Some(timeout) = self.login_timeout {
            config.login_timeout_secs = timeout.as_secs();
        }
        if let Some(enabled) = self.thumbnail_fallback {
            config.thumbnail_fallback = enabled;
        }
        if let Some(enabled) = self.debug_responses {
            config.debug_responses = enabled;
        }

        match &self.webdriver_url {
            Some(url) => config.webdriver_url = url.clone(),
            None => {
                if let Ok(webdriver_url) = std::env::var("WEBDRIVER_URL") {
                    if !webdriver_url.is_empty() {
                        config.webdriver_url = webdriver_url;
                    }
                }
            }
        }
        config
    }

    /// Establish the session, collect the whole feed, download the images
    /// and write the metadata file.
    pub async fn run(self) -> Result<ExportReport, ExportError> {
        let config = self.resolved_config();

        let filter = FeedFilter::new(FeedFilterConfig {
            include_patterns: config.feed_include_patterns.clone(),
            exclude_patterns: config.feed_exclude_patterns.clone(),
        })?;
        let login_patterns = compile_all(&config.authenticated_patterns)?;
        for url in config.feed_urls.iter().chain([&config.site_url]) {
            url::Url::parse(url).map_err(|source| error::ConfigError::Url {
                url: url.clone(),
                source,
            })?;
        }

        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|source| ExportError::OutputDir {
                path: config.output_dir.clone(),
                source,
            })?;

        let tab = browser::session::establish(&config, &login_patterns, &self.mode).await?;
        let result = export_with(&tab, &config, filter, self.metadata_only).await;
        tab.close().await;
        result
    }
}

async fn export_with(
    tab: &BrowserTab,
    config: &ExportConfig,
    filter: FeedFilter,
    metadata_only: bool,
) -> Result<ExportReport, ExportError> {
    let interceptor = ResponseInterceptor::new(filter);
    let mut manifest = Manifest::new();
    let mut driver = PaginationDriver::new(config.scroll_timeout(), config.max_scrolls);

    let mut navigator = tab.clone();
    let opened = driver
        .open_feed(
            &mut navigator,
            &config.feed_urls,
            &interceptor,
            config.poll_interval(),
            config.feed_open_timeout(),
        )
        .await;

    let outcome = match opened {
        Some(OpenedFeed {
            url,
            first,
            mut events,
            pump,
        }) => {
            ::log::info!("Collecting the feed of {}", url);
            let mut scroller = tab.clone();
            let outcome = driver
                .run_from(first, &mut scroller, &mut events, &mut manifest)
                .await;
            pump.shutdown().await;
            outcome
        }
        None => {
            ::log::error!("None of the feed URLs produced a feed response");
            tab.save_screenshot(&config.output_dir.join(NO_FEED_SCREENSHOT))
                .await;
            driver.without_feed()
        }
    };

    if outcome.stop == StopReason::NoFeed || config.debug_responses {
        let path = config.output_dir.join(RESPONSES_DEBUG_FILE);
        let seen = interceptor.log().snapshot();
        match write_response_summary(&seen, &path).await {
            Ok(()) => ::log::info!(
                "Summary of {} API responses saved to {}",
                seen.len(),
                path.display()
            ),
            Err(e) => ::log::warn!("Failed to write {}: {}", path.display(), e),
        }
    }
    if manifest.is_empty() {
        ::log::warn!("No records collected");
    }

    let mut warnings = outcome.warnings;
    let (downloaded, skipped, failed) = if metadata_only {
        ::log::info!("Metadata only, skipping {} downloads", manifest.len());
        (0, 0, Vec::new())
    } else {
        let downloader = Downloader::new(DownloadOptions {
            dir: config.output_dir.clone(),
            url_template: config.download_url_template.clone(),
            thumbnail_fallback: config.thumbnail_fallback,
            prompt_fragment_len: config.prompt_fragment_len,
            throttle_every: config.throttle_every,
            throttle_pause: config.throttle_pause(),
        });
        let mut fetcher = tab.clone();
        let report = downloader.run(&manifest, &mut fetcher).await;
        warnings.extend(report.warnings);
        (report.downloaded, report.skipped, report.failed)
    };

    let metadata_path = config.metadata_path();
    metadata::write_metadata(&manifest, &metadata_path)
        .await
        .map_err(|source| ExportError::Metadata {
            path: metadata_path.clone(),
            source,
        })?;

    Ok(ExportReport {
        records: manifest.len(),
        pages: outcome.pages,
        scrolls: outcome.scrolls,
        stop: outcome.stop,
        downloaded,
        skipped,
        failed,
        metadata_path,
        warnings,
    })
}

/// Write what was seen on feed URLs, for tuning the feed patterns
async fn write_response_summary(seen: &[ResponseSummary], path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(seen)?;
    tokio::fs::write(path, json).await
}
