pub mod session;

use crate::config::ExportConfig;
use crate::download::{AssetFetcher, FetchedAsset};
use crate::error::FetchError;
use crate::feed::intercept::{CaptureSource, CapturedResponse, DRAIN_SCRIPT, HOOK_SCRIPT};
use crate::paginate::{Navigator, Scroller};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use fantoccini::error::{CmdError, NewSessionError};
use fantoccini::wd::{Capabilities, TimeoutConfiguration, WebDriverCompatibleCommand};
use fantoccini::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Ports where a WebDriver server commonly listens
const FALLBACK_WEBDRIVER_URLS: &[&str] = &[
    "http://localhost:9515", // ChromeDriver default
    "http://localhost:4723", // Appium default
    "http://localhost:9222", // Chrome debug port default
    "http://127.0.0.1:4444", // Try with IP instead of localhost
];

/// Hides the most common automation tell before any page script runs
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
"#;

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Fetches a URL with the page's cookies and hands back base64 bytes
const FETCH_SCRIPT: &str = r#"
const url = arguments[0];
const done = arguments[arguments.length - 1];
fetch(url, { credentials: 'include' })
  .then(async (response) => {
    const contentType = response.headers.get('content-type') || '';
    if (!response.ok) {
      done({ status: response.status, contentType: contentType, data: null, error: null });
      return;
    }
    const bytes = new Uint8Array(await response.arrayBuffer());
    let binary = '';
    for (let i = 0; i < bytes.length; i += 0x8000) {
      binary += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
    }
    done({ status: response.status, contentType: contentType, data: btoa(binary), error: null });
  })
  .catch((err) => done({ status: 0, contentType: '', data: null, error: String(err) }));
"#;

/// Reports where a credentialed request ended up
const CHECK_SCRIPT: &str = r#"
const url = arguments[0];
const done = arguments[arguments.length - 1];
fetch(url, { credentials: 'include' })
  .then((response) => done({ status: response.status, redirected: response.redirected, url: response.url }))
  .catch(() => done({ status: 0, redirected: false, url: url }));
"#;

/// Why no WebDriver session could be created
#[derive(Debug)]
pub enum ConnectError {
    /// No server answered at any of the tried URLs
    Unreachable { tried: Vec<String> },
    /// A server answered but refused to start the browser
    Rejected { url: String, message: String },
}

/// Chrome capabilities for a run
pub fn chrome_capabilities(
    config: &ExportConfig,
    headless: bool,
    profile_dir: Option<&Path>,
) -> Capabilities {
    let mut args = vec![
        "--window-size=1920,1080".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    if let Some(dir) = profile_dir {
        args.push(format!("--user-data-dir={}", dir.display()));
        args.push("--profile-directory=Default".to_string());
    }

    let mut chrome_options = json!({
        "args": args,
        "excludeSwitches": ["enable-automation"],
    });
    if let Some(binary) = &config.browser_binary {
        chrome_options["binary"] = json!(binary);
    }

    let mut capabilities = Capabilities::new();
    capabilities.insert("browserName".to_string(), json!("chrome"));
    capabilities.insert("goog:chromeOptions".to_string(), chrome_options);
    capabilities
}

/// Connects to the WebDriver instance, trying well-known ports if the
/// configured one does not answer
pub async fn connect_to_webdriver(
    webdriver_url: &str,
    capabilities: Capabilities,
) -> Result<Client, ConnectError> {
    let mut candidates = vec![webdriver_url.to_string()];
    candidates.extend(
        FALLBACK_WEBDRIVER_URLS
            .iter()
            .filter(|url| **url != webdriver_url)
            .map(|url| url.to_string()),
    );

    let mut tried = Vec::new();
    for (attempt, url) in candidates.into_iter().enumerate() {
        if attempt > 0 {
            ::log::info!("Trying fallback WebDriver URL: {}", url);
        }

        let mut builder = ClientBuilder::native();
        builder.capabilities(capabilities.clone());
        match builder.connect(&url).await {
            Ok(client) => {
                ::log::debug!("Connected to WebDriver at {}", url);
                return Ok(client);
            }
            Err(NewSessionError::SessionNotCreated(e)) => {
                // A server answered; another port will not do better
                return Err(ConnectError::Rejected {
                    url,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                if attempt == 0 {
                    ::log::error!("Failed to connect to WebDriver at {}: {}", url, e);
                }
                tried.push(url);
            }
        }
    }

    ::log::error!(
        "Make sure a WebDriver server is running or set the WEBDRIVER_URL environment variable"
    );
    Err(ConnectError::Unreachable { tried })
}

/// ChromeDriver's passthrough to the DevTools protocol
#[derive(Debug)]
struct CdpCommand {
    method: &'static str,
    params: Value,
}

impl WebDriverCompatibleCommand for CdpCommand {
    fn endpoint(
        &self,
        base_url: &url::Url,
        session_id: Option<&str>,
    ) -> Result<url::Url, url::ParseError> {
        base_url.join(&format!(
            "session/{}/goog/cdp/execute",
            session_id.unwrap_or_default()
        ))
    }

    fn method_and_body(&self, _request_url: &url::Url) -> (http::Method, Option<String>) {
        let body = json!({ "cmd": self.method, "params": self.params });
        (http::Method::POST, Some(body.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchPayload {
    status: u16,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// The single browser tab a run works in.
///
/// Cloning is cheap; every clone drives the same WebDriver session.
#[derive(Clone)]
pub struct BrowserTab {
    client: Client,
    /// Whether new documents get the hook before their own scripts run
    hook_persists: bool,
}

/// Where a credentialed in-page request ended up
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionCheck {
    /// HTTP status, 0 when the request failed outright
    pub status: u16,
    #[serde(default)]
    pub redirected: bool,
    /// Final URL after redirects
    #[serde(default)]
    pub url: String,
}

impl BrowserTab {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            hook_persists: false,
        }
    }

    /// Register the capture hook for every future document and hook the
    /// current one as well.
    ///
    /// Returns whether the registration survives navigation. Without the
    /// DevTools passthrough it does not, and [`Navigator::open`] re-hooks
    /// each document after it loads.
    pub async fn install_capture_hook(&mut self) -> Result<bool, CmdError> {
        self.hook_persists = true;
        for source in [STEALTH_SCRIPT, HOOK_SCRIPT] {
            let command = CdpCommand {
                method: "Page.addScriptToEvaluateOnNewDocument",
                params: json!({ "source": source }),
            };
            if let Err(e) = self.client.issue_cmd(command).await {
                ::log::warn!(
                    "DevTools passthrough unavailable ({}); each page will be hooked after it loads \
                     and responses made while loading are missed",
                    e
                );
                self.hook_persists = false;
                break;
            }
        }
        self.client.execute(HOOK_SCRIPT, vec![]).await?;
        ::log::debug!("Capture hook installed (persistent: {})", self.hook_persists);
        Ok(self.hook_persists)
    }

    /// Apply script and page-load timeouts; failures are only logged
    pub async fn apply_timeouts(&self, script: Duration, page_load: Duration) {
        let timeouts = TimeoutConfiguration::new(Some(script), Some(page_load), None);
        if let Err(e) = self.client.update_timeouts(timeouts).await {
            ::log::warn!("Failed to set WebDriver timeouts: {}", e);
        }
    }

    pub async fn goto(&self, url: &str) -> Result<(), CmdError> {
        ::log::debug!("Navigating to {}", url);
        self.client.goto(url).await
    }

    pub async fn current_url(&self) -> Result<Url, CmdError> {
        self.client.current_url().await
    }

    pub async fn add_cookie(&self, cookie: fantoccini::cookies::Cookie<'static>) -> Result<(), CmdError> {
        self.client.add_cookie(cookie).await
    }

    /// Issue a credentialed in-page request and report where it ended up
    pub async fn check_request(&self, url: &str) -> Result<SessionCheck, CmdError> {
        let value = self.client.execute_async(CHECK_SCRIPT, vec![json!(url)]).await?;
        Ok(serde_json::from_value(value).unwrap_or(SessionCheck {
            status: 0,
            redirected: false,
            url: url.to_string(),
        }))
    }

    /// Save a screenshot for diagnosing pages that never produced a feed
    pub async fn save_screenshot(&self, path: &Path) {
        match self.client.screenshot().await {
            Ok(png) => match tokio::fs::write(path, png).await {
                Ok(()) => ::log::info!("Debug screenshot saved to {}", path.display()),
                Err(e) => ::log::warn!("Failed to write {}: {}", path.display(), e),
            },
            Err(e) => ::log::warn!("Failed to take screenshot: {}", e),
        }
    }

    pub async fn close(self) {
        if let Err(e) = self.client.close().await {
            ::log::warn!("Failed to close browser session: {}", e);
        }
    }
}

impl CaptureSource for BrowserTab {
    async fn drain(&mut self) -> Result<Vec<CapturedResponse>, CmdError> {
        let value = self.client.execute(DRAIN_SCRIPT, vec![]).await?;
        let Value::Array(items) = value else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(response) => Some(response),
                Err(e) => {
                    ::log::debug!("Dropping unreadable capture entry: {}", e);
                    None
                }
            })
            .collect())
    }
}

impl Navigator for BrowserTab {
    async fn open(&mut self, url: &str) -> Result<(), CmdError> {
        self.goto(url).await?;
        if !self.hook_persists {
            self.client.execute(HOOK_SCRIPT, vec![]).await?;
            // The feed's first request ran before the hook; ask for the next batch
            self.client.execute(SCROLL_SCRIPT, vec![]).await?;
        }
        Ok(())
    }
}

impl Scroller for BrowserTab {
    async fn scroll_to_bottom(&mut self) -> Result<(), CmdError> {
        self.client.execute(SCROLL_SCRIPT, vec![]).await?;
        Ok(())
    }
}

impl AssetFetcher for BrowserTab {
    async fn fetch(&mut self, url: &str) -> Result<FetchedAsset, FetchError> {
        let value = self
            .client
            .execute_async(FETCH_SCRIPT, vec![json!(url)])
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let payload: FetchPayload =
            serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))?;

        if let Some(error) = payload.error {
            return Err(FetchError::Transport(error));
        }
        if !(200..300).contains(&payload.status) {
            return Err(FetchError::Status(payload.status));
        }

        let data = payload.data.unwrap_or_default();
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(FetchedAsset {
            content_type: payload.content_type,
            bytes,
        })
    }
}
