use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for an export run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Root URL of the target site (opened before injecting a session cookie)
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Pages that load the creations feed, tried in order
    #[serde(default = "default_feed_urls")]
    pub feed_urls: Vec<String>,

    /// Login page opened in interactive mode
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// Regex patterns; a current URL matching any of them means the operator is logged in
    #[serde(default = "default_authenticated_patterns")]
    pub authenticated_patterns: Vec<String>,

    /// Regex patterns for feed response URLs to capture
    #[serde(default = "default_feed_include_patterns")]
    pub feed_include_patterns: Vec<String>,

    /// Regex patterns for response URLs to ignore (take precedence over includes)
    #[serde(default = "default_feed_exclude_patterns")]
    pub feed_exclude_patterns: Vec<String>,

    /// URL for the WebDriver instance
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Chrome binary to launch instead of the driver's default
    #[serde(default)]
    pub browser_binary: Option<String>,

    /// Run the browser without a window (token mode only)
    #[serde(default)]
    pub headless: bool,

    /// Name of the session cookie injected in token mode
    #[serde(default = "default_cookie_name")]
    pub session_cookie_name: String,

    /// URL whose status decides whether an injected token is accepted
    /// (defaults to the first feed URL)
    #[serde(default)]
    pub session_check_url: Option<String>,

    /// Directory receiving images and the metadata file
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name of the metadata file inside the output directory
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    /// Full-resolution URL template; `{id}` is replaced by the record identifier
    #[serde(default = "default_download_url_template")]
    pub download_url_template: Option<String>,

    /// Retry a failed full-resolution fetch with the thumbnail URL
    #[serde(default)]
    pub thumbnail_fallback: bool,

    /// Maximum number of scroll actions before pagination gives up
    #[serde(default = "default_max_scrolls")]
    pub max_scrolls: usize,

    /// Seconds to wait for a new feed page after each scroll
    #[serde(default = "default_scroll_timeout_secs")]
    pub scroll_timeout_secs: u64,

    /// Seconds to wait for the first feed page after opening a feed URL
    #[serde(default = "default_feed_open_timeout_secs")]
    pub feed_open_timeout_secs: u64,

    /// Seconds the operator has to finish logging in
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,

    /// Milliseconds between drains of the in-page capture buffer
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds a single asset fetch may take
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Pause after this many fetched assets (0 disables throttling)
    #[serde(default = "default_throttle_every")]
    pub throttle_every: usize,

    /// Length of the throttling pause in milliseconds
    #[serde(default = "default_throttle_pause_ms")]
    pub throttle_pause_ms: u64,

    /// Number of prompt characters used in file names
    #[serde(default = "default_prompt_fragment_len")]
    pub prompt_fragment_len: usize,

    /// Always write the summary of matching API responses, not only when no
    /// feed was recognized
    #[serde(default)]
    pub debug_responses: bool,
}

fn default_site_url() -> String {
    "https://ideogram.ai".to_string()
}

fn default_feed_urls() -> Vec<String> {
    vec![
        "https://ideogram.ai/my-images".to_string(),
        "https://ideogram.ai/assets".to_string(),
    ]
}

fn default_login_url() -> String {
    "https://ideogram.ai/login".to_string()
}

fn default_authenticated_patterns() -> Vec<String> {
    vec![r"^https://ideogram\.ai/(?:t/|my-images|assets|u/)".to_string()]
}

fn default_feed_include_patterns() -> Vec<String> {
    vec![r"/api/".to_string()]
}

fn default_feed_exclude_patterns() -> Vec<String> {
    vec![r"/api/images/direct/".to_string()]
}

/// Default value for webdriver_url
fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_cookie_name() -> String {
    "session_cookie".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./ideogram_images")
}

fn default_metadata_file() -> String {
    "metadata.json".to_string()
}

fn default_download_url_template() -> Option<String> {
    Some("https://ideogram.ai/api/images/direct/{id}".to_string())
}

fn default_max_scrolls() -> usize {
    100
}

fn default_scroll_timeout_secs() -> u64 {
    8
}

fn default_feed_open_timeout_secs() -> u64 {
    20
}

fn default_login_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_download_timeout_secs() -> u64 {
    60
}

fn default_throttle_every() -> usize {
    10
}

fn default_throttle_pause_ms() -> u64 {
    1000
}

fn default_prompt_fragment_len() -> usize {
    60
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            feed_urls: default_feed_urls(),
            login_url: default_login_url(),
            authenticated_patterns: default_authenticated_patterns(),
            feed_include_patterns: default_feed_include_patterns(),
            feed_exclude_patterns: default_feed_exclude_patterns(),
            webdriver_url: default_webdriver_url(),
            browser_binary: None,
            headless: false,
            session_cookie_name: default_cookie_name(),
            session_check_url: None,
            output_dir: default_output_dir(),
            metadata_file: default_metadata_file(),
            download_url_template: default_download_url_template(),
            thumbnail_fallback: false,
            max_scrolls: default_max_scrolls(),
            scroll_timeout_secs: default_scroll_timeout_secs(),
            feed_open_timeout_secs: default_feed_open_timeout_secs(),
            login_timeout_secs: default_login_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            download_timeout_secs: default_download_timeout_secs(),
            throttle_every: default_throttle_every(),
            throttle_pause_ms: default_throttle_pause_ms(),
            prompt_fragment_len: default_prompt_fragment_len(),
            debug_responses: false,
        }
    }
}

impl ExportConfig {
    /// Apply the fields present in a JSON config file on top of this one
    pub fn overlay_file<P: AsRef<Path>>(&self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.overlay_json(&contents)
    }

    /// Apply the fields present in a JSON string on top of this config;
    /// fields it does not name keep their current values
    pub fn overlay_json(&self, json: &str) -> Result<Self, ConfigError> {
        let overlay: serde_json::Value = serde_json::from_str(json)?;
        let mut merged = serde_json::to_value(self)?;
        if let (serde_json::Value::Object(base), serde_json::Value::Object(fields)) =
            (&mut merged, overlay)
        {
            base.extend(fields);
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// URL used to verify an injected session token
    pub fn session_check_url(&self) -> &str {
        self.session_check_url
            .as_deref()
            .or_else(|| self.feed_urls.first().map(String::as_str))
            .unwrap_or(&self.site_url)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata_file)
    }

    pub fn scroll_timeout(&self) -> Duration {
        Duration::from_secs(self.scroll_timeout_secs)
    }

    pub fn feed_open_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_open_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn throttle_pause(&self) -> Duration {
        Duration::from_millis(self.throttle_pause_ms)
    }
}
