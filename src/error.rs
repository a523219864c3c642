use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures that leave the run without an authenticated browser context.
///
/// All of these are fatal: the export stops before any page is collected.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "browser profile at {} is unavailable: {reason}. Close every Chrome window using this \
         profile and retry, or use --mode interactive / --mode token instead",
        path.display()
    )]
    ProfileUnavailable { path: PathBuf, reason: String },

    #[error(
        "login was not completed within {}s (waiting on {login_url}). Rerun and finish the \
         login in the opened window, or raise --login-timeout",
        waited.as_secs()
    )]
    LoginTimeout { waited: Duration, login_url: String },

    #[error(
        "the session token was rejected by {url} ({reason}). Copy a fresh session cookie \
         from a logged-in browser and retry"
    )]
    InvalidSession { url: String, reason: String },

    #[error("no WebDriver server reachable (tried {tried}). Start ChromeDriver or set WEBDRIVER_URL")]
    WebDriverUnavailable { tried: String },

    #[error("WebDriver at {url} refused to start a browser: {message}")]
    WebDriverRejected { url: String, message: String },

    #[error("token mode needs a session token (--session-token or IDEO_SESSION_COOKIE)")]
    MissingToken,

    #[error("{mode} session failed while {context}: {source}")]
    Browser {
        mode: &'static str,
        context: &'static str,
        #[source]
        source: fantoccini::error::CmdError,
    },
}

/// Top-level error of an export run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metadata file {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid URL {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Why a single asset could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("undecodable payload: {0}")]
    Decode(String),

    #[error("no download URL in record")]
    NoUrl,

    #[error("response is not an image (content type {0:?})")]
    NotAnImage(String),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Recoverable problems. They are logged when raised and reported at the end,
/// but never abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("malformed feed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("download failed for record {id}: {reason}")]
    DownloadFailed { id: String, reason: String },

    #[error("pagination stopped after {scrolls} scrolls before the feed signalled its end: {reason}")]
    PaginationIncomplete { scrolls: usize, reason: String },
}
