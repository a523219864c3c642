//! Session establishment.
//!
//! Each mode produces the same thing: one [`BrowserTab`] that can make
//! authenticated requests to the site. The mode is chosen once per run and
//! never retried as another mode.

use super::{BrowserTab, ConnectError, SessionCheck, chrome_capabilities, connect_to_webdriver};
use crate::config::ExportConfig;
use crate::error::SessionError;
use fantoccini::cookies::Cookie;
use fantoccini::error::CmdError;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Session cookie value supplied by the operator. Never printed.
#[derive(Debug, Clone)]
pub struct SessionCredential(SecretString);

impl SessionCredential {
    pub fn new(token: String) -> Self {
        Self(SecretString::new(token))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// How the run gets an authenticated browser
#[derive(Debug, Clone)]
pub enum SessionMode {
    /// Launch Chrome on an existing local profile
    ProfileReuse { profile_dir: Option<PathBuf> },
    /// Open a visible window and wait for the operator to log in
    InteractiveLogin,
    /// Inject a session cookie into a fresh browser
    TokenInjection(SessionCredential),
}

impl SessionMode {
    pub fn name(&self) -> &'static str {
        match self {
            SessionMode::ProfileReuse { .. } => "profile",
            SessionMode::InteractiveLogin => "interactive",
            SessionMode::TokenInjection(_) => "token",
        }
    }
}

/// Where Chrome keeps its user data on Linux, macOS and Windows
pub fn default_profile_dir() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    [
        ".config/google-chrome",
        "Library/Application Support/Google/Chrome",
        "AppData/Local/Google/Chrome/User Data",
    ]
    .iter()
    .map(|relative| home.join(relative))
    .find(|path| path.is_dir())
}

/// Chrome leaves a `SingletonLock` entry (a symlink on Unix) while it runs
pub fn profile_locked(dir: &Path) -> bool {
    std::fs::symlink_metadata(dir.join("SingletonLock")).is_ok()
}

/// Resolve and check the profile directory before anything is launched
pub fn resolve_profile(explicit: Option<&Path>) -> Result<PathBuf, SessionError> {
    let dir = match explicit {
        Some(dir) => dir.to_path_buf(),
        None => default_profile_dir().ok_or_else(|| SessionError::ProfileUnavailable {
            path: PathBuf::from("~/.config/google-chrome"),
            reason: "no Chrome profile directory found".to_string(),
        })?,
    };

    if !dir.is_dir() {
        return Err(SessionError::ProfileUnavailable {
            path: dir,
            reason: "not found".to_string(),
        });
    }
    if profile_locked(&dir) {
        return Err(SessionError::ProfileUnavailable {
            path: dir,
            reason: "locked by a running browser".to_string(),
        });
    }
    Ok(dir)
}

/// True once the browser has left the login flow for an authenticated page
pub fn login_detected(url: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(url))
}

/// Produce an authenticated browser tab for `mode`.
///
/// The tab is closed again if establishing the session fails after the
/// browser was launched.
pub async fn establish(
    config: &ExportConfig,
    login_patterns: &[Regex],
    mode: &SessionMode,
) -> Result<BrowserTab, SessionError> {
    let mode_name = mode.name();
    ::log::info!("Establishing {} session", mode_name);

    let (capabilities, profile) = match mode {
        SessionMode::ProfileReuse { profile_dir } => {
            let dir = resolve_profile(profile_dir.as_deref())?;
            ::log::info!("Using browser profile at {}", dir.display());
            (chrome_capabilities(config, false, Some(&dir)), Some(dir))
        }
        SessionMode::InteractiveLogin => (chrome_capabilities(config, false, None), None),
        SessionMode::TokenInjection(_) => {
            (chrome_capabilities(config, config.headless, None), None)
        }
    };

    let client = connect_to_webdriver(&config.webdriver_url, capabilities)
        .await
        .map_err(|e| match (e, profile) {
            (ConnectError::Rejected { message, .. }, Some(path))
                if message.contains("user data directory is already in use") =>
            {
                SessionError::ProfileUnavailable {
                    path,
                    reason: "locked by a running browser".to_string(),
                }
            }
            (ConnectError::Rejected { url, message }, _) => {
                SessionError::WebDriverRejected { url, message }
            }
            (ConnectError::Unreachable { tried }, _) => SessionError::WebDriverUnavailable {
                tried: tried.join(", "),
            },
        })?;

    let mut tab = BrowserTab::new(client);
    tab.apply_timeouts(config.download_timeout(), config.feed_open_timeout())
        .await;

    let result = match mode {
        SessionMode::ProfileReuse { .. } => install_hook(&mut tab, mode_name).await,
        SessionMode::InteractiveLogin => {
            interactive_login(&mut tab, config, login_patterns).await
        }
        SessionMode::TokenInjection(credential) => {
            inject_token(&mut tab, config, login_patterns, credential).await
        }
    };

    match result {
        Ok(()) => {
            ::log::info!("{} session established", mode_name);
            Ok(tab)
        }
        Err(e) => {
            tab.close().await;
            Err(e)
        }
    }
}

fn browser_error(
    mode: &'static str,
    context: &'static str,
) -> impl FnOnce(CmdError) -> SessionError {
    move |source| SessionError::Browser {
        mode,
        context,
        source,
    }
}

async fn install_hook(tab: &mut BrowserTab, mode: &'static str) -> Result<(), SessionError> {
    tab.install_capture_hook()
        .await
        .map(|_| ())
        .map_err(browser_error(mode, "installing the response hook"))
}

/// Decide whether the answer to a request for `check_url` shows an accepted session.
///
/// A 401/403 is a rejection. So is a request that was redirected onto the
/// login page, or out of the authenticated area it was aimed at, which is
/// how page routes answer an unknown cookie.
pub fn check_session(
    answer: &SessionCheck,
    check_url: &str,
    login_url: &str,
    authenticated: &[Regex],
) -> Result<(), SessionError> {
    let rejected = |reason: String| {
        Err(SessionError::InvalidSession {
            url: check_url.to_string(),
            reason,
        })
    };

    if matches!(answer.status, 401 | 403) {
        return rejected(format!("HTTP {}", answer.status));
    }
    if answer.redirected {
        if answer.url.starts_with(login_url) {
            return rejected(format!("redirected to the login page {}", answer.url));
        }
        if login_detected(check_url, authenticated) && !login_detected(&answer.url, authenticated) {
            return rejected(format!("redirected out of the account area to {}", answer.url));
        }
    }
    Ok(())
}

async fn interactive_login(
    tab: &mut BrowserTab,
    config: &ExportConfig,
    login_patterns: &[Regex],
) -> Result<(), SessionError> {
    install_hook(tab, "interactive").await?;
    tab.goto(&config.login_url)
        .await
        .map_err(browser_error("interactive", "opening the login page"))?;

    let waited = config.login_timeout();
    ::log::info!(
        "Log in within the opened browser window (waiting up to {}s)",
        waited.as_secs()
    );

    let deadline = Instant::now() + waited;
    loop {
        let current = tab
            .current_url()
            .await
            .map_err(browser_error("interactive", "waiting for login"))?;
        if login_detected(current.as_str(), login_patterns) {
            ::log::info!("Login detected at {}", current);
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(SessionError::LoginTimeout {
                waited,
                login_url: config.login_url.clone(),
            });
        }
        tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
    }
}

async fn inject_token(
    tab: &mut BrowserTab,
    config: &ExportConfig,
    login_patterns: &[Regex],
    credential: &SessionCredential,
) -> Result<(), SessionError> {
    install_hook(tab, "token").await?;
    // The cookie can only be set for the domain currently open
    tab.goto(&config.site_url)
        .await
        .map_err(browser_error("token", "opening the site"))?;

    let mut cookie = Cookie::new(
        config.session_cookie_name.clone(),
        credential.expose().to_string(),
    );
    if let Some(host) = url::Url::parse(&config.site_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
    {
        cookie.set_domain(host);
    }
    cookie.set_path("/");
    cookie.set_secure(true);
    cookie.set_http_only(true);
    tab.add_cookie(cookie)
        .await
        .map_err(browser_error("token", "injecting the session cookie"))?;

    let check_url = config.session_check_url();
    let answer = tab
        .check_request(check_url)
        .await
        .map_err(browser_error("token", "verifying the session"))?;
    ::log::debug!(
        "Session check {} answered {} at {}",
        check_url,
        answer.status,
        answer.url
    );

    check_session(&answer, check_url, &config.login_url, login_patterns)
}
