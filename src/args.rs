use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use yield_images::{SessionCredential, SessionError, SessionMode};

#[derive(Parser, Debug)]
#[command(name = "yield-images")]
#[command(about = "Exports every image of an account's creations feed, with its metadata")]
#[command(version)]
pub struct Args {
    /// How to get an authenticated browser session
    #[arg(short, long, value_enum)]
    pub mode: ModeArg,

    /// Session cookie value (token mode)
    #[arg(short, long, env = "IDEO_SESSION_COOKIE", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Chrome user data directory to reuse (profile mode)
    #[arg(long)]
    pub profile_dir: Option<PathBuf>,

    /// Directory receiving the images and metadata file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// JSON configuration string (applied after --config-file)
    #[arg(long)]
    pub config: Option<String>,

    /// WebDriver server URL (falls back to WEBDRIVER_URL, then http://localhost:4444)
    #[arg(long)]
    pub webdriver_url: Option<String>,

    /// Run the browser without a window (token mode)
    #[arg(long)]
    pub headless: bool,

    /// Maximum number of scrolls while collecting the feed
    #[arg(long)]
    pub max_scrolls: Option<usize>,

    /// Seconds to wait for a new page after each scroll
    #[arg(long)]
    pub scroll_timeout: Option<u64>,

    /// Seconds to wait for the login to complete (interactive mode)
    #[arg(long)]
    pub login_timeout: Option<u64>,

    /// Save the thumbnail when the full-resolution image cannot be fetched
    #[arg(long)]
    pub thumbnail_fallback: bool,

    /// Only write the metadata file, download no images
    #[arg(long)]
    pub metadata_only: bool,

    /// Write a summary of the API responses seen on feed URLs, even when
    /// the feed was found
    #[arg(long)]
    pub debug_responses: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Reuse a local Chrome profile that is already logged in
    Profile,
    /// Log in by hand in a visible browser window
    Interactive,
    /// Inject a session cookie
    Token,
}

/// Convert the CLI mode and its options into a session mode
pub fn convert_mode(args: &Args) -> Result<SessionMode, SessionError> {
    match args.mode {
        ModeArg::Profile => Ok(SessionMode::ProfileReuse {
            profile_dir: args.profile_dir.clone(),
        }),
        ModeArg::Interactive => Ok(SessionMode::InteractiveLogin),
        ModeArg::Token => match args.session_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(SessionMode::TokenInjection(
                SessionCredential::new(token.to_string()),
            )),
            _ => Err(SessionError::MissingToken),
        },
    }
}
