use clap::Parser;
use std::process::ExitCode;
use yield_images::{ExportError, Exporter};

mod args;
use args::{Args, convert_mode};

/// Exit code for usage errors (bad flags, missing token, bad config)
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::init();

    // Parse command-line arguments; clap exits with code 2 on usage errors
    let args = Args::parse();

    let mode = match convert_mode(&args) {
        Ok(mode) => mode,
        Err(e) => {
            ::log::error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    println!("Note: exporting requires a WebDriver server (e.g., ChromeDriver).");
    println!(
        "Set WEBDRIVER_URL environment variable if not using the default http://localhost:4444"
    );

    let mut exporter = Exporter::new(mode);
    let configured = match &args.config_file {
        Some(path) => exporter.with_config_file(path),
        None => Ok(exporter),
    }
    .and_then(|exporter| match &args.config {
        Some(json) => exporter.with_config_str(json),
        None => Ok(exporter),
    });
    exporter = match configured {
        Ok(exporter) => exporter,
        Err(e) => {
            ::log::error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Some(dir) = args.output {
        exporter = exporter.with_output_dir(dir);
    }
    if let Some(url) = args.webdriver_url.filter(|url| !url.is_empty()) {
        exporter = exporter.with_webdriver_url(url);
    }
    if args.headless {
        exporter = exporter.with_headless(true);
    }
    if let Some(max_scrolls) = args.max_scrolls {
        exporter = exporter.with_max_scrolls(max_scrolls);
    }
    if let Some(timeout) = args.scroll_timeout {
        exporter = exporter.with_scroll_timeout(timeout);
    }
    if let Some(timeout) = args.login_timeout {
        exporter = exporter.with_login_timeout(timeout);
    }
    if args.thumbnail_fallback {
        exporter = exporter.with_thumbnail_fallback(true);
    }
    if args.debug_responses {
        exporter = exporter.with_debug_responses(true);
    }
    exporter = exporter.metadata_only(args.metadata_only);

    let start_time = std::time::Instant::now();
    match exporter.run().await {
        Ok(report) => {
            report.log_summary();
            ::log::info!(
                "Finished in {:.2} seconds",
                start_time.elapsed().as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(ExportError::Config(e)) => {
            ::log::error!("{}", e);
            ExitCode::from(EXIT_USAGE)
        }
        Err(e) => {
            ::log::error!("Export failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
