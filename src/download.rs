use crate::error::{FetchError, Warning};
use crate::manifest::Manifest;
use crate::results::ImageRecord;
use crate::utils::{IMAGE_EXTENSIONS, asset_stem, image_extension};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bytes of one fetched asset
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Fetches asset bytes through the authenticated browser context
pub trait AssetFetcher {
    fn fetch(&mut self, url: &str) -> impl Future<Output = Result<FetchedAsset, FetchError>> + Send;
}

/// Settings for a download pass
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub dir: PathBuf,
    pub url_template: Option<String>,
    pub thumbnail_fallback: bool,
    pub prompt_fragment_len: usize,
    pub throttle_every: usize,
    pub throttle_pause: Duration,
}

/// Tally of a download pass
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl DownloadReport {
    pub fn attempted(&self) -> usize {
        self.downloaded + self.failed.len()
    }
}

/// Downloads every record of a manifest, one at a time, in manifest order
pub struct Downloader {
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(options: DownloadOptions) -> Self {
        Self { options }
    }

    pub async fn run<F: AssetFetcher>(&self, manifest: &Manifest, fetcher: &mut F) -> DownloadReport {
        let mut report = DownloadReport::default();
        let total = manifest.len();
        ::log::info!("Downloading {} images to {}", total, self.options.dir.display());

        for (index, record) in manifest.iter().enumerate() {
            let stem = asset_stem(index, record.prompt(), self.options.prompt_fragment_len);

            if let Some(existing) = find_existing(&self.options.dir, &stem).await {
                ::log::debug!("Skipping {} ({} exists)", record.id(), existing.display());
                report.skipped += 1;
                continue;
            }

            match self.download_one(record, &stem, fetcher).await {
                Ok(path) => {
                    report.downloaded += 1;
                    ::log::info!("[{}/{}] saved {}", index + 1, total, path.display());
                }
                Err(e) => {
                    let warning = Warning::DownloadFailed {
                        id: record.id().to_string(),
                        reason: e.to_string(),
                    };
                    ::log::warn!("{}", warning);
                    report.failed.push(record.id().to_string());
                    report.warnings.push(warning);
                }
            }

            let attempted = report.attempted();
            if self.options.throttle_every > 0 && attempted % self.options.throttle_every == 0 {
                ::log::debug!(
                    "Progress: {}/{} ({} ok, {} failed, {} skipped)",
                    index + 1,
                    total,
                    report.downloaded,
                    report.failed.len(),
                    report.skipped
                );
                tokio::time::sleep(self.options.throttle_pause).await;
            }
        }

        ::log::info!(
            "Downloads done: {} saved, {} skipped, {} failed",
            report.downloaded,
            report.skipped,
            report.failed.len()
        );
        report
    }

    async fn download_one<F: AssetFetcher>(
        &self,
        record: &ImageRecord,
        stem: &str,
        fetcher: &mut F,
    ) -> Result<PathBuf, FetchError> {
        let url = record
            .full_resolution_url(self.options.url_template.as_deref())
            .ok_or(FetchError::NoUrl)?;

        let (asset, ext) = match fetch_image(fetcher, &url).await {
            Ok(image) => image,
            Err(e) => match record.thumbnail_url() {
                Some(thumbnail) if self.options.thumbnail_fallback && thumbnail != url => {
                    ::log::debug!("Full-resolution fetch of {} failed ({}), trying thumbnail", record.id(), e);
                    fetch_image(fetcher, thumbnail).await?
                }
                _ => return Err(e),
            },
        };

        write_asset(&self.options.dir, stem, ext, &asset).await
    }
}

/// Fetch `url` and make sure what came back is an image
async fn fetch_image<F: AssetFetcher>(
    fetcher: &mut F,
    url: &str,
) -> Result<(FetchedAsset, &'static str), FetchError> {
    let asset = fetcher.fetch(url).await?;
    match image_extension(&asset.content_type, &asset.bytes) {
        Some(ext) => Ok((asset, ext)),
        None => Err(FetchError::NotAnImage(asset.content_type)),
    }
}

/// Path of an already downloaded asset with this stem, whatever its extension
pub async fn find_existing(dir: &Path, stem: &str) -> Option<PathBuf> {
    for ext in IMAGE_EXTENSIONS {
        let path = dir.join(format!("{}.{}", stem, ext));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// Write through a `.part` file so an interrupted write never looks finished
async fn write_asset(
    dir: &Path,
    stem: &str,
    ext: &str,
    asset: &FetchedAsset,
) -> Result<PathBuf, FetchError> {
    let path = dir.join(format!("{}.{}", stem, ext));
    let partial = dir.join(format!("{}.{}.part", stem, ext));

    tokio::fs::write(&partial, &asset.bytes)
        .await
        .map_err(|source| FetchError::Write {
            path: partial.clone(),
            source,
        })?;
    tokio::fs::rename(&partial, &path)
        .await
        .map_err(|source| FetchError::Write {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}
