use crate::manifest::Manifest;
use std::path::Path;

/// Serialize the whole manifest, in manifest order, as one JSON array.
///
/// Every record is written with all of its original fields, whether or not
/// its image was downloaded. The file is replaced atomically.
pub async fn write_metadata(manifest: &Manifest, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(manifest.records())?;

    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    tokio::fs::write(&partial, json).await?;
    tokio::fs::rename(&partial, path).await?;

    ::log::info!("Saved metadata for {} records to {}", manifest.len(), path.display());
    Ok(())
}
