use crate::domain::model::Image;
use crate::domain::ports::Storage;
use crate::utils::error::{ProvisionError, Result};
use std::io::Write;
use zip::write::{SimpleFileOptions, ZipWriter};

pub const MANIFEST_NAME: &str = "manifest.json";
pub const CONFIG_NAME: &str = "config.json";

pub fn encode_archive(image: &Image) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

    zip.start_file(MANIFEST_NAME, SimpleFileOptions::default())?;
    zip.write_all(&serde_json::to_vec_pretty(image)?)?;

    zip.start_file(CONFIG_NAME, SimpleFileOptions::default())?;
    zip.write_all(&serde_json::to_vec_pretty(&image.config)?)?;

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Write the image descriptor archive through `storage`, returning its name.
pub async fn export_image<S: Storage>(image: &Image, storage: &S, filename: &str) -> Result<String> {
    let data = encode_archive(image)?;
    tracing::debug!("Writing image archive ({} bytes) to {}", data.len(), filename);

    storage
        .write_file(filename, &data)
        .await
        .map_err(|e| ProvisionError::IoError(std::io::Error::other(e.to_string())))?;

    Ok(filename.to_string())
}
