use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::transcript;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Ask for a single image. `Ok(None)` means the dialog was dismissed.
pub async fn pick_image() -> Result<Option<PathBuf>, String> {
    let Some(handle) = rfd::AsyncFileDialog::new()
        .set_title("Choose an image")
        .add_filter("Images", IMAGE_EXTENSIONS)
        .pick_file()
        .await
    else {
        return Ok(None);
    };

    let path = handle.path().to_path_buf();
    let checked = path.clone();
    let (width, height) = tokio::task::spawn_blocking(move || validate_image(&checked))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| format!("{:#}", e))?;

    tracing::debug!(path = %path.display(), width, height, "image selected");
    Ok(Some(path))
}

/// Make sure the file decodes as an image before it is sent anywhere.
pub fn validate_image(path: &Path) -> anyhow::Result<(u32, u32)> {
    image::image_dimensions(path)
        .with_context(|| format!("{} is not a readable image", path.display()))
}

/// Ask where to save the transcript and write it. `Ok(None)` means the
/// dialog was dismissed.
pub async fn save_transcript(document: Vec<u8>) -> Result<Option<PathBuf>, String> {
    let Some(handle) = rfd::AsyncFileDialog::new()
        .set_title("Export conversation")
        .set_file_name(transcript::FILE_NAME)
        .save_file()
        .await
    else {
        return Ok(None);
    };

    let path = handle.path().to_path_buf();
    transcript::write(&path, &document)
        .await
        .map_err(|e| format!("{:#}", e))?;
    Ok(Some(path))
}
