use std::path::Path;

use tracing::{debug, info};

use crate::error::{BatchError, Result};
use crate::video::types::{is_dewarped_output, VideoTask};

/// Collect the videos in `folder` that still need dewarping.
///
/// Only immediate regular files are considered. A file qualifies when its
/// extension matches one of `extensions` (case-insensitive) and its name does
/// not already carry the `_dewarped` marker. Tasks come back sorted by path
/// so a run always sees the same order.
pub fn scan_folder<S: AsRef<str>>(folder: &Path, extensions: &[S]) -> Result<Vec<VideoTask>> {
    if !folder.is_dir() {
        return Err(BatchError::InvalidFolder {
            path: folder.display().to_string(),
        }
        .into());
    }

    let mut tasks = Vec::new();

    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();

        if !path.is_file() || is_hidden_file(&path) || !has_video_extension(&path, extensions) {
            continue;
        }

        if is_dewarped_output(&path) {
            info!("Already dewarped, skipping: {}", path.display());
            continue;
        }

        debug!("Found video: {}", path.display());
        tasks.push(VideoTask::new(path));
    }

    tasks.sort_by(|a, b| a.input.cmp(&b.input));
    Ok(tasks)
}

fn has_video_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => extensions
            .iter()
            .any(|candidate| candidate.as_ref().trim_start_matches('.').eq_ignore_ascii_case(ext)),
        None => false,
    }
}

fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
