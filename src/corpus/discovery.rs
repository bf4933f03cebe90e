//! Image discovery in directories.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::corpus::CorpusImage;
use crate::error::{Error, Result};

/// Supported image extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "heic", "heif"];

/// List the images directly inside `dir`, ordered by their embedded number.
///
/// Hidden entries (notebook checkpoints, `.DS_Store`) and subdirectories are
/// skipped.
pub fn list_images(dir: &Path) -> Result<Vec<CorpusImage>> {
    if !dir.exists() {
        return Err(Error::Corpus(format!("Path does not exist: {}", dir.display())));
    }

    if !dir.is_dir() {
        return Err(Error::Corpus(format!("Path is not a directory: {}", dir.display())));
    }

    let entries = fs::read_dir(dir).map_err(|e| {
        Error::Corpus(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::Corpus(format!("Failed to read entry in {}: {}", dir.display(), e))
        })?;

        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            debug!(entry = %path.display(), "skipping hidden entry");
            continue;
        }
        if !path.is_file() || !has_image_extension(&path) {
            continue;
        }

        images.push(CorpusImage {
            name: name.to_string(),
            path: path.clone(),
            file_size: entry.metadata().map(|m| m.len()).unwrap_or(0),
        });
    }

    if images.is_empty() {
        return Err(Error::NoImagesFound { dir: dir.to_path_buf() });
    }

    images.sort_by(|a, b| compare_numeric_names(&a.name, &b.name));
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// The number formed by every digit in `name`, as a digit string without
/// leading zeros. `None` when the name has no digits.
///
/// `card_2_v10.png` yields `"210"`, matching how the card corpora were numbered.
fn numeric_key(name: &str) -> Option<String> {
    let digits: String = name.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}

/// Order by embedded number, then by name. Names without digits sort last.
///
/// Digit strings are compared by length first, so arbitrarily long numbers
/// never overflow.
pub fn compare_numeric_names(a: &str, b: &str) -> Ordering {
    let by_number = match (numeric_key(a), numeric_key(b)) {
        (Some(x), Some(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(&y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_number.then_with(|| a.cmp(b))
}
