use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Local file name for a download url: its final path segment.
/// Query string and fragment are ignored. Returns None when the url
/// cannot be parsed or ends with a '/'.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.last()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Create a directory (and its parents) if it does not exist yet
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).context(format!("Failed to create directory: {:?}", dir))
}

/// List the files of `dir` with the given extension (case sensitive), sorted by name.
/// Sub directories are not visited.
pub fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).context(format!("Failed to read directory: {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
