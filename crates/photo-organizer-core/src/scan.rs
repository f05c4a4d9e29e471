use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Extensions picked up when no filter is given.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "tif", "tiff", "webp", "dng", "mov", "mp4", "m4v",
    "3gp",
];

/// Case-insensitive set of eligible file extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

impl ExtensionFilter {
    /// Build from entries like `"JPG"`, `".jpg"` or `"jpg"`. Blank entries are dropped.
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .filter_map(|e| normalize_extension(e.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

/// Recursively list eligible files under `input`, sorted by path.
///
/// Hidden entries are skipped, and so is `exclude` (the output folder when
/// it sits inside the input folder). Symlinked files are picked up;
/// symlinked directories are not descended into.
pub fn discover_files(input: &Path, filter: &ExtensionFilter, exclude: Option<&Path>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(is_hidden(e) || exclude.is_some_and(|ex| ex == e.path())))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read directory entry; skipping");
                None
            }
        })
        .filter(|entry| {
            let file_type = entry.file_type();
            file_type.is_file() || (file_type.is_symlink() && entry.path().is_file())
        })
        .map(DirEntry::into_path)
        .filter(|path| filter.matches(path))
        .collect();
    files.sort();
    files
}
