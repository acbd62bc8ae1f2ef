use log::{debug, warn};
use rayon::prelude::*;
use std::path::{Component, Path, PathBuf};

/// Extensions served by the slideshow, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Paths relative to the scan root, `/`-separated and sorted.
    pub entries: Vec<String>,
    /// Directories that could not be read. Each contributed zero entries.
    pub unreadable: Vec<PathBuf>,
}

impl ScanReport {
    fn merge(mut self, other: ScanReport) -> Self {
        self.entries.extend(other.entries);
        self.unreadable.extend(other.unreadable);
        self
    }
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// True when any component of `path` below `root` is a dotfile or dot-directory.
pub fn is_hidden_path(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => is_hidden_name(&name.to_string_lossy()),
        _ => false,
    })
}

/// Walks `root` recursively and collects every image file below it.
///
/// An unreadable directory is logged and skipped; it never fails the scan.
pub fn build(root: &Path) -> ScanReport {
    let mut report = scan_dir(root, root);
    report.entries.sort();
    debug!(
        "Scanned {}: {} images, {} unreadable directories",
        root.display(),
        report.entries.len(),
        report.unreadable.len()
    );
    report
}

fn scan_dir(root: &Path, dir: &Path) -> ScanReport {
    let mut report = ScanReport::default();
    let mut subdirs = Vec::new();

    let items = match std::fs::read_dir(dir) {
        Ok(items) => items,
        Err(e) => {
            warn!("Error reading directory {}: {}", dir.display(), e);
            report.unreadable.push(dir.to_path_buf());
            return report;
        }
    };

    for item in items {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warn!("Error reading entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = item.file_name();
        if is_hidden_name(&name.to_string_lossy()) {
            continue;
        }
        let file_type = match item.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Error reading file type of {}: {}", item.path().display(), e);
                continue;
            }
        };

        let path = item.path();
        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_file() && is_image_path(&path) {
            match relative_url_path(root, &path) {
                Some(relative) => report.entries.push(relative),
                None => warn!("Skipping image with non UTF-8 path: {}", path.display()),
            }
        }
    }

    subdirs
        .par_iter()
        .map(|subdir| scan_dir(root, subdir))
        .reduce(ScanReport::default, ScanReport::merge)
        .merge(report)
}

/// Expresses `path` relative to `root` with `/` separators.
pub fn relative_url_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
