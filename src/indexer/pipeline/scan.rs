use crate::config::Config;
use anyhow::Result;
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

/// Every eligible source file under `root`, sorted.
pub fn scan_files(config: &Config, root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "Failed to read dir");
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Failed to read dir entry"
                    );
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                if should_skip_dir(config, &path) {
                    continue;
                }
                stack.push(path);
                continue;
            }

            if file_type.is_file() && config.is_source_file(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

pub fn should_skip_dir(config: &Config, path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| config.is_excluded_dir_name(name))
}

/// Eligible when the extension is recognised and no directory between the
/// workspace root and the file is excluded.
pub fn should_index_file(config: &Config, path: &Path) -> bool {
    config.is_source_file(path) && !is_under_excluded_dir(config, path)
}

/// Whether any component of `path` below the workspace root is an excluded
/// directory name.
pub fn is_under_excluded_dir(config: &Config, path: &Path) -> bool {
    let relative = path.strip_prefix(&config.base_dir).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|name| config.is_excluded_dir_name(name)),
        _ => false,
    })
}
