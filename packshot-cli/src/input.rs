//! Input discovery: loose images become single exports, sub-folders become layouts.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// What to process under the input root.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InputPlan {
    pub singles: Vec<PathBuf>,
    pub folders: Vec<PathBuf>,
}

impl InputPlan {
    pub fn is_empty(&self) -> bool {
        self.singles.is_empty() && self.folders.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Split the direct children of `root` into images and folders, both sorted by path.
pub fn scan_input_root(root: &Path) -> Result<InputPlan> {
    if !root.is_dir() {
        anyhow::bail!("input directory {} does not exist", root.display());
    }

    let mut plan = InputPlan::default();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if entry.file_type().is_dir() {
            plan.folders.push(path.to_path_buf());
        } else if entry.file_type().is_file() && is_image(path) {
            plan.singles.push(path.to_path_buf());
        } else {
            debug!("Skipping {}", path.display());
        }
    }
    plan.singles.sort();
    plan.folders.sort();
    Ok(plan)
}

/// Images directly inside `folder`, sorted by path.
pub fn collect_folder_images(folder: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .map(|e| e.into_path())
        .collect();
    images.sort();
    images
}

/// File stem used as the item id in output names.
pub fn item_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string())
}
