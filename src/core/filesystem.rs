//! WD-007: Project filesystem: action discovery and directory packaging.
//!
//! With `allow-defaults`, source files directly in the project directory and
//! anywhere under `<project>/actions/` become actions named after their stem.

use super::runtimes::RuntimeCatalog;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Subdirectory scanned recursively for action sources.
pub const ACTIONS_DIR: &str = "actions";

/// An action source found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredAction {
    pub name: String,
    pub path: PathBuf,
    pub kind: String,
}

/// Scan a project directory for action sources the catalog knows how to run.
pub fn discover_actions(
    project: &Path,
    catalog: &RuntimeCatalog,
) -> Result<Vec<DiscoveredAction>, String> {
    let mut found = Vec::new();
    scan_dir(project, catalog, false, &mut found)?;
    let actions_dir = project.join(ACTIONS_DIR);
    if actions_dir.is_dir() {
        scan_dir(&actions_dir, catalog, true, &mut found)?;
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!("discovered {} action source(s) under {}", found.len(), project.display());
    Ok(found)
}

fn scan_dir(
    dir: &Path,
    catalog: &RuntimeCatalog,
    recursive: bool,
    found: &mut Vec<DiscoveredAction>,
) -> Result<(), String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("cannot read {}: {}", dir.display(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| format!("cannot read {}: {}", dir.display(), e))?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                scan_dir(&path, catalog, true, found)?;
            }
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !catalog.source_extensions().contains(&ext) {
            continue;
        }
        let (Some(stem), Some(kind)) = (
            path.file_stem().and_then(|s| s.to_str()),
            catalog.kind_for_extension(ext),
        ) else {
            continue;
        };
        found.push(DiscoveredAction {
            name: stem.to_string(),
            path: normalize(&path),
            kind,
        });
    }
    Ok(())
}

/// Drop `.` components so manifest and discovered paths compare equal.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Zip a directory into memory. `include` globs (first element of each entry)
/// restrict the file set when present; `exclude` globs remove files.
pub fn zip_directory(
    dir: &Path,
    include: &[Vec<String>],
    exclude: &[String],
) -> Result<Vec<u8>, String> {
    let include: Vec<glob::Pattern> = include
        .iter()
        .filter_map(|entry| entry.first())
        .map(|p| glob::Pattern::new(p).map_err(|e| format!("invalid include pattern {}: {}", p, e)))
        .collect::<Result<_, _>>()?;
    let exclude: Vec<glob::Pattern> = exclude
        .iter()
        .map(|p| glob::Pattern::new(p).map_err(|e| format!("invalid exclude pattern {}: {}", p, e)))
        .collect::<Result<_, _>>()?;

    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut added = 0usize;
    for rel in files {
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if !include.is_empty() && !include.iter().any(|p| p.matches(&rel_str)) {
            continue;
        }
        if exclude.iter().any(|p| p.matches(&rel_str)) {
            continue;
        }
        let bytes = std::fs::read(dir.join(&rel))
            .map_err(|e| format!("cannot read {}: {}", rel_str, e))?;
        writer
            .start_file(rel_str.clone(), options)
            .map_err(|e| format!("zip {}: {}", rel_str, e))?;
        writer
            .write_all(&bytes)
            .map_err(|e| format!("zip {}: {}", rel_str, e))?;
        added += 1;
    }
    let cursor = writer.finish().map_err(|e| format!("zip finish: {}", e))?;
    tracing::debug!("zipped {} file(s) from {}", added, dir.display());
    Ok(cursor.into_inner())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("cannot read {}: {}", dir.display(), e))?;
    for entry in entries {
        let path = entry
            .map_err(|e| format!("cannot read {}: {}", dir.display(), e))?
            .path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}
