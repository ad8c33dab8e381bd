use crate::error::{AppError, Result};
use crate::file_tree::validate_path;
use crate::models::{BrowserTarget, FileEntry, Project};
use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, info};
use uuid::Uuid;

pub const DEFAULT_PROJECT_NAME: &str = "My Extension";
pub const MANIFEST_PATH: &str = "manifest.json";

fn validate_entries(files: &[FileEntry]) -> Result<()> {
    files.iter().try_for_each(|entry| validate_path(&entry.path))
}

/// Creates a project with a fresh id and timestamp. Later entries for the same
/// path overwrite earlier ones in place.
pub fn initialize(name: &str, browser: BrowserTarget, files: Vec<FileEntry>) -> Result<Project> {
    if files.is_empty() {
        return Err(AppError::EmptyProject);
    }
    validate_entries(&files)?;

    let mut collection = IndexMap::with_capacity(files.len());
    for entry in files {
        collection.insert(entry.path, entry.content);
    }

    let name = match name.trim() {
        "" => DEFAULT_PROJECT_NAME.to_string(),
        trimmed => trimmed.to_string(),
    };
    let project = Project {
        id: Uuid::new_v4().to_string(),
        name,
        browser,
        files: collection,
        created_at: Utc::now().timestamp_millis(),
    };
    info!(
        "Initialized project '{}' ({}) with {} files for {}.",
        project.name,
        project.id,
        project.files.len(),
        project.browser
    );
    Ok(project)
}

/// Returns a new project with `batch` folded in. Paths not named in the batch
/// keep their content; nothing is ever removed. The batch is validated as a
/// whole before any entry is applied.
pub fn merge_updates(project: &Project, batch: &[FileEntry]) -> Result<Project> {
    validate_entries(batch)?;

    let mut merged = project.clone();
    for entry in batch {
        merged.files.insert(entry.path.clone(), entry.content.clone());
    }
    debug!(
        "Merged {} updates into project {} ({} files).",
        batch.len(),
        merged.id,
        merged.files.len()
    );
    Ok(merged)
}

/// `manifest.json` when present, otherwise the first path in insertion order.
pub fn select_default_path(project: &Project) -> Option<String> {
    if project.files.contains_key(MANIFEST_PATH) {
        return Some(MANIFEST_PATH.to_string());
    }
    project.files.keys().next().cloned()
}

pub fn export_entries(project: &Project) -> Vec<FileEntry> {
    project
        .files
        .iter()
        .map(|(path, content)| FileEntry::new(path.as_str(), content.as_str()))
        .collect()
}

pub fn archive_name(project: &Project) -> String {
    let name = project.name.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{}_{}_extension.zip", name, project.browser)
}
