// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-artifact cleanup shared by the reconciler and the watcher.

use std::path::Path;

use lifetrace_core::LifetraceError;
use lifetrace_storage::queries::artifacts;
use lifetrace_storage::{CleanupSummary, Database};
use tracing::info;

/// Lowercased extensions without the leading dot.
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Whether `path` carries one of the (normalized) artifact extensions.
pub fn is_artifact_path(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Remove the record indexed at `path` and everything that references it.
///
/// Runs as one transaction. Returns `None` if nothing was indexed there.
pub async fn cleanup_artifact(
    db: &Database,
    path: &str,
) -> Result<Option<CleanupSummary>, LifetraceError> {
    let summary = artifacts::delete_artifact_cascade(db, path).await?;
    if let Some(summary) = &summary {
        info!(
            path,
            artifact_id = summary.artifact_id,
            tasks = summary.tasks,
            ocr_results = summary.ocr_results,
            search_entries = summary.search_entries,
            "orphan artifact record removed"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn extension_matching_is_case_insensitive() {
        let exts = normalize_extensions(&[".PNG".to_string(), "jpg".to_string(), String::new()]);
        assert_eq!(exts, vec!["png", "jpg"]);
        assert!(is_artifact_path(&PathBuf::from("/x/shot.Png"), &exts));
        assert!(is_artifact_path(&PathBuf::from("a.JPG"), &exts));
        assert!(!is_artifact_path(&PathBuf::from("/x/shot.png.tmp"), &exts));
        assert!(!is_artifact_path(&PathBuf::from("/x/README"), &exts));
    }
}
