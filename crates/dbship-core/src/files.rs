//! Release file discovery.
//!
//! Walks a directory, keeps the files matching a glob, and derives each
//! file's version and change type from its name:
//!
//! ```text
//! migrations/0001_init.sql          → version 0001,   DDL
//! migrations/1.2.0_backfill_dml.sql → version 1.2.0,  DML
//! migrations/20240101_ghost.sql     → version 20240101, DDL_GHOST
//! ```

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::types::{ChangeType, ReleaseFile};

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("invalid file pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("failed to walk {path}: {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot extract a version from file name {0}")]
    NoVersion(String),

    #[error("no files match {0}")]
    NoMatch(String),
}

/// Discover release files under `root` whose relative path matches `pattern`.
pub fn discover(root: &Path, pattern: &str) -> Result<Vec<ReleaseFile>, DiscoverError> {
    let matcher = compile(pattern)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| DiscoverError::Walk {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !matches(&matcher, &relative) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        let version =
            extract_version(&file_name).ok_or_else(|| DiscoverError::NoVersion(relative.clone()))?;
        let statement =
            std::fs::read_to_string(entry.path()).map_err(|source| DiscoverError::Read {
                path: entry.path().to_path_buf(),
                source,
            })?;

        debug!(path = %relative, %version, "discovered release file");
        files.push(ReleaseFile {
            change_type: change_type(&file_name),
            path: relative,
            version,
            statement,
        });
    }

    if files.is_empty() {
        return Err(DiscoverError::NoMatch(pattern.to_string()));
    }
    files.sort_by(|a, b| {
        compare_versions(&a.version, &b.version).then_with(|| a.path.cmp(&b.path))
    });
    Ok(files)
}

/// Compile a glob (`*`, `**`, `?`, `[...]`) relative to the walk root.
fn compile(pattern: &str) -> Result<Pattern, DiscoverError> {
    Pattern::new(pattern.trim_start_matches("./")).map_err(|e| DiscoverError::Pattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// `*` and `?` stay within one path segment; only `**` crosses `/`.
fn matches(pattern: &Pattern, relative: &str) -> bool {
    pattern.matches_with(
        relative,
        MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        },
    )
}

/// Leading run of digits, dots and underscores, trimmed of separators.
fn extract_version(file_name: &str) -> Option<String> {
    let end = file_name
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
        .unwrap_or(file_name.len());
    let version = file_name[..end].trim_end_matches(['.', '_']);
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

fn change_type(file_name: &str) -> ChangeType {
    let lower = file_name.to_ascii_lowercase();
    if lower.contains("ghost") {
        ChangeType::DdlGhost
    } else if lower.contains("dml") {
        ChangeType::Dml
    } else {
        ChangeType::Ddl
    }
}

/// Compare versions segment by segment, numerically where possible.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let split = |v: &str| -> Vec<u64> {
        v.split(['.', '_'])
            .map(|s| s.parse::<u64>().unwrap_or(0))
            .collect()
    };
    split(a).cmp(&split(b))
}
