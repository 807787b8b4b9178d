//! Plain-text search across workspace files.

use std::path::Path;

use serde_json::{Value, json};
use walkdir::{DirEntry, WalkDir};

use crate::tools::builtin::file::{SKIPPED_DIRS, str_arg, validate_path};
use crate::tools::tool::{CommandCall, CommandOutput, ToolError};

/// Default cap on reported matches.
const DEFAULT_MAX_RESULTS: usize = 100;

/// Files larger than this are skipped.
const MAX_SEARCH_FILE_SIZE: u64 = 1024 * 1024;

/// Longest line excerpt returned per match.
const MAX_EXCERPT_CHARS: usize = 200;

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
}

/// Search for `pattern` (first arg) under an optional directory (second arg).
///
/// Options: `case_sensitive` (default true), `max_results` (default 100).
pub(crate) async fn search(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let pattern = str_arg(call, 0, "pattern")?.to_string();
    if pattern.is_empty() {
        return Err(ToolError::InvalidArguments(
            "'pattern' must not be empty".to_string(),
        ));
    }

    let dir = call
        .arg_str(1)
        .or_else(|| call.opt_str("path"))
        .unwrap_or(".");
    let start = validate_path(dir, root)?;
    let case_sensitive = call.opt_bool("case_sensitive").unwrap_or(true);
    let max_results = call
        .opts
        .as_ref()
        .and_then(|o| o.get("max_results"))
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MAX_RESULTS);

    let root = root.to_path_buf();
    let (matches, truncated) = tokio::task::spawn_blocking(move || {
        scan(&root, &start, &pattern, case_sensitive, max_results)
    })
    .await
    .map_err(|e| ToolError::ExecutionFailed(format!("Search task failed: {}", e)))?;

    Ok(CommandOutput::json(json!({
        "count": matches.len(),
        "matches": matches,
        "truncated": truncated,
    })))
}

fn scan(
    root: &Path,
    start: &Path,
    pattern: &str,
    case_sensitive: bool,
    max_results: usize,
) -> (Vec<Value>, bool) {
    let needle = if case_sensitive {
        pattern.to_string()
    } else {
        pattern.to_lowercase()
    };

    let mut matches = Vec::new();
    let walker = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_SEARCH_FILE_SIZE {
            continue;
        }
        // Binary or non-UTF-8 files are skipped.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();

        for (line_no, line) in content.lines().enumerate() {
            let hit = if case_sensitive {
                line.contains(&needle)
            } else {
                line.to_lowercase().contains(&needle)
            };
            if !hit {
                continue;
            }
            if matches.len() >= max_results {
                return (matches, true);
            }
            let excerpt: String = line.trim().chars().take(MAX_EXCERPT_CHARS).collect();
            matches.push(json!({
                "path": relative,
                "line": line_no + 1,
                "text": excerpt,
            }));
        }
    }

    (matches, false)
}
