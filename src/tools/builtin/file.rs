//! File commands over a workspace root.
//!
//! Every path is resolved against the root and rejected if it escapes it.
//! Reads and writes are size-limited.

use std::path::{Path, PathBuf};

use serde_json::json;
use tokio::fs;

use crate::tools::fs::normalize_path;
use crate::tools::tool::{CommandCall, CommandOutput, ToolError};

/// Maximum file size for reading (1MB).
const MAX_READ_SIZE: u64 = 1024 * 1024;

/// Maximum file size for writing (5MB).
const MAX_WRITE_SIZE: usize = 5 * 1024 * 1024;

/// Maximum directory listing entries.
pub(crate) const MAX_DIR_ENTRIES: usize = 500;

/// Directories never descended into.
pub(crate) const SKIPPED_DIRS: &[&str] =
    &["node_modules", "target", ".git", "__pycache__", "venv", ".venv"];

/// Resolve `path_str` against `root` and make sure it stays inside.
pub(crate) fn validate_path(path_str: &str, root: &Path) -> Result<PathBuf, ToolError> {
    let path = Path::new(path_str);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let resolved = normalize_path(&joined);

    // Follow symlinks on whatever part of the path already exists.
    let check_path = if resolved.exists() {
        resolved.canonicalize().unwrap_or_else(|_| resolved.clone())
    } else {
        match (resolved.parent(), resolved.file_name()) {
            (Some(parent), Some(name)) if parent.exists() => parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| resolved.clone()),
            _ => resolved.clone(),
        }
    };

    if !check_path.starts_with(root) {
        return Err(ToolError::NotAuthorized(format!(
            "Path escapes workspace: {}",
            path_str
        )));
    }

    Ok(resolved)
}

/// String argument at `index`, falling back to the named option `name`.
pub(crate) fn str_arg<'a>(
    call: &'a CommandCall,
    index: usize,
    name: &str,
) -> Result<&'a str, ToolError> {
    call.arg_str(index)
        .or_else(|| call.opt_str(name))
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{}' argument", name)))
}

fn opt_u64(call: &CommandCall, key: &str) -> Option<u64> {
    call.opts
        .as_ref()
        .and_then(|opts| opts.get(key))
        .and_then(|v| v.as_u64())
}

pub(crate) async fn read(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let path_str = str_arg(call, 0, "path")?;
    let offset = opt_u64(call, "offset").unwrap_or(0) as usize;
    let limit = opt_u64(call, "limit");

    let path = validate_path(path_str, root)?;

    let metadata = fs::metadata(&path)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Cannot access file: {}", e)))?;

    if metadata.len() > MAX_READ_SIZE {
        return Err(ToolError::ExecutionFailed(format!(
            "File too large ({} bytes). Maximum is {} bytes. Use offset/limit for partial reads.",
            metadata.len(),
            MAX_READ_SIZE
        )));
    }

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read file: {}", e)))?;

    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();

    let start_line = offset.saturating_sub(1).min(total_lines);
    let end_line = match limit {
        Some(lim) => start_line
            .saturating_add(usize::try_from(lim).unwrap_or(usize::MAX))
            .min(total_lines),
        None => total_lines,
    };

    Ok(CommandOutput::json(json!({
        "path": path.display().to_string(),
        "content": lines[start_line..end_line].join("\n"),
        "total_lines": total_lines,
        "lines_shown": end_line - start_line,
    })))
}

pub(crate) async fn write(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let path_str = str_arg(call, 0, "path")?;
    let content = str_arg(call, 1, "content")?;

    if content.len() > MAX_WRITE_SIZE {
        return Err(ToolError::InvalidArguments(format!(
            "Content too large ({} bytes). Maximum is {} bytes.",
            content.len(),
            MAX_WRITE_SIZE
        )));
    }

    let path = validate_path(path_str, root)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to create directories: {}", e))
        })?;
    }

    fs::write(&path, content)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to write file: {}", e)))?;

    Ok(CommandOutput::json(json!({
        "path": path.display().to_string(),
        "bytes_written": content.len(),
    })))
}

pub(crate) async fn append(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let path_str = str_arg(call, 0, "path")?;
    let content = str_arg(call, 1, "content")?;

    let path = validate_path(path_str, root)?;

    let mut existing = match fs::read_to_string(&path).await {
        Ok(existing) => existing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(ToolError::ExecutionFailed(format!(
                "Failed to read file: {}",
                e
            )));
        }
    };

    if existing.len() + content.len() > MAX_WRITE_SIZE {
        return Err(ToolError::InvalidArguments(format!(
            "Resulting file too large. Maximum is {} bytes.",
            MAX_WRITE_SIZE
        )));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to create directories: {}", e))
        })?;
    }

    existing.push_str(content);
    fs::write(&path, &existing)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to write file: {}", e)))?;

    Ok(CommandOutput::json(json!({
        "path": path.display().to_string(),
        "bytes_appended": content.len(),
    })))
}

pub(crate) async fn replace(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let path_str = str_arg(call, 0, "path")?;
    let old_string = str_arg(call, 1, "old")?;
    let new_string = str_arg(call, 2, "new")?;
    let replace_all = call.opt_bool("replace_all").unwrap_or(false);

    if old_string.is_empty() {
        return Err(ToolError::InvalidArguments(
            "'old' must not be empty".to_string(),
        ));
    }

    let path = validate_path(path_str, root)?;

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read file: {}", e)))?;

    let occurrences = content.matches(old_string).count();
    if occurrences == 0 {
        return Err(ToolError::ExecutionFailed(format!(
            "Could not find the specified text in {}",
            path.display()
        )));
    }

    let (new_content, replacements) = if replace_all {
        (content.replace(old_string, new_string), occurrences)
    } else {
        (content.replacen(old_string, new_string, 1), 1)
    };

    fs::write(&path, &new_content)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to write file: {}", e)))?;

    Ok(CommandOutput::json(json!({
        "path": path.display().to_string(),
        "replacements": replacements,
    })))
}

pub(crate) async fn exists(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let path_str = str_arg(call, 0, "path")?;
    let path = validate_path(path_str, root)?;
    let exists = fs::try_exists(&path).await.unwrap_or(false);

    Ok(CommandOutput::json(json!({
        "path": path.display().to_string(),
        "exists": exists,
    })))
}

pub(crate) async fn list(root: &Path, call: &CommandCall) -> Result<CommandOutput, ToolError> {
    let path_str = call
        .arg_str(0)
        .or_else(|| call.opt_str("path"))
        .unwrap_or(".");
    let recursive = call.opt_bool("recursive").unwrap_or(false);
    let max_depth = opt_u64(call, "max_depth").unwrap_or(3) as usize;

    let path = validate_path(path_str, root)?;

    let mut entries = Vec::new();
    list_dir_inner(&path, &path, recursive, max_depth, 0, &mut entries).await?;

    // Directories first, then by name
    entries.sort_by(|a, b| {
        let a_is_dir = a.ends_with('/');
        let b_is_dir = b.ends_with('/');
        b_is_dir.cmp(&a_is_dir).then_with(|| a.cmp(b))
    });

    let truncated = entries.len() >= MAX_DIR_ENTRIES;

    Ok(CommandOutput::json(json!({
        "path": path.display().to_string(),
        "count": entries.len(),
        "entries": entries,
        "truncated": truncated,
    })))
}

async fn list_dir_inner(
    base: &Path,
    path: &Path,
    recursive: bool,
    max_depth: usize,
    current_depth: usize,
    entries: &mut Vec<String>,
) -> Result<(), ToolError> {
    if entries.len() >= MAX_DIR_ENTRIES {
        return Ok(());
    }

    let mut dir = fs::read_dir(path)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read directory: {}", e)))?;

    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read entry: {}", e)))?
    {
        if entries.len() >= MAX_DIR_ENTRIES {
            break;
        }

        let entry_path = entry.path();
        let relative = entry_path
            .strip_prefix(base)
            .unwrap_or(&entry_path)
            .to_string_lossy()
            .into_owned();

        let is_dir = entry.metadata().await.is_ok_and(|m| m.is_dir());

        if is_dir {
            entries.push(format!("{}/", relative));
            let name = entry.file_name();
            if recursive
                && current_depth < max_depth
                && !SKIPPED_DIRS.contains(&name.to_string_lossy().as_ref())
            {
                Box::pin(list_dir_inner(
                    base,
                    &entry_path,
                    recursive,
                    max_depth,
                    current_depth + 1,
                    entries,
                ))
                .await?;
            }
        } else {
            entries.push(relative);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn root(dir: &TempDir) -> PathBuf {
        dir.path().canonicalize().unwrap()
    }

    #[test]
    fn test_validate_path_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let err = validate_path("../outside.txt", &root(&dir)).unwrap_err();
        assert!(matches!(err, ToolError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_read_with_offset_and_limit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let mut opts = serde_json::Map::new();
        opts.insert("offset".into(), json!(2));
        opts.insert("limit".into(), json!(2));
        let call = CommandCall::new("read", vec![json!("a.txt")]).with_opts(opts);

        let out = read(&root(&dir), &call).await.unwrap();
        assert_eq!(out.output["content"], json!("two\nthree"));
        assert_eq!(out.output["total_lines"], json!(4));
        assert_eq!(out.output["lines_shown"], json!(2));
    }

    #[tokio::test]
    async fn test_read_with_huge_limit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();

        let mut opts = serde_json::Map::new();
        opts.insert("offset".into(), json!(2));
        opts.insert("limit".into(), json!(u64::MAX));
        let call = CommandCall::new("read", vec![json!("a.txt")]).with_opts(opts);

        let out = read(&root(&dir), &call).await.unwrap();
        assert_eq!(out.output["content"], json!("two"));
        assert_eq!(out.output["lines_shown"], json!(1));
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let call = CommandCall::new("write", vec![json!("nested/deep/b.txt"), json!("hi")]);

        write(&root(&dir), &call).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("nested/deep/b.txt")).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn test_append_to_missing_file_creates_it() {
        let dir = TempDir::new().unwrap();
        let call = CommandCall::new("append", vec![json!("log.txt"), json!("first\n")]);
        append(&root(&dir), &call).await.unwrap();
        let call = CommandCall::new("append", vec![json!("log.txt"), json!("second\n")]);
        append(&root(&dir), &call).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
            "first\nsecond\n"
        );
    }

    #[tokio::test]
    async fn test_replace_first_and_all() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c.rs"), "a a a").unwrap();

        let call = CommandCall::new("replace", vec![json!("c.rs"), json!("a"), json!("b")]);
        let out = replace(&root(&dir), &call).await.unwrap();
        assert_eq!(out.output["replacements"], json!(1));
        assert_eq!(std::fs::read_to_string(dir.path().join("c.rs")).unwrap(), "b a a");

        let mut opts = serde_json::Map::new();
        opts.insert("replace_all".into(), json!(true));
        let call = CommandCall::new("replace", vec![json!("c.rs"), json!("a"), json!("b")])
            .with_opts(opts);
        let out = replace(&root(&dir), &call).await.unwrap();
        assert_eq!(out.output["replacements"], json!(2));
        assert_eq!(std::fs::read_to_string(dir.path().join("c.rs")).unwrap(), "b b b");
    }

    #[tokio::test]
    async fn test_replace_missing_text_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c.rs"), "abc").unwrap();

        let call = CommandCall::new("replace", vec![json!("c.rs"), json!("zzz"), json!("y")]);
        let err = replace(&root(&dir), &call).await.unwrap_err();
        assert!(err.to_string().contains("Could not find"));
    }

    #[tokio::test]
    async fn test_list_sorts_dirs_first_and_skips_target() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();

        let mut opts = serde_json::Map::new();
        opts.insert("recursive".into(), json!(true));
        let call = CommandCall::new("list", vec![]).with_opts(opts);

        let out = list(&root(&dir), &call).await.unwrap();
        let entries: Vec<String> = serde_json::from_value(out.output["entries"].clone()).unwrap();

        assert!(entries[0].ends_with('/'));
        assert!(entries.contains(&"src/lib.rs".to_string()));
        assert!(entries.contains(&"target/".to_string()));
        assert!(!entries.iter().any(|e| e.starts_with("target/debug")));
    }
}
