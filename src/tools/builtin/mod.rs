//! Built-in command catalog over a local workspace.

mod file;
mod search;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::tools::tool::{CommandCall, CommandCatalog, CommandOutput, ToolError};

/// Command names understood by [`WorkspaceCatalog`].
pub const WORKSPACE_COMMANDS: &[&str] = &[
    "read", "write", "append", "replace", "list", "exists", "search",
];

/// File and search commands confined to one workspace directory.
///
/// | command   | args                        | opts                              |
/// |-----------|-----------------------------|-----------------------------------|
/// | `read`    | path                        | `offset`, `limit`                 |
/// | `write`   | path, content               |                                   |
/// | `append`  | path, content               |                                   |
/// | `replace` | path, old, new              | `replace_all`                     |
/// | `list`    | path?                       | `recursive`, `max_depth`          |
/// | `exists`  | path                        |                                   |
/// | `search`  | pattern, path?              | `case_sensitive`, `max_results`   |
#[derive(Debug, Clone)]
pub struct WorkspaceCatalog {
    root: PathBuf,
}

impl WorkspaceCatalog {
    /// Create a catalog rooted at `root`.
    ///
    /// The root is canonicalized so symlinked paths compare correctly.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    /// The workspace root all paths resolve against.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CommandCatalog for WorkspaceCatalog {
    async fn execute(&self, call: &CommandCall) -> Result<CommandOutput, ToolError> {
        match call.command.as_str() {
            "read" => file::read(&self.root, call).await,
            "write" => file::write(&self.root, call).await,
            "append" => file::append(&self.root, call).await,
            "replace" => file::replace(&self.root, call).await,
            "list" => file::list(&self.root, call).await,
            "exists" => file::exists(&self.root, call).await,
            "search" => search::search(&self.root, call).await,
            "" => Err(ToolError::InvalidArguments(
                "command call has no command name".to_string(),
            )),
            other => Err(ToolError::UnknownCommand(other.to_string())),
        }
    }
}
