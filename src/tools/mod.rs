//! Command execution surface.
//!
//! The agent invokes commands by name. A [`CommandCatalog`] resolves and runs
//! them; [`builtin::WorkspaceCatalog`] is the catalog shipped with the
//! binary, operating on files under a workspace root.

pub mod builtin;

mod fs;
mod tool;

pub use fs::{FileSystem, LocalFs, MemoryFs, normalize_path};
pub use tool::{
    CommandCall, CommandCatalog, CommandOutput, MUTATING_COMMANDS, ToolError, ToolResult,
    is_mutating_command,
};
