// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in tools for Coda

mod edit_file;
mod execute_command;
mod glob_files;
mod list_files;
mod multi_edit;
mod read_file;
mod search_in_files;
mod write_file;

pub use edit_file::EditFileTool;
pub use execute_command::ExecuteCommandTool;
pub use glob_files::GlobFilesTool;
pub use list_files::ListFilesTool;
pub use multi_edit::MultiEditTool;
pub use read_file::ReadFileTool;
pub use search_in_files::SearchInFilesTool;
pub use write_file::WriteFileTool;
