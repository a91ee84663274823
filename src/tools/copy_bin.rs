//! Copy the artifacts of a build directory somewhere else.

use super::ToolError;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files needed to flash a build.
pub const BIN_FILES: &[&str] = &[
    "*.bin",
    "bootloader/*.bin",
    "partition_table/*.bin",
    "partition_table/*.csv",
    "flasher_args.json",
    "flash_project_args",
    "config/sdkconfig.json",
    "sdkconfig",
];

/// Extra files for debugging a build.
pub const MAP_AND_ELF_FILES: &[&str] = &[
    "project_description.json",
    "bootloader/*.map",
    "bootloader/*.elf",
    "*.map",
    "*.elf",
];

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Replace an existing destination directory.
    pub force: bool,
    /// Include elf and map files.
    pub copy_elf: bool,
    /// Further glob patterns relative to the build directory.
    pub extra_files: Vec<String>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            force: true,
            copy_elf: true,
            extra_files: Vec::new(),
        }
    }
}

/// Translate a `/`-separated glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, ToolError> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| ToolError::parse("file pattern", format!("{pattern}: {e}")))
}

/// Relative `/`-joined paths of the files under `root`, at most `depth`
/// directories deep.
fn list_files(root: &Path, dir: &Path, depth: usize, out: &mut Vec<String>) -> Result<(), ToolError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ToolError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| ToolError::io(dir, e))?.path();
        if path.is_dir() {
            if depth > 0 {
                list_files(root, &path, depth - 1, out)?;
            }
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

/// Copy build files from `from_dir` into a fresh `to_dir`, keeping their
/// relative layout. Returns the copied relative paths.
pub fn copy_bin_to_new_path(
    from_dir: &Path,
    to_dir: &Path,
    options: &CopyOptions,
) -> Result<Vec<PathBuf>, ToolError> {
    if !from_dir.is_dir() {
        return Err(ToolError::InvalidBinPath(from_dir.to_path_buf()));
    }
    debug!("Copying bin files from {} to {}", from_dir.display(), to_dir.display());
    if to_dir.exists() {
        if !options.force {
            return Err(ToolError::DestinationExists(to_dir.to_path_buf()));
        }
        debug!("Removing existing destination directory {}", to_dir.display());
        std::fs::remove_dir_all(to_dir).map_err(|e| ToolError::io(to_dir, e))?;
    }
    std::fs::create_dir_all(to_dir).map_err(|e| ToolError::io(to_dir, e))?;

    let mut patterns: Vec<&str> = BIN_FILES.to_vec();
    if options.copy_elf {
        patterns.extend_from_slice(MAP_AND_ELF_FILES);
    }
    patterns.extend(options.extra_files.iter().map(String::as_str));
    let depth = patterns.iter().map(|p| p.matches('/').count()).max().unwrap_or(0);
    let matchers = patterns
        .iter()
        .map(|p| glob_to_regex(p))
        .collect::<Result<Vec<_>, _>>()?;

    let mut files = Vec::new();
    list_files(from_dir, from_dir, depth, &mut files)?;
    files.sort();

    let mut copied = Vec::new();
    for file in files.iter().filter(|f| matchers.iter().any(|m| m.is_match(f))) {
        let relative = PathBuf::from(file);
        let target = to_dir.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
        }
        debug!("Copying file {file}");
        std::fs::copy(from_dir.join(&relative), &target).map_err(|e| ToolError::io(&target, e))?;
        copied.push(relative);
    }
    Ok(copied)
}
