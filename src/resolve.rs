use crate::env::Environment;
use nix::unistd::{AccessFlags, access};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve a command token to an executable file.
///
/// Behavior:
/// - Absolute path: returned unchanged if it is an executable file.
/// - Relative with separators (e.g., `./run.sh`, `bin/tool`): tried against the
///   interpreter's working directory first, then searched like a bare name.
/// - Bare name: each directory of `PATH` is probed in order and the first
///   executable match wins.
///
/// A missing program is an expected outcome and yields `None`, as does an unset
/// `PATH`.
pub fn find_executable(env: &Environment, command: &str) -> Option<PathBuf> {
    let path = Path::new(command);
    if command.is_empty() {
        return None;
    }
    if path.is_absolute() {
        return is_executable(path).then(|| path.to_path_buf());
    }
    if command.contains('/') {
        let candidate = env.current_dir.join(path);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    let search_paths = env.get_var_os("PATH")?;
    find_in_path(search_paths, path)
}

fn find_in_path(search_paths: &OsStr, cmd: &Path) -> Option<PathBuf> {
    // PATH entries are split on ':' only, empty entries included
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

/// A regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}
