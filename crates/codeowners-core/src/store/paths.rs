//! Repository path helpers.
//!
//! All paths handled by the core are absolute, `/`-separated and relative to
//! the repository root (`/` itself is the root folder).

use crate::errors::{OwnersError, OwnersResult};

/// Normalize a caller supplied file path to its absolute form.
///
/// Rejects empty paths, `.`/`..` segments, empty segments, and trailing
/// slashes.  A missing leading slash is tolerated.
pub fn normalize_file_path(path: &str) -> OwnersResult<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return Err(OwnersError::invalid_input("path is required"));
    }
    if trimmed.ends_with('/') {
        return Err(OwnersError::invalid_input(format!(
            "path '{trimmed}' must not end with a slash"
        )));
    }
    if trimmed.contains('\\') {
        return Err(OwnersError::invalid_input(format!(
            "path '{trimmed}' must use '/' as separator"
        )));
    }
    let relative = trimmed.strip_prefix('/').unwrap_or(trimmed);
    for segment in relative.split('/') {
        match segment {
            "" => {
                return Err(OwnersError::invalid_input(format!(
                    "path '{trimmed}' contains an empty segment"
                )))
            }
            "." | ".." => {
                return Err(OwnersError::invalid_input(format!(
                    "path '{trimmed}' must not contain '{segment}'"
                )))
            }
            _ => {}
        }
    }
    Ok(format!("/{relative}"))
}

/// Folder that contains `path` (`/` for top-level files).
pub fn parent_folder(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Number of name segments: `/` has 0, `/a` has 1, `/a/b.txt` has 2.
pub fn segment_count(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Folders from the immediate parent of `path` up to the root, innermost first.
pub fn ancestor_folders(path: &str) -> Vec<String> {
    let mut folders = Vec::new();
    let mut current = parent_folder(path);
    loop {
        let is_root = current == "/";
        folders.push(current.clone());
        if is_root {
            break;
        }
        current = parent_folder(&current);
    }
    folders
}

/// Path of `path` relative to `folder`, or `None` if it is not below it.
pub fn relative_to(folder: &str, path: &str) -> Option<String> {
    if folder == "/" {
        return path.strip_prefix('/').map(str::to_string);
    }
    path.strip_prefix(folder)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Resolve an import target against the importing folder.
///
/// Relative targets may use `..` as long as they stay inside the repository.
pub fn resolve_import_path(importing_folder: &str, target: &str) -> OwnersResult<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(OwnersError::invalid_input("import path is empty"));
    }
    let joined = if target.starts_with('/') {
        target.to_string()
    } else if importing_folder == "/" {
        format!("/{target}")
    } else {
        format!("{importing_folder}/{target}")
    };
    let mut stack: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(OwnersError::invalid_input(format!(
                        "import path '{target}' points outside of the repository"
                    )));
                }
            }
            _ => stack.push(part),
        }
    }
    if stack.is_empty() {
        return Err(OwnersError::invalid_input(format!(
            "import path '{target}' does not name a file"
        )));
    }
    Ok(format!("/{}", stack.join("/")))
}
