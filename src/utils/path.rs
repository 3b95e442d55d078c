//! Lexical path helpers.
//!
//! Nothing here touches the filesystem: paths are normalized as strings so
//! that ordering and prefix checks never depend on what an untrusted tree
//! currently contains.

use std::cmp::Ordering;

/// Lexically clean a path: collapse repeated separators, drop `.` elements,
/// resolve `..` against the preceding element and strip any trailing
/// separator except for the root itself. `..` at the root is dropped.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Split a cleaned absolute path into its segments. The root has none.
pub fn segments(clean: &str) -> Vec<&str> {
    clean.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether `path` is `dir` itself or lies somewhere beneath it.
/// Both arguments must already be cleaned.
pub fn is_same_or_descendant(path: &str, dir: &str) -> bool {
    path == dir || path.starts_with(&with_trailing_slash(dir))
}

/// `dir` with exactly one trailing separator.
pub fn with_trailing_slash(dir: &str) -> String {
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{}/", dir)
    }
}

/// Magic directory order: compare directories as if each carried a trailing
/// separator. A directory then sorts immediately before its descendants and
/// after siblings that merely share a textual prefix (`/foo-bar` < `/foo/`).
pub fn magic_dir_cmp(a: &str, b: &str) -> Ordering {
    with_trailing_slash(a).cmp(&with_trailing_slash(b))
}

/// Join a cleaned absolute directory and one name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
