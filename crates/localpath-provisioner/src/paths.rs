//! Lexical path handling for host paths.
//!
//! Host paths belong to the target node, not to the machine the provisioner
//! runs on, so nothing here touches the local filesystem.

/// Cleans an absolute path lexically.
///
/// Collapses repeated separators, drops `.` segments, resolves `..` against
/// the preceding segment and strips any trailing separator. Returns `None`
/// when `path` does not start with `/`.
pub fn clean_absolute(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    Some(format!("/{}", segments.join("/")))
}

/// Joins `rel` onto `base` and cleans the result.
///
/// Unlike [`std::path::Path::join`], a leading `/` on `rel` does not replace
/// `base`; both sides are treated as segment lists.
pub fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        return clean_relative(rel);
    }
    let joined = format!("{}/{}", base, rel);
    if base.starts_with('/') {
        clean_absolute(&joined).unwrap_or(joined)
    } else {
        clean_relative(&joined)
    }
}

fn clean_relative(path: &str) -> String {
    if path.starts_with('/') {
        return clean_absolute(path).unwrap_or_default();
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Splits a cleaned absolute path into its parent directory and leaf name.
///
/// The parent keeps no trailing separator, so a path directly below the root
/// yields an empty parent, and the root itself yields an empty leaf.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}
