//! Lexical path normalization.

/// Normalizes a path lexically.
///
/// Repeated separators collapse, `.` segments drop, `..` removes the previous
/// segment where one exists and trailing separators are stripped. An empty
/// result becomes `.`. The filesystem is never consulted, so `~` and symlinks
/// are kept as written.
#[must_use]
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `..` above the root is the root itself.
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Normalizes every path, preserving order.
#[must_use]
pub fn clean_paths(paths: &[String]) -> Vec<String> {
    paths.iter().map(|p| clean_path(p)).collect()
}

/// Normalizes an HTTP endpoint: adds `https://` when no scheme is given and
/// strips trailing slashes.
#[must_use]
pub fn format_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}
