// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use crate::{Error, Result};

/// Normalize a slash path: strip `./` prefixes, collapse duplicate
/// separators and drop leading/trailing slashes. The empty string is the
/// root. Parent references are rejected rather than resolved.
pub fn clean(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(Error::InvalidPath(path.to_owned())),
            part => parts.push(part),
        }
    }
    Ok(parts.join("/"))
}

/// Join two already-cleaned slash paths.
pub fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_owned(),
        (_, true) => base.to_owned(),
        _ => format!("{base}/{name}"),
    }
}

/// The final path segment.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The parent of the final path segment, empty for a bare name.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Whether a name carries a `.zip` extension, ignoring case. A component
/// named exactly `.zip` counts too.
pub fn is_zip_name(name: &str) -> bool {
    name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".zip")
}

/// Scan segments right to left for the innermost `.zip` component and split
/// the path into the archive path and the path inside the archive.
pub fn split_zip_path(path: &str) -> Result<Option<(String, String)>> {
    let path = clean(path)?;
    if path.is_empty() {
        return Ok(None);
    }
    let parts: Vec<&str> = path.split('/').collect();
    for idx in (0..parts.len()).rev() {
        if is_zip_name(parts[idx]) {
            return Ok(Some((parts[..=idx].join("/"), parts[idx + 1..].join("/"))));
        }
    }
    Ok(None)
}

#[cfg(test)]
#[path = "./path_test.rs"]
mod path_test;
