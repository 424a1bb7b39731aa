//! Mapping a process working directory to its owning project

use std::path::{Component, Path};

/// The first path segment of `cwd` under `projects_root`.
///
/// `~/projects/blog/server` with root `~/projects` is owned by `blog`.
/// Paths outside the root, or the root itself, have no owner.
pub fn owner_project(projects_root: &Path, cwd: &Path) -> Option<String> {
    let relative = cwd.strip_prefix(projects_root).ok()?;
    match relative.components().next()? {
        Component::Normal(segment) => segment.to_str().map(str::to_string),
        _ => None,
    }
}
