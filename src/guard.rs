use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, VaultError};

const MAX_SYMLINK_HOPS: usize = 40;

/// 路径守卫：把调用方给出的相对路径限制在笔记库根目录内。
///
/// 根目录在构造时规范化一次，之后不再变化，可在并发调用间共享。
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: canonical_base(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the root, rejecting anything that lands outside it.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        resolve_under(&self.root, relative)
    }

    /// Same as [`PathGuard::resolve`], but an absent argument is its own error.
    #[cfg(test)]
    pub fn resolve_optional(&self, relative: Option<&str>) -> Result<PathBuf> {
        match relative {
            Some(rel) => self.resolve(rel),
            None => Err(VaultError::InvalidInput("path is required".into())),
        }
    }

    /// Render a path below the root as a `/`-separated relative path.
    pub fn relative_display(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}

/// One-shot form of [`PathGuard::resolve`] for callers without a guard at hand.
pub fn resolve(base: &Path, relative: &str) -> Result<PathBuf> {
    let root = canonical_base(base)?;
    resolve_under(&root, relative)
}

fn canonical_base(base: &Path) -> Result<PathBuf> {
    if base.as_os_str().is_empty() {
        return Err(VaultError::InvalidInput("base path is empty".into()));
    }
    if !base.is_absolute() {
        return Err(VaultError::InvalidInput(format!(
            "base path must be absolute: {}",
            base.display()
        )));
    }
    soft_canonicalize(base)
        .map_err(|e| VaultError::InvalidInput(format!("cannot resolve base path: {e}")))
}

fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.is_empty() {
        return Err(VaultError::InvalidInput("path is empty".into()));
    }
    if relative.contains('\0') {
        return Err(VaultError::InvalidInput(
            "path must not contain NUL bytes".into(),
        ));
    }

    let resolved = soft_canonicalize(&root.join(relative))
        .map_err(|e| VaultError::InvalidInput(format!("cannot resolve path: {e}")))?;

    // Component-wise comparison: `/vault` is not a prefix of `/vault-evil`.
    if resolved == root || !resolved.starts_with(root) {
        return Err(VaultError::PathTraversal {
            requested: relative.to_string(),
        });
    }
    Ok(resolved)
}

/// Canonicalize the longest existing ancestor of `path` and resolve the rest
/// lexically. Dangling symlinks in the remainder are still followed so they
/// cannot smuggle a path out of the root.
fn soft_canonicalize(path: &Path) -> io::Result<PathBuf> {
    let mut hops = 0;
    soft_canonicalize_inner(path, &mut hops)
}

fn soft_canonicalize_inner(path: &Path, hops: &mut usize) -> io::Result<PathBuf> {
    let existing = path
        .ancestors()
        .find_map(|ancestor| fs::canonicalize(ancestor).ok().map(|c| (c, ancestor)));

    let (mut out, rest) = match existing {
        Some((canon, ancestor)) => (
            canon,
            path.strip_prefix(ancestor).unwrap_or(Path::new("")).to_path_buf(),
        ),
        None => (PathBuf::new(), path.to_path_buf()),
    };

    let mut components = rest.components();
    while let Some(component) = components.next() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => {
                out.push(name);
                if let Ok(target) = fs::read_link(&out) {
                    *hops += 1;
                    if *hops > MAX_SYMLINK_HOPS {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            "too many levels of symbolic links",
                        ));
                    }
                    out.pop();
                    let mut next = out.join(target);
                    let remaining = components.as_path();
                    if !remaining.as_os_str().is_empty() {
                        next.push(remaining);
                    }
                    return soft_canonicalize_inner(&next, hops);
                }
            }
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    Ok(out)
}
