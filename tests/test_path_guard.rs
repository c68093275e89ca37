use std::fs;

use obsidian_vault_mcp::error::VaultError;
use obsidian_vault_mcp::guard::{resolve, PathGuard};
use tempfile::tempdir;

#[test]
fn test_traversal_variants_are_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    fs::create_dir_all(root.join("a/b")).unwrap();
    let guard = PathGuard::new(&root).unwrap();

    for rel in [
        "../../etc/passwd",
        "a/b/../../../x.md",
        "./../vault-evil/x.md",
        "/etc/passwd",
        "a/./b/../../..",
    ] {
        match guard.resolve(rel) {
            Err(VaultError::PathTraversal { requested }) => assert_eq!(requested, rel),
            other => panic!("{rel}: expected traversal, got {other:?}"),
        }
    }
}

#[test]
fn test_inside_paths_resolve_idempotently() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    fs::create_dir_all(root.join("Notes")).unwrap();
    fs::write(root.join("Notes/a.md"), "x").unwrap();
    let guard = PathGuard::new(&root).unwrap();

    for rel in ["Notes/a.md", "Notes/sub/new.md", "Notes/../top.md", "Daily Notes/x.md"] {
        let once = guard.resolve(rel).unwrap();
        assert!(once.starts_with(guard.root()));
        let twice = resolve(guard.root(), once.to_str().unwrap()).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn test_guard_root_is_canonical() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    fs::create_dir_all(&root).unwrap();
    let guard = PathGuard::new(root.join("../vault")).unwrap();
    assert_eq!(guard.root(), fs::canonicalize(&root).unwrap());
}
