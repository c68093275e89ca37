use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use globset::GlobSet;
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{Config, SearchConfig};
use crate::error::{Result, VaultError};
use crate::guard::PathGuard;
use crate::model::{MatchEntry, SearchReport};

/// 笔记扫描器：遍历笔记目录，匹配文件名与内容，并提供单篇笔记读取。
/// 所有内容读取都经过 [`PathGuard`]。
pub struct VaultScanner {
    guard: PathGuard,
    note_extension: String,
    exclude: GlobSet,
    search: SearchConfig,
}

impl VaultScanner {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            guard: PathGuard::new(&config.vault.root)?,
            note_extension: config.vault.note_extension.clone(),
            exclude: config.exclude_set()?,
            search: config.search.clone(),
        })
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn search(&self, query: Option<&str>) -> Result<SearchReport> {
        self.search_until(query, &AtomicBool::new(false))
    }

    /// 每处理一个文件前检查 `cancel`，置位后返回已收集的部分结果。
    pub fn search_until(&self, query: Option<&str>, cancel: &AtomicBool) -> Result<SearchReport> {
        let query = match query {
            None => {
                return Err(VaultError::InvalidInput(
                    "no search query was provided".into(),
                ))
            }
            Some("") => return Err(VaultError::InvalidInput("search query is empty".into())),
            Some(q) => q,
        };

        let root = self.guard.root();
        let meta = fs::metadata(root).map_err(|e| {
            error!("cannot access vault root {}: {}", root.display(), e);
            VaultError::Internal(format!("cannot access vault root: {e}"))
        })?;
        if !meta.is_dir() {
            error!("vault root is not a directory: {}", root.display());
            return Err(VaultError::Internal("vault root is not a directory".into()));
        }

        let needle = fold(query);
        let mut report = SearchReport::new(query);

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_excluded(e));

        for item in walker {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    error!("cannot enumerate vault root {}: {}", root.display(), err);
                    return Err(VaultError::Internal(format!(
                        "cannot enumerate vault root: {err}"
                    )));
                }
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| self.guard.relative_display(p))
                        .unwrap_or_else(|| "<unknown>".to_string());
                    warn!("walk error under {}: {}", path, err);
                    let reason = err
                        .io_error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| err.to_string());
                    report.entries.push(MatchEntry::Problem { path, reason });
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(self.note_extension.as_str()) {
                continue;
            }

            report.files_scanned += 1;
            if let Some(m) = self.match_note(entry.path(), &name, &needle) {
                report.entries.push(m);
                if let Some(limit) = self.search.max_results {
                    if report.entries.len() >= limit {
                        report.truncated = true;
                        break;
                    }
                }
            }
        }

        debug!(
            "search {:?}: {} entries from {} notes",
            query,
            report.entries.len(),
            report.files_scanned
        );
        Ok(report)
    }

    pub fn get_note(&self, path: &str) -> Result<String> {
        self.read_note(path)
    }

    fn match_note(&self, path: &Path, file_name: &str, needle: &[char]) -> Option<MatchEntry> {
        let rel = self.guard.relative_display(path);

        if find_folded(&fold(file_name), needle).is_some() {
            return Some(MatchEntry::FilenameMatch { path: rel });
        }

        match self.read_note(&rel) {
            Ok(content) => extract_snippet(
                &content,
                needle,
                self.search.snippet_before,
                self.search.snippet_after,
            )
            .map(|snippet| MatchEntry::ContentMatch { path: rel, snippet }),
            Err(err) => {
                warn!("problem file {}: {}", rel, err);
                Some(MatchEntry::Problem {
                    path: rel,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn read_note(&self, relative: &str) -> Result<String> {
        let full = self.guard.resolve(relative)?;
        fs::read_to_string(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VaultError::NotFound {
                path: relative.to_string(),
            },
            _ => VaultError::read(relative, &e),
        })
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || self.exclude.is_empty() {
            return false;
        }
        let rel = self.guard.relative_display(entry.path());
        self.exclude.is_match(rel.as_str())
    }
}

/// Case-fold one char, keeping it as-is when lowercasing would expand it.
/// Keeps folded text index-aligned with the input.
fn fold_char(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

fn fold(s: &str) -> Vec<char> {
    s.chars().map(fold_char).collect()
}

fn find_folded(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Snippet around the first case-insensitive match, measured in characters:
/// `[max(0, i - before), min(len, i + needle.len() + after))`.
pub fn extract_snippet(content: &str, needle: &[char], before: usize, after: usize) -> Option<String> {
    let chars: Vec<char> = content.chars().collect();
    let folded: Vec<char> = chars.iter().copied().map(fold_char).collect();
    let start = find_folded(&folded, needle)?;
    let from = start.saturating_sub(before);
    let to = start
        .saturating_add(needle.len())
        .saturating_add(after)
        .min(chars.len());
    Some(chars[from..to].iter().collect())
}
