use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::model::{MatchEntry, SearchReport};
use crate::scanner::VaultScanner;

pub const SEARCH_TOOL: &str = "search_obsidian_vault";
pub const GET_NOTE_TOOL: &str = "get_note_by_uri";

const MISSING_QUERY: &str =
    "Error: No search query was provided. Please specify what to search for.";
const INTERNAL_ERROR: &str =
    "Internal server error: Could not access vault files. Please check server logs.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }

    fn err(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Faults in the call envelope itself, as opposed to failures of a well-formed call.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchArgs {
    #[serde(default)]
    pub query: Option<String>,
}

/// A note location relative to the vault root.
#[derive(Debug, Clone, Deserialize)]
pub struct FilePath {
    pub path: String,
}

/// Accept both `{"path": ..}` and the wrapped `{"search_input": {"path": ..}}` shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GetNoteArgs {
    Flat(FilePath),
    Wrapped { search_input: FilePath },
}

impl From<GetNoteArgs> for FilePath {
    fn from(args: GetNoteArgs) -> Self {
        match args {
            GetNoteArgs::Flat(p) | GetNoteArgs::Wrapped { search_input: p } => p,
        }
    }
}

/// 工具分发：解析参数，在阻塞线程池中执行扫描，并把结果渲染成文本。
pub struct VaultTools {
    scanner: Arc<VaultScanner>,
    search_timeout: Option<Duration>,
}

impl VaultTools {
    pub fn new(scanner: Arc<VaultScanner>, search_timeout: Option<Duration>) -> Self {
        Self {
            scanner,
            search_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let scanner = Arc::new(VaultScanner::new(config)?);
        let search_timeout = config
            .search
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        Ok(Self::new(scanner, search_timeout))
    }

    pub fn definitions() -> Vec<Value> {
        vec![
            serde_json::json!({
                "name": SEARCH_TOOL,
                "description": "Searches the Obsidian vault for notes matching the query. Returns a summarized list of matching file paths and content snippets.",
                "inputSchema": {
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query to use within the Obsidian vault."
                        }
                    }
                }
            }),
            serde_json::json!({
                "name": GET_NOTE_TOOL,
                "description": "Retrieves the full content of an Obsidian note by its vault-relative path. Provide the path to the note (e.g., 'Daily Notes/2025-05-28.md').",
                "inputSchema": {
                    "type": "object",
                    "required": ["path"],
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file relative to the vault root."
                        }
                    }
                }
            }),
        ]
    }

    pub async fn call(&self, name: &str, arguments: Value) -> std::result::Result<ToolOutput, ToolCallError> {
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        match name {
            SEARCH_TOOL => {
                let args: SearchArgs = serde_json::from_value(arguments)
                    .map_err(|e| ToolCallError::InvalidArguments(e.to_string()))?;
                Ok(self.search(args.query).await)
            }
            GET_NOTE_TOOL => {
                let args: GetNoteArgs = serde_json::from_value(arguments).map_err(|_| {
                    ToolCallError::InvalidArguments("missing required string field `path`".into())
                })?;
                Ok(self.get_note(FilePath::from(args).path).await)
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    pub async fn search(&self, query: Option<String>) -> ToolOutput {
        info!("search_obsidian_vault query={:?}", query);
        let result = self.search_report(query).await;
        if let Ok(report) = &result {
            let problems = report.problems().count();
            if problems > 0 {
                warn!(
                    "search {:?} hit {} unreadable entries: {:?}",
                    report.query,
                    problems,
                    report.problems().map(MatchEntry::path).collect::<Vec<_>>()
                );
            }
        }
        render_search(result)
    }

    pub async fn get_note(&self, path: String) -> ToolOutput {
        info!("get_note_by_uri path={:?}", path);
        let result = self.read_note(path.clone()).await;
        render_note(&path, result)
    }

    /// 在阻塞线程池执行搜索；超时后通知遍历停止，返回部分结果。
    pub async fn search_report(&self, query: Option<String>) -> Result<SearchReport> {
        let scanner = self.scanner.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let mut task =
            tokio::task::spawn_blocking(move || scanner.search_until(query.as_deref(), &flag));

        let joined = match self.search_timeout {
            Some(limit) => match timeout(limit, &mut task).await {
                Ok(res) => res,
                Err(_) => {
                    warn!("search exceeded {:?}; stopping walk early", limit);
                    cancel.store(true, Ordering::Relaxed);
                    task.await
                }
            },
            None => task.await,
        };

        joined.map_err(|e| {
            error!("search task failed: {}", e);
            VaultError::Internal(format!("search task failed: {e}"))
        })?
    }

    pub async fn read_note(&self, path: String) -> Result<String> {
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.get_note(&path))
            .await
            .map_err(|e| {
                error!("note task failed: {}", e);
                VaultError::Internal(format!("note task failed: {e}"))
            })?
    }
}

pub fn render_search(result: Result<SearchReport>) -> ToolOutput {
    match result {
        Ok(report) => ToolOutput::ok(report.render()),
        Err(VaultError::InvalidInput(_)) => ToolOutput::err(MISSING_QUERY),
        Err(e) => {
            error!("search failed: {}", e);
            ToolOutput::err(INTERNAL_ERROR)
        }
    }
}

pub fn render_note(requested: &str, result: Result<String>) -> ToolOutput {
    match result {
        Ok(content) => ToolOutput::ok(content),
        Err(VaultError::NotFound { .. }) => {
            ToolOutput::err(format!("Error: Note not found at path: {requested}"))
        }
        Err(VaultError::InvalidInput(reason)) => {
            ToolOutput::err(format!("Error: Invalid path - {reason}"))
        }
        Err(e @ VaultError::PathTraversal { .. }) => {
            warn!("rejected note path {:?}: {}", requested, e);
            ToolOutput::err(format!("Error: Invalid path - {e}"))
        }
        Err(VaultError::Internal(reason)) => {
            error!("note read failed: {}", reason);
            ToolOutput::err(INTERNAL_ERROR)
        }
        Err(e) => ToolOutput::err(format!("Error reading note content: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn tools_for(root: &std::path::Path) -> VaultTools {
        let mut cfg = Config::default();
        cfg.vault.root = root.to_path_buf();
        cfg.validate().unwrap();
        VaultTools::from_config(&cfg).unwrap()
    }

    #[tokio::test]
    async fn missing_query_renders_invalid_input_message() {
        let dir = tempdir().unwrap();
        let tools = tools_for(dir.path());
        let out = tools.call(SEARCH_TOOL, json!({})).await.unwrap();
        assert!(out.is_error);
        assert_eq!(out.text, MISSING_QUERY);

        let out = tools.call(SEARCH_TOOL, json!({"query": ""})).await.unwrap();
        assert_eq!(out.text, MISSING_QUERY);
    }

    #[tokio::test]
    async fn no_results_is_not_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "nothing").unwrap();
        let out = tools_for(dir.path()).search(Some("zebra".into())).await;
        assert!(!out.is_error);
        assert_eq!(out.text, "No results found for your query.");
    }

    #[tokio::test]
    async fn unreadable_note_is_reported_inline_not_as_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.md"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.path().join("good.md"), "needle here").unwrap();

        let out = tools_for(dir.path()).search(Some("needle".into())).await;
        assert!(!out.is_error);
        assert!(out.text.contains("Problem file: bad.md (Error: "));
        assert!(out.text.contains("File (content match): good.md"));
    }

    #[tokio::test]
    async fn get_note_accepts_flat_and_wrapped_arguments() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "body").unwrap();
        let tools = tools_for(dir.path());

        let flat = tools.call(GET_NOTE_TOOL, json!({"path": "a.md"})).await.unwrap();
        let wrapped = tools
            .call(GET_NOTE_TOOL, json!({"search_input": {"path": "a.md"}}))
            .await
            .unwrap();
        assert_eq!(flat, ToolOutput::ok("body".into()));
        assert_eq!(wrapped, flat);
    }

    #[tokio::test]
    async fn missing_path_field_is_rejected_at_the_envelope() {
        let dir = tempdir().unwrap();
        let err = tools_for(dir.path())
            .call(GET_NOTE_TOOL, json!({"other": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolCallError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let dir = tempdir().unwrap();
        let err = tools_for(dir.path()).call("delete_vault", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolCallError::UnknownTool(name) if name == "delete_vault"));
    }

    #[test]
    fn note_errors_render_distinct_messages() {
        let not_found = render_note(
            "missing.md",
            Err(VaultError::NotFound { path: "missing.md".into() }),
        );
        let traversal = render_note(
            "../x.md",
            Err(VaultError::PathTraversal { requested: "../x.md".into() }),
        );
        let read = render_note(
            "bad.md",
            Err(VaultError::ReadError {
                path: "bad.md".into(),
                reason: "stream did not contain valid UTF-8".into(),
            }),
        );

        assert_eq!(not_found.text, "Error: Note not found at path: missing.md");
        assert_eq!(
            traversal.text,
            "Error: Invalid path - Attempted path traversal. Access denied."
        );
        assert_eq!(
            read.text,
            "Error reading note content: stream did not contain valid UTF-8"
        );
        assert!(not_found.is_error && traversal.is_error && read.is_error);
    }

    #[test]
    fn internal_search_failure_hides_details() {
        let out = render_search(Err(VaultError::Internal("boom at /secret/root".into())));
        assert_eq!(out.text, INTERNAL_ERROR);
    }
}
