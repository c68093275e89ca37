use std::env::VarError;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

pub const ENV_VAULT_ROOT: &str = "OBSIDIAN_VAULT_ROOT";
pub const ENV_MODE: &str = "OBSIDIAN_MCP_MODE";
pub const ENV_HTTP_ADDR: &str = "OBSIDIAN_MCP_HTTP_ADDR";
pub const ENV_HTTP_PORT: &str = "OBSIDIAN_MCP_HTTP_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

impl std::str::FromStr for ServerMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(ServerMode::Stdio),
            "http" => Ok(ServerMode::Http),
            "both" => Ok(ServerMode::Both),
            other => Err(VaultError::ConfigError(format!(
                "unknown server mode {other:?} (expected stdio, http or both)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub root: PathBuf,
    #[serde(default = "default_note_extension")]
    pub note_extension: String,
    /// Root-relative globs for files and folders the search walk skips.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            note_extension: default_note_extension(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_note_extension() -> String {
    ".md".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_snippet_before")]
    pub snippet_before: usize,
    #[serde(default = "default_snippet_after")]
    pub snippet_after: usize,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_before: default_snippet_before(),
            snippet_after: default_snippet_after(),
            max_results: None,
            timeout_ms: None,
        }
    }
}

fn default_snippet_before() -> usize {
    50
}

fn default_snippet_after() -> usize {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// 按扩展名加载 YAML 或 JSON 配置文件
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VaultError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(&raw)
                .map_err(|e| VaultError::ConfigError(format!("{}: {e}", path.display())))
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|e| VaultError::ConfigError(format!("{}: {e}", path.display())))
        }
    }

    /// Overlay environment settings. The vault root from the environment wins
    /// over whatever a config file said.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> std::result::Result<String, VarError>,
    {
        if let Some(root) = read_var(&lookup, ENV_VAULT_ROOT)? {
            self.vault.root = PathBuf::from(root);
        }
        if let Some(mode) = read_var(&lookup, ENV_MODE)? {
            self.server.mode = mode.parse()?;
        }
        if let Some(addr) = read_var(&lookup, ENV_HTTP_ADDR)? {
            self.server.http_addr = Some(addr);
        }
        if let Some(port) = read_var(&lookup, ENV_HTTP_PORT)? {
            let port = port.trim().parse::<u16>().map_err(|e| {
                VaultError::ConfigError(format!("{ENV_HTTP_PORT} must be a port number: {e}"))
            })?;
            self.server.http_port = Some(port);
        }
        Ok(())
    }

    /// 启动时校验配置，并就地规范化根目录。
    pub fn validate(&mut self) -> Result<()> {
        if self.vault.root.as_os_str().is_empty() {
            return Err(VaultError::ConfigError(format!(
                "{ENV_VAULT_ROOT} is not set"
            )));
        }
        let root = std::fs::canonicalize(&self.vault.root).map_err(|e| {
            VaultError::ConfigError(format!(
                "vault root {} is not accessible: {e}",
                self.vault.root.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(VaultError::ConfigError(format!(
                "vault root {} is not a directory",
                root.display()
            )));
        }
        self.vault.root = root;

        if self.vault.note_extension.is_empty() {
            return Err(VaultError::ConfigError(
                "vault.note_extension must not be empty".into(),
            ));
        }
        self.exclude_set()?;
        Ok(())
    }

    pub fn exclude_set(&self) -> Result<GlobSet> {
        build_globset(&self.vault.exclude_globs)
    }

    pub fn http_bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.server
                .http_addr
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            self.server.http_port.unwrap_or(3000)
        )
    }
}

fn read_var<F>(lookup: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> std::result::Result<String, VarError>,
{
    match lookup(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(VaultError::ConfigError(format!(
            "{key} must be a valid UTF-8 string"
        ))),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| VaultError::ConfigError(format!("invalid exclude glob {pat:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| VaultError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::ffi::OsString;
    use tempfile::tempdir;

    fn lookup(vars: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> std::result::Result<String, VarError> {
        move |k| vars.get(k).map(|v| v.to_string()).ok_or(VarError::NotPresent)
    }

    #[test]
    fn missing_root_fails_validation() {
        let mut cfg = Config::default();
        cfg.apply_env(lookup(HashMap::new())).unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains(ENV_VAULT_ROOT));
    }

    #[test]
    fn non_unicode_root_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| {
                if k == ENV_VAULT_ROOT {
                    Err(VarError::NotUnicode(OsString::from("x")))
                } else {
                    Err(VarError::NotPresent)
                }
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::ConfigError(_)));
    }

    #[test]
    fn root_must_be_an_existing_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "x").unwrap();

        let mut cfg = Config::default();
        cfg.vault.root = file;
        assert!(cfg.validate().is_err());

        cfg.vault.root = dir.path().join("missing");
        assert!(cfg.validate().is_err());

        cfg.vault.root = dir.path().to_path_buf();
        cfg.validate().unwrap();
        assert_eq!(cfg.vault.root, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn env_overrides_file_and_parses_server_settings() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("config.yaml");
        std::fs::write(
            &cfg_path,
            "vault:\n  root: /from/file\n  exclude_globs: [\".obsidian/**\"]\nsearch:\n  max_results: 20\n",
        )
        .unwrap();

        let mut cfg = Config::load_from_path(&cfg_path).unwrap();
        assert_eq!(cfg.vault.root, PathBuf::from("/from/file"));
        assert_eq!(cfg.vault.note_extension, ".md");
        assert_eq!(cfg.search.max_results, Some(20));
        assert_eq!(cfg.search.snippet_before, 50);

        let mut vars = HashMap::new();
        vars.insert(ENV_VAULT_ROOT, "/from/env");
        vars.insert(ENV_MODE, "Both");
        vars.insert(ENV_HTTP_PORT, "8080");
        cfg.apply_env(lookup(vars)).unwrap();

        assert_eq!(cfg.vault.root, PathBuf::from("/from/env"));
        assert_eq!(cfg.server.mode, ServerMode::Both);
        assert_eq!(cfg.http_bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn json_config_is_accepted() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("config.json");
        std::fs::write(&cfg_path, r#"{"server":{"mode":"http","http_port":9000}}"#).unwrap();
        let cfg = Config::load_from_path(&cfg_path).unwrap();
        assert_eq!(cfg.server.mode, ServerMode::Http);
        assert_eq!(cfg.server.http_port, Some(9000));
    }

    #[test]
    fn bad_glob_fails_validation() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.vault.root = dir.path().to_path_buf();
        cfg.vault.exclude_globs = vec!["a[".to_string()];
        assert!(matches!(cfg.validate().unwrap_err(), VaultError::ConfigError(_)));
    }
}
