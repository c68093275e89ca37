use serde::{Deserialize, Serialize};

pub const NO_RESULTS: &str = "No results found for your query.";

/// 搜索结果条目，按遍历顺序排列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchEntry {
    FilenameMatch { path: String },
    ContentMatch { path: String, snippet: String },
    Problem { path: String, reason: String },
}

impl MatchEntry {
    pub fn path(&self) -> &str {
        match self {
            MatchEntry::FilenameMatch { path }
            | MatchEntry::ContentMatch { path, .. }
            | MatchEntry::Problem { path, .. } => path,
        }
    }

    pub fn render(&self) -> String {
        match self {
            MatchEntry::FilenameMatch { path } => format!("File (filename match): {path}"),
            MatchEntry::ContentMatch { path, snippet } => {
                format!("File (content match): {path}\nSnippet: {snippet}...")
            }
            MatchEntry::Problem { path, reason } => {
                format!("Problem file: {path} (Error: {reason})")
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchReport {
    pub query: String,
    pub entries: Vec<MatchEntry>,
    pub files_scanned: usize,
    /// 达到结果上限
    pub truncated: bool,
    /// The walk was stopped early; `entries` holds what was found until then.
    pub cancelled: bool,
}

impl SearchReport {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn problems(&self) -> impl Iterator<Item = &MatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e, MatchEntry::Problem { .. }))
    }

    /// 渲染为返回给 agent 的文本
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            if self.cancelled {
                return format!("{NO_RESULTS} (search stopped early; results are partial)");
            }
            return NO_RESULTS.to_string();
        }

        let mut parts: Vec<String> = self.entries.iter().map(MatchEntry::render).collect();
        if self.truncated {
            parts.push(format!("(results truncated at {} entries)", self.entries.len()));
        }
        if self.cancelled {
            parts.push("(search stopped early; results are partial)".to_string());
        }
        format!("Search Results:\n{}", parts.join("\n---\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_renders_sentinel() {
        assert_eq!(SearchReport::new("x").render(), NO_RESULTS);
    }

    #[test]
    fn entries_render_in_order_with_separator() {
        let mut report = SearchReport::new("plan");
        report.entries.push(MatchEntry::FilenameMatch {
            path: "Project-Plan.md".into(),
        });
        report.entries.push(MatchEntry::ContentMatch {
            path: "Notes/a.md".into(),
            snippet: "the plan is".into(),
        });
        report.entries.push(MatchEntry::Problem {
            path: "bad.md".into(),
            reason: "stream did not contain valid UTF-8".into(),
        });

        assert_eq!(
            report.render(),
            "Search Results:\n\
             File (filename match): Project-Plan.md\n---\n\
             File (content match): Notes/a.md\nSnippet: the plan is...\n---\n\
             Problem file: bad.md (Error: stream did not contain valid UTF-8)"
        );
        assert_eq!(report.problems().count(), 1);
    }

    #[test]
    fn truncated_and_cancelled_reports_say_so() {
        let mut report = SearchReport::new("a");
        report.entries.push(MatchEntry::FilenameMatch { path: "a.md".into() });
        report.truncated = true;
        report.cancelled = true;
        let text = report.render();
        assert!(text.ends_with(
            "(results truncated at 1 entries)\n---\n(search stopped early; results are partial)"
        ));
    }

    #[test]
    fn entries_serialize_with_kind_tag() {
        let v = serde_json::to_value(MatchEntry::FilenameMatch { path: "a.md".into() }).unwrap();
        assert_eq!(v["kind"], "filename_match");
        assert_eq!(v["path"], "a.md");
    }
}
