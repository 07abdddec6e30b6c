//! Tool classification for ACP tool call reporting
//!
//! Maps the session server's tool names onto ACP tool kinds, the file
//! locations a client can follow along with, and diff content for edits.
//! Every function here is total: unexpected input shapes produce empty
//! results rather than errors.

use agent_client_protocol::{Diff, ToolCallLocation, ToolKind};
use serde_json::Value;
use std::path::PathBuf;

/// Tools the bridge knows how to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownTool {
    Bash,
    WebFetch,
    Edit,
    Patch,
    Write,
    ApplyPatch,
    Grep,
    Glob,
    /// Documentation lookups served by the context7 MCP server
    Context7,
    List,
    Read,
    TodoWrite,
}

impl KnownTool {
    pub fn from_name(tool_name: &str) -> Option<Self> {
        let name = tool_name.to_lowercase();
        let tool = match name.as_str() {
            "bash" => KnownTool::Bash,
            "webfetch" => KnownTool::WebFetch,
            "edit" => KnownTool::Edit,
            "patch" => KnownTool::Patch,
            "write" => KnownTool::Write,
            "apply_patch" => KnownTool::ApplyPatch,
            "grep" => KnownTool::Grep,
            "glob" => KnownTool::Glob,
            "list" => KnownTool::List,
            "read" => KnownTool::Read,
            "todowrite" => KnownTool::TodoWrite,
            name if name.starts_with("context7_") => KnownTool::Context7,
            _ => return None,
        };
        Some(tool)
    }

    pub fn kind(self) -> ToolKind {
        match self {
            KnownTool::Bash => ToolKind::Execute,
            KnownTool::WebFetch => ToolKind::Fetch,
            KnownTool::Edit | KnownTool::Patch | KnownTool::Write | KnownTool::ApplyPatch => {
                ToolKind::Edit
            }
            KnownTool::Grep | KnownTool::Glob | KnownTool::Context7 => ToolKind::Search,
            KnownTool::List | KnownTool::Read => ToolKind::Read,
            KnownTool::TodoWrite => ToolKind::Other,
        }
    }
}

/// Kind and file locations implied by a tool call
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ToolKind,
    pub locations: Vec<PathBuf>,
}

impl Classification {
    pub fn acp_locations(&self) -> Vec<ToolCallLocation> {
        self.locations
            .iter()
            .map(|path| ToolCallLocation::new(path.clone()))
            .collect()
    }
}

/// Before/after text for one file touched by an edit tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub old_text: Option<String>,
    pub new_text: String,
}

impl FileDiff {
    pub fn to_acp(&self) -> Diff {
        Diff::new(self.path.clone(), self.new_text.clone()).old_text(self.old_text.clone())
    }
}

const PATCH_MARKERS: [&str; 4] = [
    "*** Add File: ",
    "*** Update File: ",
    "*** Delete File: ",
    "*** Move to: ",
];

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub fn classify(tool_name: &str, input: &Value) -> Classification {
    let Some(tool) = KnownTool::from_name(tool_name) else {
        return Classification {
            kind: ToolKind::Other,
            locations: Vec::new(),
        };
    };

    let locations = match tool {
        KnownTool::Read | KnownTool::Edit | KnownTool::Write => {
            str_field(input, "filePath").map(PathBuf::from).into_iter().collect()
        }
        KnownTool::Glob | KnownTool::Grep | KnownTool::List => {
            str_field(input, "path").map(PathBuf::from).into_iter().collect()
        }
        KnownTool::ApplyPatch => patch_locations(input),
        _ => Vec::new(),
    };

    Classification {
        kind: tool.kind(),
        locations,
    }
}

/// Files touched by a multi-file patch, from `files` or by scanning `patchText`
fn patch_locations(input: &Value) -> Vec<PathBuf> {
    let mut paths: Vec<String> = Vec::new();

    if let Some(files) = input.get("files").and_then(Value::as_array) {
        paths.extend(files.iter().filter_map(|file| {
            file.as_str()
                .or_else(|| str_field(file, "filePath"))
                .map(str::to_string)
        }));
    }

    if paths.is_empty() {
        if let Some(patch) = str_field(input, "patchText") {
            for line in patch.lines() {
                let line = line.trim_start();
                if let Some(path) = PATCH_MARKERS
                    .iter()
                    .find_map(|marker| line.strip_prefix(marker))
                {
                    let path = path.trim();
                    if !path.is_empty() {
                        paths.push(path.to_string());
                    }
                }
            }
        }
    }

    let mut unique: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for path in paths.into_iter().map(PathBuf::from) {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

/// Diff content for edit-like tools
///
/// Single-file tools use their recorded input; `apply_patch` relies on the
/// per-file snapshots the server attaches as metadata.
pub fn diff_content(tool_name: &str, input: &Value, metadata: &Value) -> Vec<FileDiff> {
    match KnownTool::from_name(tool_name) {
        Some(KnownTool::Edit) => {
            let (Some(path), Some(new_text)) =
                (str_field(input, "filePath"), str_field(input, "newString"))
            else {
                return Vec::new();
            };
            vec![FileDiff {
                path: PathBuf::from(path),
                old_text: str_field(input, "oldString").map(str::to_string),
                new_text: new_text.to_string(),
            }]
        }
        Some(KnownTool::Write) => {
            let (Some(path), Some(content)) =
                (str_field(input, "filePath"), str_field(input, "content"))
            else {
                return Vec::new();
            };
            vec![FileDiff {
                path: PathBuf::from(path),
                old_text: None,
                new_text: content.to_string(),
            }]
        }
        Some(KnownTool::ApplyPatch) => metadata
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|file| {
                        let path = str_field(file, "filePath")?;
                        Some(FileDiff {
                            path: PathBuf::from(path),
                            old_text: str_field(file, "before").map(str::to_string),
                            new_text: str_field(file, "after").unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Human-readable title for a tool call
pub fn title(tool_name: &str, input: &Value, fallback: Option<&str>) -> String {
    if let Some(title) = fallback.filter(|title| !title.is_empty()) {
        return title.to_string();
    }

    let described = match KnownTool::from_name(tool_name) {
        Some(KnownTool::Bash) => {
            str_field(input, "description").or_else(|| str_field(input, "command"))
        }
        Some(KnownTool::WebFetch) => str_field(input, "url"),
        Some(KnownTool::Read | KnownTool::Edit | KnownTool::Write) => str_field(input, "filePath"),
        Some(KnownTool::Grep | KnownTool::Glob) => str_field(input, "pattern"),
        Some(KnownTool::List) => str_field(input, "path"),
        _ => None,
    };

    match described {
        Some(detail) => format!("{} {}", tool_name, detail),
        None => tool_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_kind_table() {
        let cases = [
            ("bash", ToolKind::Execute),
            ("BASH", ToolKind::Execute),
            ("webfetch", ToolKind::Fetch),
            ("edit", ToolKind::Edit),
            ("patch", ToolKind::Edit),
            ("write", ToolKind::Edit),
            ("apply_patch", ToolKind::Edit),
            ("grep", ToolKind::Search),
            ("glob", ToolKind::Search),
            ("context7_resolve_library_id", ToolKind::Search),
            ("list", ToolKind::Read),
            ("read", ToolKind::Read),
            ("todowrite", ToolKind::Other),
            ("mystery", ToolKind::Other),
        ];
        for (name, kind) in cases {
            assert_eq!(classify(name, &json!({})).kind, kind, "tool {}", name);
        }
    }

    #[test]
    fn test_locations_from_input() {
        let read = classify("read", &json!({"filePath": "/repo/src/lib.rs"}));
        assert_eq!(read.locations, vec![PathBuf::from("/repo/src/lib.rs")]);

        let grep = classify("grep", &json!({"pattern": "fn", "path": "/repo/src"}));
        assert_eq!(grep.locations, vec![PathBuf::from("/repo/src")]);

        let bash = classify("bash", &json!({"command": "ls"}));
        assert!(bash.locations.is_empty());
    }

    #[test]
    fn test_apply_patch_locations_from_patch_text() {
        let patch = concat!(
            "*** Begin Patch\n",
            "*** Add File: a.txt\n",
            "+hello\n",
            "*** Update File: b.txt\n",
            "*** Move to: c.txt\n",
            "@@\n",
            "-x\n",
            "+y\n",
            "*** Delete File: a.txt\n",
            "*** End Patch",
        );
        let classification = classify("apply_patch", &json!({"patchText": patch}));
        assert_eq!(
            classification.locations,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b.txt"),
                PathBuf::from("c.txt")
            ]
        );
    }

    #[test]
    fn test_apply_patch_locations_prefer_structured_files() {
        let input = json!({
            "files": ["x.rs", {"filePath": "y.rs"}],
            "patchText": "*** Add File: z.rs"
        });
        let classification = classify("apply_patch", &input);
        assert_eq!(
            classification.locations,
            vec![PathBuf::from("x.rs"), PathBuf::from("y.rs")]
        );
    }

    #[test]
    fn test_edit_diff_uses_old_and_new_strings() {
        let diffs = diff_content(
            "edit",
            &json!({
                "filePath": "/repo/a.rs",
                "oldString": "let a = 1;",
                "newString": "let a = 2;"
            }),
            &Value::Null,
        );
        assert_eq!(
            diffs,
            vec![FileDiff {
                path: PathBuf::from("/repo/a.rs"),
                old_text: Some("let a = 1;".to_string()),
                new_text: "let a = 2;".to_string(),
            }]
        );
    }

    #[test]
    fn test_apply_patch_diff_per_file() {
        let metadata = json!({
            "files": [
                {"filePath": "/repo/a.txt", "before": "one\n", "after": "uno\n"},
                {"filePath": "/repo/b.txt", "before": "", "after": "dos\n"}
            ]
        });
        let diffs = diff_content("apply_patch", &json!({}), &metadata);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].old_text.as_deref(), Some("one\n"));
        assert_eq!(diffs[0].new_text, "uno\n");
        assert_eq!(diffs[1].path, PathBuf::from("/repo/b.txt"));
        assert_eq!(diffs[1].new_text, "dos\n");
    }

    #[test]
    fn test_title_prefers_server_title() {
        assert_eq!(title("bash", &json!({"command": "ls"}), Some("List files")), "List files");
        assert_eq!(title("bash", &json!({"command": "ls"}), None), "bash ls");
        assert_eq!(title("mystery", &json!(42), None), "mystery");
    }

    fn arbitrary_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            ".{0,20}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("filePath".to_string()),
                        Just("path".to_string()),
                        Just("files".to_string()),
                        Just("patchText".to_string()),
                        Just("before".to_string()),
                        "[a-z]{1,6}".prop_map(String::from),
                    ],
                    inner,
                    0..4
                )
                .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_classifier_is_total(
            name in prop_oneof![
                Just("apply_patch".to_string()),
                Just("edit".to_string()),
                Just("write".to_string()),
                Just("read".to_string()),
                ".{0,16}".prop_map(String::from),
            ],
            input in arbitrary_json(),
            metadata in arbitrary_json(),
        ) {
            let classification = classify(&name, &input);
            let _ = diff_content(&name, &input, &metadata);
            let _ = title(&name, &input, None);
            if KnownTool::from_name(&name).is_none() {
                prop_assert_eq!(classification.kind, ToolKind::Other);
                prop_assert!(classification.locations.is_empty());
            }
        }
    }
}
