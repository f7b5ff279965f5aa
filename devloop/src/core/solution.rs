//! Turn freeform solution text into an ordered list of file writes.
//!
//! Fenced code blocks carry file contents. Target paths come from, in order of
//! precedence:
//! 1. the only path token in the text, when there is exactly one block;
//! 2. a comment on a block's first line naming a path (`// src/app.ts`);
//! 3. the path token at the same position as the block;
//! 4. a synthesized name under the generated-content directory.
//!
//! Path tokens are `dir/name.ext` followed by `:` in the prose outside code
//! blocks, optionally wrapped in backticks or `**`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static PATH_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:^|[^A-Za-z0-9_./\-])(?:\*\*|`)?([A-Za-z0-9_][A-Za-z0-9_./\-]*\.[A-Za-z][A-Za-z0-9]*)(?:\*\*|`)?:",
    )
    .expect("path token regex is valid")
});

static COMMENT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.{0,2}/?[A-Za-z0-9_][A-Za-z0-9_./\-]*\.[A-Za-z][A-Za-z0-9]*$")
        .expect("comment path regex is valid")
});

const COMMENT_PREFIXES: [&str; 6] = ["<!--", "//", "/*", "--", "#", ";"];
const PATH_LABELS: [&str; 4] = ["file:", "File:", "path:", "Path:"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolutionParseError {
    #[error("solution contains no fenced code blocks")]
    NoCodeBlocks,
}

/// How a write's target path was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSource {
    Paired,
    Comment,
    Positional,
    Synthesized,
}

/// A single file to write, with a path normalized under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub language: Option<String>,
    pub source: PathSource,
}

/// Parameters that keep parsing pure and reproducible.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions<'a> {
    /// Subtree every write lands under (e.g. `code`).
    pub project_root: &'a str,
    /// Directory, relative to the project root, for synthesized names.
    pub generated_dir: &'a str,
    /// Distinguishes synthesized names across cycles (usually a timestamp).
    pub stamp: &'a str,
}

/// A terminated fenced block with its lowercased language tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub body: String,
}

/// Terminated fenced blocks of `text`, in document order.
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    split_blocks(text).0
}

/// Parse solution text into file writes, in block order.
pub fn parse_solution(
    text: &str,
    options: &ParseOptions<'_>,
) -> Result<Vec<FileWrite>, SolutionParseError> {
    let (blocks, prose) = split_blocks(text);
    if blocks.is_empty() {
        return Err(SolutionParseError::NoCodeBlocks);
    }
    let tokens = path_tokens(&prose);
    let single_pair = blocks.len() == 1 && tokens.len() == 1;

    let writes = blocks
        .into_iter()
        .enumerate()
        .map(|(index, block)| {
            let (path, source) = resolve_path(index, &block, &tokens, single_pair, options);
            FileWrite {
                path,
                content: block.body,
                language: block.language,
                source,
            }
        })
        .collect();
    Ok(writes)
}

fn resolve_path(
    index: usize,
    block: &CodeBlock,
    tokens: &[String],
    single_pair: bool,
    options: &ParseOptions<'_>,
) -> (String, PathSource) {
    let candidates = [
        tokens
            .first()
            .filter(|_| single_pair)
            .cloned()
            .map(|path| (path, PathSource::Paired)),
        block
            .body
            .lines()
            .next()
            .and_then(comment_path)
            .map(|path| (path, PathSource::Comment)),
        tokens
            .get(index)
            .cloned()
            .map(|path| (path, PathSource::Positional)),
    ];

    for (raw, source) in candidates.into_iter().flatten() {
        if let Some(path) = normalize_path(&raw, options.project_root) {
            return (path, source);
        }
    }

    let ext = extension_for(block.language.as_deref());
    let raw = format!(
        "{}/generated_{}_{}.{ext}",
        options.generated_dir,
        options.stamp,
        index + 1
    );
    let path = normalize_path(&raw, options.project_root)
        .unwrap_or_else(|| format!("generated_{}_{}.{ext}", options.stamp, index + 1));
    (path, PathSource::Synthesized)
}

/// Split text into fenced blocks and the prose outside them.
///
/// A block opens on a line starting with three backticks (optionally followed
/// by a language tag) and closes on a bare fence line. Unterminated blocks
/// are dropped.
fn split_blocks(text: &str) -> (Vec<CodeBlock>, String) {
    let mut blocks = Vec::new();
    let mut prose = String::new();
    let mut open: Option<(Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if open.is_some() && trimmed == "```" {
            if let Some((language, body)) = open.take() {
                blocks.push(CodeBlock {
                    language,
                    body: body.join("\n"),
                });
            }
            continue;
        }
        if let Some((_, body)) = open.as_mut() {
            body.push(line);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("```") {
            let language = rest
                .split_whitespace()
                .next()
                .map(str::to_ascii_lowercase);
            open = Some((language, Vec::new()));
        } else {
            prose.push_str(line);
            prose.push('\n');
        }
    }

    (blocks, prose)
}

fn path_tokens(prose: &str) -> Vec<String> {
    PATH_TOKEN_RE
        .captures_iter(prose)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Path named by a comment line such as `# app/models.py` or `// File: x.ts`.
fn comment_path(first_line: &str) -> Option<String> {
    let line = first_line.trim();
    let body = COMMENT_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))?;
    let mut body = body
        .trim()
        .trim_end_matches("-->")
        .trim_end_matches("*/")
        .trim();
    for label in PATH_LABELS {
        if let Some(rest) = body.strip_prefix(label) {
            body = rest.trim();
            break;
        }
    }
    COMMENT_PATH_RE
        .is_match(body)
        .then(|| body.to_string())
}

/// Normalize a relative path lexically and root it under `project_root`.
///
/// Empty, `.` and `..` segments are dropped so writes cannot escape the root.
/// Returns `None` when nothing usable remains.
pub fn normalize_path(raw: &str, project_root: &str) -> Option<String> {
    let segments: Vec<&str> = raw
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect();
    if segments.is_empty() {
        return None;
    }
    let root: Vec<&str> = project_root
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();

    let mut full = Vec::with_capacity(root.len() + segments.len());
    if !segments.starts_with(&root) {
        full.extend_from_slice(&root);
    }
    full.extend_from_slice(&segments);
    Some(full.join("/"))
}

/// File extension for a fenced block's language tag.
pub fn extension_for(language: Option<&str>) -> &'static str {
    match language.unwrap_or_default() {
        "python" | "py" => "py",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "rust" | "rs" => "rs",
        "go" | "golang" => "go",
        "java" => "java",
        "ruby" | "rb" => "rb",
        "bash" | "sh" | "shell" | "zsh" => "sh",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "sql" => "sql",
        "markdown" | "md" => "md",
        _ => "txt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: ParseOptions<'static> = ParseOptions {
        project_root: "code",
        generated_dir: "generated",
        stamp: "20240101120000",
    };

    fn paths(writes: &[FileWrite]) -> Vec<&str> {
        writes.iter().map(|w| w.path.as_str()).collect()
    }

    #[test]
    fn zero_blocks_is_the_only_error() {
        let err = parse_solution("I could not produce any code, sorry.", &OPTIONS).unwrap_err();
        assert_eq!(err, SolutionParseError::NoCodeBlocks);
    }

    #[test]
    fn single_block_pairs_with_single_path_token() {
        let text = "Create api/app.py:\n\n```python\nprint('hi')\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].path, "code/api/app.py");
        assert_eq!(writes[0].content, "print('hi')");
        assert_eq!(writes[0].language.as_deref(), Some("python"));
        assert_eq!(writes[0].source, PathSource::Paired);
    }

    #[test]
    fn path_already_under_root_is_not_prefixed_twice() {
        let text = "`code/api/app.py`:\n```python\npass\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(paths(&writes), vec!["code/api/app.py"]);
    }

    #[test]
    fn first_line_comment_names_the_path() {
        let text = "Two files follow.\n\n```typescript\n// src/index.ts\nexport {};\n```\n\n```python\n# app/models.py\nclass User: ...\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(paths(&writes), vec!["code/src/index.ts", "code/app/models.py"]);
        assert!(writes.iter().all(|w| w.source == PathSource::Comment));
    }

    #[test]
    fn blocks_pair_positionally_with_path_tokens() {
        let text = "**app/main.py**:\n```python\nmain()\n```\n\nAnd app/util.py:\n```python\nutil()\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(paths(&writes), vec!["code/app/main.py", "code/app/util.py"]);
        assert!(writes.iter().all(|w| w.source == PathSource::Positional));
    }

    #[test]
    fn surplus_blocks_get_synthesized_names() {
        let text = "app/a.py:\n```python\na = 1\n```\n```javascript\nlet b = 2;\n```\n```\nplain\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(
            paths(&writes),
            vec![
                "code/app/a.py",
                "code/generated/generated_20240101120000_2.js",
                "code/generated/generated_20240101120000_3.txt",
            ]
        );
        assert_eq!(writes[1].source, PathSource::Synthesized);
    }

    #[test]
    fn path_like_text_inside_code_is_not_a_token() {
        let text = "```python\nclass A:\n    self.value: int = 0\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(writes[0].source, PathSource::Synthesized);
        assert_eq!(writes[0].path, "code/generated/generated_20240101120000_1.py");
    }

    #[test]
    fn unterminated_block_is_ignored() {
        let text = "app/x.py:\n```python\nprint('never closed')\n";
        assert_eq!(
            parse_solution(text, &OPTIONS).unwrap_err(),
            SolutionParseError::NoCodeBlocks
        );
    }

    #[test]
    fn normalization_keeps_writes_inside_the_root() {
        assert_eq!(
            normalize_path("../../etc/passwd.txt", "code").as_deref(),
            Some("code/etc/passwd.txt")
        );
        assert_eq!(
            normalize_path("/abs/./x.py", "code").as_deref(),
            Some("code/abs/x.py")
        );
        assert_eq!(normalize_path("code/x.py", "code").as_deref(), Some("code/x.py"));
        assert_eq!(normalize_path("x.py", "").as_deref(), Some("x.py"));
        assert_eq!(normalize_path("../..", "code"), None);
    }

    #[test]
    fn html_comment_path_is_recognized() {
        let text = "```html\n<!-- templates/index.html -->\n<p>hi</p>\n```\n";
        let writes = parse_solution(text, &OPTIONS).expect("parse");
        assert_eq!(paths(&writes), vec!["code/templates/index.html"]);
    }

    #[test]
    fn unknown_language_falls_back_to_txt() {
        assert_eq!(extension_for(Some("cobol")), "txt");
        assert_eq!(extension_for(None), "txt");
        assert_eq!(extension_for(Some("python")), "py");
    }
}
