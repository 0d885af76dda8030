//! Acceptance criteria arrive as free text from the task list. `Criterion::parse`
//! recognizes the shapes that can be checked mechanically; anything else is
//! `Unverifiable` and is reported as unchecked.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    FileExists(String),
    FileContains { path: String, needle: String },
    CommandSucceeds(String),
    OutputContains(String),
    Unverifiable(String),
}

impl Criterion {
    pub fn parse(text: &str) -> Criterion {
        let text = text.trim();
        if let Some(explicit) = parse_prefixed(text) {
            return explicit;
        }

        let lower = text.to_lowercase();
        let spans = backtick_spans(text);

        if let Some(first) = spans.first() {
            if lower.contains("output contains")
                || lower.contains("response contains")
                || lower.contains("output includes")
            {
                return Criterion::OutputContains(spans[spans.len() - 1].clone());
            }
            if lower.contains("contain") && spans.len() >= 2 && !looks_like_command(first) {
                return Criterion::FileContains {
                    path: first.clone(),
                    needle: spans[1].clone(),
                };
            }
            if looks_like_command(first) {
                return Criterion::CommandSucceeds(strip_prompt(first).to_string());
            }
            if (lower.contains("exist") || lower.contains("created") || lower.contains("present"))
                && looks_like_path(first)
            {
                return Criterion::FileExists(first.clone());
            }
        }

        if let Some(path) = bare_file_exists(text) {
            return Criterion::FileExists(path);
        }

        Criterion::Unverifiable(text.to_string())
    }

    pub fn is_checkable(&self) -> bool {
        !matches!(self, Criterion::Unverifiable(_))
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::FileExists(path) => write!(f, "file {path} exists"),
            Criterion::FileContains { path, needle } => {
                write!(f, "file {path} contains {needle:?}")
            }
            Criterion::CommandSucceeds(cmd) => write!(f, "command `{cmd}` succeeds"),
            Criterion::OutputContains(needle) => write!(f, "output contains {needle:?}"),
            Criterion::Unverifiable(text) => write!(f, "{text}"),
        }
    }
}

/// Explicit forms such as `exists: src/lib.rs` or `run: cargo test`.
fn parse_prefixed(text: &str) -> Option<Criterion> {
    let (head, rest) = text.split_once(':')?;
    let rest = unquote(rest.trim());
    if rest.is_empty() {
        return None;
    }
    match head.trim().to_lowercase().as_str() {
        "exists" | "file_exists" | "file exists" => Some(Criterion::FileExists(rest.to_string())),
        "run" | "command" | "cmd" => Some(Criterion::CommandSucceeds(strip_prompt(rest).to_string())),
        "output" | "output_contains" | "output contains" => {
            Some(Criterion::OutputContains(rest.to_string()))
        }
        "contains" | "file_contains" => {
            let (path, needle) = rest.split_once(':')?;
            let (path, needle) = (unquote(path.trim()), unquote(needle.trim()));
            if path.is_empty() || needle.is_empty() {
                return None;
            }
            Some(Criterion::FileContains {
                path: path.to_string(),
                needle: needle.to_string(),
            })
        }
        _ => None,
    }
}

/// "File src/main.rs exists" / "src/main.rs exists".
fn bare_file_exists(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let body = lower
        .strip_suffix(" exists")
        .or_else(|| lower.strip_suffix(" is created"))?;
    let body = body.strip_prefix("file ").unwrap_or(body).trim();
    if body.contains(char::is_whitespace) || !looks_like_path(body) {
        return None;
    }
    // Preserve the original casing of the path.
    let start = lower.find(body)?;
    text.get(start..start + body.len()).map(str::to_string)
}

fn backtick_spans(text: &str) -> Vec<String> {
    let mut spans = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('`') else {
            break;
        };
        let span = after[..end].trim();
        if !span.is_empty() {
            spans.push(span.to_string());
        }
        rest = &after[end + 1..];
    }
    spans
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '`' || c == '"' || c == '\'')
}

fn strip_prompt(s: &str) -> &str {
    s.strip_prefix("$ ").unwrap_or(s).trim()
}

fn looks_like_path(s: &str) -> bool {
    !s.is_empty() && !s.contains(' ') && (s.contains('/') || s.contains('.'))
}

fn looks_like_command(s: &str) -> bool {
    let s = strip_prompt(s.trim());
    if s.is_empty() {
        return false;
    }
    const PREFIXES: &[&str] = &[
        "cargo ", "npm ", "npx ", "yarn ", "pnpm ", "make", "pytest", "go ", "python ",
        "python3 ", "ruby ", "mix ", "dotnet ", "mvn ", "gradle ", "sh ", "bash ", "./",
        "docker ", "node ", "git ", "test ", "grep ", "curl ",
    ];
    PREFIXES.iter().any(|p| s.starts_with(p)) || s == "cargo" || s == "pytest"
}
