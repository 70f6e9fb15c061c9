//! Extraction of Python functions into a JSON dataset for fine-tuning.
//!
//! The scanner is line based: it tracks string literals, comments and bracket
//! depth across lines, finds `def` statements, and uses indentation to find
//! where each body ends. It does not need a Python interpreter.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// One extracted function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub repo_name: String,
    pub filepath: String,
    pub function_name: String,
    pub code_chunk: String,
    pub variables: Vec<String>,
    pub docstring: Option<String>,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric()) && !KEYWORDS.contains(&s)
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// Per-line view of a source file with string contents and comments removed.
#[derive(Debug, Clone)]
struct LineInfo {
    /// Code with every string literal reduced to its quotes and comments dropped.
    code: String,
    /// The line begins inside a triple quoted string.
    starts_in_string: bool,
    depth_at_start: usize,
    depth_at_end: usize,
}

impl LineInfo {
    fn is_blank(&self) -> bool {
        !self.starts_in_string && self.code.trim().is_empty()
    }
}

fn scan_lines(lines: &[&str]) -> Vec<LineInfo> {
    let mut infos = Vec::with_capacity(lines.len());
    let mut triple: Option<char> = None;
    let mut depth = 0usize;

    for line in lines {
        let starts_in_string = triple.is_some();
        let depth_at_start = depth;
        let chars: Vec<char> = line.chars().collect();
        let mut code = String::new();
        let mut i = 0;

        while i < chars.len() {
            if let Some(q) = triple {
                if chars[i] == '\\' {
                    i += 2;
                } else if chars[i] == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                    triple = None;
                    code.push_str(&q.to_string().repeat(3));
                    i += 3;
                } else {
                    i += 1;
                }
                continue;
            }
            let c = chars[i];
            match c {
                '#' => break,
                '"' | '\'' => {
                    if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                        triple = Some(c);
                        code.push_str(&c.to_string().repeat(3));
                        i += 3;
                        continue;
                    }
                    code.push(c);
                    i += 1;
                    while i < chars.len() && chars[i] != c {
                        i += if chars[i] == '\\' { 2 } else { 1 };
                    }
                    code.push(c);
                    i += 1;
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    code.push(c);
                    i += 1;
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    code.push(c);
                    i += 1;
                }
                _ => {
                    code.push(c);
                    i += 1;
                }
            }
        }

        infos.push(LineInfo {
            code,
            starts_in_string,
            depth_at_start,
            depth_at_end: depth,
        });
    }
    infos
}

/// Every line of `source` with string contents and comments removed.
pub(crate) fn strip_strings(source: &str) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    scan_lines(&lines).into_iter().map(|info| info.code).collect()
}

/// Splits at top-level occurrences of `sep`, ignoring nested brackets.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    split_top_level_at(s, sep).into_iter().map(|(_, part)| part).collect()
}

/// Same as [`split_top_level`], keeping the byte offset of every part.
fn split_top_level_at(s: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push((start, &s[start..i]));
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push((start, &s[start..]));
    parts
}

/// Byte index of the bracket closing the one opened at `open`.
fn matching_close(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parameter_names(params: &str) -> Vec<String> {
    split_top_level(params, ',')
        .into_iter()
        .filter_map(|p| {
            let p = p.trim().trim_start_matches('*');
            let name = p.split([':', '=']).next().unwrap_or("").trim();
            is_identifier(name).then(|| name.to_string())
        })
        .collect()
}

/// Statements whose header ends at a top-level `:`, possibly followed by a body.
const COMPOUND_KEYWORDS: &[&str] = &[
    "async", "class", "def", "elif", "else", "except", "finally", "for", "if", "try", "while",
    "with",
];

/// Byte index of the `:` that ends a compound statement header.
fn header_colon(stmt: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut chars = stmt.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ':' if depth == 0 && chars.peek().map(|&(_, n)| n) != Some('=') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Contents of `s` when it is a single parenthesized or bracketed group.
fn unwrap_group(s: &str) -> Option<&str> {
    if (s.starts_with('(') || s.starts_with('[')) && matching_close(s, 0) == Some(s.len() - 1) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Plain names of an assignment target; attributes and subscripts are skipped.
fn target_names(target: &str, names: &mut Vec<String>) {
    let target = target.trim().trim_start_matches('*').trim();
    if let Some(inner) = unwrap_group(target) {
        for part in split_top_level(inner, ',') {
            target_names(part, names);
        }
        return;
    }
    let parts = split_top_level(target, ',');
    if parts.len() > 1 {
        for part in parts {
            target_names(part, names);
        }
    } else if is_identifier(target) {
        names.push(target.to_string());
    }
}

/// Names bound by the simple statements of a line, each with the byte offset
/// of its statement. Covers `a, *b = ...`, `a: T = ...`, `a: T`, `a += ...`,
/// `a = b = ...` and a body following a header on the same line (`if x: a = 1`).
fn assignment_targets(code: &str) -> Vec<(usize, String)> {
    split_top_level_at(code, ';')
        .into_iter()
        .flat_map(|(offset, stmt)| statement_targets(stmt, offset))
        .collect()
}

fn statement_targets(stmt: &str, offset: usize) -> Vec<(usize, String)> {
    let offset = offset + stmt.len() - stmt.trim_start().len();
    let stmt = stmt.trim();
    let keyword = stmt
        .split(|c: char| !(c == '_' || c.is_alphanumeric()))
        .next()
        .unwrap_or("");
    if COMPOUND_KEYWORDS.contains(&keyword) {
        return match header_colon(stmt) {
            Some(colon) => statement_targets(&stmt[colon + 1..], offset + colon + 1),
            None => Vec::new(),
        };
    }

    let chars: Vec<(usize, char)> = stmt.char_indices().collect();
    let mut splits = Vec::new();
    let mut depth = 0i32;
    for (k, &(i, c)) in chars.iter().enumerate() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => {
                let prev = k.checked_sub(1).map(|p| chars[p].1);
                let before_prev = k.checked_sub(2).map(|p| chars[p].1);
                let next = chars.get(k + 1).map(|&(_, n)| n);
                // `<<=` and `>>=`
                let shift = matches!(prev, Some('<' | '>')) && before_prev == prev;
                if next == Some('=')
                    || (!shift && matches!(prev, Some('=' | '!' | '<' | '>' | ':')))
                {
                    continue;
                }
                splits.push(i);
            }
            _ => {}
        }
    }

    if splits.is_empty() {
        // bare annotation
        return match stmt.split_once(':') {
            Some((name, annotation))
                if is_identifier(name.trim()) && !annotation.trim().is_empty() =>
            {
                vec![(offset, name.trim().to_string())]
            }
            _ => Vec::new(),
        };
    }

    let mut targets = Vec::new();
    let mut start = 0;
    for split in splits {
        let mut target = stmt[start..split].trim();
        // augmented assignment operators
        target = target.trim_end_matches(['+', '-', '*', '/', '%', '&', '|', '^', '@', '<', '>']);
        if let Some((name, _annotation)) = target.split_once(':') {
            target = name;
        }
        if !target.split_whitespace().any(|word| word == "lambda") {
            let mut names = Vec::new();
            target_names(target, &mut names);
            targets.extend(names.into_iter().map(|name| (offset + start, name)));
        }
        start = split + 1;
    }
    targets
}

/// Python's `inspect.cleandoc`.
fn clean_doc(raw: &str) -> String {
    let expanded = raw.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| indentation(l))
        .min()
        .unwrap_or(0);
    let mut cleaned: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            if i == 0 {
                l.trim_start().to_string()
            } else {
                l.chars().skip(margin).collect::<String>()
            }
        })
        .map(|l| l.trim_end().to_string())
        .collect();
    while cleaned.last().is_some_and(|l| l.is_empty()) {
        cleaned.pop();
    }
    while cleaned.first().is_some_and(|l| l.is_empty()) {
        cleaned.remove(0);
    }
    cleaned.join("\n")
}

/// Nothing but whitespace, a comment or a statement separator follows.
fn ends_statement(tail: &str) -> bool {
    let tail = tail.trim_start();
    tail.is_empty() || tail.starts_with('#') || tail.starts_with(';')
}

/// Reads the string literal starting at `lines[start]` (after indentation).
/// `None` unless the literal is an expression statement on its own.
fn string_literal(lines: &[&str], start: usize) -> Option<String> {
    let text = lines[start].trim_start();
    let text = text.strip_prefix(['r', 'R', 'u', 'U']).unwrap_or(text);
    let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let triple: String = quote.to_string().repeat(3);

    if let Some(rest) = text.strip_prefix(triple.as_str()) {
        if let Some(end) = rest.find(triple.as_str()) {
            return ends_statement(&rest[end + 3..]).then(|| rest[..end].to_string());
        }
        let mut body = vec![rest.to_string()];
        for line in &lines[start + 1..] {
            if let Some(end) = line.find(triple.as_str()) {
                body.push(line[..end].to_string());
                return ends_statement(&line[end + 3..]).then(|| body.join("\n"));
            }
            body.push(line.to_string());
        }
        return None;
    }

    let rest = &text[quote.len_utf8()..];
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            c if c == quote && !escaped => {
                return ends_statement(&rest[i + 1..]).then(|| rest[..i].to_string());
            }
            _ => escaped = false,
        }
    }
    None
}

struct Patterns {
    def: Regex,
    for_target: Regex,
    as_name: Regex,
    walrus: Regex,
}

impl Patterns {
    fn new() -> Result<Self, CrawlError> {
        Ok(Self {
            def: Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(")?,
            for_target: Regex::new(r"\bfor\s+(.+?)\s+in\b")?,
            as_name: Regex::new(r"\bas\s+([A-Za-z_]\w*)")?,
            walrus: Regex::new(r"([A-Za-z_]\w*)\s*:=")?,
        })
    }

    /// Names bound anywhere in a line by `for`, `as` or `:=`, with their offsets.
    fn inline_bindings(&self, code: &str) -> Vec<(usize, String)> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for cap in self.for_target.captures_iter(code) {
            if let Some(m) = cap.get(1) {
                for name in m.as_str().split(',') {
                    let name = name.trim().trim_matches(['(', ')', '[', ']']).trim();
                    if is_identifier(name) {
                        found.push((m.start(), name.to_string()));
                    }
                }
            }
        }
        let trimmed = code.trim_start();
        if !trimmed.starts_with("import ") && !trimmed.starts_with("from ") {
            for cap in self.as_name.captures_iter(code) {
                if let Some(m) = cap.get(1) {
                    if is_identifier(m.as_str()) {
                        found.push((m.start(), m.as_str().to_string()));
                    }
                }
            }
        }
        for cap in self.walrus.captures_iter(code) {
            if let Some(m) = cap.get(1) {
                if is_identifier(m.as_str()) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }
        found
    }

    /// Names bound in one line, in source order. Assignments only count when
    /// the line starts a statement.
    fn line_bindings(&self, code: &str, starts_statement: bool) -> Vec<String> {
        let mut found = self.inline_bindings(code);
        if starts_statement {
            found.extend(assignment_targets(code));
        }
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, name)| name).collect()
    }
}

fn push_unique(variables: &mut Vec<String>, names: impl IntoIterator<Item = String>) {
    for name in names {
        if !variables.contains(&name) {
            variables.push(name);
        }
    }
}

/// Walks a repository and collects every Python function it defines.
pub struct CodeAnalyzer {
    repo_path: PathBuf,
    repo_name: String,
    dataset: Vec<CodeRecord>,
    patterns: Patterns,
}

impl CodeAnalyzer {
    pub fn new(repo_path: impl Into<PathBuf>, repo_name: impl Into<String>) -> Result<Self, CrawlError> {
        Ok(Self {
            repo_path: repo_path.into(),
            repo_name: repo_name.into(),
            dataset: Vec::new(),
            patterns: Patterns::new()?,
        })
    }

    pub fn dataset(&self) -> &[CodeRecord] {
        &self.dataset
    }

    /// Analyzes every `.py` file under the repository, in sorted path order.
    pub fn analyze_repo(&mut self) -> Result<usize, CrawlError> {
        let mut files = Vec::new();
        collect_python_files(&self.repo_path, &mut files)?;
        files.sort();
        for path in files {
            self.analyze_file(&path);
        }
        info!(
            repo = %self.repo_name,
            functions = self.dataset.len(),
            "repository analyzed"
        );
        Ok(self.dataset.len())
    }

    /// Unreadable or non UTF-8 files are logged and skipped.
    pub fn analyze_file(&mut self, path: &Path) {
        match fs::read_to_string(path) {
            Ok(source) => {
                let filepath = path.to_string_lossy().into_owned();
                self.analyze_source(&filepath, &source);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping file"),
        }
    }

    /// Extracts every function in `source` and returns how many were added.
    pub fn analyze_source(&mut self, filepath: &str, source: &str) -> usize {
        let lines: Vec<&str> = source.lines().collect();
        let infos = scan_lines(&lines);
        let before = self.dataset.len();

        for (i, info) in infos.iter().enumerate() {
            if info.starts_in_string || info.depth_at_start > 0 {
                continue;
            }
            let Some(cap) = self.patterns.def.captures(&info.code) else {
                continue;
            };
            let name = cap[1].to_string();
            let open = cap.get(0).map_or(0, |m| m.end() - 1);
            match self.extract_function(&lines, &infos, i, &name, open) {
                Some(record) => self.dataset.push(CodeRecord {
                    repo_name: self.repo_name.clone(),
                    filepath: filepath.to_string(),
                    ..record
                }),
                None => warn!(filepath, function = %name, "could not find the end of the function signature"),
            }
        }
        self.dataset.len() - before
    }

    fn extract_function(
        &self,
        lines: &[&str],
        infos: &[LineInfo],
        def_line: usize,
        name: &str,
        open: usize,
    ) -> Option<CodeRecord> {
        let indent = indentation(lines[def_line]);
        let sig_end = (def_line..infos.len()).find(|&j| infos[j].depth_at_end == 0)?;
        let signature = infos[def_line..=sig_end]
            .iter()
            .map(|info| info.code.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let close = matching_close(&signature, open)?;
        let after = &signature[close + 1..];
        let colon = split_top_level(after, ':').first().map(|s| s.len())?;
        let inline_body = after.get(colon + 1..).unwrap_or("").trim();

        let mut variables = parameter_names(&signature[open + 1..close]);
        let mut body_end = sig_end;
        let mut docstring = None;

        if inline_body.is_empty() {
            for (k, info) in infos.iter().enumerate().skip(sig_end + 1) {
                if info.starts_in_string || info.depth_at_start > 0 {
                    body_end = k;
                } else if info.is_blank() {
                    continue;
                } else if indentation(lines[k]) > indent {
                    body_end = k;
                } else {
                    break;
                }
            }
            if let Some(first) = (sig_end + 1..=body_end).find(|&k| !infos[k].is_blank()) {
                docstring = string_literal(lines, first)
                    .map(|raw| clean_doc(&raw))
                    .filter(|doc| !doc.is_empty());
            }
            for info in &infos[sig_end + 1..=body_end.max(sig_end)] {
                if info.starts_in_string {
                    continue;
                }
                push_unique(
                    &mut variables,
                    self.patterns
                        .line_bindings(&info.code, info.depth_at_start == 0),
                );
            }
        } else {
            push_unique(&mut variables, self.patterns.line_bindings(inline_body, true));
        }

        let code_chunk = lines[def_line..=body_end]
            .iter()
            .map(|line| {
                let strip = line
                    .char_indices()
                    .take(indent)
                    .take_while(|(_, c)| c.is_whitespace())
                    .last()
                    .map_or(0, |(i, c)| i + c.len_utf8());
                &line[strip..]
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        Some(CodeRecord {
            repo_name: String::new(),
            filepath: String::new(),
            function_name: name.to_string(),
            code_chunk,
            variables,
            docstring,
        })
    }

    /// Writes `<repo_name>_code_dataset.json` into `dir` and returns its path.
    pub fn save_dataset(&self, dir: &Path) -> Result<PathBuf, CrawlError> {
        let path = dir.join(format!("{}_code_dataset.json", self.repo_name));
        let file = File::create(&path).map_err(|source| CrawlError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.dataset)?;
        info!(path = %path.display(), records = self.dataset.len(), "dataset saved");
        Ok(path)
    }
}

/// Symlinked directories are not followed. Subdirectories that cannot be read
/// are logged and skipped; only an unreadable `dir` itself is an error.
fn collect_python_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), CrawlError> {
    let entries = fs::read_dir(dir).map_err(|source| CrawlError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping directory entry");
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping directory entry");
                continue;
            }
        };
        if file_type.is_dir() {
            if let Err(e) = collect_python_files(&path, files) {
                warn!(error = %e, "skipping directory");
            }
        } else if file_type.is_symlink() && path.is_dir() {
            debug!(path = %path.display(), "not following symlinked directory");
        } else if path.extension().is_some_and(|e| e == "py") {
            files.push(path);
        }
    }
    Ok(())
}

/// Reads a dataset written by [`CodeAnalyzer::save_dataset`].
pub fn load_dataset(path: &Path) -> Result<Vec<CodeRecord>, CrawlError> {
    let file = File::open(path).map_err(|source| CrawlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_strips_strings_and_comments() {
        let lines = ["x = \"a # b\" # note", "y = '''start", "still (inside", "end''' + f(1,", "2)"];
        let infos = scan_lines(&lines);
        assert_eq!(infos[0].code.trim(), "x = \"\"");
        assert!(infos[2].starts_in_string);
        assert_eq!(infos[3].depth_at_end, 1);
        assert_eq!(infos[4].depth_at_start, 1);
        assert_eq!(infos[4].depth_at_end, 0);
    }

    fn names(code: &str) -> Vec<String> {
        assignment_targets(code).into_iter().map(|(_, name)| name).collect()
    }

    #[test]
    fn assignment_target_forms() {
        assert_eq!(names("a = 1"), vec!["a"]);
        assert_eq!(names("a, b = pair"), vec!["a", "b"]);
        assert_eq!(names("(a, b) = pair"), vec!["a", "b"]);
        assert_eq!(names("(a, b), c = nested"), vec!["a", "b", "c"]);
        assert_eq!(names("total: int = 0"), vec!["total"]);
        assert_eq!(names("count += 1"), vec!["count"]);
        assert_eq!(names("mask <<= 2"), vec!["mask"]);
        assert_eq!(names("x = y = 0"), vec!["x", "y"]);
        assert_eq!(names("a = 1; b = 2"), vec!["a", "b"]);
        assert!(names("self.x = 1").is_empty());
        assert!(names("items[0] = 1").is_empty());
        assert!(names("grid[i, j] = 1").is_empty());
        assert!(names("if a == b:").is_empty());
        assert!(names("call(key=value)").is_empty());
        assert!(names("return a <= b").is_empty());
    }

    #[test]
    fn starred_and_mixed_tuple_targets() {
        assert_eq!(names("first, *rest = items"), vec!["first", "rest"]);
        assert_eq!(names("*head, last = items"), vec!["head", "last"]);
        assert_eq!(names("self.a, b = pair"), vec!["b"]);
        assert_eq!(names("key = lambda a, b=1: a"), vec!["key"]);
    }

    #[test]
    fn bodies_after_compound_headers() {
        assert_eq!(names("if first: flag = True"), vec!["flag"]);
        assert_eq!(names("for i in r: total += i"), vec!["total"]);
        assert_eq!(names("else: x = 0"), vec!["x"]);
        assert_eq!(names("while (n := n - 1) > 0: seen = n"), vec!["seen"]);
        assert!(names("if items[1:2]:").is_empty());
    }

    #[test]
    fn bare_annotations_bind() {
        assert_eq!(names("total: int"), vec!["total"]);
        assert_eq!(names("cache: dict[str, int]"), vec!["cache"]);
        assert!(names("self.total: int").is_empty());
        assert!(names("lambda: 0").is_empty());
    }

    #[test]
    fn line_bindings_follow_source_order() {
        let patterns = Patterns::new().unwrap();
        assert_eq!(patterns.line_bindings("for i in r: total += i", true), vec!["i", "total"]);
        assert_eq!(patterns.line_bindings("x = [v for v in values]", true), vec!["x", "v"]);
        assert_eq!(patterns.line_bindings("x = [v for v in values]", false), vec!["v"]);
    }

    #[test]
    fn docstring_must_be_a_whole_statement() {
        assert_eq!(string_literal(&[r#"", ".join(items)"#], 0), None);
        assert_eq!(
            string_literal(&[r#""""Summary."""  # note"#], 0).as_deref(),
            Some("Summary.")
        );
        assert_eq!(string_literal(&["'''Start", "end'''.strip()"], 0), None);
        assert_eq!(string_literal(&["'plain'"], 0).as_deref(), Some("plain"));
    }

    #[test]
    fn parameters_in_source_order() {
        assert_eq!(
            parameter_names("self, a: int = 1, /, *args, b=(1, 2), **kw"),
            vec!["self", "a", "args", "b", "kw"]
        );
        assert!(parameter_names("").is_empty());
    }

    #[test]
    fn cleandoc_removes_common_margin() {
        let raw = "Summary line.\n\n        Details here.\n          indented\n    ";
        assert_eq!(clean_doc(raw), "Summary line.\n\nDetails here.\n  indented");
    }

    #[test]
    fn methods_and_nested_functions_are_found() {
        let source = "class A:\n    @property\n    def name(self):\n        return self._n\n\n    def outer(self):\n        def inner(x):\n            y = x\n            return y\n        return inner\n";
        let mut analyzer = CodeAnalyzer::new("/dummy", "repo").unwrap();
        assert_eq!(analyzer.analyze_source("a.py", source), 3);
        let names: Vec<&str> = analyzer
            .dataset()
            .iter()
            .map(|r| r.function_name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "outer", "inner"]);
        assert_eq!(
            analyzer.dataset()[0].code_chunk,
            "def name(self):\n    return self._n"
        );
        assert_eq!(analyzer.dataset()[1].variables, vec!["self", "y"]);
    }

    #[test]
    fn one_line_functions() {
        let mut analyzer = CodeAnalyzer::new("/dummy", "repo").unwrap();
        analyzer.analyze_source("a.py", "def f(a): b = a; return b\nx = 1\n");
        let record = &analyzer.dataset()[0];
        assert_eq!(record.code_chunk, "def f(a): b = a; return b");
        assert_eq!(record.variables, vec!["a", "b"]);
    }
}
