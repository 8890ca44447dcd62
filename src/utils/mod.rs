//! Utilities (text helpers, script input).

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

const INDENT: &[char] = &[' ', '\t'];

/// Remove the longest space/tab prefix shared by all non-blank lines.
/// Lines holding only spaces and tabs are normalized to empty.
pub fn dedent(text: &str) -> String {
    let margin = text
        .split('\n')
        .filter(|l| !is_blank(l))
        .map(|l| &l[..l.len() - l.trim_start_matches(INDENT).len()])
        .reduce(common_prefix)
        .unwrap_or("");

    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let (body, eol) = match line.strip_suffix('\n') {
            Some(b) => (b, "\n"),
            None => (line, ""),
        };
        if is_blank(body) {
            out.push_str(eol);
        } else {
            out.push_str(body.strip_prefix(margin).unwrap_or(body));
            out.push_str(eol);
        }
    }
    out
}

fn is_blank(line: &str) -> bool {
    line.trim_start_matches(INDENT).is_empty()
}

fn common_prefix<'a>(a: &'a str, b: &'a str) -> &'a str {
    let n = a
        .char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map(|((i, c), _)| i + c.len_utf8())
        .unwrap_or(0);
    &a[..n]
}

/// Read a code cell from a file path.
pub fn read_cell(file_path: &str) -> Result<String> {
    let path = Path::new(file_path);

    if !path.exists() {
        bail!("Code file '{}' does not exist", file_path);
    }
    if !path.is_file() {
        bail!("'{}' is not a file", file_path);
    }

    fs::read_to_string(path).with_context(|| format!("Failed to read file '{}'", file_path))
}
