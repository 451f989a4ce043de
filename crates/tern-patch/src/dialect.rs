// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The local patch dialect.
//!
//! A patch is a sequence of file sections:
//!
//! ```text
//! *** Update File: path/to/existing.rs
//! @@ context anchor @@
//!  unchanged line
//! -removed line
//! +added line
//! *** Add File: path/to/new.rs
//! +content line
//! *** Delete File: path/to/old.rs
//! ```
//!
//! Hunk headers accept both `@@ anchor` and `@@ anchor @@`.  An optional
//! `*** Begin Patch` / `*** End Patch` envelope is tolerated and ignored.

use crate::PatchError;

const UPDATE: &str = "*** Update File: ";
const ADD: &str = "*** Add File: ";
const DELETE: &str = "*** Delete File: ";

/// One contiguous edit within an Update section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Text that must appear (whitespace-normalized) in the target file.
    pub anchor: String,
    /// `(' '|'-'|'+', line)` in patch order.
    pub lines: Vec<(char, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    Update(Vec<Hunk>),
    Add(String),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection {
    pub path: String,
    pub op: FileOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchSet {
    pub sections: Vec<FileSection>,
}

/// Syntactic check used by the Auto strategy: does this edit text look like
/// the local dialect?
pub fn is_patch_dialect(text: &str) -> bool {
    text.lines().map(str::trim_start).any(|l| {
        l.starts_with(UPDATE.trim_end())
            || l.starts_with(ADD.trim_end())
            || l.starts_with(DELETE.trim_end())
    })
}

/// Parse a patch.  Sections are returned in input order.
pub fn parse_patch(text: &str) -> Result<PatchSet, PatchError> {
    let mut sections: Vec<FileSection> = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();
        if trimmed.trim() == "*** Begin Patch" || trimmed.trim() == "*** End Patch" {
            continue;
        }
        if let Some(path) = trimmed.strip_prefix(UPDATE) {
            let path = path.trim().to_string();
            if path.is_empty() {
                return Err(PatchError::Parse("Update File with empty path".into()));
            }
            let hunks = parse_hunks(&mut lines)?;
            if hunks.is_empty() {
                return Err(PatchError::Parse(format!(
                    "Update File section for {path} has no hunks"
                )));
            }
            sections.push(FileSection { path, op: FileOp::Update(hunks) });
        } else if let Some(path) = trimmed.strip_prefix(ADD) {
            let path = path.trim().to_string();
            if path.is_empty() {
                return Err(PatchError::Parse("Add File with empty path".into()));
            }
            let content = parse_add_content(&mut lines);
            sections.push(FileSection { path, op: FileOp::Add(content) });
        } else if let Some(path) = trimmed.strip_prefix(DELETE) {
            let path = path.trim().to_string();
            if path.is_empty() {
                return Err(PatchError::Parse("Delete File with empty path".into()));
            }
            sections.push(FileSection { path, op: FileOp::Delete });
        } else if !trimmed.trim().is_empty() {
            return Err(PatchError::Parse(format!(
                "unexpected line outside any section: {trimmed:?}"
            )));
        }
    }

    if sections.is_empty() {
        return Err(PatchError::Parse("patch contains no file sections".into()));
    }
    Ok(PatchSet { sections })
}

fn is_section_start(line: &str) -> bool {
    let t = line.trim_end();
    t.starts_with("*** ")
}

fn parse_hunks<'a, I: Iterator<Item = &'a str>>(
    lines: &mut std::iter::Peekable<I>,
) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks = Vec::new();

    while let Some(&line) = lines.peek() {
        if is_section_start(line) {
            break;
        }
        let line = lines.next().unwrap_or_default();
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            continue;
        }
        let Some(header) = trimmed.strip_prefix("@@") else {
            return Err(PatchError::Parse(format!(
                "expected '@@ anchor' hunk header, got {trimmed:?}"
            )));
        };
        // Both `@@ anchor` and `@@ anchor @@` are accepted.
        let anchor = header
            .trim()
            .trim_end_matches("@@")
            .trim()
            .to_string();
        if anchor.is_empty() {
            return Err(PatchError::Parse("hunk header has an empty anchor".into()));
        }

        let mut body: Vec<(char, String)> = Vec::new();
        while let Some(&next) = lines.peek() {
            let t = next.trim_end();
            if is_section_start(t) || t.starts_with("@@") {
                break;
            }
            let next = lines.next().unwrap_or_default();
            if let Some(rest) = next.strip_prefix('+') {
                body.push(('+', rest.to_string()));
            } else if let Some(rest) = next.strip_prefix('-') {
                body.push(('-', rest.to_string()));
            } else if let Some(rest) = next.strip_prefix(' ') {
                body.push((' ', rest.to_string()));
            } else if next.trim().is_empty() {
                // Blank separator between hunks.
                continue;
            } else {
                return Err(PatchError::Parse(format!(
                    "hunk line must start with '+', '-' or ' ': {next:?}"
                )));
            }
        }
        hunks.push(Hunk { anchor, lines: body });
    }

    Ok(hunks)
}

fn parse_add_content<'a, I: Iterator<Item = &'a str>>(
    lines: &mut std::iter::Peekable<I>,
) -> String {
    let mut content: Vec<String> = Vec::new();
    while let Some(&line) = lines.peek() {
        if is_section_start(line) {
            break;
        }
        let line = lines.next().unwrap_or_default();
        match line.strip_prefix('+') {
            Some(rest) => content.push(rest.to_string()),
            None => content.push(line.to_string()),
        }
    }
    let mut joined = content.join("\n");
    if !joined.is_empty() && !joined.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dialect_by_section_markers() {
        assert!(is_patch_dialect("*** Update File: a.rs\n@@ x @@\n+1"));
        assert!(is_patch_dialect("*** Add File: b.rs\n+1"));
        assert!(is_patch_dialect("*** Delete File: c.rs"));
        assert!(!is_patch_dialect("just change the loop to use an iterator"));
        assert!(!is_patch_dialect("// ... existing code ...\nlet x = 1;"));
    }

    #[test]
    fn parses_update_section_with_one_hunk() {
        let patch = "*** Update File: src/lib.rs\n@@ fn main @@\n line\n-old\n+new\n";
        let set = parse_patch(patch).unwrap();
        assert_eq!(set.sections.len(), 1);
        let section = &set.sections[0];
        assert_eq!(section.path, "src/lib.rs");
        match &section.op {
            FileOp::Update(hunks) => {
                assert_eq!(hunks.len(), 1);
                assert_eq!(hunks[0].anchor, "fn main");
                assert_eq!(
                    hunks[0].lines,
                    vec![
                        (' ', "line".to_string()),
                        ('-', "old".to_string()),
                        ('+', "new".to_string()),
                    ]
                );
            }
            other => panic!("wrong op: {other:?}"),
        }
    }

    #[test]
    fn anchor_trailing_marker_is_stripped() {
        let patch = "*** Update File: f\n@@ line two @@\n+x\n";
        let set = parse_patch(patch).unwrap();
        match &set.sections[0].op {
            FileOp::Update(hunks) => assert_eq!(hunks[0].anchor, "line two"),
            other => panic!("wrong op: {other:?}"),
        }
    }

    #[test]
    fn parses_multiple_sections_in_order() {
        let patch = "\
*** Add File: new.txt
+hello
*** Update File: old.txt
@@ top @@
-a
+b
*** Delete File: gone.txt
";
        let set = parse_patch(patch).unwrap();
        assert_eq!(set.sections.len(), 3);
        assert!(matches!(set.sections[0].op, FileOp::Add(_)));
        assert!(matches!(set.sections[1].op, FileOp::Update(_)));
        assert!(matches!(set.sections[2].op, FileOp::Delete));
    }

    #[test]
    fn add_content_strips_plus_prefix_and_ends_with_newline() {
        let patch = "*** Add File: n.txt\n+line 1\n+line 2\n";
        let set = parse_patch(patch).unwrap();
        match &set.sections[0].op {
            FileOp::Add(content) => assert_eq!(content, "line 1\nline 2\n"),
            other => panic!("wrong op: {other:?}"),
        }
    }

    #[test]
    fn begin_end_envelope_is_tolerated() {
        let patch = "*** Begin Patch\n*** Delete File: x\n*** End Patch\n";
        let set = parse_patch(patch).unwrap();
        assert_eq!(set.sections.len(), 1);
    }

    #[test]
    fn multiple_hunks_in_one_section() {
        let patch = "*** Update File: f\n@@ first @@\n+a\n@@ second @@\n+b\n";
        let set = parse_patch(patch).unwrap();
        match &set.sections[0].op {
            FileOp::Update(hunks) => {
                assert_eq!(hunks.len(), 2);
                assert_eq!(hunks[1].anchor, "second");
            }
            other => panic!("wrong op: {other:?}"),
        }
    }

    #[test]
    fn empty_patch_is_parse_error() {
        assert!(matches!(parse_patch(""), Err(PatchError::Parse(_))));
        assert!(matches!(parse_patch("nothing here"), Err(PatchError::Parse(_))));
    }

    #[test]
    fn update_without_hunks_is_parse_error() {
        assert!(matches!(
            parse_patch("*** Update File: f\n"),
            Err(PatchError::Parse(_))
        ));
    }

    #[test]
    fn garbage_hunk_line_is_parse_error() {
        let patch = "*** Update File: f\n@@ a @@\nno prefix here\n";
        assert!(matches!(parse_patch(patch), Err(PatchError::Parse(_))));
    }
}
