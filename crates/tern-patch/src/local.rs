// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The local context-matching applier.
//!
//! Matching is exact over a whitespace-normalized comparison: runs of
//! spaces/tabs collapse to one space and edge whitespace is ignored, while
//! line boundaries are preserved.  Application is all-or-nothing per patch:
//! a failing hunk aborts before anything is written.

use crate::{FileOp, FileSection, Hunk, PatchError};

/// Collapse runs of spaces/tabs and trim the ends; line boundaries are the
/// caller's concern.
pub(crate) fn normalize_ws(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lines_of(content: &str) -> Vec<String> {
    content.lines().map(str::to_string).collect()
}

/// Apply every hunk of an Update section to `content`, returning the new
/// content.  The file on disk is untouched; the engine is responsible for
/// write-back.
pub fn apply_section(content: &str, section: &FileSection) -> Result<String, PatchError> {
    let hunks = match &section.op {
        FileOp::Update(hunks) => hunks,
        FileOp::Add(new_content) => return Ok(new_content.clone()),
        FileOp::Delete => return Ok(String::new()),
    };

    let mut lines = lines_of(content);
    let had_trailing_newline = content.ends_with('\n') || content.is_empty();

    for hunk in hunks {
        apply_hunk(&mut lines, hunk, &section.path)?;
    }

    let mut result = lines.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn apply_hunk(lines: &mut Vec<String>, hunk: &Hunk, file: &str) -> Result<(), PatchError> {
    let anchor_norm = normalize_ws(&hunk.anchor);

    // Rule 1: the first occurrence of the anchor wins.  Callers that need
    // disambiguation must widen the anchor.
    let anchor_pos = lines
        .iter()
        .position(|l| normalize_ws(l) == anchor_norm)
        .ok_or_else(|| PatchError::AnchorNotFound {
            file: file.to_string(),
            anchor: hunk.anchor.clone(),
        })?;

    // The hunk body's ` `/`-` lines must match a consecutive run of file
    // lines.  The run must contain the anchor line (or begin directly after
    // it, for hunks whose context doesn't repeat the anchor).
    let expected: Vec<String> = hunk
        .lines
        .iter()
        .filter(|(c, _)| *c == ' ' || *c == '-')
        .map(|(_, l)| normalize_ws(l))
        .collect();

    if expected.is_empty() {
        // Pure insertion: place the added lines directly after the anchor.
        let additions: Vec<String> = hunk
            .lines
            .iter()
            .filter(|(c, _)| *c == '+')
            .map(|(_, l)| l.clone())
            .collect();
        lines.splice(anchor_pos + 1..anchor_pos + 1, additions);
        return Ok(());
    }

    let start = find_match_position(lines, &expected, anchor_pos).ok_or_else(|| {
        PatchError::ContextMismatch {
            file: file.to_string(),
            anchor: hunk.anchor.clone(),
        }
    })?;

    // Rule 2: walk the hunk against the file from the match position.
    let mut replacement: Vec<String> = Vec::new();
    let mut cursor = start;
    for (kind, line) in &hunk.lines {
        match kind {
            ' ' => {
                replacement.push(lines[cursor].clone());
                cursor += 1;
            }
            '-' => {
                cursor += 1;
            }
            '+' => {
                replacement.push(line.clone());
            }
            _ => unreachable!("parser only emits ' ', '-', '+'"),
        }
    }
    lines.splice(start..cursor, replacement);
    Ok(())
}

/// Find the first position where `expected` matches a consecutive run of
/// (normalized) file lines, constrained to runs that include the anchor line
/// or begin directly after it.
fn find_match_position(lines: &[String], expected: &[String], anchor_pos: usize) -> Option<usize> {
    let lo = (anchor_pos + 1).saturating_sub(expected.len());
    let hi = (anchor_pos + 1).min(lines.len());
    (lo..=hi).find(|&p| matches_at(lines, p, expected))
}

fn matches_at(lines: &[String], start: usize, expected: &[String]) -> bool {
    if start + expected.len() > lines.len() {
        return false;
    }
    expected
        .iter()
        .enumerate()
        .all(|(i, exp)| normalize_ws(&lines[start + i]) == *exp)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
