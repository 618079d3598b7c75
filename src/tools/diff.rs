// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Compact diff summaries for file mutations
//!
//! Produces a position-aligned line diff: lines are compared at the same
//! index rather than via sequence alignment. This keeps the summary cheap
//! and predictable for the model, at the cost of over-reporting around
//! insertions. Changed regions are shown with surrounding context and the
//! whole summary is capped.

/// Context lines shown on each side of a changed region
const CONTEXT_LINES: usize = 3;
/// Regions separated by at most this many unchanged lines are merged
const MERGE_GAP: usize = 2;
/// Maximum lines emitted before the summary is cut off
const MAX_DIFF_LINES: usize = 30;

/// A rendered diff along with change counts
#[derive(Debug, Clone)]
pub struct DiffSummary {
    pub text: String,
    pub added: usize,
    pub removed: usize,
}

impl DiffSummary {
    /// Short "+A -R" form for result headers
    pub fn counts(&self) -> String {
        format!("+{} -{}", self.added, self.removed)
    }
}

#[derive(Debug, PartialEq)]
enum Row {
    Same(String),
    Removed(String),
    Added(String),
}

impl Row {
    fn render(&self) -> String {
        match self {
            Row::Same(l) => format!("  {}", l),
            Row::Removed(l) => format!("- {}", l),
            Row::Added(l) => format!("+ {}", l),
        }
    }
}

/// Summarize the change from `old` to `new`
pub fn summarize_diff(old: &str, new: &str) -> DiffSummary {
    let old_lines: Vec<&str> = if old.is_empty() { Vec::new() } else { old.lines().collect() };
    let new_lines: Vec<&str> = if new.is_empty() { Vec::new() } else { new.lines().collect() };

    let positions = old_lines.len().max(new_lines.len());
    let mut rows: Vec<Row> = Vec::new();
    // Aligned position of each row, used for grouping
    let mut row_pos: Vec<usize> = Vec::new();
    let mut changed_positions: Vec<usize> = Vec::new();
    let mut added = 0usize;
    let mut removed = 0usize;

    for i in 0..positions {
        match (old_lines.get(i), new_lines.get(i)) {
            (Some(o), Some(n)) if o == n => {
                rows.push(Row::Same((*o).to_string()));
                row_pos.push(i);
            }
            (Some(o), Some(n)) => {
                changed_positions.push(i);
                removed += 1;
                added += 1;
                rows.push(Row::Removed((*o).to_string()));
                row_pos.push(i);
                rows.push(Row::Added((*n).to_string()));
                row_pos.push(i);
            }
            (Some(o), None) => {
                changed_positions.push(i);
                removed += 1;
                rows.push(Row::Removed((*o).to_string()));
                row_pos.push(i);
            }
            (None, Some(n)) => {
                changed_positions.push(i);
                added += 1;
                rows.push(Row::Added((*n).to_string()));
                row_pos.push(i);
            }
            (None, None) => unreachable!(),
        }
    }

    if changed_positions.is_empty() {
        return DiffSummary {
            text: "(no changes)".to_string(),
            added: 0,
            removed: 0,
        };
    }

    // Build context windows around changed positions, then merge close ones
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &pos in &changed_positions {
        let start = pos.saturating_sub(CONTEXT_LINES);
        let end = (pos + CONTEXT_LINES).min(positions - 1);
        match ranges.last_mut() {
            Some((_, prev_end)) if start <= *prev_end + MERGE_GAP + 1 => {
                *prev_end = (*prev_end).max(end);
            }
            _ => ranges.push((start, end)),
        }
    }

    let mut out: Vec<String> = Vec::new();
    let mut emitted = 0usize;
    let mut omitted = 0usize;

    for (ri, &(start, end)) in ranges.iter().enumerate() {
        if ri > 0 && emitted < MAX_DIFF_LINES {
            out.push("...".to_string());
        }
        for (row, &pos) in rows.iter().zip(row_pos.iter()) {
            if pos < start || pos > end {
                continue;
            }
            if emitted < MAX_DIFF_LINES {
                out.push(row.render());
                emitted += 1;
            } else {
                omitted += 1;
            }
        }
    }

    if omitted > 0 {
        out.push(format!("... ({} more lines)", omitted));
    }

    DiffSummary {
        text: out.join("\n"),
        added,
        removed,
    }
}

/// Summary for a newly created file, where every line is an addition
pub fn summarize_new_file(content: &str) -> DiffSummary {
    summarize_diff("", content)
}
