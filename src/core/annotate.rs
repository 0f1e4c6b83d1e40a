//! Unified-diff annotation against a base file.
//!
//! The remote sends each change as a unified diff plus the base revision of
//! the file. [`annotate`] merges the two into one dense line sequence
//! covering the whole file, with each line carrying its change mode and its
//! old/new line numbers.

use thiserror::Error;

/// Change mode of an annotated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Present in both revisions.
    Unchanged,
    /// Present only in the new revision.
    Added,
    /// Present only in the old revision.
    Removed,
}

impl Mode {
    /// Index used to select a background from the render palette.
    pub fn palette_index(self) -> usize {
        match self {
            Mode::Unchanged => 0,
            Mode::Added => 1,
            Mode::Removed => 2,
        }
    }
}

/// One displayed row of a file: text, change mode, and line numbers.
///
/// `old_line` is `None` for added lines, `new_line` is `None` for removed
/// lines; unchanged lines carry both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedLine {
    /// Line content without the trailing newline.
    pub text: String,
    /// Change mode.
    pub mode: Mode,
    /// 1-based line number in the old revision, where applicable.
    pub old_line: Option<usize>,
    /// 1-based line number in the new revision, where applicable.
    pub new_line: Option<usize>,
}

/// A parsed hunk: where it applies in the base, and its lines.
#[derive(Debug, Clone)]
pub struct Hunk {
    /// 1-based first base line the hunk consumes (0 for pure insertions
    /// before the first line, as in new-file diffs).
    pub base_start: usize,
    /// Number of old lines the hunk consumes.
    pub old_count: usize,
    /// 1-based first new line the hunk produces.
    pub new_start: usize,
    /// Number of new lines the hunk produces.
    pub new_count: usize,
    /// The hunk body, already annotated with line numbers.
    pub lines: Vec<AnnotatedLine>,
}

/// Errors from diff parsing and annotation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotateError {
    /// A `@@` line that does not match the hunk header shape.
    #[error("malformed hunk header at diff line {line_no}")]
    BadHunkHeader {
        /// 1-based line number within the diff text.
        line_no: usize,
    },
    /// A hunk body line starting with something other than ` `, `+`, `-`.
    #[error("unrecognized prefix at diff line {line_no}")]
    BadPrefix {
        /// 1-based line number within the diff text.
        line_no: usize,
    },
    /// A hunk that starts before the current base cursor.
    #[error("hunk starts at base line {base_start} but base cursor is already at {cursor}")]
    OutOfOrderHunk {
        /// The offending hunk's base start.
        base_start: usize,
        /// The annotator's base cursor when the hunk was reached.
        cursor: usize,
    },
}

/// Parse the `-S,L` / `+S,L` half of a hunk header. The `,L` part is
/// optional and defaults to 1 (`@@ -3 +3 @@` is what git emits for
/// single-line files).
fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Parse `@@ -S,L +S,L @@ optional-context` into the two ranges.
fn parse_hunk_header(line: &str) -> Option<((usize, usize), (usize, usize))> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_part, rest) = rest.split_once(" +")?;
    let (new_part, _context) = rest.split_once(" @@")?;
    Some((parse_range(old_part)?, parse_range(new_part)?))
}

/// Parse unified-diff text into hunks.
///
/// Lines inside a hunk must start with ` `, `+` or `-`; empty lines (the
/// artifact of splitting text that ends in a newline) are skipped.
pub fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, AnnotateError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut a = 0usize;
    let mut b = 0usize;

    for (idx, line) in diff.lines().enumerate() {
        let line_no = idx + 1;

        if line.is_empty() {
            continue;
        }

        if line.starts_with('@') {
            let ((old_start, old_count), (new_start, new_count)) =
                parse_hunk_header(line).ok_or(AnnotateError::BadHunkHeader { line_no })?;

            a = old_start;
            b = new_start;
            hunks.push(Hunk {
                base_start: old_start,
                old_count,
                new_start,
                new_count,
                lines: Vec::new(),
            });
            continue;
        }

        let hunk = hunks
            .last_mut()
            .ok_or(AnnotateError::BadPrefix { line_no })?;

        match line.as_bytes()[0] {
            b'+' => {
                hunk.lines.push(AnnotatedLine {
                    text: line[1..].to_string(),
                    mode: Mode::Added,
                    old_line: None,
                    new_line: Some(b),
                });
                b += 1;
            }
            b'-' => {
                hunk.lines.push(AnnotatedLine {
                    text: line[1..].to_string(),
                    mode: Mode::Removed,
                    old_line: Some(a),
                    new_line: None,
                });
                a += 1;
            }
            b' ' => {
                hunk.lines.push(AnnotatedLine {
                    text: line[1..].to_string(),
                    mode: Mode::Unchanged,
                    old_line: Some(a),
                    new_line: Some(b),
                });
                a += 1;
                b += 1;
            }
            _ => return Err(AnnotateError::BadPrefix { line_no }),
        }
    }

    Ok(hunks)
}

/// Split base text into lines, dropping the trailing empty element produced
/// by a final newline.
fn base_lines(base: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = base.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Merge a unified diff with the base file into a dense annotated sequence.
///
/// For a deleted file the diff is ignored and every base line becomes a
/// Removed line. Otherwise the base is walked line by line: when the next
/// hunk applies at the current base cursor its body is emitted verbatim and
/// the cursors jump past the lines the hunk consumed/produced; everywhere
/// else the base line is emitted as Unchanged.
pub fn annotate(base: &str, diff: &str, deleted: bool) -> Result<Vec<AnnotatedLine>, AnnotateError> {
    let base = base_lines(base);

    if deleted {
        return Ok(base
            .iter()
            .enumerate()
            .map(|(idx, text)| AnnotatedLine {
                text: (*text).to_string(),
                mode: Mode::Removed,
                old_line: Some(idx + 1),
                new_line: None,
            })
            .collect());
    }

    let hunks = parse_hunks(diff)?;
    let mut next_hunk = hunks.iter();
    let mut pending = next_hunk.next();

    let mut out: Vec<AnnotatedLine> = Vec::with_capacity(base.len());
    let mut a = 1usize; // next base line to consume
    let mut b = 1usize; // next new line to produce

    loop {
        match pending {
            Some(hunk) if hunk.base_start <= a => {
                // base_start == 0 is a pure insertion before line 1, legal
                // only while nothing has been consumed yet
                let insertion_at_top = hunk.base_start == 0 && a == 1;
                if hunk.base_start < a && !insertion_at_top {
                    return Err(AnnotateError::OutOfOrderHunk {
                        base_start: hunk.base_start,
                        cursor: a,
                    });
                }
                out.extend(hunk.lines.iter().cloned());
                a = if insertion_at_top {
                    1
                } else {
                    hunk.base_start + hunk.old_count
                };
                b = hunk.new_start + hunk.new_count;
                pending = next_hunk.next();
            }
            _ => {
                if a > base.len() {
                    break;
                }
                out.push(AnnotatedLine {
                    text: base[a - 1].to_string(),
                    mode: Mode::Unchanged,
                    old_line: Some(a),
                    new_line: Some(b),
                });
                a += 1;
                b += 1;
            }
        }

        if pending.is_none() && a > base.len() {
            break;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(lines: &[AnnotatedLine]) -> Vec<(Mode, &str, Option<usize>, Option<usize>)> {
        lines
            .iter()
            .map(|l| (l.mode, l.text.as_str(), l.old_line, l.new_line))
            .collect()
    }

    #[test]
    fn simple_hunk() {
        let base = "A\nB\nC\nD\n";
        let diff = "@@ -2,2 +2,2 @@\n-B\n-C\n+X\n+Y\n";
        let lines = annotate(base, diff, false).unwrap();
        assert_eq!(
            brief(&lines),
            vec![
                (Mode::Unchanged, "A", Some(1), Some(1)),
                (Mode::Removed, "B", Some(2), None),
                (Mode::Removed, "C", Some(3), None),
                (Mode::Added, "X", None, Some(2)),
                (Mode::Added, "Y", None, Some(3)),
                (Mode::Unchanged, "D", Some(4), Some(4)),
            ]
        );
    }

    #[test]
    fn deleted_file() {
        let lines = annotate("l1\nl2\n", "ignored", true).unwrap();
        assert_eq!(
            brief(&lines),
            vec![
                (Mode::Removed, "l1", Some(1), None),
                (Mode::Removed, "l2", Some(2), None),
            ]
        );
    }

    #[test]
    fn new_file() {
        let diff = "@@ -0,0 +1,2 @@\n+one\n+two\n";
        let lines = annotate("", diff, false).unwrap();
        assert_eq!(
            brief(&lines),
            vec![
                (Mode::Added, "one", None, Some(1)),
                (Mode::Added, "two", None, Some(2)),
            ]
        );
    }

    #[test]
    fn short_form_header() {
        let diff = "@@ -1 +1 @@\n-old\n+new\n";
        let lines = annotate("old\n", diff, false).unwrap();
        assert_eq!(
            brief(&lines),
            vec![
                (Mode::Removed, "old", Some(1), None),
                (Mode::Added, "new", None, Some(1)),
            ]
        );
    }

    #[test]
    fn multiple_hunks_with_gap() {
        let base = "a\nb\nc\nd\ne\nf\n";
        let diff = "@@ -1,1 +1,1 @@\n-a\n+A\n@@ -5,1 +5,1 @@\n-e\n+E\n";
        let lines = annotate(base, diff, false).unwrap();
        assert_eq!(
            brief(&lines),
            vec![
                (Mode::Removed, "a", Some(1), None),
                (Mode::Added, "A", None, Some(1)),
                (Mode::Unchanged, "b", Some(2), Some(2)),
                (Mode::Unchanged, "c", Some(3), Some(3)),
                (Mode::Unchanged, "d", Some(4), Some(4)),
                (Mode::Removed, "e", Some(5), None),
                (Mode::Added, "E", None, Some(5)),
                (Mode::Unchanged, "f", Some(6), Some(6)),
            ]
        );
    }

    #[test]
    fn hunk_with_context_lines() {
        let base = "a\nb\nc\n";
        let diff = "@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
        let lines = annotate(base, diff, false).unwrap();
        assert_eq!(
            brief(&lines),
            vec![
                (Mode::Unchanged, "a", Some(1), Some(1)),
                (Mode::Removed, "b", Some(2), None),
                (Mode::Added, "B", None, Some(2)),
                (Mode::Unchanged, "c", Some(3), Some(3)),
            ]
        );
    }

    #[test]
    fn bad_header_is_an_error() {
        let err = annotate("a\n", "@@ -x,1 +1,1 @@\n-a\n", false).unwrap_err();
        assert_eq!(err, AnnotateError::BadHunkHeader { line_no: 1 });
    }

    #[test]
    fn bad_prefix_is_an_error() {
        let err = annotate("a\n", "@@ -1,1 +1,1 @@\n*a\n", false).unwrap_err();
        assert_eq!(err, AnnotateError::BadPrefix { line_no: 2 });
    }

    #[test]
    fn out_of_order_hunks_are_an_error() {
        let base = "a\nb\nc\nd\n";
        let diff = "@@ -3,1 +3,1 @@\n-c\n+C\n@@ -2,1 +2,1 @@\n-b\n+B\n";
        let err = annotate(base, diff, false).unwrap_err();
        assert!(matches!(err, AnnotateError::OutOfOrderHunk { .. }));
    }

    #[test]
    fn old_side_reconstructs_base() {
        // Property: Unchanged+Removed lines in order reproduce the base, and
        // old line numbers count 1..N.
        let base = "fn main() {\n    one();\n    two();\n}\n";
        let diff = "@@ -2,2 +2,1 @@\n-    one();\n-    two();\n+    both();\n";
        let lines = annotate(base, diff, false).unwrap();

        let old: Vec<&AnnotatedLine> = lines
            .iter()
            .filter(|l| l.mode != Mode::Added)
            .collect();
        let rebuilt: String = old.iter().map(|l| format!("{}\n", l.text)).collect();
        assert_eq!(rebuilt, base);

        for (idx, line) in old.iter().enumerate() {
            assert_eq!(line.old_line, Some(idx + 1));
        }
    }

    #[test]
    fn new_side_matches_header_counts() {
        let base = "a\nb\nc\nd\n";
        let diff = "@@ -2,2 +2,3 @@\n-b\n-c\n+x\n+y\n+z\n";
        let lines = annotate(base, diff, false).unwrap();

        let new: Vec<&AnnotatedLine> = lines
            .iter()
            .filter(|l| l.mode != Mode::Removed)
            .collect();
        // post-image: a, x, y, z, d
        assert_eq!(new.len(), 5);
        for (idx, line) in new.iter().enumerate() {
            assert_eq!(line.new_line, Some(idx + 1));
        }
    }
}
